//! # Uplifter Core
//!
//! Pure logic for Uplifter: token estimation, structure analysis,
//! structure-aware chunking, prompt rendering, reply extraction, chunk
//! reassembly, the deterministic fallback rewriter, and the safety
//! validator.
//!
//! This crate does no I/O. It has no tokio, HTTP, or filesystem
//! dependencies; the application crate wires it to the LLM and RAG
//! services and to the files on disk.
//!
//! | Module | Role |
//! |--------|------|
//! | [`language`] | `Language` variants and their per-language strategies |
//! | [`lexer`] | line lexer shared by analysis, fallback and validation |
//! | [`tokens`] | character-ratio token estimator |
//! | [`structure`] | statement spans and safe boundaries |
//! | [`chunk`] | budgeted, structure-aware chunk planning |
//! | [`guidance`] | RAG evidence bundle and topic queries |
//! | [`prompt`] | prompt envelope rendering under a budget |
//! | [`extract`] | reply parsing and truncation screening |
//! | [`assemble`] | chunk reassembly |
//! | [`fallback`] | deterministic rewrite catalog |
//! | [`validate`] | candidate safety gate |
//! | [`models`] | jobs, file states and outcomes |

pub mod assemble;
pub mod chunk;
pub mod extract;
pub mod fallback;
pub mod guidance;
pub mod language;
pub mod lexer;
pub mod models;
pub mod prompt;
pub mod structure;
pub mod tokens;
pub mod validate;
