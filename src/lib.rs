//! # Uplifter
//!
//! GenAI-assisted modernization of legacy source trees. Uplifter walks a
//! repository, splits each file into structure-aware chunks that fit an
//! LLM's context window, asks the model to modernize each chunk for a
//! target language version with organization guidance from a RAG service,
//! and replaces a file only when a conservative safety validator accepts
//! the result. Any remote failure falls back to a deterministic rewriter.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────┐   ┌─────────────────────────┐   ┌───────────┐
//! │ discover  │──▶│ findings │──▶│ engine                  │──▶│ validator │
//! │ walk+glob │   │ scan/mvn │   │ chunk→prompt→LLM→extract│   │ accept or │
//! └───────────┘   └──────────┘   │   │ RAG once per file   │   │ reject    │
//!                                │   └─► fallback rewriter │   └─────┬─────┘
//!                                └─────────────────────────┘         ▼
//!                                                            backup + atomic write
//! ```
//!
//! Pure logic (chunking, prompts, extraction, fallback, validation) lives
//! in the `uplifter-core` crate; this crate wires it to files, HTTP
//! services and the CLI.
//!
//! ## Quick Start
//!
//! ```bash
//! uplift chunk legacy/app.py                 # show the chunk plan
//! uplift run --target 3.9 --root ./legacy    # modernize a tree
//! uplift run --fallback-only                 # no remote calls
//! uplift validate old.py new.py              # run the safety gate
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration, overrides and validation |
//! | [`error`] | Typed errors at component boundaries |
//! | [`events`] | Broadcast event bus for run progress |
//! | [`progress`] | Human / JSON progress reporters |
//! | [`discover`] | Source file discovery |
//! | [`findings`] | Static analysis (Python scanner, Maven Modernizer) |
//! | [`traits`] | Collaborator traits: findings, guidance, completion |
//! | [`rag`] | RAG guidance client and library tiers |
//! | [`llm`] | HTTP completion client |
//! | [`engine`] | Chunked rewrite with per-chunk fallback |
//! | [`pipeline`] | Per-file pipeline and run loop |
//! | [`report`] | Plain-text run summary |

pub mod config;
pub mod discover;
pub mod engine;
pub mod error;
pub mod events;
pub mod findings;
pub mod llm;
pub mod pipeline;
pub mod progress;
pub mod rag;
pub mod report;
pub mod traits;
