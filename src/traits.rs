//! Collaborator traits for the rewrite pipeline.
//!
//! The pipeline talks to three outside collaborators, each behind a trait
//! so runs can be wired to real services or to in-process fakes:
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                     Pipeline                     │
//! │  ┌──────────────┐ ┌──────────────┐ ┌──────────┐  │
//! │  │FindingsSource│ │GuidanceSource│ │Completion│  │
//! │  │ scanner/mvn  │ │ RAG service  │ │ Backend  │  │
//! │  └──────────────┘ └──────────────┘ └──────────┘  │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! None of the three may fail the file: findings degrade to
//! `"unavailable"`, guidance degrades to a not-found bundle, and completion
//! failures are returned as [`RemoteFailure`] so the engine can run the
//! deterministic fallback for that chunk.

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

use uplifter_core::guidance::GuidanceBundle;
use uplifter_core::models::ModernizationJob;

use crate::error::RemoteFailure;

// ═══════════════════════════════════════════════════════════════════════
// Findings
// ═══════════════════════════════════════════════════════════════════════

/// Static analysis producing the findings text for one file.
///
/// The text is free-form. It is rendered into the prompt and its keywords
/// gate the fallback catalog, so implementations should name the problems
/// they see in plain words ("print statements", "xrange", ...).
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use std::path::Path;
/// use uplifter::traits::FindingsSource;
///
/// struct Fixed(&'static str);
///
/// #[async_trait]
/// impl FindingsSource for Fixed {
///     fn name(&self) -> &str { "fixed" }
///     async fn analyze(&self, _path: &Path, _code: &str, _target: &str) -> String {
///         self.0.to_string()
///     }
/// }
/// ```
#[async_trait]
pub trait FindingsSource: Send + Sync {
    fn name(&self) -> &str;

    /// Findings for `code` (read from `path`) against `target_version`.
    /// Returns `"unavailable"` when analysis cannot run.
    async fn analyze(&self, path: &Path, code: &str, target_version: &str) -> String;
}

// ═══════════════════════════════════════════════════════════════════════
// Guidance
// ═══════════════════════════════════════════════════════════════════════

/// Retrieval of modernization guidance for one job.
///
/// The job carries the code issue (its findings), the context (language
/// and target version) and the library filter. Called once per file; the
/// bundle is reused for every chunk.
#[async_trait]
pub trait GuidanceSource: Send + Sync {
    fn name(&self) -> &str;

    /// Never fails: errors become a bundle with `found == false` and the
    /// reason in `summary`.
    async fn fetch(&self, job: &ModernizationJob) -> GuidanceBundle;
}

// ═══════════════════════════════════════════════════════════════════════
// Completion
// ═══════════════════════════════════════════════════════════════════════

/// One LLM call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub prompt: String,
    pub max_new_tokens: usize,
    /// Read timeout for this call, scaled to the chunk size.
    pub read_timeout: Duration,
}

/// An LLM completion endpoint. One attempt per call, no retries.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    fn name(&self) -> &str;

    /// The raw reply text.
    ///
    /// # Errors
    ///
    /// Any transport, status or decoding problem as a [`RemoteFailure`].
    async fn complete(&self, request: &CompletionRequest) -> Result<String, RemoteFailure>;
}

/// Backend used when remote calls are disabled. Every call fails with
/// [`RemoteFailure::NotConfigured`], which routes each chunk to the
/// fallback engine.
pub struct OfflineBackend;

#[async_trait]
impl CompletionBackend for OfflineBackend {
    fn name(&self) -> &str {
        "offline"
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<String, RemoteFailure> {
        Err(RemoteFailure::NotConfigured)
    }
}
