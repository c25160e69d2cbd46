//! Data models shared by the engine, the pipeline and the reports.
//!
//! These types describe one modernization job, the per-file state machine,
//! and the outcome recorded for every file a run touches.

use std::fmt;
use std::path::PathBuf;

use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::language::Language;

/// Findings text used when static analysis could not run.
pub const FINDINGS_UNAVAILABLE: &str = "unavailable";

/// Reason recorded when the candidate equals the original.
pub const NO_CHANGE_NEEDED: &str = "no change needed";

/// One invocation of the pipeline over one file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModernizationJob {
    pub path: PathBuf,
    pub language: Language,
    pub target_version: String,
    pub selected_library_ids: Vec<String>,
    /// Free-form static-analysis output; may be [`FINDINGS_UNAVAILABLE`].
    pub findings: String,
}

impl ModernizationJob {
    pub fn new(path: impl Into<PathBuf>, language: Language, target_version: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            language,
            target_version: target_version.into(),
            selected_library_ids: Vec::new(),
            findings: FINDINGS_UNAVAILABLE.to_string(),
        }
    }

    pub fn with_findings(mut self, findings: impl Into<String>) -> Self {
        self.findings = findings.into();
        self
    }

    pub fn with_libraries(mut self, ids: Vec<String>) -> Self {
        self.selected_library_ids = ids;
        self
    }

    pub fn findings_available(&self) -> bool {
        let f = self.findings.trim();
        !f.is_empty() && f != FINDINGS_UNAVAILABLE
    }
}

/// Per-file processing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileState {
    Pending,
    Analyzed,
    Chunked,
    LlmInProgress,
    Extracted,
    Validated,
    Accepted,
    Rejected,
    Errored,
    Canceled,
}

impl FileState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FileState::Accepted | FileState::Rejected | FileState::Errored | FileState::Canceled
        )
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(&self, next: FileState) -> bool {
        use FileState::*;
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (_, Errored) => true,
            (Extracted | Validated, Canceled) => false,
            (_, Canceled) => true,
            (Pending, Analyzed) => true,
            (Analyzed, Chunked) => true,
            (Chunked, LlmInProgress | Extracted) => true,
            (LlmInProgress, LlmInProgress | Extracted) => true,
            (Extracted, Validated) => true,
            (Validated, Accepted | Rejected) => true,
            _ => false,
        }
    }
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileState::Pending => "PENDING",
            FileState::Analyzed => "ANALYZED",
            FileState::Chunked => "CHUNKED",
            FileState::LlmInProgress => "LLM_IN_PROGRESS",
            FileState::Extracted => "EXTRACTED",
            FileState::Validated => "VALIDATED",
            FileState::Accepted => "ACCEPTED",
            FileState::Rejected => "REJECTED",
            FileState::Errored => "ERRORED",
            FileState::Canceled => "CANCELED",
        };
        f.write_str(name)
    }
}

/// An attempted transition the state machine does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal state transition {from} -> {to}")]
pub struct IllegalTransition {
    pub from: FileState,
    pub to: FileState,
}

/// State machine for one file, with the path it took.
#[derive(Debug, Clone, Serialize)]
pub struct FileLifecycle {
    state: FileState,
    history: Vec<FileState>,
}

impl Default for FileLifecycle {
    fn default() -> Self {
        Self {
            state: FileState::Pending,
            history: vec![FileState::Pending],
        }
    }
}

impl FileLifecycle {
    pub fn state(&self) -> FileState {
        self.state
    }

    pub fn history(&self) -> &[FileState] {
        &self.history
    }

    /// Move to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`IllegalTransition`] and leaves the state untouched when the
    /// transition is not allowed.
    pub fn advance(&mut self, next: FileState) -> Result<(), IllegalTransition> {
        if !self.state.can_transition_to(next) {
            return Err(IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        self.history.push(next);
        Ok(())
    }

    /// Force the terminal `Errored` state unless already terminal.
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.state = FileState::Errored;
            self.history.push(FileState::Errored);
        }
    }
}

/// Where a chunk's final text came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkSource {
    Llm,
    Fallback { reason: String },
}

impl fmt::Display for ChunkSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkSource::Llm => f.write_str("llm"),
            ChunkSource::Fallback { reason } => write!(f, "fallback({reason})"),
        }
    }
}

impl Serialize for ChunkSource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// What happened to one chunk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkReport {
    pub ordinal: usize,
    pub source: ChunkSource,
    pub change_summary: String,
    /// Fallback transformations that fired, by name.
    pub transformations: Vec<String>,
    pub complete_structures: bool,
    pub estimated_tokens: usize,
}

/// Final decision for one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Accepted,
    Rejected,
    Unchanged,
    Errored,
    Canceled,
}

/// Decision and evidence for one file.
#[derive(Debug, Clone, Serialize)]
pub struct ModernizationOutcome {
    pub path: PathBuf,
    pub language: Language,
    pub decision: Decision,
    pub accepted: bool,
    /// One-line reason; the first validator reason on rejection.
    pub reason: String,
    /// Every reason collected (validator violations, errors).
    pub reasons: Vec<String>,
    pub aggregated_summary: String,
    pub chunks: Vec<ChunkReport>,
    pub backup_path: Option<PathBuf>,
    pub original_sha256: String,
    pub candidate_sha256: Option<String>,
    pub guidance_found: bool,
    pub final_state: FileState,
}

impl ModernizationOutcome {
    /// An outcome for `job` with nothing decided yet.
    pub fn new(job: &ModernizationJob, original: &str) -> Self {
        Self {
            path: job.path.clone(),
            language: job.language,
            decision: Decision::Errored,
            accepted: false,
            reason: String::new(),
            reasons: Vec::new(),
            aggregated_summary: String::new(),
            chunks: Vec::new(),
            backup_path: None,
            original_sha256: content_hash(original),
            candidate_sha256: None,
            guidance_found: false,
            final_state: FileState::Pending,
        }
    }

    pub fn per_chunk_summaries(&self) -> Vec<&str> {
        self.chunks.iter().map(|c| c.change_summary.as_str()).collect()
    }

    pub fn fallback_chunks(&self) -> usize {
        self.chunks
            .iter()
            .filter(|c| matches!(c.source, ChunkSource::Fallback { .. }))
            .count()
    }
}

/// Hex SHA-256 of `text`.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
