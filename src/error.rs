//! Error types at component boundaries.
//!
//! Remote failures and pipeline faults are typed so the engine can decide
//! locally (fall back, skip, halt). CLI glue wraps everything in
//! `anyhow::Result`.

use std::path::PathBuf;

use thiserror::Error;
use uplifter_core::models::IllegalTransition;

/// Invalid run configuration. The run aborts before any file is touched.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("no API token: set UPLIFT_API_TOKEN or LLM_API_TOKEN, or run with fallback_only")]
    MissingToken,

    #[error("invalid target version '{value}': expected N or N.N[.N]")]
    InvalidVersion { value: String },

    #[error("unsupported language '{value}': must be python or java")]
    UnknownLanguage { value: String },

    #[error("budget.response_reserve_tokens + budget.prompt_scaffold_reserve_tokens ({reserved}) must be below budget.max_total_tokens ({max})")]
    BudgetTooSmall { reserved: usize, max: usize },

    #[error("budget.target_fill must be in (0, 1], got {value}")]
    InvalidTargetFill { value: f64 },

    #[error("run root does not exist: {}", path.display())]
    MissingRoot { path: PathBuf },
}

/// Failure of one call to the LLM or RAG service. Always recoverable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteFailure {
    #[error("remote service not configured")]
    NotConfigured,

    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {message}")]
    Connect { message: String },

    #[error("HTTP {code}: {body}")]
    Status { code: u16, body: String },

    #[error("undecodable response: {message}")]
    Decode { message: String },

    #[error("empty completion")]
    EmptyCompletion,
}

impl RemoteFailure {
    /// Short label used in chunk sources, e.g. `fallback(http 503)`.
    pub fn label(&self) -> String {
        match self {
            RemoteFailure::NotConfigured => "not configured".to_string(),
            RemoteFailure::Timeout => "timeout".to_string(),
            RemoteFailure::Connect { .. } => "connection error".to_string(),
            RemoteFailure::Status { code, .. } => format!("http {code}"),
            RemoteFailure::Decode { .. } => "bad response".to_string(),
            RemoteFailure::EmptyCompletion => "empty completion".to_string(),
        }
    }
}

impl From<reqwest::Error> for RemoteFailure {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RemoteFailure::Timeout
        } else if err.is_decode() {
            RemoteFailure::Decode {
                message: err.to_string(),
            }
        } else {
            RemoteFailure::Connect {
                message: err.to_string(),
            }
        }
    }
}

/// Fault while processing one file.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("rollback of {} from backup failed: {source}", path.display())]
    RollbackFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("canceled")]
    Canceled,

    #[error(transparent)]
    Transition(#[from] IllegalTransition),
}

impl PipelineError {
    /// Only a failed rollback stops the whole run.
    pub fn is_critical(&self) -> bool {
        matches!(self, PipelineError::RollbackFailed { .. })
    }
}
