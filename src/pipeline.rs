//! Per-file modernization pipeline and the run loop.
//!
//! For each discovered file, in order:
//!
//! 1. read the source (unreadable files are skipped and reported)
//! 2. write `<path>.backup` with the original bytes
//! 3. static analysis → findings
//! 4. chunked rewrite ([`RewriteEngine`])
//! 5. safety validation of the reassembled candidate
//! 6. accepted and changed: atomic replacement (temp sibling + rename);
//!    a failed write is rolled back from the backup
//!
//! The file on disk is mutated at most once, at the very end, and only
//! when the validator accepts. Every state change goes through
//! [`FileLifecycle`], so an out-of-order step surfaces as `ERRORED`
//! instead of a half-processed file.
//!
//! Only a failed rollback stops the run. Cancellation is honored between
//! chunks and between files.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use uplifter_core::language::Language;
use uplifter_core::models::{
    content_hash, Decision, FileLifecycle, FileState, ModernizationJob, ModernizationOutcome, NO_CHANGE_NEEDED,
};
use uplifter_core::validate::SafetyValidator;

use crate::config::Config;
use crate::discover::discover;
use crate::engine::{CancelFlag, RewriteEngine, FALLBACK_ONLY};
use crate::error::{ConfigError, PipelineError};
use crate::events::{ChangeRecord, EventBus, RunTotals, Status};
use crate::findings::AnalysisDispatch;
use crate::llm::HttpCompletionBackend;
use crate::rag::{NoGuidance, RagClient};
use crate::report::write_summary;
use crate::traits::{CompletionBackend, FindingsSource, GuidanceSource, OfflineBackend};

/// Suffix appended to a file's path for its backup.
pub const BACKUP_SUFFIX: &str = ".backup";

/// The outside services a run talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub findings: Arc<dyn FindingsSource>,
    pub guidance: Arc<dyn GuidanceSource>,
    pub completion: Arc<dyn CompletionBackend>,
}

impl Collaborators {
    /// Real collaborators for `config`. Remote services that are not
    /// configured are replaced by offline stand-ins.
    pub fn from_config(config: &Config) -> Result<Self> {
        let findings: Arc<dyn FindingsSource> = Arc::new(AnalysisDispatch::from_config(&config.analysis));
        if config.run.fallback_only {
            return Ok(Self {
                findings,
                guidance: Arc::new(NoGuidance::new(FALLBACK_ONLY)),
                completion: Arc::new(OfflineBackend),
            });
        }

        let token = config.api_token();
        let completion: Arc<dyn CompletionBackend> = match (&config.llm.url, &token) {
            (Some(_), Some(token)) => Arc::new(HttpCompletionBackend::new(&config.llm, token.clone())?),
            _ => {
                tracing::warn!("llm.url or API token missing; every chunk will use the fallback engine");
                Arc::new(OfflineBackend)
            }
        };
        let guidance: Arc<dyn GuidanceSource> = Arc::new(RagClient::new(&config.rag, token)?);
        Ok(Self {
            findings,
            guidance,
            completion,
        })
    }
}

/// Everything a run did.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: uuid::Uuid,
    pub target_version: String,
    pub language: Language,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<ModernizationOutcome>,
    /// Files discovered but never started (cancel or halt).
    pub not_started: Vec<PathBuf>,
    pub totals: RunTotals,
    /// Set when a critical error stopped the run.
    pub halted: Option<String>,
}

pub struct Pipeline {
    config: Config,
    language: Language,
    engine: RewriteEngine,
    findings: Arc<dyn FindingsSource>,
    validator: SafetyValidator,
    events: EventBus,
    cancel: CancelFlag,
}

impl Pipeline {
    /// Build a pipeline. Token presence is the caller's concern: the
    /// collaborators already carry whatever credentials exist.
    ///
    /// # Errors
    ///
    /// Any structural [`ConfigError`] (version, language, budget).
    pub fn new(
        config: Config,
        collaborators: Collaborators,
        events: EventBus,
        cancel: CancelFlag,
    ) -> Result<Self, ConfigError> {
        config.validate_with_token(true)?;
        let language = config.language()?;
        let engine = RewriteEngine::new(
            &config,
            collaborators.completion,
            collaborators.guidance,
            events.clone(),
        );
        Ok(Self {
            language,
            engine,
            findings: collaborators.findings,
            validator: SafetyValidator::new(language),
            config,
            events,
            cancel,
        })
    }

    /// Modernize every discovered file in order.
    pub async fn run(&self) -> Result<RunReport> {
        let started_at = Utc::now();
        let files = match discover(&self.config) {
            Ok(files) => files,
            Err(e) => {
                self.events.status("discovery", Status::Error, format!("{e:#}"));
                return Err(e);
            }
        };
        self.events.status(
            "run",
            Status::Running,
            format!(
                "{} {} file(s) under {} → {} {}",
                files.len(),
                self.language.display_name(),
                self.config.run.root.display(),
                self.language.display_name(),
                self.config.run.target_version
            ),
        );

        let mut outcomes = Vec::with_capacity(files.len());
        let mut not_started = Vec::new();
        let mut halted = None;
        for file in files {
            if halted.is_some() || self.cancel.is_canceled() {
                not_started.push(file.path);
                continue;
            }
            match self.process_file(&file.path).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    tracing::error!(file = %file.path.display(), error = %e, "critical error, halting run");
                    self.events.status("run", Status::Error, format!("halted: {e}"));
                    halted = Some(e.to_string());
                }
            }
        }

        let totals = totals(&outcomes);
        self.events.summary(&totals);
        let report = RunReport {
            run_id: self.events.run_id(),
            target_version: self.config.run.target_version.clone(),
            language: self.language,
            started_at,
            finished_at: Utc::now(),
            outcomes,
            not_started,
            totals,
            halted,
        };
        if let Some(dir) = &self.config.run.summary_dir {
            match write_summary(dir, &report) {
                Ok(path) => self.events.log("run", format!("summary written to {}", path.display())),
                Err(e) => tracing::warn!(error = %e, "could not write run summary"),
            }
        }
        let status = if report.halted.is_some() { Status::Error } else { Status::Completed };
        self.events.status("run", status, "finished");
        Ok(report)
    }

    /// Process one file.
    ///
    /// Every non-critical problem is recorded in the returned outcome.
    ///
    /// # Errors
    ///
    /// Only [`PipelineError::RollbackFailed`].
    pub async fn process_file(&self, path: &Path) -> Result<ModernizationOutcome, PipelineError> {
        let file = path.display().to_string();
        self.events.status("file", Status::Running, file.clone());
        let job = ModernizationJob::new(path, self.language, self.config.run.target_version.clone())
            .with_libraries(self.config.rag.selected_library_ids.clone());

        let original = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(source) => {
                let err = PipelineError::Read {
                    path: path.to_path_buf(),
                    source,
                };
                let mut outcome = ModernizationOutcome::new(&job, "");
                let mut life = FileLifecycle::default();
                life.fail();
                self.finish_errored(&mut outcome, &life, &err);
                return Ok(outcome);
            }
        };

        let mut outcome = ModernizationOutcome::new(&job, &original);
        let mut life = FileLifecycle::default();
        match self.modernize(job, &original, &mut outcome, &mut life).await {
            Ok(()) => {}
            Err(e) if e.is_critical() => return Err(e),
            Err(PipelineError::Canceled) => {
                if life.advance(FileState::Canceled).is_err() {
                    life.fail();
                }
                outcome.decision = Decision::Canceled;
                outcome.reason = "canceled".to_string();
                outcome.final_state = life.state();
                self.events.status("file", Status::Completed, format!("{file}: canceled, original preserved"));
                return Ok(outcome);
            }
            Err(e) => {
                life.fail();
                self.finish_errored(&mut outcome, &life, &e);
                return Ok(outcome);
            }
        }
        outcome.final_state = life.state();
        self.events.status(
            "file",
            if outcome.decision == Decision::Errored { Status::Error } else { Status::Completed },
            format!("{file}: {}", outcome.reason),
        );
        Ok(outcome)
    }

    async fn modernize(
        &self,
        job: ModernizationJob,
        original: &str,
        outcome: &mut ModernizationOutcome,
        life: &mut FileLifecycle,
    ) -> Result<(), PipelineError> {
        let path = job.path.clone();

        let backup = backup_path(&path);
        tokio::fs::write(&backup, original)
            .await
            .map_err(|source| PipelineError::Write {
                path: backup.clone(),
                source,
            })?;
        outcome.backup_path = Some(backup.clone());

        self.events.status("analysis", Status::Running, path.display().to_string());
        let findings = self
            .findings
            .analyze(&path, original, &job.target_version)
            .await;
        let job = job.with_findings(findings);
        life.advance(FileState::Analyzed)?;

        let run = self.engine.rewrite(&job, original, life, &self.cancel).await?;
        let candidate = run.assembled.text.clone();
        outcome.aggregated_summary = run.aggregated_summary();
        outcome.chunks = run.chunks;
        outcome.guidance_found = run.guidance.found;
        outcome.candidate_sha256 = Some(content_hash(&candidate));

        let report = self.validator.validate(original, &candidate);
        life.advance(FileState::Validated)?;

        if !report.accepted {
            life.advance(FileState::Rejected)?;
            outcome.decision = Decision::Rejected;
            outcome.reason = report.reasons.first().cloned().unwrap_or_default();
            outcome.reasons = report.reasons.clone();
            self.events.rejection(&path, &report.reasons);
            return Ok(());
        }

        if candidate == original {
            life.advance(FileState::Accepted)?;
            outcome.decision = Decision::Unchanged;
            outcome.accepted = true;
            outcome.reason = NO_CHANGE_NEEDED.to_string();
            return Ok(());
        }

        if let Err(source) = replace_atomically(&path, &candidate) {
            tracing::warn!(file = %path.display(), error = %source, "write failed, restoring from backup");
            tokio::fs::copy(&backup, &path)
                .await
                .map_err(|rollback| PipelineError::RollbackFailed {
                    path: path.clone(),
                    source: rollback,
                })?;
            return Err(PipelineError::Write { path, source });
        }

        life.advance(FileState::Accepted)?;
        outcome.decision = Decision::Accepted;
        outcome.accepted = true;
        outcome.reason = "validation passed".to_string();
        self.events.change(&ChangeRecord {
            title: format!("Modernized to {} {}", job.language.display_name(), job.target_version),
            description: outcome.aggregated_summary.clone(),
            file: path.display().to_string(),
            details: serde_json::json!({
                "chunks": outcome.chunks,
                "backup": backup.display().to_string(),
                "original_sha256": outcome.original_sha256,
                "candidate_sha256": outcome.candidate_sha256,
            }),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    fn finish_errored(&self, outcome: &mut ModernizationOutcome, life: &FileLifecycle, err: &PipelineError) {
        tracing::warn!(file = %outcome.path.display(), error = %err, "file errored, original preserved");
        outcome.decision = Decision::Errored;
        outcome.accepted = false;
        outcome.reason = err.to_string();
        outcome.reasons = vec![err.to_string()];
        outcome.final_state = life.state();
        self.events.status(
            "file",
            Status::Error,
            format!("{}: {}", outcome.path.display(), err),
        );
    }
}

/// `<path>.backup`.
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

/// Replace `path` with `content` through a temp sibling and a rename,
/// keeping the original permissions.
pub fn replace_atomically(path: &Path, content: &str) -> std::io::Result<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let permissions = std::fs::metadata(path)?.permissions();
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file().sync_all()?;
    std::fs::set_permissions(tmp.path(), permissions)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

pub fn totals(outcomes: &[ModernizationOutcome]) -> RunTotals {
    let count = |d: Decision| outcomes.iter().filter(|o| o.decision == d).count();
    RunTotals {
        files: outcomes.len(),
        accepted: count(Decision::Accepted),
        rejected: count(Decision::Rejected),
        unchanged: count(Decision::Unchanged),
        errored: count(Decision::Errored),
        canceled: count(Decision::Canceled),
        fallback_chunks: outcomes.iter().map(|o| o.fallback_chunks()).sum(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_path_appends_suffix() {
        assert_eq!(backup_path(Path::new("src/a.py")), PathBuf::from("src/a.py.backup"));
    }

    #[test]
    fn test_replace_atomically_keeps_permissions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.py");
        std::fs::write(&path, "old\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o754)).unwrap();
        }
        replace_atomically(&path, "new\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new\n");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o754);
        }
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn test_replace_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(replace_atomically(&dir.path().join("missing.py"), "x").is_err());
    }

    #[test]
    fn test_totals() {
        let job = ModernizationJob::new("a.py", Language::Python, "3.9");
        let mut a = ModernizationOutcome::new(&job, "x");
        a.decision = Decision::Accepted;
        let mut b = ModernizationOutcome::new(&job, "x");
        b.decision = Decision::Rejected;
        let t = totals(&[a, b]);
        assert_eq!((t.files, t.accepted, t.rejected, t.errored), (2, 1, 1, 0));
    }
}
