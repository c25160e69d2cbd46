//! Chunked rewrite engine.
//!
//! For one file: chunk the text, fetch guidance once, then for every chunk
//! render a prompt, call the model, extract and screen the reply, and fall
//! back to the deterministic rewriter on any failure. Chunk results are
//! reassembled in source order.
//!
//! ```text
//! chunk ─► render ─► complete ─► extract ─► screen ─► strip imports ─► reframe
//!                       │            │          │
//!                       └────────────┴──────────┴──► fallback engine
//! ```
//!
//! The cancel flag is checked between chunks: a chunk in flight always
//! finishes, the next one never starts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use uplifter_core::assemble::{assemble, reframe, strip_carried_imports, Assembled, AssemblyPiece};
use uplifter_core::chunk::{Chunk, ChunkBudget, Chunker};
use uplifter_core::extract::{extract, screen, ExtractionFailure};
use uplifter_core::guidance::GuidanceBundle;
use uplifter_core::models::{ChunkReport, ChunkSource, FileLifecycle, FileState, ModernizationJob};
use uplifter_core::prompt::PromptRenderer;

use crate::config::{Config, LlmConfig};
use crate::error::PipelineError;
use crate::events::{EventBus, Status};
use crate::traits::{CompletionBackend, CompletionRequest, GuidanceSource};

/// Fallback reason recorded when remote calls are disabled.
pub const FALLBACK_ONLY: &str = "fallback only";

/// Shared cancel signal. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything the engine produced for one file.
#[derive(Debug, Clone)]
pub struct EngineRun {
    pub guidance: GuidanceBundle,
    pub chunks: Vec<ChunkReport>,
    pub assembled: Assembled,
}

impl EngineRun {
    /// Per-chunk summaries joined for the file report.
    pub fn aggregated_summary(&self) -> String {
        match self.chunks.as_slice() {
            [only] => only.change_summary.clone(),
            chunks => chunks
                .iter()
                .map(|c| format!("Chunk {}: {}", c.ordinal + 1, c.change_summary))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

struct ChunkResult {
    text: String,
    report: ChunkReport,
}

pub struct RewriteEngine {
    budget: ChunkBudget,
    llm: LlmConfig,
    fallback_only: bool,
    completion: Arc<dyn CompletionBackend>,
    guidance: Arc<dyn GuidanceSource>,
    events: EventBus,
}

impl RewriteEngine {
    pub fn new(
        config: &Config,
        completion: Arc<dyn CompletionBackend>,
        guidance: Arc<dyn GuidanceSource>,
        events: EventBus,
    ) -> Self {
        Self {
            budget: config.budget.chunk_budget(),
            llm: config.llm.clone(),
            fallback_only: config.run.fallback_only,
            completion,
            guidance,
            events,
        }
    }

    pub fn chunker(&self, job: &ModernizationJob) -> Chunker {
        Chunker::new(job.language, self.budget)
    }

    /// Rewrite `original`, moving `life` from `Analyzed` to `Extracted`.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Canceled`] when the flag was raised before the last
    /// chunk's reply came back,
    /// [`PipelineError::Transition`] on a state machine violation.
    pub async fn rewrite(
        &self,
        job: &ModernizationJob,
        original: &str,
        life: &mut FileLifecycle,
        cancel: &CancelFlag,
    ) -> Result<EngineRun, PipelineError> {
        let file = job.path.display().to_string();
        let chunks = self.chunker(job).chunk(original);
        life.advance(FileState::Chunked)?;
        self.events.log(
            "chunking",
            format!("{file}: {} chunk(s), ~{} tokens", chunks.len(), chunks.iter().map(|c| c.estimated_tokens).sum::<usize>()),
        );

        let guidance = if self.fallback_only {
            GuidanceBundle::not_found(FALLBACK_ONLY, Vec::new())
        } else {
            self.events.status("rag", Status::Running, format!("guidance for {file}"));
            let bundle = self.guidance.fetch(job).await;
            self.events.status("rag", Status::Completed, format!("{file}: {}", bundle.summary));
            bundle
        };

        let total = chunks.len();
        let mut results = Vec::with_capacity(total);
        for chunk in &chunks {
            if chunk.ordinal > 0 && cancel.is_canceled() {
                tracing::info!(file = %file, done = chunk.ordinal, total, "canceled between chunks");
                return Err(PipelineError::Canceled);
            }
            life.advance(FileState::LlmInProgress)?;
            self.events.status(
                "llm",
                Status::Running,
                format!("chunk {}/{} of {file}", chunk.ordinal + 1, total),
            );
            let result = self.rewrite_chunk(job, original, &guidance, chunk, total).await;
            self.events.log(
                "llm",
                format!("chunk {}/{} of {file}: {}", chunk.ordinal + 1, total, result.report.source),
            );
            results.push(result);
        }
        if cancel.is_canceled() {
            tracing::info!(file = %file, total, "canceled during the last chunk");
            return Err(PipelineError::Canceled);
        }
        life.advance(FileState::Extracted)?;

        let pieces: Vec<AssemblyPiece> = chunks
            .iter()
            .zip(&results)
            .map(|(chunk, r)| AssemblyPiece {
                text: r.text.clone(),
                complete_structures: chunk.complete_structures,
                changed: r.text != chunk.code,
            })
            .collect();
        Ok(EngineRun {
            guidance,
            chunks: results.into_iter().map(|r| r.report).collect(),
            assembled: assemble(&pieces),
        })
    }

    async fn rewrite_chunk(
        &self,
        job: &ModernizationJob,
        original: &str,
        guidance: &GuidanceBundle,
        chunk: &Chunk,
        total: usize,
    ) -> ChunkResult {
        if self.fallback_only {
            return self.fallback(job, original, chunk, FALLBACK_ONLY);
        }

        let envelope = PromptRenderer::new(self.budget).render(job, guidance, chunk, total);
        if !envelope.within_budget {
            tracing::warn!(
                file = %job.path.display(),
                chunk = chunk.ordinal + 1,
                tokens = envelope.estimated_tokens,
                "prompt exceeds budget after trimming"
            );
        }
        let request = CompletionRequest {
            prompt: envelope.text.clone(),
            max_new_tokens: self.budget.response_reserve_tokens,
            read_timeout: self.llm.read_timeout_for(envelope.chunk_code.len()),
        };

        let raw = match self.completion.complete(&request).await {
            Ok(raw) => raw,
            Err(failure) => {
                tracing::warn!(file = %job.path.display(), chunk = chunk.ordinal + 1, error = %failure, "llm call failed");
                return self.fallback(job, original, chunk, &failure.label());
            }
        };

        let response = extract(&raw, job.language);
        let code = match screen(&response, &envelope.chunk_code, chunk.complete_structures) {
            Ok(code) => code,
            Err(failure) => {
                tracing::warn!(file = %job.path.display(), chunk = chunk.ordinal + 1, error = %failure, "reply rejected");
                return self.fallback(job, original, chunk, extraction_label(&failure));
            }
        };

        let code = strip_carried_imports(&code, &chunk.carried_imports);
        let text = reframe(&chunk.code, &code);
        let summary = if response.change_summary.is_empty() {
            "No change summary provided.".to_string()
        } else {
            response.change_summary
        };
        ChunkResult {
            text,
            report: ChunkReport {
                ordinal: chunk.ordinal,
                source: ChunkSource::Llm,
                change_summary: summary,
                transformations: Vec::new(),
                complete_structures: chunk.complete_structures,
                estimated_tokens: chunk.estimated_tokens,
            },
        }
    }

    fn fallback(&self, job: &ModernizationJob, original: &str, chunk: &Chunk, reason: &str) -> ChunkResult {
        let report = job
            .language
            .fallback_engine()
            .rewrite_in_file(&chunk.code, original, &job.findings, &job.target_version);
        ChunkResult {
            report: ChunkReport {
                ordinal: chunk.ordinal,
                source: ChunkSource::Fallback {
                    reason: reason.to_string(),
                },
                change_summary: report.summary(),
                transformations: report.transformations.clone(),
                complete_structures: chunk.complete_structures,
                estimated_tokens: chunk.estimated_tokens,
            },
            text: report.code,
        }
    }
}

fn extraction_label(failure: &ExtractionFailure) -> &'static str {
    match failure {
        ExtractionFailure::NoCodeRegion => "no code region",
        ExtractionFailure::Truncated { .. } => "truncated",
        ExtractionFailure::TooShort { .. } => "too short",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteFailure;
    use crate::rag::NoGuidance;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use uplifter_core::language::Language;

    /// Replies with `transform(original chunk code)` in the tagged format.
    struct Rewriting {
        transform: fn(&str) -> String,
        prompts: Mutex<Vec<String>>,
    }

    fn shown_code(prompt: &str) -> String {
        let start = prompt.rfind("```python\n").map(|i| i + "```python\n".len()).unwrap_or(0);
        let rest = &prompt[start..];
        rest[..rest.rfind("\n```").unwrap_or(rest.len())].to_string()
    }

    #[async_trait]
    impl CompletionBackend for Rewriting {
        fn name(&self) -> &str {
            "rewriting"
        }

        async fn complete(&self, request: &CompletionRequest) -> Result<String, RemoteFailure> {
            self.prompts.lock().unwrap().push(request.prompt.clone());
            let code = (self.transform)(&shown_code(&request.prompt));
            Ok(format!(
                "<change_summary>\n- converted prints\n</change_summary>\n<updated_code>\n```python\n{code}\n```\n</updated_code>"
            ))
        }
    }

    struct Down;

    #[async_trait]
    impl CompletionBackend for Down {
        fn name(&self) -> &str {
            "down"
        }

        async fn complete(&self, _request: &CompletionRequest) -> Result<String, RemoteFailure> {
            Err(RemoteFailure::Status {
                code: 503,
                body: "unavailable".into(),
            })
        }
    }

    fn engine(backend: Arc<dyn CompletionBackend>, config: &Config) -> RewriteEngine {
        RewriteEngine::new(config, backend, Arc::new(NoGuidance::new("off")), EventBus::default())
    }

    fn analyzed() -> FileLifecycle {
        let mut life = FileLifecycle::default();
        life.advance(FileState::Analyzed).unwrap();
        life
    }

    const SCRIPT: &str = "import sys\n\ndef main():\n    print \"hi\", sys.argv\n\nmain()\n";

    #[tokio::test]
    async fn test_llm_reply_is_used() {
        let config = Config::minimal("3.9", Language::Python);
        let backend = Arc::new(Rewriting {
            transform: |code| code.replace("print \"hi\", sys.argv", "print(\"hi\", sys.argv)"),
            prompts: Mutex::new(Vec::new()),
        });
        let job = ModernizationJob::new("s.py", Language::Python, "3.9");
        let mut life = analyzed();
        let run = engine(backend.clone(), &config)
            .rewrite(&job, SCRIPT, &mut life, &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(run.chunks[0].source, ChunkSource::Llm);
        assert_eq!(run.aggregated_summary(), "- converted prints");
        assert!(run.assembled.text.contains("print(\"hi\", sys.argv)"));
        assert_eq!(life.state(), FileState::Extracted);
        assert!(backend.prompts.lock().unwrap()[0].contains(uplifter_core::guidance::NO_GUIDANCE));
    }

    #[tokio::test]
    async fn test_remote_failure_uses_fallback() {
        let config = Config::minimal("3.9", Language::Python);
        let job = ModernizationJob::new("s.py", Language::Python, "3.9").with_findings("- print statements");
        let mut life = analyzed();
        let run = engine(Arc::new(Down), &config)
            .rewrite(&job, SCRIPT, &mut life, &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(run.chunks[0].source.to_string(), "fallback(http 503)");
        assert_eq!(run.chunks[0].transformations, vec!["print_function"]);
        assert!(run.assembled.text.contains("print(\"hi\", sys.argv)"));
    }

    #[tokio::test]
    async fn test_truncated_reply_uses_fallback() {
        let config = Config::minimal("3.9", Language::Python);
        let backend = Arc::new(Rewriting {
            transform: |code| format!("{}\n# ... (other methods unchanged)", code.lines().next().unwrap_or("")),
            prompts: Mutex::new(Vec::new()),
        });
        let job = ModernizationJob::new("s.py", Language::Python, "3.9");
        let mut life = analyzed();
        let run = engine(backend, &config)
            .rewrite(&job, SCRIPT, &mut life, &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(run.chunks[0].source.to_string(), "fallback(truncated)");
        assert!(!run.assembled.text.contains("unchanged"));
    }

    #[tokio::test]
    async fn test_fallback_only_skips_remote() {
        let mut config = Config::minimal("3.9", Language::Python);
        config.run.fallback_only = true;
        let backend = Arc::new(Rewriting {
            transform: |c| c.to_string(),
            prompts: Mutex::new(Vec::new()),
        });
        let job = ModernizationJob::new("s.py", Language::Python, "3.9");
        let mut life = analyzed();
        let run = engine(backend.clone(), &config)
            .rewrite(&job, SCRIPT, &mut life, &CancelFlag::new())
            .await
            .unwrap();
        assert!(backend.prompts.lock().unwrap().is_empty());
        assert_eq!(run.chunks[0].source.to_string(), "fallback(fallback only)");
        assert!(!run.guidance.found);
    }

    #[tokio::test]
    async fn test_cancel_before_second_chunk() {
        let mut config = Config::minimal("3.9", Language::Python);
        config.budget.max_total_tokens = 3200;
        let body: String = (0..40)
            .map(|i| format!("def f{i}(x):\n    return x + {i}  # keep the body a little longer than a one-liner\n\n"))
            .collect();
        let job = ModernizationJob::new("big.py", Language::Python, "3.9");
        let cancel = CancelFlag::new();
        cancel.cancel();
        let mut life = analyzed();
        let result = engine(Arc::new(Down), &config)
            .rewrite(&job, &body, &mut life, &cancel)
            .await;
        assert!(matches!(result, Err(PipelineError::Canceled)));
        assert_eq!(life.state(), FileState::LlmInProgress);
    }
}
