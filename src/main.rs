//! # Uplifter CLI (`uplift`)
//!
//! The `uplift` binary runs modernization sweeps and the tools around them:
//! chunk plans, prompt previews, the safety validator, and RAG checks.
//!
//! ## Usage
//!
//! ```bash
//! uplift --config ./config/uplift.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `uplift run` | Modernize every eligible file under the run root |
//! | `uplift chunk <file>` | Print the chunk plan for one file |
//! | `uplift validate <original> <candidate>` | Run the safety validator |
//! | `uplift prompt <file>` | Render the first chunk's prompt |
//! | `uplift libraries` | List RAG libraries with suggested tiers |
//! | `uplift check` | Check RAG connectivity |
//!
//! ## Examples
//!
//! ```bash
//! # Modernize a Python 2 tree to 3.9, two modules only
//! uplift run --target 3.9 --root ./legacy --module billing --module oam
//!
//! # Deterministic rewrites only, JSON progress for a CI log
//! uplift run --fallback-only --progress json
//!
//! # Would this hand-edited file be accepted?
//! uplift validate app.py.backup app.py
//! ```
//!
//! Logging goes to stderr through `tracing`; set `RUST_LOG` to change the
//! default `uplifter=info` filter.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use uplifter::config::{self, Config, Overrides};
use uplifter::engine::CancelFlag;
use uplifter::events::{EventBus, Status};
use uplifter::findings::AnalysisDispatch;
use uplifter::pipeline::{Collaborators, Pipeline};
use uplifter::progress::{self, format_number, ProgressMode};
use uplifter::rag::{classify_libraries, RagClient};
use uplifter::traits::{FindingsSource, GuidanceSource};
use uplifter_core::chunk::Chunker;
use uplifter_core::guidance::GuidanceBundle;
use uplifter_core::language::Language;
use uplifter_core::models::ModernizationJob;
use uplifter_core::prompt::PromptRenderer;
use uplifter_core::validate::SafetyValidator;

/// Uplifter CLI: GenAI-assisted, validator-gated modernization of legacy
/// source trees.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/uplift.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "uplift",
    about = "Uplifter: modernize legacy Python and Java code with an LLM behind a safety validator",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/uplift.toml`. `chunk` and `validate` work
    /// without it.
    #[arg(long, global = true, default_value = "./config/uplift.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Modernize every eligible file under the run root.
    ///
    /// Each file is backed up to `<file>.backup`, rewritten chunk by chunk
    /// and replaced only if the safety validator accepts the result.
    /// Ctrl-C stops after the chunk in flight; the current file is left
    /// untouched.
    Run {
        /// Target language version (e.g. `3.9`, `17`).
        #[arg(long)]
        target: Option<String>,

        /// Root directory (or single file) to modernize.
        #[arg(long)]
        root: Option<PathBuf>,

        /// Restrict the sweep to this sub-directory. Repeatable.
        #[arg(long = "module")]
        modules: Vec<String>,

        /// RAG library id to search. Repeatable.
        #[arg(long = "library")]
        libraries: Vec<String>,

        /// Skip all remote calls; use only the deterministic fallback.
        #[arg(long)]
        fallback_only: bool,

        /// Progress output on stderr. Defaults to `human` on a terminal.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Print the chunk plan for one file (dry run).
    Chunk {
        file: PathBuf,
    },

    /// Run the safety validator on an original and a candidate.
    ///
    /// Exits non-zero when the candidate would be rejected.
    Validate {
        original: PathBuf,
        candidate: PathBuf,
    },

    /// Render the prompt for the first chunk of a file.
    Prompt {
        file: PathBuf,

        /// Target language version; overrides the config file.
        #[arg(long)]
        target: Option<String>,

        /// Do not query the RAG service.
        #[arg(long)]
        no_rag: bool,
    },

    /// List RAG libraries and suggest tiers for the configured language.
    Libraries,

    /// Check RAG connectivity with one probe query.
    Check,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("uplifter=info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            target,
            root,
            modules,
            libraries,
            fallback_only,
            progress,
        } => {
            let overrides = Overrides {
                target_version: target,
                root,
                selected_modules: modules,
                selected_library_ids: libraries,
                fallback_only,
            };
            run(&cli.config, &overrides, progress.unwrap_or_else(ProgressMode::default_for_tty)).await?;
        }
        Commands::Chunk { file } => {
            let cfg = optional_config(&cli.config, &file);
            let text = read_source(&file)?;
            let chunker = Chunker::new(Language::from_path(&file), cfg.budget.chunk_budget());
            let chunks = chunker.chunk(&text);
            println!(
                "{}: {} chunk(s), code budget {} tokens",
                file.display(),
                chunks.len(),
                format_number(chunker.budget().code_budget() as u64)
            );
            for chunk in &chunks {
                println!(
                    "  #{:<3} lines {:>5}-{:<5} ~{:>7} tokens  {}{}",
                    chunk.ordinal + 1,
                    chunk.lines.start + 1,
                    chunk.lines.end,
                    format_number(chunk.estimated_tokens as u64),
                    if chunk.complete_structures { "complete" } else { "PARTIAL" },
                    if chunk.carried_imports.is_empty() {
                        String::new()
                    } else {
                        format!("  (+{} carried imports)", chunk.carried_imports.len())
                    }
                );
            }
        }
        Commands::Validate { original, candidate } => {
            let before = read_source(&original)?;
            let after = read_source(&candidate)?;
            let report = SafetyValidator::new(Language::from_path(&original)).validate(&before, &after);
            if report.accepted {
                println!("ACCEPTED");
            } else {
                println!("REJECTED");
                for reason in &report.reasons {
                    println!("  - {reason}");
                }
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Prompt { file, target, no_rag } => {
            let mut cfg = optional_config(&cli.config, &file);
            if let Some(target) = target {
                cfg.run.target_version = target;
            }
            prompt(&cfg, &file, no_rag).await?;
        }
        Commands::Libraries => {
            let cfg = config::load_config(&cli.config)?;
            let client = RagClient::new(&cfg.rag, cfg.api_token())?;
            let catalog = client
                .list_libraries()
                .await
                .map_err(|e| anyhow::anyhow!("Failed to list libraries: {e}"))?;
            for (category, libraries) in &catalog {
                println!("{category}");
                for (id, title) in libraries {
                    println!("  {id:<24} {title}");
                }
            }
            let tiers = classify_libraries(&catalog, cfg.language()?);
            println!();
            println!("Suggested for {}:", cfg.run.language);
            println!("  high:      {}", tiers.high.join(", "));
            println!("  secondary: {}", tiers.secondary.join(", "));
            println!("  fallback:  {}", tiers.fallback.join(", "));
        }
        Commands::Check => {
            let cfg = config::load_config(&cli.config)?;
            let client = RagClient::new(&cfg.rag, cfg.api_token())?;
            if !client.is_configured() {
                bail!("RAG is not configured: set rag.query_url and an API token");
            }
            let report = client.check_connection().await;
            println!("{}", report.message);
            if !report.reachable {
                return Ok(ExitCode::FAILURE);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn run(config_path: &Path, overrides: &Overrides, mode: ProgressMode) -> Result<()> {
    let mut cfg = config::load_config(config_path)?;
    cfg.apply(overrides);

    let events = EventBus::default();
    let reporter = tokio::spawn(progress::forward(events.subscribe(), mode.reporter()));

    if let Err(e) = cfg.validate() {
        events.status("run", Status::Error, e.to_string());
        drop(events);
        let _ = reporter.await;
        return Err(e.into());
    }

    let cancel = CancelFlag::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("cancel requested; finishing the chunk in flight");
                cancel.cancel();
            }
        });
    }

    let collaborators = Collaborators::from_config(&cfg)?;
    let pipeline = Pipeline::new(cfg, collaborators, events.clone(), cancel)?;
    let result = pipeline.run().await;
    drop(pipeline);
    drop(events);
    let _ = reporter.await;
    let report = result?;

    for outcome in &report.outcomes {
        println!(
            "{:<10} {}  {}",
            format!("{:?}", outcome.decision).to_uppercase(),
            outcome.path.display(),
            outcome.reason
        );
    }
    for path in &report.not_started {
        println!("{:<10} {}", "SKIPPED", path.display());
    }
    let t = &report.totals;
    println!(
        "\n{} files: {} accepted, {} rejected, {} unchanged, {} errored, {} canceled ({} fallback chunks)",
        t.files, t.accepted, t.rejected, t.unchanged, t.errored, t.canceled, t.fallback_chunks
    );
    if let Some(reason) = report.halted {
        bail!("Run halted: {reason}");
    }
    Ok(())
}

async fn prompt(cfg: &Config, file: &Path, no_rag: bool) -> Result<()> {
    let language = Language::from_path(file);
    let text = read_source(file)?;
    let findings = AnalysisDispatch::from_config(&cfg.analysis)
        .analyze(file, &text, &cfg.run.target_version)
        .await;
    let job = ModernizationJob::new(file, language, cfg.run.target_version.clone())
        .with_findings(findings)
        .with_libraries(cfg.rag.selected_library_ids.clone());

    let guidance = if no_rag {
        GuidanceBundle::not_found("RAG disabled", Vec::new())
    } else {
        let client: Arc<dyn GuidanceSource> = Arc::new(RagClient::new(&cfg.rag, cfg.api_token())?);
        client.fetch(&job).await
    };

    let budget = cfg.budget.chunk_budget();
    let chunks = Chunker::new(language, budget).chunk(&text);
    let Some(first) = chunks.first() else {
        bail!("{} is empty", file.display());
    };
    let envelope = PromptRenderer::new(budget).render(&job, &guidance, first, chunks.len());
    println!("{}", envelope.text);
    eprintln!(
        "~{} tokens (budget {}), {} evidence(s) shown{}",
        format_number(envelope.estimated_tokens as u64),
        format_number(budget.prompt_budget() as u64),
        envelope.evidences_shown,
        if envelope.findings_truncated { ", findings truncated" } else { "" }
    );
    Ok(())
}

/// The config file if it loads, otherwise defaults for the file's language.
fn optional_config(path: &Path, file: &Path) -> Config {
    let language = match Language::from_path(file) {
        Language::Other => Language::Python,
        lang => lang,
    };
    let default_target = if language == Language::Java { "17" } else { "3.9" };
    config::load_config(path).unwrap_or_else(|_| Config::minimal(default_target, language))
}

fn read_source(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}
