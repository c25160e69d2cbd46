//! Run configuration.
//!
//! Configuration is a TOML file (default `./config/uplift.toml`) with five
//! sections. Only `run.target_version` is required; everything else has a
//! default. CLI flags are applied on top with [`Config::apply`], and
//! [`Config::validate`] is checked before any file is touched.
//!
//! ```toml
//! [run]
//! target_version = "3.9"
//! language = "python"
//! root = "./legacy_code"
//!
//! [llm]
//! url = "https://llm.example.com/v1/completions"
//!
//! [rag]
//! query_url = "https://rag.example.com/query"
//! filters_url = "https://rag.example.com/filters"
//! ```
//!
//! The bearer token is read from `UPLIFT_API_TOKEN`, then `LLM_API_TOKEN`,
//! then `llm.api_token`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use uplifter_core::chunk::ChunkBudget;
use uplifter_core::language::{Language, Version};

use crate::error::ConfigError;

/// Environment variables holding the bearer token, in lookup order.
pub const TOKEN_ENV_VARS: [&str; 2] = ["UPLIFT_API_TOKEN", "LLM_API_TOKEN"];

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub run: RunConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub rag: RagConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RunConfig {
    pub target_version: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_root")]
    pub root: PathBuf,
    #[serde(default)]
    pub selected_modules: Vec<String>,
    #[serde(default)]
    pub fallback_only: bool,
    #[serde(default)]
    pub summary_dir: Option<PathBuf>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

fn default_language() -> String {
    "python".to_string()
}
fn default_root() -> PathBuf {
    PathBuf::from(".")
}

#[derive(Debug, Deserialize, Clone)]
pub struct BudgetConfig {
    #[serde(default = "default_max_total_tokens")]
    pub max_total_tokens: usize,
    #[serde(default = "default_reserve_tokens")]
    pub response_reserve_tokens: usize,
    #[serde(default = "default_reserve_tokens")]
    pub prompt_scaffold_reserve_tokens: usize,
    #[serde(default = "default_target_fill")]
    pub target_fill: f64,
    #[serde(default)]
    pub split_oversized_structures: bool,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_total_tokens: default_max_total_tokens(),
            response_reserve_tokens: default_reserve_tokens(),
            prompt_scaffold_reserve_tokens: default_reserve_tokens(),
            target_fill: default_target_fill(),
            split_oversized_structures: false,
        }
    }
}

fn default_max_total_tokens() -> usize {
    8192
}
fn default_reserve_tokens() -> usize {
    1500
}
fn default_target_fill() -> f64 {
    0.75
}

impl BudgetConfig {
    pub fn chunk_budget(&self) -> ChunkBudget {
        ChunkBudget {
            max_total_tokens: self.max_total_tokens,
            response_reserve_tokens: self.response_reserve_tokens,
            prompt_scaffold_reserve_tokens: self.prompt_scaffold_reserve_tokens,
            target_fill: self.target_fill,
            split_oversized_structures: self.split_oversized_structures,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_top_p")]
    pub top_p: f64,
    #[serde(default)]
    pub stop_seq: String,
    #[serde(default = "default_client")]
    pub client: String,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "default_llm_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_read_timeout_per_kb")]
    pub read_timeout_per_kb_secs: u64,
    #[serde(default = "default_max_read_timeout")]
    pub max_read_timeout_secs: u64,
    #[serde(default)]
    pub insecure_tls: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            url: None,
            model: default_model(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            stop_seq: String::new(),
            client: default_client(),
            api_token: None,
            connect_timeout_secs: default_llm_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
            read_timeout_per_kb_secs: default_read_timeout_per_kb(),
            max_read_timeout_secs: default_max_read_timeout(),
            insecure_tls: false,
        }
    }
}

fn default_model() -> String {
    "Mistral-12b".to_string()
}
fn default_temperature() -> f64 {
    0.1
}
fn default_top_p() -> f64 {
    0.85
}
fn default_client() -> String {
    "uplifter".to_string()
}
fn default_llm_connect_timeout() -> u64 {
    30
}
fn default_read_timeout() -> u64 {
    120
}
fn default_read_timeout_per_kb() -> u64 {
    15
}
fn default_max_read_timeout() -> u64 {
    600
}

impl LlmConfig {
    /// Read timeout for a request carrying `chars` characters of code:
    /// the base timeout plus a per-KiB allowance, capped.
    pub fn read_timeout_for(&self, chars: usize) -> Duration {
        let kib = chars.div_ceil(1024) as u64;
        let secs = self
            .read_timeout_secs
            .saturating_add(self.read_timeout_per_kb_secs.saturating_mul(kib))
            .min(self.max_read_timeout_secs.max(self.read_timeout_secs));
        Duration::from_secs(secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RagConfig {
    #[serde(default)]
    pub query_url: Option<String>,
    #[serde(default)]
    pub filters_url: Option<String>,
    #[serde(default)]
    pub selected_library_ids: Vec<String>,
    #[serde(default)]
    pub secondary_library_ids: Vec<String>,
    #[serde(default = "default_user_id")]
    pub user_id: String,
    #[serde(default = "default_customer_profile_id")]
    pub customer_profile_id: String,
    #[serde(default = "default_client")]
    pub client: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_evidences_per_query")]
    pub evidences_per_query: usize,
    #[serde(default = "default_max_queries")]
    pub max_queries: usize,
    #[serde(default = "default_max_evidences")]
    pub max_evidences: usize,
    #[serde(default = "default_rag_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_rag_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub insecure_tls: bool,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            query_url: None,
            filters_url: None,
            selected_library_ids: Vec::new(),
            secondary_library_ids: Vec::new(),
            user_id: default_user_id(),
            customer_profile_id: default_customer_profile_id(),
            client: default_client(),
            top_k: default_top_k(),
            evidences_per_query: default_evidences_per_query(),
            max_queries: default_max_queries(),
            max_evidences: default_max_evidences(),
            connect_timeout_secs: default_rag_connect_timeout(),
            timeout_secs: default_rag_timeout(),
            insecure_tls: false,
        }
    }
}

fn default_user_id() -> String {
    "system".to_string()
}
fn default_customer_profile_id() -> String {
    "ericssonuser".to_string()
}
fn default_top_k() -> usize {
    10
}
fn default_evidences_per_query() -> usize {
    3
}
fn default_max_queries() -> usize {
    4
}
fn default_max_evidences() -> usize {
    5
}
fn default_rag_connect_timeout() -> u64 {
    10
}
fn default_rag_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisConfig {
    #[serde(default)]
    pub modernizer: bool,
    #[serde(default = "default_maven_bin")]
    pub maven_bin: String,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            modernizer: false,
            maven_bin: default_maven_bin(),
        }
    }
}

fn default_maven_bin() -> String {
    "mvn".to_string()
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub target_version: Option<String>,
    pub root: Option<PathBuf>,
    pub selected_modules: Vec<String>,
    pub selected_library_ids: Vec<String>,
    pub fallback_only: bool,
}

impl Config {
    /// A configuration with every default and the given target.
    pub fn minimal(target_version: &str, language: Language) -> Self {
        Self {
            run: RunConfig {
                target_version: target_version.to_string(),
                language: language.name().to_string(),
                root: default_root(),
                selected_modules: Vec::new(),
                fallback_only: false,
                summary_dir: None,
                exclude_globs: Vec::new(),
            },
            budget: BudgetConfig::default(),
            llm: LlmConfig::default(),
            rag: RagConfig::default(),
            analysis: AnalysisConfig::default(),
        }
    }

    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(v) = &overrides.target_version {
            self.run.target_version = v.clone();
        }
        if let Some(root) = &overrides.root {
            self.run.root = root.clone();
        }
        if !overrides.selected_modules.is_empty() {
            self.run.selected_modules = overrides.selected_modules.clone();
        }
        if !overrides.selected_library_ids.is_empty() {
            self.rag.selected_library_ids = overrides.selected_library_ids.clone();
        }
        if overrides.fallback_only {
            self.run.fallback_only = true;
        }
    }

    pub fn language(&self) -> Result<Language, ConfigError> {
        match Language::parse(&self.run.language) {
            Some(lang @ (Language::Python | Language::Java)) => Ok(lang),
            _ => Err(ConfigError::UnknownLanguage {
                value: self.run.language.clone(),
            }),
        }
    }

    /// Bearer token from the environment or the file, if any.
    pub fn api_token(&self) -> Option<String> {
        TOKEN_ENV_VARS
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .chain(self.llm.api_token.clone())
            .map(|t| t.trim().to_string())
            .find(|t| !t.is_empty())
    }

    /// Check everything a run needs before touching files.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_with_token(self.api_token().is_some())
    }

    /// [`validate`](Self::validate) with token presence decided by the caller.
    pub fn validate_with_token(&self, has_token: bool) -> Result<(), ConfigError> {
        if Version::parse(&self.run.target_version).is_none() {
            return Err(ConfigError::InvalidVersion {
                value: self.run.target_version.clone(),
            });
        }
        self.language()?;
        let reserved = self.budget.response_reserve_tokens + self.budget.prompt_scaffold_reserve_tokens;
        if reserved >= self.budget.max_total_tokens {
            return Err(ConfigError::BudgetTooSmall {
                reserved,
                max: self.budget.max_total_tokens,
            });
        }
        let fill = self.budget.target_fill;
        if !(fill > 0.0 && fill <= 1.0) {
            return Err(ConfigError::InvalidTargetFill { value: fill });
        }
        if !self.run.fallback_only && !has_token {
            return Err(ConfigError::MissingToken);
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if Version::parse(&config.run.target_version).is_none() {
        return Err(ConfigError::InvalidVersion {
            value: config.run.target_version.clone(),
        }
        .into());
    }
    config.language()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(text: &str) -> Config {
        toml::from_str(text).unwrap()
    }

    #[test]
    fn test_defaults() {
        let cfg = parse("[run]\ntarget_version = \"3.9\"\n");
        assert_eq!(cfg.run.language, "python");
        assert_eq!(cfg.budget.max_total_tokens, 8192);
        assert_eq!(cfg.budget.response_reserve_tokens, 1500);
        assert_eq!(cfg.llm.model, "Mistral-12b");
        assert_eq!(cfg.llm.top_p, 0.85);
        assert_eq!(cfg.rag.user_id, "system");
        assert_eq!(cfg.rag.max_evidences, 5);
        assert_eq!(cfg.analysis.maven_bin, "mvn");
        assert_eq!(cfg.budget.chunk_budget(), ChunkBudget::default());
    }

    #[test]
    fn test_validation_errors() {
        let mut cfg = Config::minimal("3.9", Language::Python);
        assert!(matches!(cfg.validate_with_token(false), Err(ConfigError::MissingToken)));
        cfg.run.fallback_only = true;
        assert!(cfg.validate_with_token(false).is_ok());

        cfg.run.target_version = "three".into();
        assert!(matches!(cfg.validate_with_token(true), Err(ConfigError::InvalidVersion { .. })));
        cfg.run.target_version = "3.9".into();

        cfg.budget.response_reserve_tokens = 7000;
        assert!(matches!(cfg.validate_with_token(true), Err(ConfigError::BudgetTooSmall { .. })));
        cfg.budget.response_reserve_tokens = 1500;

        cfg.budget.target_fill = 0.0;
        assert!(matches!(cfg.validate_with_token(true), Err(ConfigError::InvalidTargetFill { .. })));
        cfg.budget.target_fill = 0.75;

        cfg.run.language = "cobol".into();
        assert!(matches!(cfg.validate_with_token(true), Err(ConfigError::UnknownLanguage { .. })));
    }

    #[test]
    fn test_overrides() {
        let mut cfg = Config::minimal("3.6", Language::Python);
        cfg.apply(&Overrides {
            target_version: Some("3.11".into()),
            selected_library_ids: vec!["LIB-1".into()],
            fallback_only: true,
            ..Default::default()
        });
        assert_eq!(cfg.run.target_version, "3.11");
        assert_eq!(cfg.rag.selected_library_ids, vec!["LIB-1"]);
        assert!(cfg.run.fallback_only);
        assert_eq!(cfg.run.root, PathBuf::from("."));
    }

    #[test]
    fn test_read_timeout_scales_and_caps() {
        let llm = LlmConfig::default();
        assert_eq!(llm.read_timeout_for(100), Duration::from_secs(135));
        assert_eq!(llm.read_timeout_for(10 * 1024), Duration::from_secs(270));
        assert_eq!(llm.read_timeout_for(1024 * 1024), Duration::from_secs(600));
    }

    #[test]
    fn test_load_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[run]\ntarget_version = \"17\"\nlanguage = \"java\"\n\n[analysis]\nmodernizer = true").unwrap();
        let cfg = load_config(file.path()).unwrap();
        assert_eq!(cfg.language().unwrap(), Language::Java);
        assert!(cfg.analysis.modernizer);

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        writeln!(bad, "[run]\ntarget_version = \"latest\"").unwrap();
        assert!(load_config(bad.path()).is_err());
    }
}
