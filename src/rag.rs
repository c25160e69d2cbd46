//! RAG guidance client.
//!
//! Talks to the retrieval service over two endpoints:
//!
//! - **query** (POST): `{index_name, query, top_k, num_rag_evidences,
//!   rerank, generate_answer, user_id, customer_profile_id, client,
//!   cpi_library_id}` → `{evidences: [{doc_text, cpi_library_title,
//!   section_title, score}], answer}`
//! - **filters** (GET `?user_id=&customer_profile_id=`) →
//!   `{search_filters: {category: {library_id: title}}}`
//!
//! Each topic query walks the library tiers: the selected libraries first,
//! then selected plus secondary, then no filter, stopping at the first tier
//! that returns evidence. Failures never reach the caller of
//! [`GuidanceSource::fetch`]; they become a not-found bundle.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;

use uplifter_core::guidance::{topic_queries, GuidanceBundle, GuidanceEvidence};
use uplifter_core::language::Language;
use uplifter_core::models::ModernizationJob;

use crate::config::RagConfig;
use crate::error::RemoteFailure;
use crate::traits::GuidanceSource;

/// Characters of an error body kept in a [`RemoteFailure::Status`].
const ERROR_BODY_CHARS: usize = 200;

/// Probe query issued by [`RagClient::check_connection`].
const PROBE_QUERY: &str = "collections best practices";

/// category → library id → library title.
pub type LibraryCatalog = BTreeMap<String, BTreeMap<String, String>>;

/// Parsed query response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RagAnswer {
    pub evidences: Vec<GuidanceEvidence>,
    pub answer: String,
}

/// Result of [`RagClient::check_connection`].
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionReport {
    pub reachable: bool,
    pub evidences: usize,
    pub message: String,
}

/// HTTP client for the RAG service.
pub struct RagClient {
    client: reqwest::Client,
    config: RagConfig,
    token: Option<String>,
}

impl RagClient {
    pub fn new(config: &RagConfig, token: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(config.insecure_tls)
            .build()?;
        Ok(Self {
            client,
            config: config.clone(),
            token,
        })
    }

    /// Query URL and token are both present.
    pub fn is_configured(&self) -> bool {
        self.config.query_url.is_some() && self.token.is_some()
    }

    /// One query against `libraries` (empty means no filter).
    pub async fn query(
        &self,
        query: &str,
        libraries: &[String],
        max_evidences: usize,
    ) -> Result<RagAnswer, RemoteFailure> {
        let (url, token) = match (&self.config.query_url, &self.token) {
            (Some(url), Some(token)) => (url, token),
            _ => return Err(RemoteFailure::NotConfigured),
        };
        let body = query_payload(&self.config, query, libraries, max_evidences);
        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", token))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;
        let json = decode(response).await?;
        Ok(parse_answer(&json))
    }

    /// The library catalog from the filters endpoint.
    pub async fn list_libraries(&self) -> Result<LibraryCatalog, RemoteFailure> {
        let (url, token) = match (&self.config.filters_url, &self.token) {
            (Some(url), Some(token)) => (url, token),
            _ => return Err(RemoteFailure::NotConfigured),
        };
        let response = self
            .client
            .get(url)
            .header("Authorization", format!("Bearer {}", token))
            .query(&[
                ("user_id", self.config.user_id.as_str()),
                ("customer_profile_id", self.config.customer_profile_id.as_str()),
            ])
            .send()
            .await?;
        let json = decode(response).await?;
        Ok(parse_catalog(&json))
    }

    /// Issue one probe query and report what came back.
    pub async fn check_connection(&self) -> ConnectionReport {
        match self
            .query(PROBE_QUERY, &self.config.selected_library_ids, 2)
            .await
        {
            Ok(answer) if answer.evidences.is_empty() => ConnectionReport {
                reachable: true,
                evidences: 0,
                message: "RAG service connected but returned no evidences".to_string(),
            },
            Ok(answer) => ConnectionReport {
                reachable: true,
                evidences: answer.evidences.len(),
                message: format!("RAG service working: {} evidences", answer.evidences.len()),
            },
            Err(e) => ConnectionReport {
                reachable: false,
                evidences: 0,
                message: format!("RAG service connection failed: {e}"),
            },
        }
    }

    /// Library filters tried in order for one query.
    fn tiers(&self) -> Vec<Vec<String>> {
        let selected = &self.config.selected_library_ids;
        let secondary = &self.config.secondary_library_ids;
        if selected.is_empty() {
            return vec![Vec::new()];
        }
        let mut tiers = vec![selected.clone()];
        if !secondary.is_empty() {
            let mut expanded = selected.clone();
            expanded.extend(secondary.iter().filter(|id| !selected.contains(id)).cloned());
            tiers.push(expanded);
        }
        tiers.push(Vec::new());
        tiers
    }

    /// Evidence for `query`, widening the library filter while empty.
    async fn query_tiered(&self, query: &str) -> Result<Vec<GuidanceEvidence>, RemoteFailure> {
        let mut last = Vec::new();
        for libraries in self.tiers() {
            let answer = self
                .query(query, &libraries, self.config.evidences_per_query)
                .await?;
            if !answer.evidences.is_empty() {
                tracing::debug!(query, libraries = libraries.len(), hits = answer.evidences.len(), "rag hits");
                return Ok(answer.evidences);
            }
            last = answer.evidences;
        }
        Ok(last)
    }
}

#[async_trait]
impl GuidanceSource for RagClient {
    fn name(&self) -> &str {
        "rag"
    }

    async fn fetch(&self, job: &ModernizationJob) -> GuidanceBundle {
        if !self.is_configured() {
            return GuidanceBundle::not_found("RAG service not configured", Vec::new());
        }
        let queries = topic_queries(
            job.language,
            &job.target_version,
            &job.findings,
            self.config.max_queries,
        );

        let mut evidences = Vec::new();
        let mut succeeded = 0;
        let mut last_error = None;
        for query in &queries {
            match self.query_tiered(query).await {
                Ok(hits) => {
                    succeeded += 1;
                    evidences.extend(hits);
                }
                Err(e) => {
                    tracing::warn!(query = %query, error = %e, "rag query failed");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if succeeded == 0 => {
                GuidanceBundle::not_found(format!("RAG guidance unavailable ({})", e.label()), queries)
            }
            _ => GuidanceBundle::from_evidences(job.language, evidences, self.config.max_evidences, queries),
        }
    }
}

/// Guidance source used when RAG is disabled.
pub struct NoGuidance {
    reason: String,
}

impl NoGuidance {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

#[async_trait]
impl GuidanceSource for NoGuidance {
    fn name(&self) -> &str {
        "none"
    }

    async fn fetch(&self, _job: &ModernizationJob) -> GuidanceBundle {
        GuidanceBundle::not_found(self.reason.clone(), Vec::new())
    }
}

pub fn query_payload(config: &RagConfig, query: &str, libraries: &[String], max_evidences: usize) -> Value {
    json!({
        "index_name": "*",
        "query": query,
        "top_k": config.top_k,
        "num_rag_evidences": max_evidences,
        "rerank": true,
        "generate_answer": true,
        "user_id": config.user_id,
        "customer_profile_id": config.customer_profile_id,
        "client": config.client,
        "cpi_library_id": libraries,
    })
}

async fn decode(response: reqwest::Response) -> Result<Value, RemoteFailure> {
    let status = response.status();
    if !status.is_success() {
        let body: String = response
            .text()
            .await
            .unwrap_or_default()
            .chars()
            .take(ERROR_BODY_CHARS)
            .collect();
        return Err(RemoteFailure::Status {
            code: status.as_u16(),
            body,
        });
    }
    response.json::<Value>().await.map_err(|e| RemoteFailure::Decode {
        message: e.to_string(),
    })
}

pub fn parse_answer(json: &Value) -> RagAnswer {
    let evidences = json
        .get("evidences")
        .and_then(|e| e.as_array())
        .map(|items| {
            items
                .iter()
                .map(|item| {
                    let text = |key: &str| item.get(key).and_then(|v| v.as_str()).unwrap_or("");
                    GuidanceEvidence::new(
                        text("cpi_library_title"),
                        text("section_title"),
                        text("doc_text"),
                        item.get("score").and_then(|s| s.as_f64()).unwrap_or(0.0),
                    )
                })
                .filter(|e| !e.text_snippet.is_empty())
                .collect()
        })
        .unwrap_or_default();
    RagAnswer {
        evidences,
        answer: json
            .get("answer")
            .and_then(|a| a.as_str())
            .unwrap_or_default()
            .to_string(),
    }
}

pub fn parse_catalog(json: &Value) -> LibraryCatalog {
    let mut catalog = LibraryCatalog::new();
    let Some(filters) = json.get("search_filters").and_then(|f| f.as_object()) else {
        return catalog;
    };
    for (category, libraries) in filters {
        let Some(libraries) = libraries.as_object() else {
            continue;
        };
        let entry = catalog.entry(category.clone()).or_default();
        for (id, title) in libraries {
            entry.insert(id.clone(), title.as_str().unwrap_or_default().to_string());
        }
    }
    catalog
}

// ═══════════════════════════════════════════════════════════════════════
// Library tiers
// ═══════════════════════════════════════════════════════════════════════

/// Suggested library ids, by priority.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LibraryTiers {
    pub high: Vec<String>,
    pub secondary: Vec<String>,
    pub fallback: Vec<String>,
}

const DOMAIN_KEYWORDS: &[&str] = &["charging", "oam"];

fn language_keywords(language: Language) -> &'static [&'static str] {
    match language {
        Language::Python => &["python"],
        Language::Java => &["java", "jdk"],
        Language::Other => &[],
    }
}

/// Split the catalog into tiers for `language`.
///
/// A library whose title names the language is `high`; one whose title
/// names a domain keyword ("charging", "oam") is `secondary`; one matched
/// only through its category or id is `fallback`. Unrelated libraries are
/// left out.
pub fn classify_libraries(catalog: &LibraryCatalog, language: Language) -> LibraryTiers {
    let lang = language_keywords(language);
    let mut tiers = LibraryTiers::default();
    for (category, libraries) in catalog {
        let category = category.to_lowercase();
        for (id, title) in libraries {
            let title = title.to_lowercase();
            let id_lower = id.to_lowercase();
            let bucket = if lang.iter().any(|k| title.contains(k)) {
                &mut tiers.high
            } else if DOMAIN_KEYWORDS.iter().any(|k| title.contains(k)) {
                &mut tiers.secondary
            } else if lang
                .iter()
                .chain(DOMAIN_KEYWORDS)
                .any(|k| category.contains(k) || id_lower.contains(k))
            {
                &mut tiers.fallback
            } else {
                continue;
            };
            if !bucket.contains(id) {
                bucket.push(id.clone());
            }
        }
    }
    tiers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> LibraryCatalog {
        let json = json!({
            "search_filters": {
                "CPI Store - Charging": {
                    "LIB-1": "Java Platform Guide",
                    "LIB-2": "Online Charging Manual",
                    "LIB-3": "Release Notes"
                },
                "Tools": {
                    "LIB-4": "Python Scripting",
                    "LIB-5": "Hardware Install"
                }
            }
        });
        parse_catalog(&json)
    }

    #[test]
    fn test_parse_catalog_ordered() {
        let catalog = catalog();
        let categories: Vec<&String> = catalog.keys().collect();
        assert_eq!(categories, vec!["CPI Store - Charging", "Tools"]);
        assert_eq!(catalog["Tools"]["LIB-4"], "Python Scripting");
    }

    #[test]
    fn test_classify_libraries_java() {
        let tiers = classify_libraries(&catalog(), Language::Java);
        assert_eq!(tiers.high, vec!["LIB-1"]);
        assert_eq!(tiers.secondary, vec!["LIB-2"]);
        assert_eq!(tiers.fallback, vec!["LIB-3"]);
    }

    #[test]
    fn test_classify_libraries_python() {
        let tiers = classify_libraries(&catalog(), Language::Python);
        assert_eq!(tiers.high, vec!["LIB-4"]);
        assert!(!tiers.fallback.contains(&"LIB-5".to_string()));
    }

    #[test]
    fn test_query_payload_fields() {
        let config = RagConfig::default();
        let body = query_payload(&config, "Python idioms", &["LIB-1".to_string()], 3);
        assert_eq!(body["index_name"], "*");
        assert_eq!(body["top_k"], 10);
        assert_eq!(body["num_rag_evidences"], 3);
        assert_eq!(body["rerank"], true);
        assert_eq!(body["generate_answer"], true);
        assert_eq!(body["user_id"], "system");
        assert_eq!(body["customer_profile_id"], "ericssonuser");
        assert_eq!(body["cpi_library_id"][0], "LIB-1");
    }

    #[test]
    fn test_parse_answer() {
        let json = json!({
            "evidences": [
                {"doc_text": "Use f-strings.", "cpi_library_title": "Py Guide", "section_title": "Strings", "score": 0.9},
                {"doc_text": "", "cpi_library_title": "Empty"}
            ],
            "answer": "ok"
        });
        let answer = parse_answer(&json);
        assert_eq!(answer.evidences.len(), 1);
        assert_eq!(answer.evidences[0].source(), "Py Guide - Strings");
        assert_eq!(answer.answer, "ok");
        assert!(parse_answer(&json!({})).evidences.is_empty());
    }

    #[test]
    fn test_tiers_widen() {
        let mut config = RagConfig::default();
        let client = RagClient::new(&config, None).unwrap();
        assert_eq!(client.tiers(), vec![Vec::<String>::new()]);

        config.selected_library_ids = vec!["A".into()];
        config.secondary_library_ids = vec!["A".into(), "B".into()];
        let client = RagClient::new(&config, None).unwrap();
        assert_eq!(
            client.tiers(),
            vec![vec!["A".to_string()], vec!["A".to_string(), "B".to_string()], vec![]]
        );
    }

    #[tokio::test]
    async fn test_unconfigured_fetch_is_not_found() {
        let client = RagClient::new(&RagConfig::default(), Some("t".into())).unwrap();
        let job = ModernizationJob::new("a.py", Language::Python, "3.9");
        let bundle = client.fetch(&job).await;
        assert!(!bundle.found);
        assert_eq!(bundle.summary, "RAG service not configured");
    }
}
