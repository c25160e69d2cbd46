//! RAG guidance model: evidences, the per-job bundle, topic queries and the
//! compact text block embedded in prompts.
//!
//! Fetching lives in the application crate; this module only decides what
//! to ask and how to condense what came back.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::language::Language;

/// Prompt text used whenever no guidance is available.
pub const NO_GUIDANCE: &str = "No specific RAG guidance found for this modernization scenario.";

/// Characters of evidence text kept per hit.
pub const MAX_SNIPPET_CHARS: usize = 400;

/// Characters of evidence text rendered into a prompt.
pub const RENDERED_SNIPPET_CHARS: usize = 300;

/// Evidences rendered into a prompt.
pub const RENDERED_EVIDENCES: usize = 3;

/// Prefix length used to detect duplicate evidences.
const DEDUP_PREFIX_CHARS: usize = 100;

/// One RAG hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuidanceEvidence {
    pub source_library: String,
    pub section: String,
    pub text_snippet: String,
    pub relevance_score: f64,
}

impl GuidanceEvidence {
    /// Build an evidence, bounding the snippet and clamping the score at 0.
    pub fn new(source_library: &str, section: &str, text: &str, score: f64) -> Self {
        let snippet = truncate_chars(text.trim(), MAX_SNIPPET_CHARS);
        Self {
            source_library: non_empty_or(source_library, "Unknown Library"),
            section: non_empty_or(section, "Unknown Section"),
            text_snippet: snippet,
            relevance_score: if score.is_finite() { score.max(0.0) } else { 0.0 },
        }
    }

    /// `"<library> - <section>"`.
    pub fn source(&self) -> String {
        format!("{} - {}", self.source_library, self.section)
    }
}

/// Aggregated RAG result for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuidanceBundle {
    pub summary: String,
    pub evidences: Vec<GuidanceEvidence>,
    pub libraries_searched: Vec<String>,
    pub found: bool,
    /// Queries issued, in order.
    pub queries: Vec<String>,
}

impl GuidanceBundle {
    /// A bundle carrying no guidance, with the reason in `summary`.
    pub fn not_found(reason: impl Into<String>, queries: Vec<String>) -> Self {
        Self {
            summary: reason.into(),
            evidences: Vec::new(),
            libraries_searched: Vec::new(),
            found: false,
            queries,
        }
    }

    /// Condense raw hits: drop duplicates (same first 100 characters), keep
    /// the `max_evidences` best by score, first-seen order breaking ties.
    pub fn from_evidences(
        language: Language,
        evidences: Vec<GuidanceEvidence>,
        max_evidences: usize,
        queries: Vec<String>,
    ) -> Self {
        let mut seen = HashSet::new();
        let mut unique: Vec<GuidanceEvidence> = evidences
            .into_iter()
            .filter(|e| seen.insert(truncate_chars(&e.text_snippet, DEDUP_PREFIX_CHARS)))
            .collect();
        if unique.is_empty() {
            return Self::not_found(NO_GUIDANCE, queries);
        }
        let topics = unique.len();
        unique.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
        unique.truncate(max_evidences.max(1));

        let mut libraries = Vec::new();
        for e in &unique {
            if !libraries.contains(&e.source_library) {
                libraries.push(e.source_library.clone());
            }
        }

        Self {
            summary: format!(
                "Found guidance on {} {} topics.",
                topics,
                language.display_name()
            ),
            evidences: unique,
            libraries_searched: libraries,
            found: true,
            queries,
        }
    }

    /// The guidance block for a prompt.
    pub fn render(&self) -> String {
        self.render_with(RENDERED_EVIDENCES)
    }

    /// The guidance block showing at most `max_evidences` evidences. With
    /// zero evidences only the summary line and sources remain.
    pub fn render_with(&self, max_evidences: usize) -> String {
        if !self.found {
            return NO_GUIDANCE.to_string();
        }
        let mut out = format!("MODERNIZATION GUIDANCE: {}", self.summary);
        let shown: Vec<&GuidanceEvidence> = self.evidences.iter().take(max_evidences).collect();
        if !shown.is_empty() {
            out.push_str("\n\nDETAILED GUIDANCE:");
            for e in shown {
                out.push_str(&format!(
                    "\n- From {}: {}",
                    e.source(),
                    truncate_chars(&e.text_snippet, RENDERED_SNIPPET_CHARS)
                ));
            }
        }
        if !self.libraries_searched.is_empty() {
            let sources: Vec<&str> = self
                .libraries_searched
                .iter()
                .take(RENDERED_EVIDENCES)
                .map(String::as_str)
                .collect();
            out.push_str(&format!("\n\nSources: {}", sources.join(", ")));
        }
        out
    }
}

/// Topic queries for one job: keyword-driven queries derived from the
/// findings first, then base topics for the language, deduplicated and
/// capped at `max_queries`.
pub fn topic_queries(language: Language, target_version: &str, findings: &str, max_queries: usize) -> Vec<String> {
    let lower = findings.to_ascii_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| lower.contains(w));
    let mut queries: Vec<String> = Vec::new();

    match language {
        Language::Python => {
            if has(&["print statement", "print function"]) {
                queries.push("Python print function".into());
            }
            if has(&["% formatting", "f-string", "string formatting"]) {
                queries.push("Python string formatting f-strings".into());
            }
            if has(&["type hint", "annotation"]) {
                queries.push("Python type hints".into());
            }
            if has(&["walrus", "assignment expression"]) {
                queries.push("Python assignment expressions".into());
            }
            if has(&["except", "exception"]) {
                queries.push("Python exception handling".into());
            }
            queries.push(format!("Python {target_version} modernization best practices"));
            queries.push("Python coding guidelines".into());
            queries.push("Python security".into());
            queries.push("Python performance".into());
        }
        Language::Java => {
            if has(&["vector", "arraylist", "collection"]) {
                queries.push("Java collections Vector".into());
                queries.push("Java List Vector".into());
            }
            if has(&["deprecated"]) {
                queries.push("Java deprecated".into());
                queries.push("Java API deprecated".into());
            }
            if has(&["security"]) {
                queries.push("Java security".into());
                queries.push("Java certificate".into());
            }
            if has(&["thread", "synchronized"]) {
                queries.push("Java threading".into());
                queries.push("Java synchronization".into());
            }
            for base in [
                "Java collections",
                "Java security",
                "Java environment",
                "Java performance",
                "Java memory management",
                "Java threading concurrency",
                "Java API design patterns",
                "Java configuration",
            ] {
                queries.push(base.into());
            }
        }
        Language::Other => {
            queries.push(format!("{target_version} modernization best practices"));
        }
    }

    let mut seen = HashSet::new();
    queries.retain(|q| seen.insert(q.clone()));
    queries.truncate(max_queries);
    queries
}

/// First `max` characters of `text`, never splitting a code point.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

fn non_empty_or(value: &str, fallback: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(lib: &str, text: &str, score: f64) -> GuidanceEvidence {
        GuidanceEvidence::new(lib, "Intro", text, score)
    }

    #[test]
    fn test_not_found_renders_notice_verbatim() {
        let b = GuidanceBundle::not_found("RAG API returned HTTP 503", vec![]);
        assert!(!b.found);
        assert!(b.evidences.is_empty());
        assert_eq!(b.render(), NO_GUIDANCE);
    }

    #[test]
    fn test_dedup_by_prefix_and_top_n() {
        let common = "x".repeat(120);
        let hits = vec![
            ev("L1", &format!("{common}a"), 0.2),
            ev("L2", &format!("{common}b"), 0.9),
            ev("L3", "other text", 0.5),
            ev("L4", "third", 0.7),
        ];
        let b = GuidanceBundle::from_evidences(Language::Python, hits, 2, vec!["q".into()]);
        assert!(b.found);
        assert_eq!(b.evidences.len(), 2);
        assert_eq!(b.evidences[0].source_library, "L4");
        assert_eq!(b.evidences[1].source_library, "L3");
        assert_eq!(b.summary, "Found guidance on 3 Python topics.");
    }

    #[test]
    fn test_empty_evidences_is_not_found() {
        let b = GuidanceBundle::from_evidences(Language::Java, vec![], 5, vec![]);
        assert!(!b.found);
    }

    #[test]
    fn test_render_shape() {
        let long = "y".repeat(500);
        let hits = vec![ev("CCN", &long, 1.0), ev("OaM", "short", 0.5)];
        let b = GuidanceBundle::from_evidences(Language::Java, hits, 5, vec![]);
        let text = b.render();
        assert!(text.starts_with("MODERNIZATION GUIDANCE: Found guidance on 2 Java topics."));
        assert!(text.contains(&format!("- From CCN - Intro: {}\n", "y".repeat(300))));
        assert!(text.contains("- From OaM - Intro: short"));
        assert!(text.ends_with("Sources: CCN, OaM"));
        assert!(!b.render_with(0).contains("- From"));
    }

    #[test]
    fn test_evidence_bounds() {
        let e = GuidanceEvidence::new("", "", &"é".repeat(1000), -3.0);
        assert_eq!(e.text_snippet.chars().count(), MAX_SNIPPET_CHARS);
        assert_eq!(e.relevance_score, 0.0);
        assert_eq!(e.source(), "Unknown Library - Unknown Section");
    }

    #[test]
    fn test_topic_queries_keyword_first_and_capped() {
        let q = topic_queries(Language::Java, "17", "Uses Vector and deprecated Date", 4);
        assert_eq!(
            q,
            vec!["Java collections Vector", "Java List Vector", "Java deprecated", "Java API deprecated"]
        );
        let q = topic_queries(Language::Python, "3.9", "", 4);
        assert_eq!(q[0], "Python 3.9 modernization best practices");
        assert_eq!(q.len(), 4);
    }
}
