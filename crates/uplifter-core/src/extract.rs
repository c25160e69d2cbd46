//! Reply parsing and truncation screening.
//!
//! [`extract`] pulls the change summary and the updated code out of a raw
//! model reply. The code region is located by, in order:
//!
//! 1. the first fenced block inside `<updated_code>` tags,
//! 2. the first fenced block whose language hint matches the file,
//! 3. the whole reply, when it starts like source code of the language.
//!
//! [`screen`] then rejects replies that were cut short by the model.

use serde::Serialize;

use crate::language::Language;
use crate::prompt::{CODE_CLOSE, CODE_OPEN, SUMMARY_CLOSE, SUMMARY_OPEN};

/// Phrases models use when they abbreviate code instead of returning it.
/// Matched case-insensitively.
pub const TRUNCATION_MARKERS: &[&str] = &[
    "(other methods unchanged)",
    "(rest unchanged)",
    "(unchanged)",
    "... truncated ...",
    "[truncated]",
    "omitted for brevity",
    "and so on",
    "rest of the code",
    "rest of the file",
    "remaining code unchanged",
    "remaining methods unchanged",
    "... existing code ...",
    "same as before",
];

/// Candidate shorter than this fraction of a complete chunk is rejected.
pub const MIN_LENGTH_RATIO: f64 = 0.7;

/// Parsed model reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LlmResponse {
    /// Text of the `<change_summary>` region; empty when absent.
    pub change_summary: String,
    /// Extracted code; never `Some("")`.
    pub updated_code: Option<String>,
    pub raw_text: String,
}

/// Why a reply cannot be used for a chunk.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractionFailure {
    #[error("no code region found in reply")]
    NoCodeRegion,
    #[error("reply truncated (found {marker:?})")]
    Truncated { marker: String },
    #[error("reply too short: {got} of {expected} characters")]
    TooShort { got: usize, expected: usize },
}

/// Parse `raw` for a file in `language`.
pub fn extract(raw: &str, language: Language) -> LlmResponse {
    let change_summary = tagged_region(raw, SUMMARY_OPEN, SUMMARY_CLOSE)
        .map(|s| s.trim().to_string())
        .unwrap_or_default();
    let updated_code = code_region(raw, language)
        .filter(|c| !c.trim().is_empty())
        .map(str::to_string);
    LlmResponse {
        change_summary,
        updated_code,
        raw_text: raw.to_string(),
    }
}

/// Accept or reject the code of `response` for a chunk whose prompt view
/// was `shown`.
///
/// # Errors
///
/// - [`ExtractionFailure::NoCodeRegion`] when nothing was extracted.
/// - [`ExtractionFailure::Truncated`] when the code carries a truncation
///   marker that the original did not.
/// - [`ExtractionFailure::TooShort`] when a complete-structures chunk came
///   back under 70% of its original length.
pub fn screen(response: &LlmResponse, shown: &str, complete_structures: bool) -> Result<String, ExtractionFailure> {
    let code = response
        .updated_code
        .as_deref()
        .ok_or(ExtractionFailure::NoCodeRegion)?;
    if let Some(marker) = truncation_marker(code, shown) {
        return Err(ExtractionFailure::Truncated {
            marker: marker.to_string(),
        });
    }
    let got = code.chars().count();
    let expected = shown.chars().count();
    if complete_structures && (got as f64) < expected as f64 * MIN_LENGTH_RATIO {
        return Err(ExtractionFailure::TooShort { got, expected });
    }
    Ok(code.to_string())
}

/// First truncation marker present in `code` but absent from `original`.
pub fn truncation_marker(code: &str, original: &str) -> Option<&'static str> {
    let code = code.to_lowercase();
    let original = original.to_lowercase();
    TRUNCATION_MARKERS
        .iter()
        .copied()
        .find(|m| code.contains(m) && !original.contains(m))
}

fn tagged_region<'a>(raw: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let start = raw.find(open)? + open.len();
    let rest = &raw[start..];
    Some(match rest.find(close) {
        Some(end) => &rest[..end],
        None => rest,
    })
}

fn code_region(raw: &str, language: Language) -> Option<&str> {
    if let Some(region) = tagged_region(raw, CODE_OPEN, CODE_CLOSE) {
        if let Some(fence) = fences(region).into_iter().next() {
            return Some(fence.body);
        }
    }
    let hints = language.fence_hints();
    if let Some(fence) = fences(raw)
        .into_iter()
        .find(|f| hints.iter().any(|h| f.hint.eq_ignore_ascii_case(h)))
    {
        return Some(fence.body);
    }
    let trimmed = raw.trim();
    language
        .preamble_prefixes()
        .iter()
        .any(|p| trimmed.starts_with(p))
        .then_some(trimmed)
}

struct Fence<'a> {
    hint: &'a str,
    body: &'a str,
}

/// Fenced blocks of `text`. An opening fence is a line starting with
/// three backticks; it closes at the next line that is exactly three
/// backticks. An unclosed fence runs to the end of the text.
fn fences(text: &str) -> Vec<Fence<'_>> {
    let mut out = Vec::new();
    let mut open: Option<(&str, usize)> = None;
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();
        let trimmed = line.trim();
        match open {
            None => {
                if let Some(hint) = trimmed.strip_prefix("```") {
                    open = Some((hint.trim(), offset));
                }
            }
            Some((hint, body_start)) => {
                if trimmed == "```" {
                    let body = &text[body_start..line_start];
                    out.push(Fence {
                        hint,
                        body: body.strip_suffix('\n').unwrap_or(body),
                    });
                    open = None;
                }
            }
        }
    }
    if let Some((hint, body_start)) = open {
        out.push(Fence {
            hint,
            body: text[body_start.min(text.len())..].trim_end(),
        });
    }
    out
}
