//! Structure-aware, token-budgeted source chunker.
//!
//! Splits a source file into [`Chunk`]s that each fit one LLM request while
//! keeping functions, classes, `try` and `with` blocks whole wherever the
//! budget allows. Chunks are exact line slices of the input: concatenating
//! every chunk's `code` in order reproduces the input byte for byte.
//!
//! # Budget
//!
//! The per-chunk code budget is
//! `B = max_total_tokens - response_reserve_tokens - prompt_scaffold_reserve_tokens`.
//! The greedy pass aims for `B * target_fill` so that guidance and findings
//! of varying size still fit.
//!
//! # Algorithm
//!
//! 1. Analyze the text into a [`CodeStructure`].
//! 2. From the current start line, find the furthest end line whose slice
//!    stays within the target (binary search over the estimate).
//! 3. Pick a *safe* boundary (one that splits no top-level statement) inside
//!    that window, searching the back half of the window first and ranking
//!    candidates:
//!    1. after a top-level blank line,
//!    2. before a new top-level `def`/`class`/`if`/`for`/`while`/`try`/`with`,
//!    3. after a top-level terminator (`return`, `raise`, `pass`, ...),
//!    4. after a line closing a multi-line bracketed expression,
//!    5. any other safe boundary.
//! 4. With no safe boundary in the window, grow the chunk to the end of the
//!    enclosing statement if that stays within `B`. Otherwise the whole
//!    statement becomes one oversized chunk tagged
//!    `complete_structures = false`, or, when `split_oversized_structures`
//!    is set, it is cut inside at a blank line or after a docstring, never
//!    inside a string or an open bracket.
//! 5. Collect top-level imports that live outside the first chunk and carry
//!    them into the first chunk's prompt view. When that pushes the first
//!    chunk over `B`, its range is re-chunked with the reduced budget.
//!
//! # Example
//!
//! ```rust
//! use uplifter_core::chunk::{ChunkBudget, Chunker};
//! use uplifter_core::language::Language;
//!
//! let source = "import os\n\ndef main():\n    print(os.getcwd())\n";
//! let chunks = Chunker::new(Language::Python, ChunkBudget::default()).chunk(source);
//! assert_eq!(chunks.len(), 1);
//! assert!(chunks[0].complete_structures);
//! assert_eq!(chunks[0].code, source);
//! ```

use std::cmp::Reverse;
use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::language::Language;
use crate::lexer::lex;
use crate::structure::{CodeStructure, Span, StatementKind};
use crate::tokens::TokenProfile;

/// Passes over the first chunk when carried imports overflow it.
const MAX_HEAD_REPLANS: usize = 3;

/// Token limits for one LLM request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChunkBudget {
    /// Hard cap on prompt plus response.
    pub max_total_tokens: usize,
    /// Tokens reserved for the model's reply.
    pub response_reserve_tokens: usize,
    /// Tokens reserved for the fixed prompt text, findings and guidance.
    pub prompt_scaffold_reserve_tokens: usize,
    /// Fraction of the code budget the greedy pass aims for.
    pub target_fill: f64,
    /// Cut inside structures that exceed the code budget instead of passing
    /// them through whole.
    pub split_oversized_structures: bool,
}

impl Default for ChunkBudget {
    fn default() -> Self {
        Self {
            max_total_tokens: 8192,
            response_reserve_tokens: 1500,
            prompt_scaffold_reserve_tokens: 1500,
            target_fill: 0.75,
            split_oversized_structures: false,
        }
    }
}

impl ChunkBudget {
    /// Per-chunk code budget `B`.
    pub fn code_budget(&self) -> usize {
        self.max_total_tokens
            .saturating_sub(self.response_reserve_tokens)
            .saturating_sub(self.prompt_scaffold_reserve_tokens)
            .max(1)
    }

    /// Size the greedy pass aims for.
    pub fn target_tokens(&self) -> usize {
        ((self.code_budget() as f64 * self.target_fill).floor() as usize).clamp(1, self.code_budget())
    }

    /// Budget for a whole rendered prompt.
    pub fn prompt_budget(&self) -> usize {
        self.max_total_tokens.saturating_sub(self.response_reserve_tokens)
    }
}

/// A contiguous slice of source scheduled for one LLM call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chunk {
    /// Zero-based position in the file.
    pub ordinal: usize,
    /// Exact source text of the slice.
    pub code: String,
    /// Lines covered, `[start, end)`.
    pub lines: Span,
    /// No boundary of this chunk splits a tracked structure, and the chunk
    /// fits the code budget.
    pub complete_structures: bool,
    /// Estimate for [`Chunk::prompt_code`].
    pub estimated_tokens: usize,
    /// Import statements from later chunks shown to the model with this
    /// chunk. Only ever set on the first chunk.
    pub carried_imports: Vec<String>,
    /// Line of `code` before which carried imports are spliced.
    pub carry_line: usize,
}

impl Chunk {
    pub fn is_first(&self) -> bool {
        self.ordinal == 0
    }

    /// Whether this chunk is the one that carries the file's imports.
    pub fn imports_carried(&self) -> bool {
        self.is_first()
    }

    /// The code as shown to the model: `code` with carried imports inserted
    /// after any shebang and module docstring.
    pub fn prompt_code(&self) -> String {
        if self.carried_imports.is_empty() {
            return self.code.clone();
        }
        let extra: usize = self.carried_imports.iter().map(|i| i.len() + 1).sum();
        let mut out = String::with_capacity(self.code.len() + extra + 1);
        let mut lines = self.code.split_inclusive('\n');
        for line in lines.by_ref().take(self.carry_line) {
            out.push_str(line);
        }
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        for import in &self.carried_imports {
            out.push_str(import);
            out.push('\n');
        }
        for line in lines {
            out.push_str(line);
        }
        out
    }
}

/// Byte offsets of line starts, consistent with the lexer's line numbering.
struct LineIndex {
    offsets: Vec<usize>,
}

impl LineIndex {
    fn new(text: &str) -> Self {
        let mut offsets = vec![0];
        for (i, b) in text.bytes().enumerate() {
            if b == b'\n' && i + 1 < text.len() {
                offsets.push(i + 1);
            }
        }
        offsets.push(text.len());
        Self { offsets }
    }

    fn line_count(&self) -> usize {
        self.offsets.len() - 1
    }

    fn slice<'t>(&self, text: &'t str, span: Span) -> &'t str {
        &text[self.offsets[span.start]..self.offsets[span.end]]
    }
}

/// Splits source text into budgeted chunks for one language.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    language: Language,
    budget: ChunkBudget,
    profile: TokenProfile,
}

impl Chunker {
    pub fn new(language: Language, budget: ChunkBudget) -> Self {
        Self {
            language,
            budget,
            profile: language.token_profile(),
        }
    }

    pub fn budget(&self) -> &ChunkBudget {
        &self.budget
    }

    /// Estimate tokens for `text` with this chunker's profile.
    pub fn estimate(&self, text: &str) -> usize {
        self.profile.estimate(text)
    }

    /// Split `text` into chunks.
    ///
    /// # Guarantees
    ///
    /// - Concatenating `code` of all chunks in order equals `text`.
    /// - Every chunk's `code` is non-empty; empty input yields no chunks.
    /// - Ordinals are contiguous from 0.
    /// - Every top-level import outside the first chunk appears in the
    ///   first chunk's `carried_imports`.
    pub fn chunk(&self, text: &str) -> Vec<Chunk> {
        if text.is_empty() {
            return Vec::new();
        }
        let structure = self.language.analyzer().analyze(text);
        let index = LineIndex::new(text);
        let whole = Span::new(0, index.line_count());
        let code_budget = self.budget.code_budget();
        let target = self.budget.target_tokens();

        let mut pieces = self.plan(text, &structure, &index, whole, target);
        let mut carried = carried_imports(text, &structure, &index, pieces[0]);

        for _ in 0..MAX_HEAD_REPLANS {
            if carried.is_empty() || pieces[0].len() <= 1 {
                break;
            }
            let carried_tokens = self.estimate(&carried.join("\n")) + 1;
            let head_tokens = self.tokens(text, &index, pieces[0]);
            if head_tokens + carried_tokens <= code_budget {
                break;
            }
            let reduced = code_budget.saturating_sub(carried_tokens).clamp(1, target);
            let mut head = self.plan(text, &structure, &index, pieces[0], reduced);
            if head.len() <= 1 {
                break;
            }
            head.extend(pieces.drain(1..));
            pieces = head;
            carried = carried_imports(text, &structure, &index, pieces[0]);
        }

        let carry_line = if carried.is_empty() {
            0
        } else {
            import_insertion_line(index.slice(text, pieces[0]), self.language)
        };

        pieces
            .into_iter()
            .enumerate()
            .map(|(ordinal, span)| {
                let code = index.slice(text, span).to_string();
                let estimated_tokens = self.estimate(&code);
                let mut chunk = Chunk {
                    ordinal,
                    code,
                    lines: span,
                    complete_structures: false,
                    estimated_tokens,
                    carried_imports: Vec::new(),
                    carry_line: 0,
                };
                if ordinal == 0 && !carried.is_empty() {
                    chunk.carried_imports = std::mem::take(&mut carried);
                    chunk.carry_line = carry_line;
                    chunk.estimated_tokens = self.estimate(&chunk.prompt_code());
                }
                // Judged on the prompt view, carried imports included.
                chunk.complete_structures = structure.is_safe_boundary(span.start)
                    && structure.is_safe_boundary(span.end)
                    && chunk.estimated_tokens <= code_budget;
                chunk
            })
            .collect()
    }

    fn tokens(&self, text: &str, index: &LineIndex, span: Span) -> usize {
        self.estimate(index.slice(text, span))
    }

    /// Greedy split of `range` into spans aiming for `target` tokens.
    fn plan(
        &self,
        text: &str,
        structure: &CodeStructure,
        index: &LineIndex,
        range: Span,
        target: usize,
    ) -> Vec<Span> {
        let code_budget = self.budget.code_budget();
        let mut out = Vec::new();
        let mut start = range.start;

        while start < range.end {
            let rest = Span::new(start, range.end);
            if self.tokens(text, index, rest) <= target {
                out.push(rest);
                break;
            }

            let fit = self.largest_fit(text, index, start, range.end, target);
            if let Some(cut) = safe_break(structure, start, fit) {
                out.push(Span::new(start, cut));
                start = cut;
                continue;
            }

            let grow_to = (fit.max(start) + 1..=range.end)
                .find(|&b| structure.is_safe_boundary(b))
                .unwrap_or(range.end);
            let grown = Span::new(start, grow_to);
            let end = if self.tokens(text, index, grown) <= code_budget
                || !self.budget.split_oversized_structures
            {
                grow_to
            } else {
                forced_break(structure, start, fit).unwrap_or_else(|| fit.max(start + 1))
            };
            out.push(Span::new(start, end));
            start = end;
        }
        out
    }

    /// Largest `end` in `[start, limit]` whose slice fits `target`.
    fn largest_fit(&self, text: &str, index: &LineIndex, start: usize, limit: usize, target: usize) -> usize {
        let (mut lo, mut hi) = (start, limit);
        while lo < hi {
            let mid = (lo + hi + 1) / 2;
            if self.tokens(text, index, Span::new(start, mid)) <= target {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }
        lo
    }
}

/// Best-ranked boundary in `(start, fit]`, back half first.
fn best_boundary(
    start: usize,
    fit: usize,
    rank: impl Fn(usize) -> Option<u8>,
) -> Option<usize> {
    if fit <= start {
        return None;
    }
    let mid = start + (fit - start) / 2;
    let pick = |lo: usize, hi: usize| {
        (lo..=hi)
            .filter_map(|b| rank(b).map(|r| (r, b)))
            .min_by_key(|&(r, b)| (r, Reverse(b)))
            .map(|(_, b)| b)
    };
    pick(mid.max(start + 1), fit).or_else(|| pick(start + 1, fit))
}

fn safe_break(structure: &CodeStructure, start: usize, fit: usize) -> Option<usize> {
    best_boundary(start, fit, |b| {
        if !structure.is_safe_boundary(b) {
            return None;
        }
        if structure.is_blank(b - 1) && !structure.is_blank(b) {
            return Some(1);
        }
        if structure
            .statement_starting_at(b)
            .is_some_and(|s| s.kind.opens_block())
        {
            return Some(2);
        }
        if structure
            .statement_ending_at(b)
            .is_some_and(|s| s.kind == StatementKind::Terminator)
        {
            return Some(3);
        }
        if structure.expression_ends.binary_search(&(b - 1)).is_ok() {
            return Some(4);
        }
        Some(7)
    })
}

/// Cut inside an oversized structure: blank lines, then docstring ends,
/// preferring boundaries between members.
fn forced_break(structure: &CodeStructure, start: usize, fit: usize) -> Option<usize> {
    best_boundary(start, fit, |b| {
        if !structure.is_lexically_clean(b) {
            return None;
        }
        let between_members = !structure.splits_member(b);
        let after_blank = structure.is_blank(b - 1) && !structure.is_blank(b);
        let after_docstring = structure.docstring_ends.binary_search(&(b - 1)).is_ok();
        Some(match (after_blank, after_docstring, between_members) {
            (true, _, true) => 5,
            (_, true, true) => 6,
            (true, _, false) => 8,
            (_, true, false) => 9,
            (false, false, true) => 10,
            (false, false, false) => 11,
        })
    })
}

/// Top-level import statements outside `head` that `head` lacks.
fn carried_imports(text: &str, structure: &CodeStructure, index: &LineIndex, head: Span) -> Vec<String> {
    let head_text = index.slice(text, head);
    let present: HashSet<&str> = head_text.lines().map(str::trim).collect();
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for span in structure.imports.iter().filter(|s| s.start >= head.end) {
        let statement = index.slice(text, *span).trim_end();
        if statement.lines().all(|l| present.contains(l.trim())) {
            continue;
        }
        if seen.insert(statement) {
            out.push(statement.to_string());
        }
    }
    out
}

/// Line of `code` before which carried imports go: after a shebang, a
/// module docstring, or a Java `package` declaration.
fn import_insertion_line(code: &str, language: Language) -> usize {
    let lexed = lex(code, &language.lexical_rules());
    let lines = &lexed.lines;
    let mut at = 0;
    if code.starts_with("#!") {
        at = 1;
    }
    let Some(first) = (at..lines.len()).find(|&i| !lines[i].blank) else {
        return at;
    };
    match language {
        Language::Python => {
            let opens_string = lines[first].code.starts_with('"') || lines[first].code.starts_with('\'');
            if opens_string {
                if let Some(end) = (first..lines.len()).find(|&i| lines[i].closes_docstring) {
                    return end + 1;
                }
            }
            at
        }
        Language::Java => (first..lines.len())
            .find(|&i| lines[i].code.trim_start().starts_with("package "))
            .map(|i| i + 1)
            .unwrap_or(at),
        Language::Other => at,
    }
}
