//! Code structure analysis.
//!
//! Produces a [`CodeStructure`]: the ordered top-level statements of a
//! source text, with the spans of definitions, classes, `try` and `with`
//! blocks, decorator lines, import statements and second-level members.
//! The chunker uses it to decide where a file may be cut without splitting
//! a logical unit; the analyzer itself never modifies text.
//!
//! All spans are half-open line ranges `[start, end)` over zero-based line
//! indices. A *boundary* `b` means "cut before line `b`"; a span splits at
//! `b` when `start < b < end`.
//!
//! Three analyzers exist, selected through
//! [`Language::analyzer`](crate::language::Language::analyzer):
//!
//! | Analyzer | Statement detection |
//! |----------|---------------------|
//! | [`PythonAnalyzer`] | indentation: a statement starts at a column-zero code line |
//! | [`BraceAnalyzer`] | bracket depth: a statement runs until `;` or `}` at depth zero |
//! | [`PlainAnalyzer`] | none; every line is a safe boundary |
//!
//! Blank and comment-only lines never start or end a statement, so they
//! fall between statements and are always eligible break points.

use serde::{Deserialize, Serialize};

use crate::language::Language;
use crate::lexer::{lex, Lexed, LexedLine};

/// Half-open line range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, line: usize) -> bool {
        self.start <= line && line < self.end
    }

    /// Whether cutting before `boundary` would split this span.
    pub fn splits_at(&self, boundary: usize) -> bool {
        self.start < boundary && boundary < self.end
    }
}

/// Classification of a top-level statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Import,
    Function,
    Class,
    Try,
    With,
    If,
    For,
    While,
    /// `return`, `break`, `continue`, `raise`, `yield` or `pass`.
    Terminator,
    Other,
}

impl StatementKind {
    /// Kinds whose span must not be split for a chunk to keep
    /// `complete_structures`.
    pub fn is_protected(&self) -> bool {
        matches!(
            self,
            StatementKind::Function | StatementKind::Class | StatementKind::Try | StatementKind::With
        )
    }

    /// Kinds that open a compound block; a new one is a preferred break point.
    pub fn opens_block(&self) -> bool {
        matches!(
            self,
            StatementKind::Function
                | StatementKind::Class
                | StatementKind::Try
                | StatementKind::With
                | StatementKind::If
                | StatementKind::For
                | StatementKind::While
        )
    }
}

/// One top-level statement and the lines it covers (decorators included).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Statement {
    pub kind: StatementKind,
    pub span: Span,
}

/// Semantic map of a source text.
#[derive(Debug, Clone, Default)]
pub struct CodeStructure {
    pub line_count: usize,
    /// Top-level statements in source order. Spans never overlap.
    pub statements: Vec<Statement>,
    /// Top-level import statements (multi-line imports span several lines).
    pub imports: Vec<Span>,
    /// Every decorator or annotation line, at any level.
    pub decorators: Vec<usize>,
    pub functions: Vec<Span>,
    pub classes: Vec<Span>,
    pub try_blocks: Vec<Span>,
    pub with_blocks: Vec<Span>,
    /// Definitions one level below a top-level class (methods, members).
    pub members: Vec<Span>,
    /// Lines on which a docstring (or javadoc block) ends.
    pub docstring_ends: Vec<usize>,
    /// Lines closing a multi-line bracketed expression.
    pub expression_ends: Vec<usize>,
    /// Per line: whitespace only.
    pub blank: Vec<bool>,
    /// Per line: starts inside a string or block comment.
    pub literal_interior: Vec<bool>,
    /// Per line: bracket depth at the start of the line.
    pub bracket_depth: Vec<usize>,
}

impl CodeStructure {
    /// Spans that must stay whole for a chunk to count as complete.
    pub fn protected(&self) -> impl Iterator<Item = Span> + '_ {
        self.statements
            .iter()
            .filter(|s| s.kind.is_protected())
            .map(|s| s.span)
    }

    /// The top-level statement split by a cut before `boundary`, if any.
    pub fn enclosing_statement(&self, boundary: usize) -> Option<&Statement> {
        let idx = self
            .statements
            .partition_point(|s| s.span.start < boundary);
        if idx == 0 {
            return None;
        }
        let candidate = &self.statements[idx - 1];
        candidate.span.splits_at(boundary).then_some(candidate)
    }

    /// The protected span split by a cut before `boundary`, if any.
    pub fn enclosing_protected(&self, boundary: usize) -> Option<Span> {
        self.enclosing_statement(boundary)
            .filter(|s| s.kind.is_protected())
            .map(|s| s.span)
    }

    /// A boundary that does not split any top-level statement.
    pub fn is_safe_boundary(&self, boundary: usize) -> bool {
        boundary == 0 || boundary >= self.line_count || self.enclosing_statement(boundary).is_none()
    }

    /// The statement starting exactly at `line`, if any.
    pub fn statement_starting_at(&self, line: usize) -> Option<&Statement> {
        self.statements
            .binary_search_by_key(&line, |s| s.span.start)
            .ok()
            .map(|i| &self.statements[i])
    }

    /// The statement ending exactly before `boundary`, if any.
    pub fn statement_ending_at(&self, boundary: usize) -> Option<&Statement> {
        self.statements
            .binary_search_by_key(&boundary, |s| s.span.end)
            .ok()
            .map(|i| &self.statements[i])
    }

    /// Whether a cut before `boundary` lands outside any string literal and
    /// outside any open bracket. Used for forced cuts inside oversized
    /// structures.
    pub fn is_lexically_clean(&self, boundary: usize) -> bool {
        if boundary == 0 || boundary >= self.line_count {
            return true;
        }
        !self.literal_interior[boundary] && self.bracket_depth[boundary] == 0
    }

    /// Whether a cut before `boundary` splits a second-level member.
    pub fn splits_member(&self, boundary: usize) -> bool {
        self.members.iter().any(|m| m.splits_at(boundary))
    }

    pub fn is_blank(&self, line: usize) -> bool {
        self.blank.get(line).copied().unwrap_or(false)
    }

    fn build(lexed: &Lexed, statements: Vec<Statement>, members: Vec<Span>, decorators: Vec<usize>) -> Self {
        let mut structure = CodeStructure {
            line_count: lexed.lines.len(),
            members,
            decorators,
            ..Default::default()
        };
        for stmt in &statements {
            match stmt.kind {
                StatementKind::Import => structure.imports.push(stmt.span),
                StatementKind::Function => structure.functions.push(stmt.span),
                StatementKind::Class => structure.classes.push(stmt.span),
                StatementKind::Try => structure.try_blocks.push(stmt.span),
                StatementKind::With => structure.with_blocks.push(stmt.span),
                _ => {}
            }
        }
        structure.statements = statements;
        structure.decorators.sort_unstable();
        structure.decorators.dedup();

        for (i, line) in lexed.lines.iter().enumerate() {
            if line.closes_docstring {
                structure.docstring_ends.push(i);
            }
            if line.depth_before > 0 && line.depth_after == 0 {
                structure.expression_ends.push(i);
            }
            structure.blank.push(line.blank);
            structure.literal_interior.push(line.continues_literal);
            structure.bracket_depth.push(line.depth_before);
        }
        structure
    }
}

/// Language-specific structure analysis.
pub trait StructureAnalyzer: Send + Sync {
    /// Analyze `text`. Pure; never fails. Unterminated structures are closed
    /// at the last line.
    fn analyze(&self, text: &str) -> CodeStructure;
}

/// Indentation-based analysis for Python.
pub struct PythonAnalyzer;

impl StructureAnalyzer for PythonAnalyzer {
    fn analyze(&self, text: &str) -> CodeStructure {
        if text.is_empty() {
            return CodeStructure::default();
        }
        let lexed = lex(text, &Language::Python.lexical_rules());
        let mut decorators = Vec::new();
        let all = Span::new(0, lexed.lines.len());
        let statements = python_statements(&lexed.lines, all, 0, &mut decorators);

        let mut members = Vec::new();
        for stmt in statements.iter().filter(|s| s.kind == StatementKind::Class) {
            let Some(body_start) = (stmt.span.start..stmt.span.end).find(|&i| {
                let l = &lexed.lines[i];
                is_code(l) && !l.continues_literal && l.depth_before == 0 && l.indent > 0
            }) else {
                continue;
            };
            let body_indent = lexed.lines[body_start].indent;
            let body = Span::new(body_start, stmt.span.end);
            members.extend(
                python_statements(&lexed.lines, body, body_indent, &mut decorators)
                    .into_iter()
                    .filter(|s| matches!(s.kind, StatementKind::Function | StatementKind::Class))
                    .map(|s| s.span),
            );
        }

        CodeStructure::build(&lexed, statements, members, decorators)
    }
}

/// Statements starting at indentation `level` within `range`.
fn python_statements(
    lines: &[LexedLine],
    range: Span,
    level: usize,
    decorators: &mut Vec<usize>,
) -> Vec<Statement> {
    let mut out = Vec::new();
    let mut open: Option<(usize, StatementKind, usize)> = None;
    let mut decorator_run: Option<(usize, usize)> = None;
    let mut backslash = false;

    for i in range.start..range.end {
        let line = &lines[i];
        if !is_code(line) {
            continue;
        }
        let continued = backslash;
        backslash = line.code.ends_with('\\');

        let starts = !line.continues_literal && !continued && line.depth_before == 0 && line.indent <= level;
        if !starts {
            if let Some((_, _, last)) = open.as_mut() {
                *last = i;
            }
            if let Some((_, last)) = decorator_run.as_mut() {
                *last = i;
            }
            continue;
        }

        let code = line.code.trim_start();
        if code.starts_with('@') {
            close(&mut open, &mut out);
            decorators.push(i);
            match decorator_run.as_mut() {
                Some((_, last)) => *last = i,
                None => decorator_run = Some((i, i)),
            }
            continue;
        }

        let kind = classify_python(code);
        if decorator_run.is_none() {
            if let Some((_, open_kind, last)) = open.as_mut() {
                if continues_compound(*open_kind, code) {
                    *last = i;
                    continue;
                }
            }
        }
        close(&mut open, &mut out);

        let start = match decorator_run.take() {
            Some((first, _)) if matches!(kind, StatementKind::Function | StatementKind::Class) => first,
            Some((first, last)) => {
                out.push(Statement {
                    kind: StatementKind::Other,
                    span: Span::new(first, last + 1),
                });
                i
            }
            None => i,
        };
        open = Some((start, kind, i));
    }
    close(&mut open, &mut out);
    if let Some((first, last)) = decorator_run {
        out.push(Statement {
            kind: StatementKind::Other,
            span: Span::new(first, last + 1),
        });
    }
    out
}

fn close(open: &mut Option<(usize, StatementKind, usize)>, out: &mut Vec<Statement>) {
    if let Some((start, kind, last)) = open.take() {
        out.push(Statement {
            kind,
            span: Span::new(start, last + 1),
        });
    }
}

fn is_code(line: &LexedLine) -> bool {
    !line.blank && !line.comment_only
}

fn first_word(code: &str) -> &str {
    let end = code
        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
        .unwrap_or(code.len());
    &code[..end]
}

fn classify_python(code: &str) -> StatementKind {
    let word = first_word(code);
    let word = if word == "async" {
        first_word(code["async".len()..].trim_start())
    } else {
        word
    };
    match word {
        "import" => StatementKind::Import,
        "from" if code.contains(" import ") => StatementKind::Import,
        "def" => StatementKind::Function,
        "class" => StatementKind::Class,
        "try" => StatementKind::Try,
        "with" => StatementKind::With,
        "if" => StatementKind::If,
        "for" => StatementKind::For,
        "while" => StatementKind::While,
        "return" | "break" | "continue" | "raise" | "yield" | "pass" => StatementKind::Terminator,
        _ => StatementKind::Other,
    }
}

fn continues_compound(kind: StatementKind, code: &str) -> bool {
    let word = first_word(code);
    match kind {
        StatementKind::Try => matches!(word, "except" | "else" | "finally"),
        StatementKind::If => matches!(word, "elif" | "else"),
        StatementKind::For | StatementKind::While => word == "else",
        _ => false,
    }
}

/// Brace-depth analysis for Java and other C-family sources.
pub struct BraceAnalyzer;

impl StructureAnalyzer for BraceAnalyzer {
    fn analyze(&self, text: &str) -> CodeStructure {
        if text.is_empty() {
            return CodeStructure::default();
        }
        let lexed = lex(text, &Language::Java.lexical_rules());
        let mut decorators = Vec::new();
        let all = Span::new(0, lexed.lines.len());
        let statements = brace_statements(&lexed.lines, all, 0, &mut decorators);

        let mut members = Vec::new();
        for stmt in statements.iter().filter(|s| s.kind == StatementKind::Class) {
            let body = Span::new(stmt.span.start + 1, stmt.span.end);
            members.extend(
                brace_statements(&lexed.lines, body, 1, &mut decorators)
                    .into_iter()
                    .filter(|s| matches!(s.kind, StatementKind::Function | StatementKind::Class)),
            );
        }

        let mut structure = CodeStructure::build(
            &lexed,
            statements,
            members.iter().map(|m| m.span).collect(),
            decorators,
        );
        // Java has no free functions; methods are what a reader counts.
        structure.functions = members
            .iter()
            .filter(|m| m.kind == StatementKind::Function)
            .map(|m| m.span)
            .collect();
        structure
    }
}

/// Statements starting at bracket depth `depth` within `range`. A statement
/// ends on the first line that returns to `depth` and ends in `;` or `}`.
fn brace_statements(
    lines: &[LexedLine],
    range: Span,
    depth: usize,
    decorators: &mut Vec<usize>,
) -> Vec<Statement> {
    let mut out = Vec::new();
    let mut open: Option<(usize, String)> = None;

    for i in range.start..range.end {
        let line = &lines[i];
        if !is_code(line) {
            continue;
        }
        let code = line.code.trim();
        match open.as_mut() {
            None => {
                if line.continues_literal || line.depth_before != depth || code.starts_with('}') {
                    continue;
                }
                open = Some((i, String::new()));
            }
            Some(_) => {}
        }
        let Some((start, header)) = open.as_mut() else {
            continue;
        };
        if line.depth_before == depth && code.starts_with('@') {
            decorators.push(i);
        }
        if !header.contains('{') {
            header.push(' ');
            header.push_str(code);
        }
        if line.depth_after == depth && (code.ends_with(';') || code.ends_with('}')) {
            out.push(Statement {
                kind: classify_brace(header),
                span: Span::new(*start, i + 1),
            });
            open = None;
        }
    }
    if let Some((start, header)) = open {
        let last = (start..range.end)
            .rev()
            .find(|&i| is_code(&lines[i]))
            .unwrap_or(start);
        out.push(Statement {
            kind: classify_brace(&header),
            span: Span::new(start, last + 1),
        });
    }
    out
}

fn classify_brace(header: &str) -> StatementKind {
    let head = header.split('{').next().unwrap_or("");
    if head.contains("@interface") {
        return StatementKind::Class;
    }
    let words: Vec<&str> = head
        .split(|c: char| c.is_whitespace() || c == '(' || c == '<')
        .filter(|w| !w.is_empty() && !w.starts_with('@'))
        .collect();
    match words.first().copied() {
        Some("import") => return StatementKind::Import,
        Some("package") => return StatementKind::Other,
        _ => {}
    }
    if words
        .iter()
        .any(|w| matches!(*w, "class" | "interface" | "enum" | "record"))
    {
        return StatementKind::Class;
    }
    let before_paren = head.split('(').next().unwrap_or("");
    if head.contains('(') && !before_paren.contains('=') {
        return StatementKind::Function;
    }
    StatementKind::Other
}

/// Analysis for text with no known structure: no statements, so every
/// boundary is safe and blank lines are the only preferred break points.
pub struct PlainAnalyzer;

impl StructureAnalyzer for PlainAnalyzer {
    fn analyze(&self, text: &str) -> CodeStructure {
        if text.is_empty() {
            return CodeStructure::default();
        }
        let lexed = lex(text, &Language::Other.lexical_rules());
        CodeStructure::build(&lexed, Vec::new(), Vec::new(), Vec::new())
    }
}
