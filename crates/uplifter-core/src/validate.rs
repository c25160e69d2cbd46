//! Safety validation of a reassembled candidate against its original.
//!
//! The validator is the last gate before a file is replaced. It is pure:
//! it reads both texts, measures them with the shared lexer, and returns
//! every violated invariant as a human-readable reason.
//!
//! # Invariants
//!
//! | Check | Rule |
//! |-------|------|
//! | Definitions | function, class and import counts do not drop |
//! | Commentary | comments + docstrings keep at least 80% |
//! | Size | characters keep at least 90%, lines at least 80% |
//! | Control flow | each control keyword count does not drop |
//! | Names | assignment targets and called names keep at least 90% |
//! | Brackets | `()`, `[]`, `{}` balanced |
//! | Indentation | Python only: no block deeper than its opener allows |
//!
//! Counts come from the lexed text, so keywords inside strings and
//! comments never count. Definitions are counted at every nesting level.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::language::Language;
use crate::lexer::{lex, Lexed};

/// Extra columns a Python block may be indented beyond its opener.
pub const INDENT_SLACK: usize = 16;

/// Calls that modernization legitimately removes or renames.
const RETIRED_CALLS: &[&str] = &[
    "has_key",
    "xrange",
    "iteritems",
    "itervalues",
    "iterkeys",
    "raw_input",
    "unicode",
    "unichr",
    "execfile",
];

const PY_CONTROL: &[&str] = &["if", "for", "while", "try", "except", "finally", "with", "return", "raise"];
const JAVA_CONTROL: &[&str] = &["if", "for", "while", "try", "catch", "finally", "return", "throw"];

const NOT_CALLS: &[&str] = &[
    "if", "elif", "while", "for", "return", "and", "or", "not", "in", "is", "assert", "del", "yield", "await",
    "lambda", "except", "with", "switch", "catch", "synchronized", "throw", "new", "else", "print", "exec",
];

/// Validator outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub accepted: bool,
    /// One entry per violated invariant; empty when accepted.
    pub reasons: Vec<String>,
    pub original: SourceMetrics,
    pub candidate: SourceMetrics,
}

/// Measurements of one text.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SourceMetrics {
    pub functions: usize,
    pub classes: usize,
    pub imports: usize,
    pub comments: usize,
    pub docstrings: usize,
    pub chars: usize,
    pub lines: usize,
    pub control: BTreeMap<String, usize>,
    pub assigned_names: BTreeSet<String>,
    pub called_names: BTreeSet<String>,
    /// First bracket problem, if any.
    pub bracket_error: Option<String>,
    /// First implausible indentation, if any.
    pub indent_error: Option<String>,
}

impl SourceMetrics {
    pub fn measure(text: &str, language: Language) -> Self {
        let lexed = lex(text, &language.lexical_rules());
        let mut m = SourceMetrics {
            comments: lexed.comments,
            docstrings: lexed.docstrings,
            chars: text.chars().count(),
            lines: text.lines().count(),
            bracket_error: lexed.bracket_error.clone(),
            ..Default::default()
        };

        let keywords = match language {
            Language::Python => PY_CONTROL,
            Language::Java => JAVA_CONTROL,
            Language::Other => &[],
        };
        for kw in keywords {
            m.control.insert((*kw).to_string(), 0);
        }

        for line in &lexed.lines {
            if line.continues_literal || line.blank || line.comment_only {
                continue;
            }
            let code = line.code.trim();
            for kw in keywords {
                let n = count_word(code, kw);
                if n > 0 {
                    *m.control.entry((*kw).to_string()).or_default() += n;
                }
            }
            collect_calls(code, &mut m.called_names);
            if line.depth_before == 0 {
                if let Some(name) = assignment_targets(code, language) {
                    m.assigned_names.extend(name);
                }
            }
            if language == Language::Python && line.depth_before == 0 {
                if code.starts_with("def ") || code.starts_with("async def ") {
                    m.functions += 1;
                } else if code.starts_with("class ") {
                    m.classes += 1;
                } else if code.starts_with("import ") || (code.starts_with("from ") && contains_word(code, "import")) {
                    m.imports += 1;
                }
            }
            if language == Language::Java && line.depth_before == 0 && code.starts_with("import ") {
                m.imports += 1;
            }
            if language == Language::Java {
                m.classes += java_type_declarations(code);
            }
        }

        if language == Language::Java {
            m.functions = language.analyzer().analyze(text).functions.len();
        }
        if language == Language::Python {
            m.indent_error = python_indent_error(&lexed);
        }
        m
    }
}

/// Configurable thresholds. The defaults are the production gate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SafetyValidator {
    pub language: Language,
    pub min_commentary_ratio: f64,
    pub min_length_ratio: f64,
    pub min_line_ratio: f64,
    pub min_name_retention: f64,
}

impl SafetyValidator {
    pub fn new(language: Language) -> Self {
        Self {
            language,
            min_commentary_ratio: 0.8,
            min_length_ratio: 0.9,
            min_line_ratio: 0.8,
            min_name_retention: 0.9,
        }
    }

    /// Check `candidate` against `original`.
    pub fn validate(&self, original: &str, candidate: &str) -> ValidationReport {
        let o = SourceMetrics::measure(original, self.language);
        let c = SourceMetrics::measure(candidate, self.language);
        let mut reasons = Vec::new();

        for (what, before, after) in [
            ("function definitions", o.functions, c.functions),
            ("class definitions", o.classes, c.classes),
            ("import statements", o.imports, c.imports),
        ] {
            if after < before {
                reasons.push(format!("{what} reduced from {before} to {after}"));
            }
        }

        let commentary = (o.comments + o.docstrings, c.comments + c.docstrings);
        if below(commentary.1, commentary.0, self.min_commentary_ratio) {
            reasons.push(format!(
                "comments and docstrings reduced from {} to {}",
                commentary.0, commentary.1
            ));
        }
        if below(c.chars, o.chars, self.min_length_ratio) {
            reasons.push(format!(
                "content length dropped to {} of {} characters",
                c.chars, o.chars
            ));
        }
        if below(c.lines, o.lines, self.min_line_ratio) {
            reasons.push(format!("line count dropped from {} to {}", o.lines, c.lines));
        }

        for (kw, &before) in &o.control {
            let after = c.control.get(kw).copied().unwrap_or(0);
            if after < before {
                reasons.push(format!("'{kw}' statements reduced from {before} to {after}"));
            }
        }

        let retired: BTreeSet<String> = if self.language == Language::Python {
            RETIRED_CALLS.iter().map(|s| s.to_string()).collect()
        } else {
            BTreeSet::new()
        };
        let calls: BTreeSet<String> = o.called_names.difference(&retired).cloned().collect();
        for (what, before, after) in [
            ("assignment targets", &o.assigned_names, &c.assigned_names),
            ("called names", &calls, &c.called_names),
        ] {
            if let Some(missing) = retention_shortfall(before, after, self.min_name_retention) {
                reasons.push(format!(
                    "{what} retained {} of {} (missing: {})",
                    before.len() - missing.len(),
                    before.len(),
                    missing.join(", ")
                ));
            }
        }

        if let Some(err) = &c.bracket_error {
            if o.bracket_error.is_none() {
                reasons.push(format!("unbalanced brackets: {err}"));
            }
        }
        if let Some(err) = &c.indent_error {
            if o.indent_error.is_none() {
                reasons.push(format!("implausible indentation: {err}"));
            }
        }

        ValidationReport {
            accepted: reasons.is_empty(),
            reasons,
            original: o,
            candidate: c,
        }
    }
}

/// Validate with the default thresholds.
pub fn validate(original: &str, candidate: &str, language: Language) -> ValidationReport {
    SafetyValidator::new(language).validate(original, candidate)
}

fn below(after: usize, before: usize, ratio: f64) -> bool {
    before > 0 && (after as f64) < before as f64 * ratio
}

/// Names of `before` missing from `after`, when fewer than `ratio` survive.
fn retention_shortfall(before: &BTreeSet<String>, after: &BTreeSet<String>, ratio: f64) -> Option<Vec<String>> {
    if before.is_empty() {
        return None;
    }
    let missing: Vec<String> = before.difference(after).cloned().collect();
    let kept = before.len() - missing.len();
    ((kept as f64) < before.len() as f64 * ratio).then_some(missing)
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn count_word(code: &str, word: &str) -> usize {
    let bytes = code.as_bytes();
    code.match_indices(word)
        .filter(|(start, _)| {
            let end = start + word.len();
            (*start == 0 || !is_word_byte(bytes[start - 1])) && (end >= bytes.len() || !is_word_byte(bytes[end]))
        })
        .count()
}

fn contains_word(code: &str, word: &str) -> bool {
    count_word(code, word) > 0
}

/// Identifiers directly followed by `(`, excluding keywords and the names
/// being defined or constructed.
fn collect_calls(code: &str, out: &mut BTreeSet<String>) {
    let bytes = code.as_bytes();
    for (open, _) in code.match_indices('(') {
        let mut end = open;
        while end > 0 && bytes[end - 1] == b' ' {
            end -= 1;
        }
        let mut start = end;
        while start > 0 && is_word_byte(bytes[start - 1]) {
            start -= 1;
        }
        let name = &code[start..end];
        if name.is_empty() || name.as_bytes()[0].is_ascii_digit() || NOT_CALLS.contains(&name) {
            continue;
        }
        let before = code[..start].trim_end();
        let defining = ["def", "class", "new", "fun", "function"]
            .iter()
            .any(|kw| before.ends_with(kw) && before[..before.len() - kw.len()].bytes().last().map_or(true, |b| !is_word_byte(b)));
        if !defining {
            out.insert(name.to_string());
        }
    }
}

/// Simple names assigned by a statement line.
fn assignment_targets(code: &str, language: Language) -> Option<Vec<String>> {
    let eq = assignment_operator(code)?;
    let mut left = code[..eq].trim_end();
    if let Some(stripped) = left.strip_suffix(|c: char| "+-*/%&|^@".contains(c)) {
        left = stripped.trim_end();
        left = left.strip_suffix(['*', '/']).unwrap_or(left).trim_end();
    }
    let names: Vec<String> = match language {
        Language::Python => left
            .split(',')
            .map(|part| part.split(':').next().unwrap_or("").trim())
            .map(|part| part.trim_start_matches(['(', '[', '*']).trim_end_matches([')', ']']))
            .filter(|part| is_identifier(part))
            .map(str::to_string)
            .collect(),
        _ => left
            .split_whitespace()
            .last()
            .filter(|w| is_identifier(w) && !matches!(*w, "return" | "throw"))
            .map(|w| vec![w.to_string()])
            .unwrap_or_default(),
    };
    (!names.is_empty()).then_some(names)
}

/// Byte offset of the first `=` that is an assignment, not a comparison.
fn assignment_operator(code: &str) -> Option<usize> {
    let bytes = code.as_bytes();
    let mut depth = 0usize;
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth = depth.saturating_sub(1),
            b'=' if depth == 0 => {
                let prev = i.checked_sub(1).map(|p| bytes[p]);
                let comparison = matches!(prev, Some(b'=' | b'!' | b'<' | b'>')) && !is_shift_assign(bytes, i);
                if bytes.get(i + 1) == Some(&b'=') || comparison || prev == Some(b':') {
                    return None;
                }
                return Some(i);
            }
            _ => {}
        }
    }
    None
}

fn is_shift_assign(bytes: &[u8], eq: usize) -> bool {
    eq >= 2 && matches!(&bytes[eq - 2..eq], b"<<" | b">>")
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => chars.all(|c| c.is_ascii_alphanumeric() || c == '_'),
        _ => false,
    }
}

/// `class`/`interface`/`enum`/`record` keywords that declare a type
/// (not `Foo.class` literals).
fn java_type_declarations(code: &str) -> usize {
    let bytes = code.as_bytes();
    ["class", "interface", "enum", "record"]
        .iter()
        .map(|kw| {
            code.match_indices(kw)
                .filter(|(start, _)| {
                    let end = start + kw.len();
                    let before_ok = *start == 0 || !(is_word_byte(bytes[start - 1]) || bytes[start - 1] == b'.');
                    let after_ok = bytes.get(end) == Some(&b' ');
                    before_ok && after_ok
                })
                .count()
        })
        .sum()
}

/// First logical line whose indentation Python could not accept: a block
/// opener followed by a line that is not deeper (or deeper than
/// [`INDENT_SLACK`] beyond it), or a non-opener followed by a deeper line.
fn python_indent_error(lexed: &Lexed) -> Option<String> {
    let mut prev: Option<(usize, usize, bool)> = None;
    let mut continued = false;
    for (n, line) in lexed.lines.iter().enumerate() {
        if line.blank || line.comment_only || line.continues_literal || line.depth_before > 0 || continued {
            continued = !line.comment_only && line.code.trim_end().ends_with('\\');
            continue;
        }
        let code = line.code.trim_end();
        continued = code.ends_with('\\');
        if let Some((prev_line, prev_indent, opens)) = prev {
            if opens && line.indent <= prev_indent {
                return Some(format!("line {} should be indented after line {}", n + 1, prev_line + 1));
            }
            if opens && line.indent > prev_indent + INDENT_SLACK {
                return Some(format!("line {} indented {} columns past its block", n + 1, line.indent - prev_indent));
            }
            if !opens && line.indent > prev_indent {
                return Some(format!("unexpected indent at line {}", n + 1));
            }
        }
        let opens = line.depth_after == 0 && !continued && code.ends_with(':');
        prev = Some((n, line.indent, opens));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const PY: Language = Language::Python;

    const ORIGINAL: &str = "#!/usr/bin/env python\n\"\"\"Module doc.\"\"\"\nimport sys\n\n\ndef greet(name):\n    # say hello\n    total = len(name)\n    if total > 0:\n        print \"hi\", name\n    return total\n\n\ndef main():\n    greet(sys.argv[1])\n";

    #[test]
    fn test_identical_text_accepted() {
        let r = validate(ORIGINAL, ORIGINAL, PY);
        assert!(r.accepted, "{:?}", r.reasons);
        assert_eq!(r.original.functions, 2);
        assert_eq!(r.original.imports, 1);
        assert_eq!(r.original.docstrings, 1);
    }

    #[test]
    fn test_modernized_text_accepted() {
        let candidate = ORIGINAL.replace("print \"hi\", name", "print(\"hi\", name)");
        let r = validate(ORIGINAL, &candidate, PY);
        assert!(r.accepted, "{:?}", r.reasons);
    }

    #[test]
    fn test_missing_function_rejected_with_counts() {
        let candidate = ORIGINAL.replace("def main():\n    greet(sys.argv[1])\n", "greet(sys.argv[1])\n");
        let r = validate(ORIGINAL, &candidate, PY);
        assert!(!r.accepted);
        assert_eq!(r.reasons[0], "function definitions reduced from 2 to 1");
    }

    #[test]
    fn test_def_in_string_not_counted() {
        let m = SourceMetrics::measure("s = \"def fake():\"\n# def other():\n", PY);
        assert_eq!(m.functions, 0);
        assert_eq!(m.comments, 1);
    }

    #[test]
    fn test_nested_definitions_counted() {
        let m = SourceMetrics::measure("class A:\n    class B:\n        def f(self):\n            def g():\n                pass\n", PY);
        assert_eq!(m.classes, 2);
        assert_eq!(m.functions, 2);
    }

    #[test]
    fn test_shrunk_output_rejected() {
        let r = validate(ORIGINAL, "import sys\n\ndef greet(name):\n    pass\n\ndef main():\n    pass\n", PY);
        assert!(!r.accepted);
        assert!(r.reasons.iter().any(|x| x.starts_with("content length dropped")));
        assert!(r.reasons.iter().any(|x| x.starts_with("line count dropped")));
        assert!(r.reasons.iter().any(|x| x == "'if' statements reduced from 1 to 0"));
    }

    #[test]
    fn test_lost_comments_rejected() {
        let original = "# a\n# b\n# c\n# d\n# e\nx = 1\n";
        let candidate = "# a\n# b\n# c\nx = 1\n\n\n";
        let r = validate(original, candidate, PY);
        assert!(r.reasons.contains(&"comments and docstrings reduced from 5 to 3".to_string()));
    }

    #[test]
    fn test_name_retention() {
        let original = (0..10).map(|i| format!("v{i} = load(i)\n")).collect::<String>();
        let renamed = original.replace("v1 =", "w1 =").replace("v2 =", "w2 =");
        let r = validate(&original, &renamed, PY);
        assert!(r.reasons.iter().any(|x| x.starts_with("assignment targets retained 8 of 10")));
        let one = original.replace("v1 =", "w1 =");
        assert!(validate(&original, &one, PY).accepted);
    }

    #[test]
    fn test_retired_calls_do_not_count() {
        let original = "if d.has_key(k):\n    for i in xrange(3):\n        run(i)\n";
        let candidate = "if (k in d):\n    for i in range(3):\n        run(i)\n";
        assert!(validate(original, candidate, PY).accepted);
    }

    #[test]
    fn test_brackets_and_indentation() {
        let original = "def f():\n    return [1, 2]\n";
        let r = validate(original, "def f():\n    return [1, 2\n", PY);
        assert!(r.reasons.iter().any(|x| x.starts_with("unbalanced brackets")));
        let r = validate(original, "def f():\nreturn [1, 2]\n", PY);
        assert!(r.reasons.iter().any(|x| x.starts_with("implausible indentation")));
        let deep = format!("def f():\n{}return [1, 2]\n", " ".repeat(30));
        assert!(!validate(original, &deep, PY).accepted);
    }

    #[test]
    fn test_continuation_lines_ignore_indentation() {
        let text = "x = call(1,\n                       2)\ny = 1 + \\\n        2\n";
        assert!(SourceMetrics::measure(text, PY).indent_error.is_none());
    }

    #[test]
    fn test_java_counts() {
        let original = "package a;\nimport java.util.Vector;\n\npublic class A {\n    // field\n    private Vector v = new Vector();\n\n    public void run() {\n        if (v.isEmpty()) {\n            return;\n        }\n    }\n\n    public Class<?> kind() {\n        return A.class;\n    }\n}\n";
        let m = SourceMetrics::measure(original, Language::Java);
        assert_eq!(m.classes, 1);
        assert_eq!(m.functions, 2);
        assert_eq!(m.imports, 1);
        let candidate = original
            .replace("import java.util.Vector;", "import java.util.ArrayList;")
            .replace("Vector v = new Vector()", "ArrayList v = new ArrayList()");
        let r = validate(original, &candidate, Language::Java);
        assert!(r.accepted, "{:?}", r.reasons);
    }
}
