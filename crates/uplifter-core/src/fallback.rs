//! Deterministic fallback rewriting.
//!
//! When the model is unreachable or its reply is rejected, the chunk goes
//! through a [`FallbackEngine`] instead. The Python engine applies a fixed
//! catalog of local rewrites, each enabled by the findings text and by the
//! target version, and each skipped silently when its preconditions do not
//! hold on a line. The engine always returns a result, possibly identical
//! to the input, and names the rewrites that fired.
//!
//! # Catalog
//!
//! | Rewrite | Enabled by findings mentioning | Minimum target |
//! |---------|-------------------------------|----------------|
//! | `print x` to `print(x)` | `print` | 3.0 |
//! | `except E, e:` to `except E as e:` | `except` | 3.0 |
//! | `"%s" % name` to `f"{name}"` | `%` or `format` | 3.6 |
//! | `if len(x) == 0:` to walrus form | `walrus`, `assignment expression` or `len(` | 3.8 |
//! | `-> None` on functions returning nothing | `type hint` | 3.5 |
//! | `d.has_key(k)` to `(k in d)` | `has_key` | 3.0 |
//! | `xrange(` to `range(` | `xrange` | 3.0 |
//! | `.iteritems()` to `.items()` (and values/keys) | `iteritems`, `itervalues`, `iterkeys` | 3.0 |
//! | `<>` to `!=` | `<>` | 3.0 |
//!
//! When no findings are available, only the rewrites required for Python 3
//! syntax run (print, except, has_key, xrange, dict iterators, `<>`).
//!
//! Rewrites operate on the code part of a line. String literal contents
//! are masked before matching and trailing comments are split off, so
//! neither is ever modified. Lines that start inside a multi-line string or
//! bracket are left alone by the statement-level rewrites.

use std::collections::HashSet;

use serde::Serialize;

use crate::language::{Language, Version};
use crate::lexer::{lex, split_trailing_comment, Lexed};
use crate::models::FINDINGS_UNAVAILABLE;

/// Result of a fallback pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FallbackReport {
    pub code: String,
    /// Names of the rewrites that fired, in catalog order.
    pub transformations: Vec<String>,
}

impl FallbackReport {
    pub fn unchanged(code: &str) -> Self {
        Self {
            code: code.to_string(),
            transformations: Vec::new(),
        }
    }

    pub fn fired(&self) -> bool {
        !self.transformations.is_empty()
    }

    /// One-line summary for reports.
    pub fn summary(&self) -> String {
        if self.transformations.is_empty() {
            "No deterministic transformations applied.".to_string()
        } else {
            format!("Fallback applied: {}", self.transformations.join(", "))
        }
    }
}

/// A deterministic rewriter for one language.
pub trait FallbackEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Rewrite `code`, a slice of `file_text`, using the `findings` of its
    /// file for `target_version`. Names introduced by a rewrite must not
    /// clash with any name in `file_text`.
    fn rewrite_in_file(&self, code: &str, file_text: &str, findings: &str, target_version: &str) -> FallbackReport;

    /// Rewrite `code` as a whole file.
    fn rewrite(&self, code: &str, findings: &str, target_version: &str) -> FallbackReport {
        self.rewrite_in_file(code, code, findings, target_version)
    }
}

/// Engine that returns its input untouched.
pub struct IdentityFallback;

impl FallbackEngine for IdentityFallback {
    fn name(&self) -> &'static str {
        "identity"
    }

    fn rewrite_in_file(&self, code: &str, _file_text: &str, _findings: &str, _target_version: &str) -> FallbackReport {
        FallbackReport::unchanged(code)
    }
}

/// Catalog-driven Python rewriter.
pub struct PythonFallback;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Rewrite {
    PrintFunction,
    ExceptAs,
    FString,
    LenWalrus,
    NoneHint,
    HasKey,
    Xrange,
    DictIterators,
    NotEqual,
}

const CATALOG: [Rewrite; 9] = [
    Rewrite::PrintFunction,
    Rewrite::ExceptAs,
    Rewrite::FString,
    Rewrite::LenWalrus,
    Rewrite::NoneHint,
    Rewrite::HasKey,
    Rewrite::Xrange,
    Rewrite::DictIterators,
    Rewrite::NotEqual,
];

impl Rewrite {
    fn name(self) -> &'static str {
        match self {
            Rewrite::PrintFunction => "print_function",
            Rewrite::ExceptAs => "except_as",
            Rewrite::FString => "percent_to_fstring",
            Rewrite::LenWalrus => "len_walrus",
            Rewrite::NoneHint => "none_return_hint",
            Rewrite::HasKey => "has_key_to_in",
            Rewrite::Xrange => "xrange_to_range",
            Rewrite::DictIterators => "dict_iter_methods",
            Rewrite::NotEqual => "not_equal_operator",
        }
    }

    fn triggers(self) -> &'static [&'static str] {
        match self {
            Rewrite::PrintFunction => &["print"],
            Rewrite::ExceptAs => &["except"],
            Rewrite::FString => &["%", "format"],
            Rewrite::LenWalrus => &["walrus", "assignment expression", "len("],
            Rewrite::NoneHint => &["type hint"],
            Rewrite::HasKey => &["has_key"],
            Rewrite::Xrange => &["xrange"],
            Rewrite::DictIterators => &["iteritems", "itervalues", "iterkeys"],
            Rewrite::NotEqual => &["<>"],
        }
    }

    fn min_version(self) -> (u32, u32) {
        match self {
            Rewrite::FString => (3, 6),
            Rewrite::LenWalrus => (3, 8),
            Rewrite::NoneHint => (3, 5),
            _ => (3, 0),
        }
    }

    /// Needed for the code to parse under Python 3 at all.
    fn required(self) -> bool {
        !matches!(self, Rewrite::FString | Rewrite::LenWalrus | Rewrite::NoneHint)
    }
}

fn enabled_rewrites(findings: &str, target_version: &str) -> Vec<Rewrite> {
    let Some(version) = Version::parse(target_version) else {
        return Vec::new();
    };
    let findings = findings.trim().to_ascii_lowercase();
    let available = !findings.is_empty() && findings != FINDINGS_UNAVAILABLE;
    CATALOG
        .iter()
        .copied()
        .filter(|r| {
            let (major, minor) = r.min_version();
            version.at_least(major, minor)
        })
        .filter(|r| {
            if available {
                r.triggers().iter().any(|t| findings.contains(t))
            } else {
                r.required()
            }
        })
        .collect()
}

impl FallbackEngine for PythonFallback {
    fn name(&self) -> &'static str {
        "python"
    }

    fn rewrite_in_file(&self, code: &str, file_text: &str, findings: &str, target_version: &str) -> FallbackReport {
        let enabled = enabled_rewrites(findings, target_version);
        if enabled.is_empty() || code.is_empty() {
            return FallbackReport::unchanged(code);
        }
        let rules = Language::Python.lexical_rules();
        let lexed = lex(code, &rules);
        let hinted = if enabled.contains(&Rewrite::NoneHint) {
            functions_returning_nothing(&lexed)
        } else {
            HashSet::new()
        };
        let defines_xrange = code.contains("def xrange") || code.contains("xrange =");

        let mut fired: HashSet<Rewrite> = HashSet::new();
        let mut out: Vec<String> = Vec::with_capacity(lexed.lines.len());
        let mut continued = false;

        for (idx, raw) in code.split('\n').enumerate() {
            let Some(info) = lexed.lines.get(idx) else {
                out.push(raw.to_string());
                continue;
            };
            let was_continued = continued;
            continued = !info.comment_only && info.code.trim_end().ends_with('\\');
            if info.continues_literal || info.blank || info.comment_only {
                out.push(raw.to_string());
                continue;
            }

            let (body, cr) = match raw.strip_suffix('\r') {
                Some(b) => (b, "\r"),
                None => (raw, ""),
            };
            let (code_part, comment) = split_trailing_comment(body, &rules);
            let whole_statement = info.depth_before == 0 && info.depth_after == 0 && !was_continued && !continued;

            let mut line = code_part.to_string();
            for rewrite in &enabled {
                let result = match rewrite {
                    Rewrite::PrintFunction if whole_statement => print_function(&line),
                    Rewrite::ExceptAs if whole_statement => except_as(&line),
                    Rewrite::FString => percent_to_fstring(&line),
                    Rewrite::LenWalrus if whole_statement => len_walrus(&line, file_text),
                    Rewrite::NoneHint if hinted.contains(&idx) => none_hint(&line),
                    Rewrite::HasKey => has_key(&line),
                    Rewrite::Xrange if !defines_xrange => xrange(&line),
                    Rewrite::DictIterators => dict_iterators(&line),
                    Rewrite::NotEqual => not_equal(&line),
                    _ => None,
                };
                if let Some(rewritten) = result {
                    line = rewritten;
                    fired.insert(*rewrite);
                }
            }
            line.push_str(comment.unwrap_or(""));
            line.push_str(cr);
            out.push(line);
        }

        FallbackReport {
            code: out.join("\n"),
            transformations: CATALOG
                .iter()
                .filter(|r| fired.contains(r))
                .map(|r| r.name().to_string())
                .collect(),
        }
    }
}

/// Byte that replaces string contents in masked code.
const MASK: char = '\u{1}';

const KEYWORDS: &[&str] = &[
    "and", "as", "assert", "async", "await", "break", "class", "continue", "def", "del", "elif", "else", "except",
    "exec", "finally", "for", "from", "global", "if", "import", "in", "is", "lambda", "nonlocal", "not", "or",
    "pass", "print", "raise", "return", "try", "while", "with", "yield",
];

/// `code` with every string literal's contents replaced by [`MASK`] bytes.
/// Quotes stay. The result has the same byte length, so offsets found in
/// the mask index the original.
fn mask_strings(code: &str) -> String {
    let chars: Vec<char> = code.chars().collect();
    let mut out = String::with_capacity(code.len());
    let mut open: Option<(char, bool)> = None;
    let mut i = 0;
    let tripled = |i: usize, q: char| chars.get(i + 1) == Some(&q) && chars.get(i + 2) == Some(&q);
    while i < chars.len() {
        let c = chars[i];
        match open {
            None => {
                if c == '"' || c == '\'' {
                    let triple = tripled(i, c);
                    let n = if triple { 3 } else { 1 };
                    (0..n).for_each(|_| out.push(c));
                    open = Some((c, triple));
                    i += n;
                    continue;
                }
                out.push(c);
                i += 1;
            }
            Some((q, triple)) => {
                if c == '\\' {
                    for k in i..(i + 2).min(chars.len()) {
                        push_mask(&mut out, chars[k]);
                    }
                    i += 2;
                    continue;
                }
                if c == q && (!triple || tripled(i, q)) {
                    let n = if triple { 3 } else { 1 };
                    (0..n).for_each(|_| out.push(q));
                    open = None;
                    i += n;
                    continue;
                }
                push_mask(&mut out, c);
                i += 1;
            }
        }
    }
    out
}

fn push_mask(out: &mut String, c: char) {
    for _ in 0..c.len_utf8() {
        out.push(MASK);
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_plain_name(s: &str) -> bool {
    is_identifier(s) && !KEYWORDS.contains(&s)
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Whether `word` occurs in `text` as a whole identifier.
fn has_word(text: &str, word: &str) -> bool {
    let bytes = text.as_bytes();
    let mut from = 0;
    while let Some(rel) = text[from..].find(word) {
        let start = from + rel;
        let end = start + word.len();
        let before = start == 0 || !is_word_byte(bytes[start - 1]);
        let after = end >= bytes.len() || !is_word_byte(bytes[end]);
        if before && after {
            return true;
        }
        from = end;
    }
    false
}

/// Split a code part into (indent, statement, trailing whitespace).
fn frame(code: &str) -> (&str, &str, &str) {
    let body = code.trim_start();
    let indent = &code[..code.len() - body.len()];
    let stmt = body.trim_end();
    (indent, stmt, &body[stmt.len()..])
}

fn print_function(code: &str) -> Option<String> {
    let (indent, stmt, trailing) = frame(code);
    let after = stmt.strip_prefix("print")?;
    if after.is_empty() {
        return Some(format!("{indent}print(){trailing}"));
    }
    let first = after.chars().next()?;
    if !matches!(first, ' ' | '\t' | '"' | '\'') {
        return None;
    }
    let args = after.trim_start();
    if args.starts_with(['(', '=', '.', '[', ',', ':', ')', '>', '+', '-', '*', '/', '%', '|', '&', '<']) {
        return None;
    }
    if args.ends_with(',') || mask_strings(args).contains(';') {
        return None;
    }
    Some(format!("{indent}print({args}){trailing}"))
}

fn except_as(code: &str) -> Option<String> {
    let (indent, stmt, trailing) = frame(code);
    let rest = stmt.strip_prefix("except")?;
    if !rest.starts_with([' ', '(']) {
        return None;
    }
    let inner = rest.strip_suffix(':')?;
    let masked = mask_strings(inner);
    if has_word(&masked, "as") {
        return None;
    }
    let mut depth = 0usize;
    let mut comma = None;
    for (i, b) in masked.bytes().enumerate() {
        match b {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth = depth.saturating_sub(1),
            b',' if depth == 0 => comma = Some(i),
            _ => {}
        }
    }
    let comma = comma?;
    let exc = inner[..comma].trim();
    let name = inner[comma + 1..].trim();
    if exc.is_empty() || !is_plain_name(name) {
        return None;
    }
    Some(format!("{indent}except {exc} as {name}:{trailing}"))
}

fn percent_to_fstring(code: &str) -> Option<String> {
    let masked = mask_strings(code);
    let m = masked.as_bytes();
    let mut out = String::new();
    let mut last = 0;
    let mut i = 0;
    let mut changed = false;

    while i < m.len() {
        let q = m[i];
        if q != b'"' && q != b'\'' {
            i += 1;
            continue;
        }
        let triple = m.get(i + 1) == Some(&q) && m.get(i + 2) == Some(&q);
        let open_len = if triple { 3 } else { 1 };
        let body_start = i + open_len;
        let close = if triple {
            masked[body_start..]
                .find(&(q as char).to_string().repeat(3))
                .map(|p| body_start + p)
        } else {
            m[body_start..].iter().position(|&b| b == q).map(|p| body_start + p)
        };
        let Some(close) = close else { break };
        let end = close + open_len;

        let mut prefix_start = i;
        while prefix_start > 0 && m[prefix_start - 1].is_ascii_alphabetic() {
            prefix_start -= 1;
        }
        let prefix = &code[prefix_start..i];
        let plain_prefix = prefix.is_empty() || prefix.eq_ignore_ascii_case("u");
        let standalone = prefix_start == 0 || !is_word_byte(m[prefix_start - 1]);

        if !triple && plain_prefix && standalone && preceded_safely(&masked[..prefix_start]) {
            if let Some((args_end, names)) = percent_args(code, &masked, end) {
                if let Some(body) = fill_placeholders(&code[body_start..close], &names) {
                    out.push_str(&code[last..prefix_start]);
                    out.push('f');
                    out.push(q as char);
                    out.push_str(&body);
                    out.push(q as char);
                    last = args_end;
                    i = args_end;
                    changed = true;
                    continue;
                }
            }
        }
        i = end;
    }

    if !changed {
        return None;
    }
    out.push_str(&code[last..]);
    Some(out)
}

/// A string literal starting after `before` is the left operand of `%`
/// only when nothing that binds tighter or concatenates precedes it.
fn preceded_safely(before: &str) -> bool {
    !matches!(
        before.trim_end().chars().last(),
        Some('*' | '/' | '%' | '@' | '"' | '\'' | '.' | ')' | ']')
    )
}

/// Parse `% name` or `% (a, b)` after a literal ending at `end`. Returns the
/// end offset of the operand and the names.
fn percent_args(code: &str, masked: &str, end: usize) -> Option<(usize, Vec<String>)> {
    let rest = &masked[end..];
    let mut j = end + (rest.len() - rest.trim_start().len());
    let tail = &masked[j..];
    if !tail.starts_with('%') || tail.starts_with("%=") {
        return None;
    }
    j += 1;
    let rest = &masked[j..];
    j += rest.len() - rest.trim_start().len();

    if masked[j..].starts_with('(') {
        let close = j + masked[j..].find(')')?;
        let inner = &code[j + 1..close];
        if inner.contains(['(', '"', '\'', MASK]) {
            return None;
        }
        let names: Vec<String> = inner
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if names.is_empty() || !names.iter().all(|n| is_plain_name(n)) {
            return None;
        }
        return Some((close + 1, names));
    }

    let len = masked[j..].bytes().take_while(|&b| is_word_byte(b)).count();
    let name = &code[j..j + len];
    if !is_plain_name(name) {
        return None;
    }
    let after = masked[j + len..].trim_start();
    if after.starts_with(['.', '(', '[', '*']) {
        return None;
    }
    Some((j + len, vec![name.to_string()]))
}

/// Replace each `%s` in `body` with `{name}`. Refuses bodies with braces,
/// other conversions, or a placeholder count that differs from the names.
fn fill_placeholders(body: &str, names: &[String]) -> Option<String> {
    if body.contains(['{', '}']) {
        return None;
    }
    let slots = body.matches("%s").count();
    if slots == 0 || slots != names.len() || body.matches('%').count() != slots {
        return None;
    }
    let mut out = String::with_capacity(body.len() + names.len() * 4);
    let mut pieces = body.split("%s");
    out.push_str(pieces.next().unwrap_or(""));
    for (piece, name) in pieces.zip(names) {
        out.push('{');
        out.push_str(name);
        out.push('}');
        out.push_str(piece);
    }
    Some(out)
}

fn len_walrus(code: &str, file_text: &str) -> Option<String> {
    let (indent, stmt, trailing) = frame(code);
    let (keyword, rest) = ["if ", "elif ", "while "]
        .iter()
        .find_map(|k| stmt.strip_prefix(k).map(|r| (k.trim_end(), r.trim_start())))?;
    let rest = rest.strip_prefix("len(")?;
    let close = rest.find(')')?;
    let name = &rest[..close];
    if !is_plain_name(name) {
        return None;
    }
    let cond = rest[close + 1..].strip_suffix(':')?.trim();
    let (op, rhs) = ["==", "!=", "<=", ">=", "<", ">"]
        .iter()
        .find_map(|op| cond.strip_prefix(op).map(|r| (*op, r.trim())))?;
    let simple_rhs = rhs.bytes().all(|b| b.is_ascii_digit()) && !rhs.is_empty() || is_plain_name(rhs);
    if !simple_rhs {
        return None;
    }
    let var = format!("{name}_len");
    if has_word(file_text, &var) {
        return None;
    }
    Some(format!("{indent}{keyword} ({var} := len({name})) {op} {rhs}:{trailing}"))
}

/// Line indices of single-line `def` headers without an annotation whose
/// bodies never return a value, never yield, and are not abstract stubs.
fn functions_returning_nothing(lexed: &Lexed) -> HashSet<usize> {
    let lines = &lexed.lines;
    let mut out = HashSet::new();
    for (i, line) in lines.iter().enumerate() {
        let head = line.code.trim();
        let is_def = head.starts_with("def ") || head.starts_with("async def ");
        if !is_def
            || line.continues_literal
            || line.depth_before != 0
            || line.depth_after != 0
            || !head.ends_with(':')
            || head.contains("->")
        {
            continue;
        }
        let mut body = 0;
        let mut returns_value = false;
        for next in &lines[i + 1..] {
            if next.blank || next.comment_only || next.continues_literal || next.depth_before > 0 {
                continue;
            }
            if next.indent <= line.indent {
                break;
            }
            body += 1;
            let code = next.code.trim();
            if let Some(value) = code.strip_prefix("return") {
                let value = value.trim();
                if !value.is_empty() && value != "None" && !value.starts_with(';') {
                    returns_value = true;
                }
            }
            if has_word(code, "yield") || code.contains("NotImplementedError") {
                returns_value = true;
            }
        }
        if body > 0 && !returns_value {
            out.insert(i);
        }
    }
    out
}

fn none_hint(code: &str) -> Option<String> {
    let (indent, stmt, trailing) = frame(code);
    let head = stmt.strip_suffix(':')?;
    if !head.trim_end().ends_with(')') {
        return None;
    }
    Some(format!("{indent}{} -> None:{trailing}", head.trim_end()))
}

fn has_key(code: &str) -> Option<String> {
    const CALL: &str = ".has_key(";
    let masked = mask_strings(code);
    let m = masked.as_bytes();
    let mut out = String::new();
    let mut last = 0;
    let mut from = 0;
    let mut changed = false;
    while let Some(rel) = masked[from..].find(CALL) {
        let dot = from + rel;
        from = dot + 1;
        let mut start = dot;
        while start > last && (is_word_byte(m[start - 1]) || m[start - 1] == b'.') {
            start -= 1;
        }
        let object = &code[start..dot];
        if !object.split('.').all(is_identifier) {
            continue;
        }
        let open = dot + CALL.len();
        let Some(close_rel) = masked[open..].find(')') else {
            continue;
        };
        let close = open + close_rel;
        if masked[open..close].contains(['(', ',']) {
            continue;
        }
        let key = code[open..close].trim();
        if key.is_empty() {
            continue;
        }
        out.push_str(&code[last..start]);
        out.push_str(&format!("({key} in {object})"));
        last = close + 1;
        from = last;
        changed = true;
    }
    if !changed {
        return None;
    }
    out.push_str(&code[last..]);
    Some(out)
}

fn xrange(code: &str) -> Option<String> {
    let masked = mask_strings(code);
    let m = masked.as_bytes();
    replace_masked(code, &masked, "xrange(", "range(", |start| {
        start == 0 || !(is_word_byte(m[start - 1]) || m[start - 1] == b'.')
    })
}

fn dict_iterators(code: &str) -> Option<String> {
    let masked = mask_strings(code);
    let mut line = code.to_string();
    let mut changed = false;
    for (old, new) in [
        (".iteritems()", ".items()"),
        (".itervalues()", ".values()"),
        (".iterkeys()", ".keys()"),
    ] {
        let current_mask = if changed { mask_strings(&line) } else { masked.clone() };
        if let Some(next) = replace_masked(&line, &current_mask, old, new, |_| true) {
            line = next;
            changed = true;
        }
    }
    changed.then_some(line)
}

fn not_equal(code: &str) -> Option<String> {
    let masked = mask_strings(code);
    replace_masked(code, &masked, "<>", "!=", |_| true)
}

/// Replace every occurrence of `pattern` outside string literals for which
/// `accept(offset)` holds.
fn replace_masked(code: &str, masked: &str, pattern: &str, replacement: &str, accept: impl Fn(usize) -> bool) -> Option<String> {
    let mut out = String::new();
    let mut last = 0;
    for (start, _) in masked.match_indices(pattern) {
        if start < last || !accept(start) {
            continue;
        }
        out.push_str(&code[last..start]);
        out.push_str(replacement);
        last = start + pattern.len();
    }
    if last == 0 {
        return None;
    }
    out.push_str(&code[last..]);
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn py(code: &str, findings: &str, version: &str) -> FallbackReport {
        PythonFallback.rewrite(code, findings, version)
    }

    #[test]
    fn test_print_statement() {
        let r = py("#!/usr/bin/env python\nimport sys\nprint \"hi\", name\n", "- print statement on line 3", "3.9");
        assert_eq!(r.code, "#!/usr/bin/env python\nimport sys\nprint(\"hi\", name)\n");
        assert_eq!(r.transformations, vec!["print_function"]);
        assert!(r.fired());
    }

    #[test]
    fn test_print_preconditions() {
        let findings = "print statements";
        for code in ["print x,\n", "print >>sys.stderr, x\n", "print(x)\n", "printer = 1\n", "print x; y = 2\n"] {
            assert_eq!(py(code, findings, "3.9").code, code, "{code}");
        }
        assert_eq!(py("    print\n", findings, "3.9").code, "    print()\n");
    }

    #[test]
    fn test_except_comma() {
        let r = py("try:\n    f()\nexcept (IOError, OSError), err:  # legacy\n    pass\n", "old except syntax", "3.8");
        assert_eq!(r.code, "try:\n    f()\nexcept (IOError, OSError) as err:  # legacy\n    pass\n");
        let untouched = "try:\n    f()\nexcept (A, B):\n    pass\n";
        assert_eq!(py(untouched, "except", "3.8").code, untouched);
    }

    #[test]
    fn test_percent_to_fstring() {
        let f = "% formatting could use f-strings";
        assert_eq!(py("msg = \"Hello %s\" % name\n", f, "3.9").code, "msg = f\"Hello {name}\"\n");
        assert_eq!(
            py("msg = 'from %s to %s' % (a, b)\n", f, "3.9").code,
            "msg = f'from {a} to {b}'\n"
        );
        for code in [
            "msg = \"%d items\" % n\n",
            "msg = \"%s\" % obj.name\n",
            "msg = \"%s {x}\" % n\n",
            "msg = b\"%s\" % n\n",
            "msg = \"%s\" % f(n)\n",
            "msg = x * \"%s\" % n\n",
        ] {
            assert_eq!(py(code, f, "3.9").code, code, "{code}");
        }
        assert_eq!(py("msg = \"Hello %s\" % name\n", f, "3.5").code, "msg = \"Hello %s\" % name\n");
    }

    #[test]
    fn test_len_walrus() {
        let f = "walrus opportunity on len() check";
        assert_eq!(
            py("if len(items) == 0:\n    pass\n", f, "3.8").code,
            "if (items_len := len(items)) == 0:\n    pass\n"
        );
        let clash = "items_len = 3\nif len(items) == 0:\n    pass\n";
        assert_eq!(py(clash, f, "3.8").code, clash);
        assert_eq!(py("if len(items) == 0:\n    pass\n", f, "3.7").code, "if len(items) == 0:\n    pass\n");
    }

    #[test]
    fn test_len_walrus_respects_names_elsewhere_in_file() {
        let f = "walrus opportunity on len() check";
        let chunk = "if len(items) == 0:\n    pass\n";
        let file = format!("items_len = 3\n\n{chunk}");
        let r = PythonFallback.rewrite_in_file(chunk, &file, f, "3.8");
        assert_eq!(r.code, chunk);
        assert!(r.transformations.is_empty());

        let alone = PythonFallback.rewrite_in_file(chunk, chunk, f, "3.8");
        assert_eq!(alone.code, "if (items_len := len(items)) == 0:\n    pass\n");
    }

    #[test]
    fn test_none_hint_only_for_valueless_functions() {
        let code = "def log(msg):\n    print(msg)\n    return\n\ndef get():\n    return 1\n\ndef gen():\n    yield 1\n";
        let r = py(code, "missing type hints", "3.9");
        assert!(r.code.starts_with("def log(msg) -> None:\n"));
        assert!(r.code.contains("def get():\n"));
        assert!(r.code.contains("def gen():\n"));
        assert_eq!(r.transformations, vec!["none_return_hint"]);
    }

    #[test]
    fn test_py2_idioms() {
        let code = "if d.has_key('k') and x <> 1:\n    for i in xrange(3):\n        for k, v in d.iteritems():\n            pass\n";
        let r = py(code, "has_key xrange iteritems <>", "3.9");
        assert_eq!(
            r.code,
            "if ('k' in d) and x != 1:\n    for i in range(3):\n        for k, v in d.items():\n            pass\n"
        );
        assert_eq!(
            r.transformations,
            vec!["has_key_to_in", "xrange_to_range", "dict_iter_methods", "not_equal_operator"]
        );
    }

    #[test]
    fn test_strings_and_comments_untouched() {
        let code = "s = \"a <> b xrange(1) d.has_key(x)\"  # print x <> y\nt = '''\nprint x\n'''\n";
        let r = py(code, "print <> xrange has_key", "3.9");
        assert_eq!(r.code, code);
        assert!(!r.fired());
    }

    #[test]
    fn test_gating_by_findings() {
        let code = "print x\nmsg = \"%s\" % name\n";
        assert_eq!(py(code, "nothing relevant", "3.9").code, code);
        let r = py(code, FINDINGS_UNAVAILABLE, "3.9");
        assert_eq!(r.code, "print(x)\nmsg = \"%s\" % name\n");
        assert_eq!(py(code, "print", "not-a-version").code, code);
    }

    #[test]
    fn test_multiline_statements_skipped() {
        let code = "x = foo(1,\n    2) <> 3\nprint \\\n    x\n";
        let r = py(code, "print <>", "3.9");
        assert_eq!(r.code, "x = foo(1,\n    2) != 3\nprint \\\n    x\n");
    }

    #[test]
    fn test_identity_engine() {
        let r = IdentityFallback.rewrite("class A {}", "anything", "17");
        assert_eq!(r.code, "class A {}");
        assert_eq!(r.summary(), "No deterministic transformations applied.");
    }

    #[test]
    fn test_mask_keeps_length() {
        let code = "x = 'é\\'s' + \"%s\"";
        let masked = mask_strings(code);
        assert_eq!(masked.len(), code.len());
        assert!(masked.starts_with("x = '"));
        assert!(!masked.contains("%s"));
    }
}
