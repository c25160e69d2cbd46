//! Line-oriented lexer shared by the structure analyzer, the fallback
//! engine, and the safety validator.
//!
//! The lexer does not build tokens. It walks the text once and, for every
//! physical line, records the code with string contents blanked and
//! comments removed, together with the bracket depth and whether the line
//! starts inside a multi-line string. That is enough to count definitions,
//! control keywords, and call names without being fooled by `def ` inside a
//! string or a comment.

use crate::language::LexicalRules;

/// Lexical facts about one physical line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LexedLine {
    /// Leading whitespace width in columns (tabs advance to the next multiple of 8).
    pub indent: usize,
    /// Code with string literal contents removed (quotes kept) and comments stripped.
    pub code: String,
    /// Raw line is empty or whitespace only.
    pub blank: bool,
    /// Line holds a comment and no code.
    pub comment_only: bool,
    /// Line begins inside a string or block comment opened on an earlier line.
    pub continues_literal: bool,
    /// Bracket depth at the start of the line.
    pub depth_before: usize,
    /// Bracket depth at the end of the line.
    pub depth_after: usize,
    /// A triple-quoted string (or javadoc block) ends on this line.
    pub closes_docstring: bool,
}

/// Result of lexing a whole text.
#[derive(Debug, Clone, Default)]
pub struct Lexed {
    pub lines: Vec<LexedLine>,
    /// Number of comments (line comments plus block comments).
    pub comments: usize,
    /// Number of docstrings (statement-position triple-quoted strings, or javadoc blocks).
    pub docstrings: usize,
    /// First bracket problem found, if any.
    pub bracket_error: Option<String>,
}

impl Lexed {
    pub fn brackets_balanced(&self) -> bool {
        self.bracket_error.is_none()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Code,
    Str { quote: char, triple: bool, doc: bool },
    BlockComment { doc: bool },
}

/// Lex `text` under the given rules.
pub fn lex(text: &str, rules: &LexicalRules) -> Lexed {
    let mut out = Lexed::default();
    let mut state = State::Code;
    let mut stack: Vec<char> = Vec::new();

    for raw in text.split('\n') {
        let raw = raw.strip_suffix('\r').unwrap_or(raw);
        let mut line = LexedLine {
            indent: indent_width(raw),
            blank: raw.trim().is_empty(),
            continues_literal: state != State::Code,
            depth_before: stack.len(),
            ..Default::default()
        };
        let mut had_comment = false;
        let chars: Vec<char> = raw.chars().collect();
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];
            match state {
                State::Code => {
                    if starts_with_at(&chars, i, rules.line_comment) {
                        had_comment = true;
                        out.comments += 1;
                        break;
                    }
                    if rules.block_comments && starts_with_at(&chars, i, "/*") {
                        let doc = starts_with_at(&chars, i, "/**");
                        had_comment = true;
                        out.comments += 1;
                        if doc {
                            out.docstrings += 1;
                        }
                        state = State::BlockComment { doc };
                        i += 2;
                        continue;
                    }
                    if c == '"' || c == '\'' {
                        let triple = rules.triple_quotes
                            && i + 2 < chars.len()
                            && chars[i + 1] == c
                            && chars[i + 2] == c;
                        if triple {
                            let doc = line.code.trim().is_empty();
                            if doc {
                                out.docstrings += 1;
                            }
                            line.code.push(c);
                            state = State::Str {
                                quote: c,
                                triple: true,
                                doc,
                            };
                            i += 3;
                        } else {
                            line.code.push(c);
                            state = State::Str {
                                quote: c,
                                triple: false,
                                doc: false,
                            };
                            i += 1;
                        }
                        continue;
                    }
                    match c {
                        '(' | '[' | '{' => stack.push(c),
                        ')' | ']' | '}' => {
                            let expected = match c {
                                ')' => '(',
                                ']' => '[',
                                _ => '{',
                            };
                            match stack.pop() {
                                Some(open) if open == expected => {}
                                Some(open) => {
                                    if out.bracket_error.is_none() {
                                        out.bracket_error = Some(format!(
                                            "mismatched '{}' closing '{}' on line {}",
                                            c,
                                            open,
                                            out.lines.len() + 1
                                        ));
                                    }
                                }
                                None => {
                                    if out.bracket_error.is_none() {
                                        out.bracket_error = Some(format!(
                                            "unmatched '{}' on line {}",
                                            c,
                                            out.lines.len() + 1
                                        ));
                                    }
                                }
                            }
                        }
                        _ => {}
                    }
                    line.code.push(c);
                    i += 1;
                }
                State::Str { quote, triple, doc } => {
                    if c == '\\' {
                        i += 2;
                        continue;
                    }
                    if c == quote {
                        if !triple {
                            line.code.push(c);
                            state = State::Code;
                            i += 1;
                            continue;
                        }
                        if chars.get(i + 1) == Some(&quote) && chars.get(i + 2) == Some(&quote) {
                            line.code.push(c);
                            if doc {
                                line.closes_docstring = true;
                            }
                            state = State::Code;
                            i += 3;
                            continue;
                        }
                    }
                    i += 1;
                }
                State::BlockComment { doc } => {
                    if starts_with_at(&chars, i, "*/") {
                        if doc {
                            line.closes_docstring = true;
                        }
                        state = State::Code;
                        i += 2;
                        continue;
                    }
                    had_comment = true;
                    i += 1;
                }
            }
        }

        // Single-quoted strings do not span lines unless continued with a
        // trailing backslash.
        if let State::Str { triple: false, .. } = state {
            if !raw.ends_with('\\') {
                state = State::Code;
            }
        }

        line.code = line.code.trim_end().to_string();
        line.comment_only = had_comment && line.code.trim().is_empty();
        line.depth_after = stack.len();
        out.lines.push(line);
    }

    // `split('\n')` yields a trailing empty piece for newline-terminated text.
    if text.ends_with('\n') {
        out.lines.pop();
    }

    if out.bracket_error.is_none() && !stack.is_empty() {
        out.bracket_error = Some(format!("{} unclosed bracket(s)", stack.len()));
    }

    out
}

/// Width of the leading whitespace of `line`.
pub fn indent_width(line: &str) -> usize {
    let mut width = 0;
    for c in line.chars() {
        match c {
            ' ' => width += 1,
            '\t' => width += 8 - (width % 8),
            _ => break,
        }
    }
    width
}

/// Split `line` into its code part and trailing comment (if any), honoring
/// string literals. The comment part includes the introducer.
pub fn split_trailing_comment<'a>(line: &'a str, rules: &LexicalRules) -> (&'a str, Option<&'a str>) {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (idx, c) in line.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        if c == '"' || c == '\'' {
            quote = Some(c);
            continue;
        }
        if line[idx..].starts_with(rules.line_comment) {
            return (&line[..idx], Some(&line[idx..]));
        }
    }
    (line, None)
}

fn starts_with_at(chars: &[char], i: usize, pat: &str) -> bool {
    let mut k = i;
    for p in pat.chars() {
        if chars.get(k) != Some(&p) {
            return false;
        }
        k += 1;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::Language;

    fn py(text: &str) -> Lexed {
        lex(text, &Language::Python.lexical_rules())
    }

    #[test]
    fn test_strings_and_comments_are_blanked() {
        let l = py("x = \"def foo(\"  # def bar()\n");
        assert_eq!(l.lines.len(), 1);
        assert_eq!(l.lines[0].code, "x = \"\"");
        assert_eq!(l.comments, 1);
        assert!(l.brackets_balanced());
    }

    #[test]
    fn test_docstring_counted_and_spans_lines() {
        let l = py("def f():\n    \"\"\"Doc.\n    more (\n    \"\"\"\n    return 1\n");
        assert_eq!(l.docstrings, 1);
        assert!(l.lines[2].continues_literal);
        assert!(l.lines[3].closes_docstring);
        assert!(l.brackets_balanced());
    }

    #[test]
    fn test_triple_quoted_value_is_not_a_docstring() {
        let l = py("SQL = \"\"\"select 1\"\"\"\n");
        assert_eq!(l.docstrings, 0);
    }

    #[test]
    fn test_bracket_depth_tracking() {
        let l = py("call(a,\n     [1, 2],\n)\n");
        assert_eq!(l.lines[0].depth_before, 0);
        assert_eq!(l.lines[1].depth_before, 1);
        assert_eq!(l.lines[2].depth_after, 0);
        assert!(l.brackets_balanced());
    }

    #[test]
    fn test_unbalanced_brackets_reported() {
        assert!(!py("x = (1, 2\n").brackets_balanced());
        assert!(!py("x = [1, 2)\n").brackets_balanced());
        assert!(!py("x = 1)\n").brackets_balanced());
    }

    #[test]
    fn test_java_block_comments_and_javadoc() {
        let l = lex(
            "/** Doc */\nclass A { // c\n  /* x { */ int b; }\n",
            &Language::Java.lexical_rules(),
        );
        assert_eq!(l.docstrings, 1);
        assert_eq!(l.comments, 3);
        assert!(l.brackets_balanced());
    }

    #[test]
    fn test_split_trailing_comment_respects_strings() {
        let rules = Language::Python.lexical_rules();
        assert_eq!(
            split_trailing_comment("print 'a#b'  # note", &rules),
            ("print 'a#b'  ", Some("# note"))
        );
        assert_eq!(split_trailing_comment("x = 1", &rules), ("x = 1", None));
    }

    #[test]
    fn test_indent_width_tabs() {
        assert_eq!(indent_width("    x"), 4);
        assert_eq!(indent_width("\tx"), 8);
        assert_eq!(indent_width("  \tx"), 8);
    }
}
