//! Reassembly of per-chunk results into one file.
//!
//! Models strip surrounding whitespace from code and echo the imports they
//! were shown. Before chunk outputs are joined, [`reframe`] restores the
//! original chunk's leading and trailing blank lines and
//! [`strip_carried_imports`] removes imports that were only shown for
//! context. [`assemble`] then concatenates in order, inserting a single
//! separator line at a junction iff all of the following hold:
//!
//! - the preceding piece does not end with a blank line,
//! - the following piece does not begin with a blank line,
//! - at least one of the two is a complete-structures chunk,
//! - at least one of the two was actually rewritten.
//!
//! The last condition keeps a run with nothing to change byte-identical to
//! its input.

/// One chunk's output ready for joining.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyPiece {
    pub text: String,
    pub complete_structures: bool,
    /// The text differs from the chunk's original code.
    pub changed: bool,
}

/// Result of [`assemble`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assembled {
    pub text: String,
    /// Number of separator lines inserted between pieces.
    pub separators: usize,
}

/// Join pieces in order.
pub fn assemble(pieces: &[AssemblyPiece]) -> Assembled {
    let total: usize = pieces.iter().map(|p| p.text.len() + 1).sum();
    let mut text = String::with_capacity(total);
    let mut separators = 0;

    for (i, piece) in pieces.iter().enumerate() {
        if i > 0 {
            let prev = &pieces[i - 1];
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            if needs_separator(prev, piece) {
                text.push('\n');
                separators += 1;
            }
        }
        text.push_str(&piece.text);
    }
    Assembled { text, separators }
}

fn needs_separator(prev: &AssemblyPiece, next: &AssemblyPiece) -> bool {
    !ends_with_blank_line(&prev.text)
        && !starts_with_blank_line(&next.text)
        && (prev.complete_structures || next.complete_structures)
        && (prev.changed || next.changed)
}

fn ends_with_blank_line(text: &str) -> bool {
    let trimmed = text.trim_end_matches([' ', '\t', '\r']);
    trimmed.is_empty() || trimmed.ends_with("\n\n") || trimmed == "\n"
}

fn starts_with_blank_line(text: &str) -> bool {
    text.lines().next().map_or(true, |l| l.trim().is_empty())
}

/// Give `reply` the leading and trailing blank lines of `original`.
pub fn reframe(original: &str, reply: &str) -> String {
    let (lead, _, trail) = split_frame(original);
    let (_, core, _) = split_frame(reply);
    if core.is_empty() {
        return reply.to_string();
    }
    let mut out = String::with_capacity(lead.len() + core.len() + trail.len());
    out.push_str(lead);
    out.push_str(core);
    out.push_str(trail);
    out
}

/// Split into (leading blank lines, content, trailing whitespace).
fn split_frame(text: &str) -> (&str, &str, &str) {
    let mut lead_end = 0;
    for line in text.split_inclusive('\n') {
        if !line.trim().is_empty() {
            break;
        }
        lead_end += line.len();
    }
    let content_end = text.trim_end().len().max(lead_end);
    (&text[..lead_end], &text[lead_end..content_end], &text[content_end..])
}

/// Remove the first occurrence of each carried import from `reply`.
///
/// Matching compares trimmed lines, and multi-line imports must appear as a
/// consecutive run. Imports the model rewrote into a different shape are
/// left in place.
pub fn strip_carried_imports(reply: &str, carried: &[String]) -> String {
    if carried.is_empty() {
        return reply.to_string();
    }
    let mut lines: Vec<&str> = reply.split_inclusive('\n').collect();
    for import in carried {
        let wanted: Vec<&str> = import.lines().map(str::trim).collect();
        if wanted.is_empty() {
            continue;
        }
        let found = (0..lines.len()).find(|&i| {
            i + wanted.len() <= lines.len()
                && wanted
                    .iter()
                    .zip(&lines[i..i + wanted.len()])
                    .all(|(w, l)| *w == l.trim())
        });
        if let Some(i) = found {
            lines.drain(i..i + wanted.len());
        }
    }
    lines.concat()
}
