//! Content reconciliation for text injected into string literals.
//!
//! Figures out which literal style encloses an offset, encodes replacement
//! text for that style, and rebuilds template baselines from prompt pieces.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use tracing::warn;

use crate::location::compile;
use crate::patches::SkipReason;

/// How far back the classifier looks for an opening delimiter.
const CLASSIFY_SCAN_BYTES: usize = 64 * 1024;

static UNICODE_ESCAPE: LazyLock<Regex> = LazyLock::new(|| compile(r"\\u[0-9a-fA-F]{4}"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiteralStyle {
    PlainCode,
    DoubleQuoted,
    SingleQuoted,
    BacktickTemplate,
}

impl LiteralStyle {
    pub fn delimiter(self) -> Option<char> {
        match self {
            LiteralStyle::PlainCode => None,
            LiteralStyle::DoubleQuoted => Some('"'),
            LiteralStyle::SingleQuoted => Some('\''),
            LiteralStyle::BacktickTemplate => Some('`'),
        }
    }
}

impl fmt::Display for LiteralStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LiteralStyle::PlainCode => "plain code",
            LiteralStyle::DoubleQuoted => "double-quoted",
            LiteralStyle::SingleQuoted => "single-quoted",
            LiteralStyle::BacktickTemplate => "template",
        };
        f.write_str(label)
    }
}

/// Classifies the literal enclosing `offset` by walking backwards to the
/// nearest quote or backtick not preceded by an odd run of backslashes.
/// Falls back to [`LiteralStyle::PlainCode`] when none is found.
pub fn classify_context(source: &str, offset: usize) -> LiteralStyle {
    let bytes = source.as_bytes();
    let offset = offset.min(bytes.len());
    let floor = offset.saturating_sub(CLASSIFY_SCAN_BYTES);
    let mut idx = offset;
    while idx > floor {
        idx -= 1;
        let style = match bytes[idx] {
            b'"' => LiteralStyle::DoubleQuoted,
            b'\'' => LiteralStyle::SingleQuoted,
            b'`' => LiteralStyle::BacktickTemplate,
            _ => continue,
        };
        if !is_escaped(bytes, idx) {
            return style;
        }
    }
    warn!(offset, "no enclosing string literal found; treating as plain code");
    LiteralStyle::PlainCode
}

fn is_escaped(bytes: &[u8], idx: usize) -> bool {
    let run = bytes[..idx]
        .iter()
        .rev()
        .take_while(|byte| **byte == b'\\')
        .count();
    run % 2 == 1
}

/// Encodes plain text so it can sit inside a literal of `style`.
pub fn encode_for_style(text: &str, style: LiteralStyle) -> String {
    if style == LiteralStyle::PlainCode {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len() + text.len() / 8);
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        match (ch, style) {
            ('\\', _) => out.push_str("\\\\"),
            ('\r', LiteralStyle::BacktickTemplate) => out.push_str("\\r"),
            ('\n', LiteralStyle::BacktickTemplate) => out.push('\n'),
            ('\n', _) => out.push_str("\\n"),
            ('\r', _) => out.push_str("\\r"),
            ('"', LiteralStyle::DoubleQuoted) => out.push_str("\\\""),
            ('\'', LiteralStyle::SingleQuoted) => out.push_str("\\'"),
            ('`', LiteralStyle::BacktickTemplate) => out.push_str("\\`"),
            ('$', LiteralStyle::BacktickTemplate) if chars.peek() == Some(&'{') => {
                out.push_str("\\$");
            }
            _ => out.push(ch),
        }
    }
    out
}

/// True when a matched region already carries `\uXXXX` escapes, which is how
/// natively compiled builds store non-ASCII text. A literal backslash-u sequence in
/// ordinary content also trips this check.
pub fn uses_unicode_escapes(region: &str) -> bool {
    UNICODE_ESCAPE.is_match(region)
}

/// Rewrites every non-ASCII char as `\uXXXX` (surrogate pairs above the BMP).
pub fn escape_non_ascii(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut units = [0u16; 2];
    for ch in text.chars() {
        if ch.is_ascii() {
            out.push(ch);
            continue;
        }
        for unit in ch.encode_utf16(&mut units) {
            out.push_str(&format!("\\u{unit:04x}"));
        }
    }
    out
}

/// Interleaves template pieces with the variable names recorded for each gap.
pub fn reconstruct_baseline(
    pieces: &[String],
    identifier_positions: &[usize],
    identifier_map: &BTreeMap<usize, String>,
) -> String {
    let mut out = String::new();
    for (idx, piece) in pieces.iter().enumerate() {
        out.push_str(piece);
        if let Some(position) = identifier_positions.get(idx) {
            if idx + 1 < pieces.len() {
                match identifier_map.get(position) {
                    Some(name) => out.push_str(name),
                    None => out.push_str(&format!("UNKNOWN_{position}")),
                }
            }
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment<'a> {
    Text(&'a str),
    Interpolation { expr: &'a str, offset: usize },
}

/// Splits content into literal text and `${...}` interpolations.
pub fn split_interpolations(content: &str) -> Result<Vec<Segment<'_>>, SkipReason> {
    let bytes = content.as_bytes();
    let mut segments = Vec::new();
    let mut text_start = 0;
    let mut idx = 0;
    while idx + 1 < bytes.len() {
        if bytes[idx] == b'$' && bytes[idx + 1] == b'{' && !is_escaped(bytes, idx) {
            let open = idx;
            let mut depth = 0usize;
            let mut close = None;
            for (pos, byte) in bytes.iter().enumerate().skip(open + 1) {
                match byte {
                    b'{' => depth += 1,
                    b'}' => {
                        depth -= 1;
                        if depth == 0 {
                            close = Some(pos);
                            break;
                        }
                    }
                    _ => {}
                }
            }
            let Some(close) = close else {
                return Err(unescaped_delimiter(content, open, "${"));
            };
            if open > text_start {
                segments.push(Segment::Text(&content[text_start..open]));
            }
            segments.push(Segment::Interpolation {
                expr: &content[open + 2..close],
                offset: open + 2,
            });
            idx = close + 1;
            text_start = idx;
            continue;
        }
        idx += 1;
    }
    if text_start < content.len() {
        segments.push(Segment::Text(&content[text_start..]));
    }
    Ok(segments)
}

/// Replaces whole-word variable names in `expr` with the identifiers captured
/// from the target. Substitution is literal: a captured `J$$` stays `J$$`.
pub fn substitute_identifiers(expr: &str, captured: &BTreeMap<String, String>) -> String {
    if captured.is_empty() {
        return expr.to_string();
    }
    let mut names: Vec<&String> = captured.keys().collect();
    names.sort_by_key(|name| std::cmp::Reverse(name.len()));
    let alternation = names
        .iter()
        .map(|name| regex::escape(name))
        .collect::<Vec<_>>()
        .join("|");
    let Ok(regex) = Regex::new(&format!(r"\b(?:{alternation})\b")) else {
        return expr.to_string();
    };
    regex
        .replace_all(expr, |caps: &Captures<'_>| {
            captured
                .get(&caps[0])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Renders user content for insertion at a site of `style`: text segments are
/// encoded, interpolations get captured identifiers and are emitted as template
/// holes or string concatenation.
pub fn render_replacement(
    content: &str,
    style: LiteralStyle,
    captured: &BTreeMap<String, String>,
    unicode_escaped: bool,
) -> Result<String, SkipReason> {
    let mut out = String::with_capacity(content.len());
    for segment in split_interpolations(content)? {
        match segment {
            Segment::Text(text) => out.push_str(&encode_for_style(text, style)),
            Segment::Interpolation { expr, offset } => {
                if let Some(delimiter) = style.delimiter() {
                    if let Some(pos) = expr.find(delimiter) {
                        return Err(unescaped_delimiter(
                            content,
                            offset + pos,
                            &delimiter.to_string(),
                        ));
                    }
                }
                let expr = substitute_identifiers(expr, captured);
                match style {
                    LiteralStyle::PlainCode | LiteralStyle::BacktickTemplate => {
                        out.push_str("${");
                        out.push_str(&expr);
                        out.push('}');
                    }
                    LiteralStyle::DoubleQuoted => out.push_str(&format!("\"+({expr})+\"")),
                    LiteralStyle::SingleQuoted => out.push_str(&format!("'+({expr})+'")),
                }
            }
        }
    }
    if unicode_escaped {
        out = escape_non_ascii(&out);
    }
    Ok(out)
}

/// 1-based line and column (in chars) of a byte offset.
pub fn line_col(text: &str, offset: usize) -> (usize, usize) {
    let mut end = offset.min(text.len());
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    let before = &text[..end];
    let line = before.matches('\n').count() + 1;
    let column = match before.rfind('\n') {
        Some(nl) => before[nl + 1..].chars().count() + 1,
        None => before.chars().count() + 1,
    };
    (line, column)
}

fn unescaped_delimiter(content: &str, offset: usize, delimiter: &str) -> SkipReason {
    let (line, column) = line_col(content, offset);
    SkipReason::UnescapedDelimiter {
        delimiter: delimiter.to_string(),
        line,
        column,
    }
}
