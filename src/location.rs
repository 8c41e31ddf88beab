//! Location finders over minified source text.
//!
//! Every finder returns a [`Location`] or a [`SkipReason`] naming the pattern
//! that failed. Nothing here panics on a miss; callers skip the patch instead.

use std::ops::Range;

use regex::{Captures, Regex};
use tracing::debug;

use crate::patches::SkipReason;

pub type Found<T> = Result<T, SkipReason>;

/// Half-open byte span `[start, end)` plus the identifiers captured with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub start: usize,
    pub end: usize,
    pub identifiers: Vec<String>,
}

impl Location {
    /// Builds a location after checking `start <= end <= source.len()` and
    /// that both ends sit on char boundaries.
    pub fn new(source: &str, start: usize, end: usize, identifiers: Vec<String>) -> Option<Self> {
        if start > end
            || end > source.len()
            || !source.is_char_boundary(start)
            || !source.is_char_boundary(end)
        {
            return None;
        }
        Some(Self {
            start,
            end,
            identifiers,
        })
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn ident(&self, idx: usize) -> Option<&str> {
        self.identifiers.get(idx).map(String::as_str)
    }

    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.range()]
    }
}

/// Search bounds around an anchor, in bytes.
#[derive(Debug, Clone, Copy)]
pub struct Window {
    pub before: usize,
    pub after: usize,
}

impl Window {
    pub const fn before(before: usize) -> Self {
        Self { before, after: 0 }
    }

    pub const fn around(before: usize, after: usize) -> Self {
        Self { before, after }
    }
}

/// Result of an anchored search: the anchor span and the nearest secondary
/// match, both in absolute offsets. `groups[i]` holds capture group `i + 1`.
#[derive(Debug, Clone)]
pub struct AnchoredMatch {
    pub anchor: Range<usize>,
    pub span: Range<usize>,
    pub groups: Vec<Option<Range<usize>>>,
}

impl AnchoredMatch {
    pub fn group(&self, idx: usize) -> Option<Range<usize>> {
        self.groups.get(idx).cloned().flatten()
    }

    pub fn group_text<'a>(&self, source: &'a str, idx: usize) -> Option<&'a str> {
        self.group(idx).map(|range| &source[range])
    }
}

/// Compiles a built-in pattern. These are constants, so a failure is a bug in
/// the pattern and panics on first use instead of posing as a missed match.
pub fn compile(pattern: &str) -> Regex {
    Regex::new(pattern)
        .unwrap_or_else(|err| panic!("built-in pattern {pattern:?} does not compile: {err}"))
}

pub fn not_found(pattern: &str) -> SkipReason {
    debug!(pattern, "pattern did not match");
    SkipReason::PatternNotFound {
        pattern: pattern.to_string(),
    }
}

pub fn malformed(pattern: &str, group: &str) -> SkipReason {
    debug!(pattern, group, "pattern matched but capture was empty");
    SkipReason::MalformedCapture {
        pattern: pattern.to_string(),
        group: group.to_string(),
    }
}

/// First match of `regex`, spanning the whole match, with every capture group
/// collected as an identifier. An empty or missing group is a malformed capture.
pub fn find_regex(source: &str, name: &str, regex: &Regex) -> Found<Location> {
    let caps = regex.captures(source).ok_or_else(|| not_found(name))?;
    location_from_captures(source, name, &caps)
}

/// Like [`find_regex`] but returns the first match whose captures satisfy
/// `accept`. Used where a pattern would need a backreference.
pub fn find_regex_where<F>(source: &str, name: &str, regex: &Regex, accept: F) -> Found<Location>
where
    F: Fn(&Captures<'_>) -> bool,
{
    let caps = regex
        .captures_iter(source)
        .find(|caps| accept(caps))
        .ok_or_else(|| not_found(name))?;
    location_from_captures(source, name, &caps)
}

fn location_from_captures(source: &str, name: &str, caps: &Captures<'_>) -> Found<Location> {
    let whole = caps.get(0).ok_or_else(|| not_found(name))?;
    let mut identifiers = Vec::with_capacity(caps.len().saturating_sub(1));
    for idx in 1..caps.len() {
        match caps.get(idx) {
            Some(m) if !m.as_str().is_empty() => identifiers.push(m.as_str().to_string()),
            _ => return Err(malformed(name, &idx.to_string())),
        }
    }
    Location::new(source, whole.start(), whole.end(), identifiers)
        .ok_or_else(|| malformed(name, "0"))
}

/// Two-phase search: find `anchor` literally, then run `regex` only inside
/// `window` around it and keep the occurrence nearest to the anchor. Later
/// anchor occurrences are tried when an earlier one has no secondary match.
pub fn find_anchored(
    source: &str,
    name: &str,
    anchor: &str,
    window: Window,
    regex: &Regex,
) -> Found<AnchoredMatch> {
    let mut from = 0;
    while let Some(rel) = source[from..].find(anchor) {
        let anchor_start = from + rel;
        let anchor_end = anchor_start + anchor.len();
        if let Some(found) = nearest_in_window(source, anchor_start..anchor_end, window, regex) {
            return Ok(found);
        }
        from = anchor_end;
    }
    Err(not_found(name))
}

fn nearest_in_window(
    source: &str,
    anchor: Range<usize>,
    window: Window,
    regex: &Regex,
) -> Option<AnchoredMatch> {
    let lo = floor_boundary(source, anchor.start.saturating_sub(window.before));
    let hi = ceil_boundary(source, anchor.end.saturating_add(window.after));
    let slice = &source[lo..hi];

    let mut best: Option<(usize, Captures<'_>)> = None;
    for caps in regex.captures_iter(slice) {
        let Some(whole) = caps.get(0) else { continue };
        let (start, end) = (lo + whole.start(), lo + whole.end());
        let distance = if end <= anchor.start {
            anchor.start - end
        } else if start >= anchor.end {
            start - anchor.end
        } else {
            0
        };
        if best.as_ref().is_none_or(|(current, _)| distance < *current) {
            best = Some((distance, caps));
        }
    }

    let (_, caps) = best?;
    let whole = caps.get(0)?;
    let groups = (1..caps.len())
        .map(|idx| caps.get(idx).map(|m| lo + m.start()..lo + m.end()))
        .collect();
    Some(AnchoredMatch {
        anchor,
        span: lo + whole.start()..lo + whole.end(),
        groups,
    })
}

/// Given the offset of an opening delimiter, returns the offset just past its
/// matching close. String literals (all three quote styles) are skipped so
/// delimiters inside them do not count.
pub fn scan_balanced(source: &str, open_at: usize, open: u8, close: u8) -> Option<usize> {
    let bytes = source.as_bytes();
    if bytes.get(open_at) != Some(&open) {
        return None;
    }
    let mut depth = 0usize;
    let mut idx = open_at;
    while idx < bytes.len() {
        match bytes[idx] {
            b'"' | b'\'' | b'`' => {
                idx = skip_string(bytes, idx)?;
                continue;
            }
            b if b == open => depth += 1,
            b if b == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(idx + 1);
                }
            }
            _ => {}
        }
        idx += 1;
    }
    None
}

/// Scans an expression starting at `from` and returns the offset of the first
/// `,` `;` or unmatched closing bracket at nesting depth zero.
pub fn scan_expression_end(source: &str, from: usize) -> Option<usize> {
    let bytes = source.as_bytes();
    let mut depth = 0usize;
    let mut idx = from;
    while idx < bytes.len() {
        match bytes[idx] {
            b'"' | b'\'' | b'`' => {
                idx = skip_string(bytes, idx)?;
                continue;
            }
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => {
                if depth == 0 {
                    return Some(idx);
                }
                depth -= 1;
            }
            b',' | b';' if depth == 0 => return Some(idx),
            _ => {}
        }
        idx += 1;
    }
    None
}

/// Offset of the `open` byte of the innermost pair enclosing `at`, looking
/// back at most `lookback` bytes. String literals are not tracked on the way
/// back, so callers confirm the span with [`scan_balanced`].
pub fn enclosing_open(
    source: &str,
    at: usize,
    open: u8,
    close: u8,
    lookback: usize,
) -> Option<usize> {
    let bytes = source.as_bytes();
    let at = at.min(bytes.len());
    let floor = at.saturating_sub(lookback);
    let mut depth = 0usize;
    let mut idx = at;
    while idx > floor {
        idx -= 1;
        match bytes[idx] {
            b if b == close => depth += 1,
            b if b == open => {
                if depth == 0 {
                    return Some(idx);
                }
                depth -= 1;
            }
            _ => {}
        }
    }
    None
}

/// Bracket depth of `to` relative to `from`, skipping string literals.
/// `None` when `to` falls inside a string or the brackets close below `from`.
pub fn nesting_depth(source: &str, from: usize, to: usize) -> Option<usize> {
    let bytes = source.as_bytes();
    let to = to.min(bytes.len());
    let mut depth = 0usize;
    let mut idx = from;
    while idx < to {
        match bytes[idx] {
            b'"' | b'\'' | b'`' => {
                idx = skip_string(bytes, idx)?;
                if idx > to {
                    return None;
                }
                continue;
            }
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth = depth.checked_sub(1)?,
            _ => {}
        }
        idx += 1;
    }
    Some(depth)
}

/// Returns the offset just past the closing quote of the literal opening at `at`.
fn skip_string(bytes: &[u8], at: usize) -> Option<usize> {
    let quote = bytes[at];
    let mut idx = at + 1;
    while idx < bytes.len() {
        match bytes[idx] {
            b'\\' => idx += 2,
            b if b == quote => return Some(idx + 1),
            _ => idx += 1,
        }
    }
    None
}

pub fn is_ident_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'$'
}

/// The identifier ending right before `end`, if any.
pub fn ident_before(source: &str, end: usize) -> Option<(usize, &str)> {
    let bytes = source.as_bytes();
    let mut start = end;
    while start > 0 && is_ident_byte(bytes[start - 1]) {
        start -= 1;
    }
    if start == end || bytes[start].is_ascii_digit() {
        return None;
    }
    Some((start, &source[start..end]))
}

pub fn floor_boundary(source: &str, mut idx: usize) -> usize {
    idx = idx.min(source.len());
    while !source.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

pub fn ceil_boundary(source: &str, mut idx: usize) -> usize {
    idx = idx.min(source.len());
    while !source.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn location_rejects_out_of_bounds_spans() {
        let source = "abc";
        assert!(Location::new(source, 2, 1, Vec::new()).is_none());
        assert!(Location::new(source, 0, 4, Vec::new()).is_none());
        assert!(Location::new(source, 3, 3, Vec::new()).is_some());
    }

    #[test]
    fn location_rejects_split_chars() {
        let source = "a✢b";
        assert!(Location::new(source, 0, 2, Vec::new()).is_none());
        assert!(Location::new(source, 1, 4, Vec::new()).is_some());
    }

    #[test]
    fn find_regex_collects_identifiers() {
        let regex = compile(r"switch\(([$\w]+)\)\{");
        let source = "x=1;switch(A$){case 1:}";
        let loc = find_regex(source, "switch", &regex).expect("match");
        assert_eq!(loc.ident(0), Some("A$"));
        assert_eq!(loc.text(source), "switch(A$){");
    }

    #[test]
    fn find_regex_reports_named_pattern_on_miss() {
        let regex = compile(r"nothing-here");
        let err = find_regex("abc", "theme switch", &regex).unwrap_err();
        assert_eq!(
            err,
            SkipReason::PatternNotFound {
                pattern: "theme switch".into()
            }
        );
    }

    #[test]
    fn anchored_search_prefers_nearest_occurrence() {
        let regex = compile(r#"borderStyle:"(\w+)""#);
        let source = r#"borderStyle:"single",x,borderStyle:"round",ANCHOR"#;
        let found =
            find_anchored(source, "border", "ANCHOR", Window::before(100), &regex).expect("match");
        assert_eq!(found.group_text(source, 0), Some("round"));
    }

    #[test]
    fn anchored_search_ignores_matches_outside_window() {
        let regex = compile(r"needle");
        let filler = "x".repeat(500);
        let source = format!("needle{filler}ANCHOR");
        let result = find_anchored(&source, "needle", "ANCHOR", Window::before(100), &regex);
        assert!(result.is_err());
    }

    #[test]
    fn anchored_search_tries_later_anchor_occurrences() {
        let regex = compile(r"needle");
        let filler = "x".repeat(500);
        let source = format!("ANCHOR{filler}needle ANCHOR");
        let found =
            find_anchored(&source, "needle", "ANCHOR", Window::before(20), &regex).expect("match");
        assert_eq!(&source[found.span.clone()], "needle");
    }

    #[test]
    fn balanced_scan_skips_brackets_in_strings() {
        let source = r#"a=["x]",["y"],'[']+1"#;
        let end = scan_balanced(source, 2, b'[', b']').expect("balanced");
        assert_eq!(&source[2..end], r#"["x]",["y"],'[']"#);
    }

    #[test]
    fn balanced_scan_handles_nested_braces() {
        let source = r#"{a:{b:"}"},c:`{`}tail"#;
        let end = scan_balanced(source, 0, b'{', b'}').expect("balanced");
        assert_eq!(&source[end..], "tail");
    }

    #[test]
    fn enclosing_open_skips_closed_siblings() {
        let source = r#"x={a:{b:1},c:[2],key:3}"#;
        let at = source.find("key").expect("key");
        assert_eq!(enclosing_open(source, at, b'{', b'}', 100), Some(2));
        assert_eq!(enclosing_open(source, at, b'{', b'}', 3), None);
    }

    #[test]
    fn nesting_depth_ignores_brackets_in_strings() {
        let source = r#"{a:"{[",b:{c:1},d:2}"#;
        let d = source.find("d:").expect("d");
        let c = source.find("c:").expect("c");
        assert_eq!(nesting_depth(source, 1, d), Some(0));
        assert_eq!(nesting_depth(source, 1, c), Some(1));
        assert_eq!(nesting_depth(source, 1, 5), None);
    }

    #[test]
    #[should_panic(expected = "does not compile")]
    fn broken_builtin_pattern_panics() {
        compile(r"([$\w]+");
    }

    #[test]
    fn balanced_scan_returns_none_when_unterminated() {
        assert!(scan_balanced("{a:[1,2]", 0, b'{', b'}').is_none());
    }

    #[test]
    fn expression_end_stops_at_top_level_comma() {
        let source = "()=>{if(a,b)return!1;return!0},next:1";
        let end = scan_expression_end(source, 0).expect("end");
        assert_eq!(&source[..end], "()=>{if(a,b)return!1;return!0}");
    }

    #[test]
    fn ident_before_reads_minified_names() {
        let source = "x,kX$1={";
        let (start, name) = ident_before(source, 6).expect("ident");
        assert_eq!(name, "kX$1");
        assert_eq!(start, 2);
        assert!(ident_before("a=", 2).is_none());
    }

    #[test]
    fn anchored_search_over_large_input_stays_fast() {
        let filler = "var a1=b2(c3,d4),e5={f6:g7};".repeat(40_000);
        let source = format!(r#"{filler}borderStyle:"round",borderLeft:!1{filler}"#);
        let regex = compile(r#"borderStyle:("\w+")"#);
        let started = Instant::now();
        let found = find_anchored(
            &source,
            "border",
            "borderLeft:!1",
            Window::before(200),
            &regex,
        )
        .expect("match");
        assert_eq!(found.group_text(&source, 0), Some("\"round\""));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
