use colored::Colorize;
use similar::{ChangeTag, TextDiff};
use tracing::debug;

/// Characters of unchanged text shown on each side of an edited span.
pub const CONTEXT_CHARS: usize = 20;

/// Debug-only reporter for span edits. Purely observational.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiffReporter {
    enabled: bool,
    colorize: bool,
}

impl DiffReporter {
    pub fn new(enabled: bool, colorize: bool) -> Self {
        Self { enabled, colorize }
    }

    /// Logs the region `[start, end)` of `old` next to the `injected` text now
    /// sitting at `start` in `new`.
    pub fn show(&self, old: &str, new: &str, injected: &str, start: usize, end: usize) {
        if !self.enabled {
            return;
        }
        let rendered = render_diff(old, new, injected, start, end, self.colorize);
        debug!("\n{rendered}");
    }

    /// Logs a line diff between two prose texts.
    pub fn show_text(&self, label: &str, old: &str, new: &str) {
        if !self.enabled {
            return;
        }
        let rendered = render_text_diff(old, new, 2);
        if rendered.is_empty() {
            debug!("{label}: no textual changes");
        } else {
            debug!("{label}:\n{rendered}");
        }
    }
}

pub fn render_diff(
    old: &str,
    new: &str,
    injected: &str,
    start: usize,
    end: usize,
    colorize: bool,
) -> String {
    let start = clamp_boundary(old, start);
    let end = clamp_boundary(old, end.max(start));
    let new_end = clamp_boundary(new, start.saturating_add(injected.len()));
    let new_start = clamp_boundary(new, start).min(new_end);

    let before = tail_chars(&old[..start], CONTEXT_CHARS);
    let removed = &old[start..end];
    let old_after = head_chars(&old[end..], CONTEXT_CHARS);
    let added = &new[new_start..new_end];
    let new_after = head_chars(&new[new_end..], CONTEXT_CHARS);

    if colorize {
        format!(
            "- {}{}{}\n+ {}{}{}",
            before.dimmed(),
            removed.red(),
            old_after.dimmed(),
            before.dimmed(),
            added.green(),
            new_after.dimmed()
        )
    } else {
        format!("- {before}[{removed}]{old_after}\n+ {before}[{added}]{new_after}")
    }
}

pub fn render_text_diff(old: &str, new: &str, context: usize) -> String {
    let diff = TextDiff::configure()
        .algorithm(similar::Algorithm::Myers)
        .diff_lines(old, new);

    let mut out = String::new();
    for (idx, group) in diff.grouped_ops(context).iter().enumerate() {
        if idx > 0 {
            out.push_str("...\n");
        }
        for op in group {
            for change in diff.iter_changes(op) {
                let sign = match change.tag() {
                    ChangeTag::Delete => "- ",
                    ChangeTag::Insert => "+ ",
                    ChangeTag::Equal => "  ",
                };
                out.push_str(sign);
                out.push_str(change.value());
                if change.missing_newline() {
                    out.push('\n');
                }
            }
        }
    }
    out
}

fn clamp_boundary(text: &str, idx: usize) -> usize {
    let mut idx = idx.min(text.len());
    while !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn tail_chars(text: &str, count: usize) -> &str {
    match text.char_indices().rev().nth(count.saturating_sub(1)) {
        Some((idx, _)) if count > 0 => &text[idx..],
        _ if count == 0 => "",
        _ => text,
    }
}

fn head_chars(text: &str, count: usize) -> &str {
    match text.char_indices().nth(count) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
