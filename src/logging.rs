use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

pub const LOG_FILE: &str = "apply_log.jsonl";
const MAX_ENTRIES: usize = 500;

#[derive(Debug, Serialize)]
pub struct SkippedEntry<'a> {
    pub id: &'a str,
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct CycleLogEntry<'a> {
    pub timestamp: String,
    pub command: &'a str,
    pub target: &'a Path,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub applied: Vec<&'a str>,
    pub skipped: Vec<SkippedEntry<'a>>,
    pub prompts_applied: usize,
    pub prompts_unmatched: usize,
}

impl<'a> CycleLogEntry<'a> {
    pub fn new(command: &'a str, target: &'a Path) -> Self {
        Self {
            timestamp: now_rfc3339(),
            command,
            target,
            version: None,
            applied: Vec::new(),
            skipped: Vec::new(),
            prompts_applied: 0,
            prompts_unmatched: 0,
        }
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".into())
}

/// Appends one line to `<state dir>/apply_log.jsonl`, keeping the newest
/// entries only.
pub fn record_cycle(state_dir: &Path, entry: &CycleLogEntry<'_>) -> Result<()> {
    fs::create_dir_all(state_dir)
        .with_context(|| format!("creating state directory {}", state_dir.display()))?;
    let log_path = state_dir.join(LOG_FILE);
    let json = serde_json::to_string(entry)?;
    let mut file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(&log_path)
        .with_context(|| format!("writing history log {}", log_path.display()))?;
    writeln!(file, "{json}")
        .with_context(|| format!("writing history log {}", log_path.display()))?;
    drop(file);
    trim_history(&log_path)
}

fn trim_history(path: &Path) -> Result<()> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading history log {}", path.display()))?;
    let total = text.lines().count();
    if total <= MAX_ENTRIES {
        return Ok(());
    }
    let mut kept: String = text
        .lines()
        .skip(total - MAX_ENTRIES)
        .collect::<Vec<_>>()
        .join("\n");
    kept.push('\n');
    fs::write(path, kept).with_context(|| format!("writing history log {}", path.display()))
}
