//! The apply cycle: restore from the pristine backup, run every writer in
//! order over one in-memory string, then write the target once.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::diff::DiffReporter;
use crate::encoding::{decode_target, encode_target};
use crate::files::{copy_file, replace_file_breaking_links};
use crate::hashes::{HashIndex, applied_hash, content_hash};
use crate::logging::{CycleLogEntry, SkippedEntry, record_cycle};
use crate::patches::{REGISTRY, SkipReason};
use crate::prompts::{PromptDescriptor, PromptOutcome, PromptReport, apply_prompts};
use crate::version::Version;

pub const BACKUP_FILE: &str = "cli.js.backup";
pub const APPLIED_HASHES_FILE: &str = "applied_hashes.json";
pub const ORIGINAL_HASHES_FILE: &str = "original_hashes.json";

/// Everything a cycle reads, resolved once up front.
#[derive(Debug, Clone)]
pub struct ApplyContext {
    pub settings: Settings,
    pub prompts: Vec<PromptDescriptor>,
    pub reporter: DiffReporter,
}

impl ApplyContext {
    pub fn new(settings: Settings, prompts: Vec<PromptDescriptor>, reporter: DiffReporter) -> Self {
        Self {
            settings,
            prompts,
            reporter,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    Applied,
    Skipped(SkipReason),
}

#[derive(Debug, Clone)]
pub struct PatchReport {
    pub id: &'static str,
    pub outcome: PatchOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub version: Option<Version>,
    pub patches: Vec<PatchReport>,
    pub prompts: Vec<PromptReport>,
}

impl CycleReport {
    pub fn applied(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.patches
            .iter()
            .filter(|report| report.outcome == PatchOutcome::Applied)
            .map(|report| report.id)
    }

    pub fn skipped(&self) -> impl Iterator<Item = (&'static str, &SkipReason)> + '_ {
        self.patches.iter().filter_map(|report| match &report.outcome {
            PatchOutcome::Skipped(reason) => Some((report.id, reason)),
            PatchOutcome::Applied => None,
        })
    }

    pub fn prompt_count(&self, wanted: fn(&PromptOutcome) -> bool) -> usize {
        self.prompts
            .iter()
            .filter(|report| wanted(&report.outcome))
            .count()
    }

    pub fn summary(&self) -> CycleSummary {
        CycleSummary {
            version: self.version.map(|v| v.to_string()),
            applied: self.applied().count(),
            skipped: self.skipped().count(),
            prompts_matched: self.prompt_count(|o| *o != PromptOutcome::NotMatched),
            prompts_unmatched: self.prompt_count(|o| *o == PromptOutcome::NotMatched),
        }
    }

    pub fn print_summary(&self) {
        let summary = self.summary();
        match &summary.version {
            Some(version) => println!("target version {version}"),
            None => println!("target version unknown"),
        }
        println!(
            "patches: {} applied, {} skipped",
            summary.applied, summary.skipped
        );
        for id in self.applied() {
            println!("  + {id}");
        }
        for (id, reason) in self.skipped() {
            println!("  - {id}: {reason}");
        }
        if !self.prompts.is_empty() {
            println!(
                "prompts: {} matched, {} not matched",
                summary.prompts_matched, summary.prompts_unmatched
            );
            for report in &self.prompts {
                match &report.outcome {
                    PromptOutcome::NotMatched => println!("  ? {}", report.prompt_id),
                    PromptOutcome::Skipped(reason) => {
                        println!("  ! {}: {reason}", report.prompt_id)
                    }
                    PromptOutcome::Applied | PromptOutcome::Unchanged => {}
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CycleSummary {
    pub version: Option<String>,
    pub applied: usize,
    pub skipped: usize,
    pub prompts_matched: usize,
    pub prompts_unmatched: usize,
}

/// Runs every registered writer, then the prompt stage, threading the text
/// through. A skipped writer leaves the text as it was.
pub fn run_cycle(source: &str, ctx: &ApplyContext) -> (String, CycleReport) {
    let version = Version::detect(source);
    match version {
        Some(version) => debug!(%version, "detected target version"),
        None => warn!("no version banner found; every writer will be attempted"),
    }

    let mut current = source.to_string();
    let mut patches = Vec::with_capacity(REGISTRY.len());
    for def in REGISTRY {
        let outcome = match def.run(&current, ctx, version) {
            Ok(next) => {
                info!(patch = def.id, "applied");
                current = next;
                PatchOutcome::Applied
            }
            Err(reason) => {
                if reason.is_expected() {
                    debug!(patch = def.id, %reason, "skipped");
                } else {
                    warn!(patch = def.id, %reason, "skipped");
                }
                PatchOutcome::Skipped(reason)
            }
        };
        patches.push(PatchReport {
            id: def.id,
            outcome,
        });
    }

    let (current, prompts) = apply_prompts(&current, &ctx.prompts, &ctx.reporter);
    (
        current,
        CycleReport {
            version,
            patches,
            prompts,
        },
    )
}

#[derive(Debug, Clone)]
pub struct TargetPaths {
    pub target: PathBuf,
    pub state_dir: PathBuf,
}

impl TargetPaths {
    pub fn new(target: impl Into<PathBuf>, state_dir: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
            state_dir: state_dir.into(),
        }
    }

    pub fn backup(&self) -> PathBuf {
        self.state_dir.join(BACKUP_FILE)
    }

    pub fn applied_hashes(&self) -> PathBuf {
        self.state_dir.join(APPLIED_HASHES_FILE)
    }

    pub fn original_hashes(&self) -> PathBuf {
        self.state_dir.join(ORIGINAL_HASHES_FILE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetState {
    NotYetBackedUp,
    Clean,
    Patched,
}

impl fmt::Display for TargetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TargetState::NotYetBackedUp => "not backed up",
            TargetState::Clean => "clean",
            TargetState::Patched => "patched",
        };
        f.write_str(label)
    }
}

pub fn target_state(paths: &TargetPaths) -> Result<TargetState> {
    let backup = paths.backup();
    if !backup.is_file() {
        return Ok(TargetState::NotYetBackedUp);
    }
    let pristine = read_file(&backup, "backup")?;
    let current = read_file(&paths.target, "target")?;
    Ok(if pristine == current {
        TargetState::Clean
    } else {
        TargetState::Patched
    })
}

fn read_file(path: &Path, what: &str) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("reading {what} {}", path.display()))
}

/// Makes sure the backup holds the pristine target for the installed version.
/// A backup left over from an older install is replaced.
fn ensure_backup(paths: &TargetPaths) -> Result<()> {
    let backup = paths.backup();
    if !backup.is_file() {
        info!(backup = %backup.display(), "creating backup");
        return copy_file(&paths.target, &backup);
    }
    let current = read_file(&paths.target, "target")?;
    let pristine = read_file(&backup, "backup")?;
    let current_version = Version::detect(&String::from_utf8_lossy(&current));
    let backup_version = Version::detect(&String::from_utf8_lossy(&pristine));
    if current_version.is_some() && current_version != backup_version {
        warn!(
            backup = ?backup_version.map(|v| v.to_string()),
            target = ?current_version.map(|v| v.to_string()),
            "target was updated; refreshing backup"
        );
        return copy_file(&paths.target, &backup);
    }
    Ok(())
}

/// One full cycle against the target. I/O failures abort before the single
/// write, leaving the target untouched. With `dry_run` nothing is written.
pub fn apply_cycle(paths: &TargetPaths, ctx: &ApplyContext, dry_run: bool) -> Result<CycleReport> {
    let source_path = if dry_run {
        let backup = paths.backup();
        if backup.is_file() {
            backup
        } else {
            paths.target.clone()
        }
    } else {
        ensure_backup(paths)?;
        paths.backup()
    };

    let bytes = read_file(&source_path, "pristine source")?;
    let decoded = decode_target(&bytes)
        .with_context(|| format!("decoding {}", source_path.display()))?;
    let (patched, report) = run_cycle(&decoded.text, ctx);

    if dry_run {
        info!("dry run; target left untouched");
        return Ok(report);
    }

    replace_file_breaking_links(&paths.target, &encode_target(&patched, decoded.had_bom))?;
    record_prompt_hashes(paths, ctx, &report)?;
    let mut entry = CycleLogEntry::new("apply", &paths.target);
    entry.version = report.version.map(|v| v.to_string());
    entry.applied = report.applied().collect();
    entry.skipped = report
        .skipped()
        .map(|(id, reason)| SkippedEntry {
            id,
            reason: reason.to_string(),
        })
        .collect();
    entry.prompts_applied = report.prompt_count(|o| *o == PromptOutcome::Applied);
    entry.prompts_unmatched = report.prompt_count(|o| *o == PromptOutcome::NotMatched);
    record_cycle(&paths.state_dir, &entry)?;
    Ok(report)
}

fn record_prompt_hashes(
    paths: &TargetPaths,
    ctx: &ApplyContext,
    report: &CycleReport,
) -> Result<()> {
    if ctx.prompts.is_empty() {
        return Ok(());
    }
    let mut applied = HashIndex::load(&paths.applied_hashes())?;
    let mut original = HashIndex::load(&paths.original_hashes())?;
    for (prompt, outcome) in ctx.prompts.iter().zip(&report.prompts) {
        if matches!(
            outcome.outcome,
            PromptOutcome::Applied | PromptOutcome::Unchanged
        ) {
            applied.record(&prompt.prompt_id, applied_hash(prompt));
            original.record(&prompt.prompt_id, Some(content_hash(&prompt.baseline())));
        }
    }
    applied.save(&paths.applied_hashes())?;
    original.save(&paths.original_hashes())
}

/// Puts the pristine backup back in place and forgets applied prompt hashes.
pub fn restore(paths: &TargetPaths) -> Result<()> {
    let backup = paths.backup();
    if !backup.is_file() {
        bail!("no backup at {}; nothing to restore", backup.display());
    }
    let pristine = read_file(&backup, "backup")?;
    replace_file_breaking_links(&paths.target, &pristine)?;
    let mut applied = HashIndex::load(&paths.applied_hashes())?;
    applied.clear();
    applied.save(&paths.applied_hashes())?;
    record_cycle(&paths.state_dir, &CycleLogEntry::new("restore", &paths.target))?;
    info!(target = %paths.target.display(), "restored from backup");
    Ok(())
}
