use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use glob::glob;
use time::OffsetDateTime;
use tracing::debug;

pub const TARGET_ENV: &str = "MINITWEAK_TARGET";
const PACKAGE_DIR: &str = "node_modules/@anthropic-ai/claude-code";
const ENTRY_FILE: &str = "cli.js";

/// Where to look for the target. Overrides are tried first, then the standard
/// install locations; the two lists are only ever combined when searching.
#[derive(Debug, Clone, Default)]
pub struct SearchPaths {
    pub overrides: Vec<PathBuf>,
    pub standard: Vec<String>,
}

impl SearchPaths {
    pub fn new(extra: &[PathBuf]) -> Self {
        let mut overrides = Vec::new();
        if let Some(value) = env::var_os(TARGET_ENV).filter(|value| !value.is_empty()) {
            overrides.push(PathBuf::from(value));
        }
        overrides.extend(extra.iter().cloned());
        Self {
            overrides,
            standard: standard_patterns(home_dir().as_deref()),
        }
    }

    /// Every candidate in lookup order. Standard entries may be glob patterns.
    pub fn candidates(&self) -> Vec<PathBuf> {
        let mut out: Vec<PathBuf> = self
            .overrides
            .iter()
            .map(|path| {
                if path.is_dir() {
                    path.join(ENTRY_FILE)
                } else {
                    path.clone()
                }
            })
            .collect();
        for pattern in &self.standard {
            match glob(pattern) {
                Ok(paths) => {
                    let mut hits: Vec<PathBuf> = paths.flatten().collect();
                    hits.sort();
                    out.extend(hits);
                }
                Err(err) => debug!(pattern = %pattern, %err, "skipping invalid search pattern"),
            }
        }
        out
    }
}

fn home_dir() -> Option<PathBuf> {
    env::var_os("HOME")
        .or_else(|| env::var_os("USERPROFILE"))
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

fn standard_patterns(home: Option<&Path>) -> Vec<String> {
    let mut roots: Vec<String> = Vec::new();
    if let Some(home) = home {
        let home = home.display();
        roots.push(format!("{home}/.npm-global/lib"));
        roots.push(format!("{home}/.nvm/versions/node/*/lib"));
        roots.push(format!("{home}/.volta/tools/image/packages/@anthropic-ai/claude-code/lib"));
        roots.push(format!("{home}/.bun/install/global"));
        roots.push(format!("{home}/AppData/Roaming/npm"));
    }
    roots.push("/usr/local/lib".into());
    roots.push("/usr/lib".into());
    roots.push("/opt/homebrew/lib".into());
    roots
        .into_iter()
        .map(|root| format!("{root}/{PACKAGE_DIR}/{ENTRY_FILE}"))
        .collect()
}

/// Resolves the target file: an explicit path wins, otherwise the first
/// existing candidate from `paths`.
pub fn locate_target(explicit: Option<&Path>, paths: &SearchPaths) -> Result<PathBuf> {
    if let Some(path) = explicit {
        let path = if path.is_dir() {
            path.join(ENTRY_FILE)
        } else {
            path.to_path_buf()
        };
        if !path.is_file() {
            bail!("target {} does not exist", path.display());
        }
        return Ok(path);
    }
    let candidates = paths.candidates();
    for candidate in &candidates {
        if candidate.is_file() {
            debug!(target = %candidate.display(), "located target");
            return Ok(candidate.clone());
        }
    }
    bail!(
        "no target found in {} candidate locations; pass --target or set {TARGET_ENV}",
        candidates.len()
    )
}

/// Replaces `path` with `data` through a sibling temp file and a rename. The
/// rename gives the target a fresh inode, so hard links to the old file keep
/// the old contents. Permissions of the old file carry over.
pub fn replace_file_breaking_links(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
    let base_dir = parent.unwrap_or_else(|| Path::new("."));
    let permissions = fs::metadata(path).map(|meta| meta.permissions()).ok();
    let unique = format!(
        ".minitweak-tmp-{}-{}",
        std::process::id(),
        OffsetDateTime::now_utc().unix_timestamp_nanos()
    );
    let temp_path = base_dir.join(unique);
    {
        let mut file = fs::File::create(&temp_path)
            .with_context(|| format!("creating temp file {}", temp_path.display()))?;
        file.write_all(data)
            .with_context(|| format!("writing temp file {}", temp_path.display()))?;
        file.sync_all()
            .with_context(|| format!("syncing temp file {}", temp_path.display()))?;
    }
    if let Some(permissions) = permissions {
        fs::set_permissions(&temp_path, permissions)
            .with_context(|| format!("copying permissions to {}", temp_path.display()))?;
    }
    fs::rename(&temp_path, path).or_else(|err| {
        let _ = fs::remove_file(&temp_path);
        Err(err).with_context(|| format!("replacing {}", path.display()))
    })?;
    Ok(())
}

/// Copies `from` to `to`, creating the destination directory.
pub fn copy_file(from: &Path, to: &Path) -> Result<()> {
    if let Some(dir) = to.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("creating directory {}", dir.display()))?;
    }
    fs::copy(from, to)
        .with_context(|| format!("copying {} to {}", from.display(), to.display()))?;
    Ok(())
}
