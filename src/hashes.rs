use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::prompts::PromptDescriptor;

pub fn content_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    format!("{digest:x}")
}

/// Prompt id to content hash. `None` records a prompt reverted to its
/// reference text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HashIndex(BTreeMap<String, Option<String>>);

impl HashIndex {
    /// Missing files read as an empty index.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read(path)
            .with_context(|| format!("reading hash index {}", path.display()))?;
        serde_json::from_slice(&data)
            .with_context(|| format!("parsing hash index {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating directory {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("writing hash index {}", path.display()))
    }

    pub fn get(&self, id: &str) -> Option<&Option<String>> {
        self.0.get(id)
    }

    pub fn record(&mut self, id: &str, hash: Option<String>) {
        self.0.insert(id.to_string(), hash);
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The hash a prompt would be recorded under after applying it.
pub fn applied_hash(prompt: &PromptDescriptor) -> Option<String> {
    prompt
        .is_customized()
        .then(|| content_hash(&prompt.content()))
}

/// Ids of prompts whose current content differs from what was last applied.
pub fn pending_changes(applied: &HashIndex, prompts: &[PromptDescriptor]) -> Vec<String> {
    prompts
        .iter()
        .filter(|prompt| {
            let current = applied_hash(prompt);
            match applied.get(&prompt.prompt_id) {
                Some(recorded) => *recorded != current,
                None => current.is_some(),
            }
        })
        .map(|prompt| prompt.prompt_id.clone())
        .collect()
}

/// Ids of prompts whose reference text differs from the one recorded at the
/// last apply, meaning the target shipped a new version of the prompt.
pub fn reference_changes(original: &HashIndex, prompts: &[PromptDescriptor]) -> Vec<String> {
    prompts
        .iter()
        .filter(|prompt| match original.get(&prompt.prompt_id) {
            Some(Some(recorded)) => *recorded != content_hash(&prompt.baseline()),
            _ => false,
        })
        .map(|prompt| prompt.prompt_id.clone())
        .collect()
}
