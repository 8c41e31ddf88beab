//! Versioned prompt descriptors, user overrides and the prompt rewrite stage.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::diff::DiffReporter;
use crate::location::not_found;
use crate::patches::SkipReason;
use crate::reconcile::{
    classify_context, reconstruct_baseline, render_replacement, uses_unicode_escapes,
};
use crate::transform::{Edit, replace_span};
use crate::version::Version;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PromptData {
    pub version: String,
    pub prompts: Vec<PromptDescriptor>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptDescriptor {
    #[serde(rename = "id")]
    pub prompt_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub pieces: Vec<String>,
    #[serde(rename = "identifiers", default)]
    pub identifier_positions: Vec<usize>,
    #[serde(default)]
    pub identifier_map: BTreeMap<usize, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<String>,
    /// Customized text; `None` means the reference text is used as-is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl PromptDescriptor {
    pub fn baseline(&self) -> String {
        reconstruct_baseline(&self.pieces, &self.identifier_positions, &self.identifier_map)
    }

    pub fn content(&self) -> String {
        self.content.clone().unwrap_or_else(|| self.baseline())
    }

    pub fn is_customized(&self) -> bool {
        self.content
            .as_deref()
            .is_some_and(|content| content != self.baseline())
    }

    /// Variable names in slot order, derived from the identifier map when the
    /// reference data does not list them.
    pub fn variables(&self) -> Vec<String> {
        if !self.variables.is_empty() {
            return self.variables.clone();
        }
        let mut names: Vec<String> = Vec::new();
        for position in &self.identifier_positions {
            if let Some(name) = self.identifier_map.get(position) {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
        }
        names
    }

    pub fn validate(&self) -> Result<()> {
        if self.pieces.is_empty() {
            bail!("prompt {} has no pieces", self.prompt_id);
        }
        if self.pieces[0].is_empty() && self.pieces.len() > 1 {
            bail!(
                "prompt {} starts with an identifier; a literal prefix is required",
                self.prompt_id
            );
        }
        let gaps = self.pieces.len() - 1;
        if self.identifier_positions.len() < gaps {
            bail!(
                "prompt {} has {} gaps but {} identifier positions",
                self.prompt_id,
                gaps,
                self.identifier_positions.len()
            );
        }
        if let Some(missing) = self.identifier_positions[..gaps]
            .iter()
            .find(|position| !self.identifier_map.contains_key(position))
        {
            bail!(
                "prompt {} has no variable name for identifier {}",
                self.prompt_id,
                missing
            );
        }
        Ok(())
    }
}

pub fn load_prompt_data(path: &Path) -> Result<PromptData> {
    let data = fs::read(path).with_context(|| format!("reading prompt data {}", path.display()))?;
    let parsed: PromptData = serde_json::from_slice(&data)
        .with_context(|| format!("parsing prompt data {}", path.display()))?;
    for prompt in &parsed.prompts {
        prompt.validate()?;
    }
    Ok(parsed)
}

#[derive(Debug, Default, Deserialize)]
struct OverrideFrontmatter {
    name: Option<String>,
    description: Option<String>,
    version: Option<String>,
}

/// Splits `---` YAML frontmatter from a markdown body. Files without
/// frontmatter are all body.
fn split_frontmatter(text: &str) -> Result<(OverrideFrontmatter, String)> {
    let lines: Vec<&str> = text.lines().collect();
    if lines.first().map(|line| line.trim()) != Some("---") {
        return Ok((OverrideFrontmatter::default(), text.to_string()));
    }
    let Some(end) = lines[1..].iter().position(|line| line.trim() == "---") else {
        bail!("frontmatter is not terminated");
    };
    let end = end + 1;
    let yaml = lines[1..end].join("\n");
    let frontmatter = if yaml.trim().is_empty() {
        OverrideFrontmatter::default()
    } else {
        serde_yaml::from_str(&yaml).context("parsing frontmatter")?
    };
    Ok((frontmatter, lines[end + 1..].join("\n")))
}

/// Loads `<dir>/<id>.md` overrides into the matching descriptors. Returns the
/// number of prompts overridden.
pub fn apply_overrides(data: &mut PromptData, dir: &Path) -> Result<usize> {
    if !dir.is_dir() {
        debug!(dir = %dir.display(), "no prompt override directory");
        return Ok(0);
    }
    let mut applied = 0;
    for prompt in &mut data.prompts {
        let path = dir.join(format!("{}.md", prompt.prompt_id));
        if !path.is_file() {
            continue;
        }
        let text = fs::read_to_string(&path)
            .with_context(|| format!("reading prompt override {}", path.display()))?;
        let (frontmatter, body) = split_frontmatter(&text)
            .with_context(|| format!("parsing prompt override {}", path.display()))?;
        if let Some(version) = frontmatter.version.as_deref() {
            if Version::parse(version) != Version::parse(&data.version) {
                warn!(
                    prompt = %prompt.prompt_id,
                    override_version = version,
                    data_version = %data.version,
                    "prompt override was written for another version"
                );
            }
        }
        if let Some(name) = frontmatter.name {
            prompt.name = name;
        }
        if let Some(description) = frontmatter.description {
            prompt.description = description;
        }
        prompt.content = Some(body);
        applied += 1;
    }
    Ok(applied)
}

/// Regex matching the prompt as it appears in the target: literal pieces
/// tolerate either raw or escaped newlines and quotes, and non-ASCII text in
/// either raw or `\uXXXX` form. Each gap captures one identifier.
pub fn build_matcher(pieces: &[String]) -> Result<Regex, regex::Error> {
    let mut pattern = String::new();
    for (idx, piece) in pieces.iter().enumerate() {
        if idx > 0 {
            pattern.push_str(r"([$\w]+)");
        }
        for ch in piece.chars() {
            push_tolerant(&mut pattern, ch);
        }
    }
    Regex::new(&pattern)
}

fn push_tolerant(pattern: &mut String, ch: char) {
    match ch {
        '\n' => pattern.push_str(r"(?:\n|\\n)"),
        '"' | '\'' | '`' => {
            pattern.push_str(r"\\?");
            pattern.push(ch);
        }
        '\\' => pattern.push_str(r"\\{1,2}"),
        ch if ch.is_ascii() => pattern.push_str(&regex::escape(ch.encode_utf8(&mut [0; 4]))),
        ch => {
            let mut units = [0u16; 2];
            let escaped: String = ch
                .encode_utf16(&mut units)
                .iter()
                .map(|unit| format!(r"\\u(?i:{unit:04x})"))
                .collect();
            pattern.push_str(&format!(
                "(?:{}|{escaped})",
                regex::escape(ch.encode_utf8(&mut [0; 4]))
            ));
        }
    }
}

/// First occurrence whose repeated identifier slots agree, as a span plus the
/// variable-name to identifier map.
fn locate_prompt(
    source: &str,
    prompt: &PromptDescriptor,
    matcher: &Regex,
) -> Result<(usize, usize, BTreeMap<String, String>), SkipReason> {
    'candidates: for caps in matcher.captures_iter(source) {
        let Some(whole) = caps.get(0) else { continue };
        let mut captured: BTreeMap<String, String> = BTreeMap::new();
        for (gap, position) in prompt.identifier_positions.iter().enumerate() {
            let Some(ident) = caps.get(gap + 1) else { break };
            let Some(name) = prompt.identifier_map.get(position) else {
                continue;
            };
            match captured.get(name) {
                Some(existing) if existing != ident.as_str() => continue 'candidates,
                Some(_) => {}
                None => {
                    captured.insert(name.clone(), ident.as_str().to_string());
                }
            }
        }
        return Ok((whole.start(), whole.end(), captured));
    }
    Err(not_found(&prompt.prompt_id))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptOutcome {
    Applied,
    Unchanged,
    NotMatched,
    Skipped(SkipReason),
}

#[derive(Debug, Clone)]
pub struct PromptReport {
    pub prompt_id: String,
    pub outcome: PromptOutcome,
}

/// Rewrites every prompt found in `source` with its current content. A prompt
/// that fails to match or to encode is reported and left alone.
pub fn apply_prompts(
    source: &str,
    prompts: &[PromptDescriptor],
    reporter: &DiffReporter,
) -> (String, Vec<PromptReport>) {
    let mut current = source.to_string();
    let mut reports = Vec::with_capacity(prompts.len());
    for prompt in prompts {
        let outcome = match apply_prompt(&current, prompt, reporter) {
            Ok(Some(next)) => {
                current = next;
                PromptOutcome::Applied
            }
            Ok(None) => PromptOutcome::Unchanged,
            Err(SkipReason::PatternNotFound { .. }) => PromptOutcome::NotMatched,
            Err(reason) => {
                warn!(prompt = %prompt.prompt_id, %reason, "prompt skipped");
                PromptOutcome::Skipped(reason)
            }
        };
        reports.push(PromptReport {
            prompt_id: prompt.prompt_id.clone(),
            outcome,
        });
    }
    let matched = reports
        .iter()
        .filter(|report| report.outcome != PromptOutcome::NotMatched)
        .count();
    info!(matched, total = prompts.len(), "prompt stage finished");
    (current, reports)
}

fn apply_prompt(
    source: &str,
    prompt: &PromptDescriptor,
    reporter: &DiffReporter,
) -> Result<Option<String>, SkipReason> {
    let matcher = build_matcher(&prompt.pieces)
        .map_err(|err| SkipReason::InvalidConfig(format!("prompt {}: {err}", prompt.prompt_id)))?;
    let (start, end, captured) = locate_prompt(source, prompt, &matcher)?;

    let content = prompt.content();
    reporter.show_text(&prompt.prompt_id, &prompt.baseline(), &content);

    let style = classify_context(source, start);
    let unicode = uses_unicode_escapes(&source[start..end]);
    let rendered = render_replacement(&content, style, &captured, unicode)?;
    if rendered == source[start..end] {
        return Ok(None);
    }
    debug!(prompt = %prompt.prompt_id, %style, unicode, "rewriting prompt");
    replace_span(source, &Edit::new(start, end, rendered), reporter).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn descriptor(content: Option<&str>) -> PromptDescriptor {
        PromptDescriptor {
            prompt_id: "system-intro".into(),
            name: "Intro".into(),
            description: String::new(),
            pieces: vec![
                "You are ${".into(),
                "}. Use ${".into(),
                "} and ${".into(),
                "}.\nBe brief.".into(),
            ],
            identifier_positions: vec![0, 1, 0],
            identifier_map: BTreeMap::from([(0, "AGENT".into()), (1, "TOOL".into())]),
            variables: Vec::new(),
            content: content.map(String::from),
        }
    }

    #[test]
    fn descriptor_parses_reference_json() {
        let data: PromptData = serde_json::from_str(
            r#"{"version":"1.0.71","prompts":[{"id":"p","name":"P","description":"d",
                "pieces":["Hi ${","}!"],"identifiers":[0],"identifierMap":{"0":"NAME"}}]}"#,
        )
        .expect("prompt data");
        let prompt = &data.prompts[0];
        prompt.validate().expect("valid");
        assert_eq!(prompt.baseline(), "Hi ${NAME}!");
        assert_eq!(prompt.variables(), vec!["NAME"]);
        assert!(!prompt.is_customized());
    }

    #[test]
    fn validation_catches_missing_names() {
        let mut prompt = descriptor(None);
        prompt.identifier_map.remove(&1);
        assert!(prompt.validate().is_err());
    }

    #[test]
    fn rewrites_template_prompt_with_captured_identifiers() {
        let source = "let s=`You are ${J$$}. Use ${Tq} and ${J$$}.\nBe brief.`;";
        let prompt = descriptor(Some("You are ${AGENT}! Prefer ${TOOL}.\nBe `brief`."));
        let (out, reports) = apply_prompts(source, &[prompt], &DiffReporter::default());
        assert_eq!(reports[0].outcome, PromptOutcome::Applied);
        assert_eq!(out, "let s=`You are ${J$$}! Prefer ${Tq}.\nBe \\`brief\\`.`;");
    }

    #[test]
    fn matches_escaped_newlines_inside_double_quotes() {
        let source = r#"let s="You are ${A}. Use ${B} and ${A}.\nBe brief.";"#;
        let matcher = build_matcher(&descriptor(None).pieces).expect("matcher");
        assert!(matcher.is_match(source));
    }

    #[test]
    fn inconsistent_repeated_identifier_is_not_a_match() {
        let source = "`You are ${A}. Use ${B} and ${C}.\nBe brief.`";
        let prompt = descriptor(Some("changed"));
        let (out, reports) = apply_prompts(source, &[prompt], &DiffReporter::default());
        assert_eq!(reports[0].outcome, PromptOutcome::NotMatched);
        assert_eq!(out, source);
    }

    #[test]
    fn unchanged_content_is_reported_as_such() {
        let source = "`You are ${A}. Use ${B} and ${A}.\nBe brief.`";
        let (out, reports) =
            apply_prompts(source, &[descriptor(None)], &DiffReporter::default());
        assert_eq!(reports[0].outcome, PromptOutcome::Unchanged);
        assert_eq!(out, source);
    }

    #[test]
    fn bad_delimiter_skips_only_that_prompt() {
        let source = "`You are ${A}. Use ${B} and ${A}.\nBe brief.`;`Other ${X} text`";
        let broken = descriptor(Some("Use ${`AGENT`}"));
        let other = PromptDescriptor {
            prompt_id: "other".into(),
            pieces: vec!["Other ${".into(), "} text".into()],
            identifier_positions: vec![0],
            identifier_map: BTreeMap::from([(0, "X".into())]),
            content: Some("Another ${X} text".into()),
            ..descriptor(None)
        };
        let (out, reports) = apply_prompts(source, &[broken, other], &DiffReporter::default());
        assert!(matches!(
            reports[0].outcome,
            PromptOutcome::Skipped(SkipReason::UnescapedDelimiter { line: 1, .. })
        ));
        assert_eq!(reports[1].outcome, PromptOutcome::Applied);
        assert!(out.ends_with("`Another ${X} text`"));
    }

    #[test]
    fn overrides_read_frontmatter_and_body() {
        let dir = tempdir().expect("temp dir");
        fs::write(
            dir.path().join("system-intro.md"),
            "---\nname: Custom intro\nversion: 1.0.71\n---\nYou are ${AGENT}.\n",
        )
        .expect("write override");
        let mut data = PromptData {
            version: "1.0.71".into(),
            prompts: vec![descriptor(None)],
        };
        let applied = apply_overrides(&mut data, dir.path()).expect("overrides");
        assert_eq!(applied, 1);
        assert_eq!(data.prompts[0].name, "Custom intro");
        assert_eq!(data.prompts[0].content.as_deref(), Some("You are ${AGENT}."));
        assert!(data.prompts[0].is_customized());
    }

    #[test]
    fn unicode_escaped_targets_still_match() {
        let prompt = PromptDescriptor {
            pieces: vec!["Thinking… ${".into(), "}".into()],
            identifier_positions: vec![0],
            identifier_map: BTreeMap::from([(0, "V".into())]),
            content: Some("Working… ${V}".into()),
            ..descriptor(None)
        };
        let source = r"x=`Thinking\u2026 ${q}`";
        let (out, reports) = apply_prompts(source, &[prompt], &DiffReporter::default());
        assert_eq!(reports[0].outcome, PromptOutcome::Applied);
        assert_eq!(out, r"x=`Working\u2026 ${q}`");
    }
}
