//! Patch writers and the versioned registry that orders them.
//!
//! A writer takes the running source text and the cycle context and either
//! returns the rewritten text or a [`SkipReason`]. Skips are never fatal; the
//! orchestrator keeps the previous text and moves on.

mod context_limit;
mod input_box;
mod models;
mod spinner;
mod themes;
mod toggles;
mod tools;
mod user_message;
mod verbs;

use std::fmt;

use thiserror::Error;

use crate::orchestrator::ApplyContext;
use crate::version::{Version, VersionRange};

/// Why a patch did not apply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkipReason {
    #[error("pattern not found: {pattern}")]
    PatternNotFound { pattern: String },
    #[error("pattern {pattern} matched but capture group {group} was empty")]
    MalformedCapture { pattern: String, group: String },
    #[error("disabled in settings")]
    Disabled,
    #[error("not supported for target version {version}")]
    UnsupportedVersion { version: String },
    #[error("unescaped {delimiter} in replacement at line {line}, column {column}")]
    UnescapedDelimiter {
        delimiter: String,
        line: usize,
        column: usize,
    },
    #[error("edit span {start}..{end} is outside the source or overlaps another edit")]
    InvalidSpan { start: usize, end: usize },
    #[error("invalid settings: {0}")]
    InvalidConfig(String),
}

impl SkipReason {
    /// True for skips the user asked for, as opposed to pattern drift.
    pub fn is_expected(&self) -> bool {
        matches!(self, SkipReason::Disabled | SkipReason::UnsupportedVersion { .. })
    }
}

pub type PatchResult = Result<String, SkipReason>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Scalar,
    Structured,
    Conditional,
    Styled,
    Insertion,
    Deletion,
    Bundle,
    Prompt,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Category::Scalar => "scalar",
            Category::Structured => "structured",
            Category::Conditional => "conditional",
            Category::Styled => "styled-output",
            Category::Insertion => "insertion",
            Category::Deletion => "deletion",
            Category::Bundle => "multi-location",
            Category::Prompt => "prompt",
        };
        f.write_str(label)
    }
}

pub struct PatchDef {
    pub id: &'static str,
    pub category: Category,
    pub versions: VersionRange,
    pub apply: fn(&str, &ApplyContext) -> PatchResult,
}

impl fmt::Debug for PatchDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatchDef")
            .field("id", &self.id)
            .field("category", &self.category)
            .field("versions", &self.versions)
            .finish()
    }
}

impl PatchDef {
    /// Runs the writer when the target version falls in its range.
    pub fn run(&self, source: &str, ctx: &ApplyContext, version: Option<Version>) -> PatchResult {
        if !self.versions.contains(version) {
            return Err(SkipReason::UnsupportedVersion {
                version: version.map(|v| v.to_string()).unwrap_or_default(),
            });
        }
        (self.apply)(source, ctx)
    }
}

const V1: Version = Version::new(1, 0, 0);

/// Source-rewriting writers in application order. Prompt reconciliation runs
/// after these as its own stage; see [`PROMPT_STAGE`].
pub static REGISTRY: &[PatchDef] = &[
    PatchDef {
        id: "themes",
        category: Category::Bundle,
        versions: VersionRange::from(V1),
        apply: themes::apply,
    },
    PatchDef {
        id: "thinking-verbs",
        category: Category::Structured,
        versions: VersionRange::from(V1),
        apply: verbs::apply_verbs,
    },
    PatchDef {
        id: "thinking-verb-format",
        category: Category::Structured,
        versions: VersionRange::from(V1),
        apply: verbs::apply_format,
    },
    PatchDef {
        id: "spinner-phases",
        category: Category::Structured,
        versions: VersionRange::from(V1),
        apply: spinner::apply_phases,
    },
    PatchDef {
        id: "spinner-mirror",
        category: Category::Conditional,
        versions: VersionRange::from(V1),
        apply: spinner::apply_mirror,
    },
    PatchDef {
        id: "spinner-interval",
        category: Category::Scalar,
        versions: VersionRange::from(V1),
        apply: spinner::apply_interval,
    },
    PatchDef {
        id: "user-message-display",
        category: Category::Styled,
        versions: VersionRange::from(V1),
        apply: user_message::apply,
    },
    PatchDef {
        id: "input-box-border",
        category: Category::Scalar,
        versions: VersionRange::from(V1),
        apply: input_box::apply,
    },
    PatchDef {
        id: "context-limit",
        category: Category::Insertion,
        versions: VersionRange::from(V1),
        apply: context_limit::apply,
    },
    PatchDef {
        id: "verbose",
        category: Category::Conditional,
        versions: VersionRange::from(V1),
        apply: toggles::apply_verbose,
    },
    PatchDef {
        id: "rate-limit-options",
        category: Category::Conditional,
        versions: VersionRange::from(V1),
        apply: toggles::apply_rate_limit,
    },
    PatchDef {
        id: "startup-banner",
        category: Category::Insertion,
        versions: VersionRange::from(V1),
        apply: toggles::apply_banner,
    },
    PatchDef {
        id: "freeze-prevention",
        category: Category::Deletion,
        versions: VersionRange::between(V1, Version::new(3, 0, 0)),
        apply: toggles::apply_freeze,
    },
    PatchDef {
        id: "toolsets",
        category: Category::Insertion,
        versions: VersionRange::from(V1),
        apply: tools::apply,
    },
    PatchDef {
        id: "subagent-models",
        category: Category::Scalar,
        versions: VersionRange::from(Version::new(1, 0, 60)),
        apply: models::apply_subagents,
    },
    PatchDef {
        id: "custom-models",
        category: Category::Insertion,
        versions: VersionRange::from(V1),
        apply: models::apply_custom,
    },
];

/// Listing entry for the prompt stage, which reports per prompt instead of
/// returning a single result.
pub const PROMPT_STAGE: (&str, Category, VersionRange) =
    ("system-prompts", Category::Prompt, VersionRange::ANY);

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::config::Settings;
    use crate::diff::DiffReporter;
    use crate::orchestrator::ApplyContext;

    pub fn context(settings: Settings) -> ApplyContext {
        ApplyContext::new(settings, Vec::new(), DiffReporter::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn registry_ids_are_unique() {
        let mut seen = HashSet::new();
        for def in REGISTRY {
            assert!(seen.insert(def.id), "duplicate writer id {}", def.id);
        }
        assert!(!seen.contains(PROMPT_STAGE.0));
    }

    #[test]
    fn registry_order_is_fixed() {
        let ids: Vec<&str> = REGISTRY.iter().map(|def| def.id).collect();
        assert_eq!(ids.first(), Some(&"themes"));
        assert_eq!(ids.last(), Some(&"custom-models"));
        let verbs = ids.iter().position(|id| *id == "thinking-verbs");
        let format = ids.iter().position(|id| *id == "thinking-verb-format");
        assert!(verbs < format);
    }

    #[test]
    fn out_of_range_version_is_skipped_without_running() {
        let ctx = fixtures::context(Default::default());
        let freeze = REGISTRY
            .iter()
            .find(|def| def.id == "freeze-prevention")
            .expect("freeze writer");
        let err = freeze
            .run("while(Date.now()<t){}", &ctx, Some(Version::new(3, 1, 0)))
            .unwrap_err();
        assert_eq!(
            err,
            SkipReason::UnsupportedVersion {
                version: "3.1.0".into()
            }
        );
        assert!(err.is_expected());
    }
}
