use std::sync::LazyLock;

use regex::Regex;
use serde_json::json;
use tracing::debug;

use crate::location::{
    Window, compile, enclosing_open, find_anchored, malformed, nesting_depth, not_found,
    scan_balanced,
};
use crate::orchestrator::ApplyContext;
use crate::transform::{Edit, apply_edits, replace_span};

use super::{PatchResult, SkipReason};

const AGENT_LOOKBACK: usize = 200;
const MODEL_LIST_ANCHOR: &str = r#"{value:"default",label:"Default (recommended)""#;

static MODEL_FIELD: LazyLock<Regex> = LazyLock::new(|| compile(r#"\bmodel:("[^"]*")"#));
static LIST_ASSIGNMENT: LazyLock<Regex> = LazyLock::new(|| compile(r"([$\w]+)=\["));

/// Pins the model used by each built-in subagent. An existing `model:` field
/// is replaced; otherwise one is inserted after the agent type.
pub fn apply_subagents(source: &str, ctx: &ApplyContext) -> PatchResult {
    let overrides = ctx.settings.subagent_models.overrides();
    if overrides.is_empty() {
        return Err(SkipReason::Disabled);
    }

    let mut edits = Vec::new();
    for (agent, model) in overrides {
        match agent_model_edit(source, agent, model) {
            Some(edit) => edits.push(edit),
            None => debug!(agent, "subagent definition not found"),
        }
    }
    if edits.is_empty() {
        return Err(not_found("subagent definitions"));
    }
    apply_edits(source, edits, &ctx.reporter)
}

/// Edit for one agent's object literal. Only a `model:` key of that object
/// counts; nested objects and the code after it are left alone.
fn agent_model_edit(source: &str, agent: &str, model: &str) -> Option<Edit> {
    let anchor = format!("agentType:{}", json!(agent));
    let anchor_at = source.find(&anchor)?;
    let open = enclosing_open(source, anchor_at, b'{', b'}', AGENT_LOOKBACK)?;
    let end = scan_balanced(source, open, b'{', b'}').filter(|end| *end > anchor_at)?;
    let body_start = open + 1;
    let literal = json!(model).to_string();

    for caps in MODEL_FIELD.captures_iter(&source[body_start..end - 1]) {
        let (Some(whole), Some(value)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if nesting_depth(source, body_start, body_start + whole.start()) == Some(0) {
            return Some(Edit::new(
                body_start + value.start(),
                body_start + value.end(),
                literal,
            ));
        }
    }
    let after_anchor = anchor_at + anchor.len();
    source[after_anchor..]
        .starts_with(',')
        .then(|| Edit::insert(after_anchor + 1, format!("model:{literal},")))
}

/// Appends the configured models to the model picker list.
pub fn apply_custom(source: &str, ctx: &ApplyContext) -> PatchResult {
    let models = &ctx.settings.custom_models;
    if models.is_empty() {
        return Err(SkipReason::Disabled);
    }

    let found = find_anchored(
        source,
        "model options list",
        MODEL_LIST_ANCHOR,
        Window::before(200),
        &LIST_ASSIGNMENT,
    )?;
    let list = found
        .group_text(source, 0)
        .ok_or_else(|| malformed("model options list", "1"))?;
    let open = found.span.end - 1;
    let end = scan_balanced(source, open, b'[', b']')
        .ok_or_else(|| not_found("model options list"))?;
    if source.as_bytes().get(end) != Some(&b';') {
        return Err(not_found("model options statement end"));
    }

    let pushes: String = models
        .iter()
        .map(|model| {
            let entry = json!({
                "value": model.value,
                "label": model.label,
                "description": model.description,
            });
            format!("{list}.push({entry});")
        })
        .collect();
    replace_span(source, &Edit::insert(end + 1, pushes), &ctx.reporter)
}
