use std::sync::LazyLock;

use regex::Regex;

use crate::location::{compile, floor_boundary, not_found};
use crate::orchestrator::ApplyContext;
use crate::transform::{Edit, replace_span};

use super::{PatchResult, SkipReason};

const ANCHOR: &str = "return 200000}";
const LOOKBACK: usize = 400;

static FUNCTION_HEADER: LazyLock<Regex> =
    LazyLock::new(|| compile(r"function [$\w]+\([$\w]*\)\{"));
static ENV_NAME: LazyLock<Regex> = LazyLock::new(|| compile(r"^[A-Za-z_][A-Za-z0-9_]*$"));

/// Lets an environment variable override the default context window size,
/// keeping the original return as the fallback.
pub fn apply(source: &str, ctx: &ApplyContext) -> PatchResult {
    let misc = &ctx.settings.misc;
    if !misc.context_limit_override {
        return Err(SkipReason::Disabled);
    }
    let env = misc.context_limit_env.as_str();
    if !ENV_NAME.is_match(env) {
        return Err(SkipReason::InvalidConfig(format!(
            "{env:?} is not a valid environment variable name"
        )));
    }

    let at = find_body_start(source).ok_or_else(|| not_found("context limit function"))?;
    let guard = format!("if(process.env.{env})return Number(process.env.{env});");
    replace_span(source, &Edit::insert(at, guard), &ctx.reporter)
}

/// Offset just inside `{` of a small function whose body is exactly the
/// default return, with no nested block between the two.
fn find_body_start(source: &str) -> Option<usize> {
    let mut from = 0;
    while let Some(rel) = source[from..].find(ANCHOR) {
        let anchor = from + rel;
        from = anchor + ANCHOR.len();
        let lo = floor_boundary(source, anchor.saturating_sub(LOOKBACK));
        let Some(header) = FUNCTION_HEADER.find_iter(&source[lo..anchor]).last() else {
            continue;
        };
        let body_start = lo + header.end();
        if source[body_start..anchor].contains(['{', '}']) {
            continue;
        }
        return Some(body_start);
    }
    None
}
