//! Feature toggles: small conditional, insertion and deletion patches that
//! each flip one behavior of the target.

use std::sync::LazyLock;

use regex::Regex;

use crate::location::{
    Window, compile, find_anchored, find_regex, malformed, not_found, scan_expression_end,
};
use crate::orchestrator::ApplyContext;
use crate::transform::{Edit, replace_span};

use super::{PatchResult, SkipReason};

const VERBOSE_PREFIX: &str = "verbose:";
const RATE_LIMIT_ANCHOR: &str = r#"name:"rate-limit-options""#;
const BANNER_ANCHOR: &str = "Welcome to ";

static VERBOSE: LazyLock<Regex> =
    LazyLock::new(|| compile(r"verbose:([$\w]+\(\)\.verbose)\b"));
static IS_ENABLED: LazyLock<Regex> = LazyLock::new(|| compile(r"\bisEnabled:"));
static BANNER_FUNCTION: LazyLock<Regex> =
    LazyLock::new(|| compile(r"function ([$\w]+)\([$\w,]*\)\{"));
static BUSY_WAIT: LazyLock<Regex> =
    LazyLock::new(|| compile(r"while\(Date\.now\(\)<([$\w]+)\)\{\}"));

/// Forces verbose output by replacing the settings lookup with `true`.
pub fn apply_verbose(source: &str, ctx: &ApplyContext) -> PatchResult {
    if !ctx.settings.misc.force_verbose {
        return Err(SkipReason::Disabled);
    }
    let site = find_regex(source, "verbose setting", &VERBOSE)?;
    let start = site.start + VERBOSE_PREFIX.len();
    replace_span(source, &Edit::new(start, site.end, "!0"), &ctx.reporter)
}

/// Turns the rate-limit options command's `isEnabled` into a constant false.
pub fn apply_rate_limit(source: &str, ctx: &ApplyContext) -> PatchResult {
    if !ctx.settings.misc.suppress_rate_limit_options {
        return Err(SkipReason::Disabled);
    }
    let found = find_anchored(
        source,
        "rate limit command",
        RATE_LIMIT_ANCHOR,
        Window::around(300, 300),
        &IS_ENABLED,
    )?;
    let start = found.span.end;
    let end = scan_expression_end(source, start)
        .filter(|end| *end > start)
        .ok_or_else(|| malformed("rate limit command", "isEnabled"))?;
    replace_span(source, &Edit::new(start, end, "()=>!1"), &ctx.reporter)
}

/// Makes the startup banner component render nothing.
pub fn apply_banner(source: &str, ctx: &ApplyContext) -> PatchResult {
    if !ctx.settings.misc.hide_startup_banner {
        return Err(SkipReason::Disabled);
    }
    let found = find_anchored(
        source,
        "startup banner",
        BANNER_ANCHOR,
        Window::before(2_000),
        &BANNER_FUNCTION,
    )?;
    if found.span.end > found.anchor.start {
        return Err(not_found("startup banner"));
    }
    replace_span(source, &Edit::insert(found.span.end, "return null;"), &ctx.reporter)
}

/// Deletes the synchronous busy-wait loop that can stall the terminal.
pub fn apply_freeze(source: &str, ctx: &ApplyContext) -> PatchResult {
    if !ctx.settings.misc.prevent_freeze {
        return Err(SkipReason::Disabled);
    }
    let site = find_regex(source, "busy wait", &BUSY_WAIT)?;
    replace_span(source, &Edit::delete(&site), &ctx.reporter)
}
