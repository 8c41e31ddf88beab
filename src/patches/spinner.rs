use std::sync::LazyLock;

use regex::Regex;

use crate::location::{
    Location, Window, compile, find_anchored, find_regex_where, malformed, not_found,
    scan_balanced,
};
use crate::orchestrator::ApplyContext;
use crate::reconcile::{escape_non_ascii, uses_unicode_escapes};
use crate::transform::{Edit, replace_span};

use super::{PatchResult, SkipReason};

const PHASES_ANCHOR: &str = r#"return["·","✢""#;
const INTERVAL_ANCHOR: &str = "clearInterval(";

static FUNCTION_HEADER: LazyLock<Regex> = LazyLock::new(|| compile(r"function ([$\w]+)\(\)\{"));
static MIRROR: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"\[\.\.\.([$\w]+),\.\.\.\[\.\.\.([$\w]+)\]\.reverse\(\)\]")
});
static INTERVAL: LazyLock<Regex> = LazyLock::new(|| compile(r"\},(\d+)\)"));

/// Replaces the body of the function returning the spinner characters.
pub fn apply_phases(source: &str, ctx: &ApplyContext) -> PatchResult {
    let phases = &ctx.settings.thinking_style.phases;
    if phases.is_empty() {
        return Err(SkipReason::InvalidConfig("spinner phase list is empty".into()));
    }

    let header = find_anchored(
        source,
        "spinner phases",
        PHASES_ANCHOR,
        Window::before(300),
        &FUNCTION_HEADER,
    )?;
    let name = header
        .group_text(source, 0)
        .ok_or_else(|| malformed("spinner phases", "1"))?;
    let open = header.span.end - 1;
    let end = scan_balanced(source, open, b'{', b'}')
        .filter(|end| *end >= header.anchor.end)
        .ok_or_else(|| not_found("spinner phases body"))?;
    let site = Location::new(source, header.span.start, end, vec![name.to_string()])
        .ok_or_else(|| malformed("spinner phases", "0"))?;

    let list = serde_json::to_string(phases)
        .map_err(|err| SkipReason::InvalidConfig(err.to_string()))?;
    let list = if uses_unicode_escapes(site.text(source)) {
        escape_non_ascii(&list)
    } else {
        list
    };
    replace_span(
        source,
        &Edit::replace(&site, format!("function {name}(){{return{list}}}")),
        &ctx.reporter,
    )
}

/// Drops the reversed copy appended to the phase list, so the spinner runs
/// forwards only.
pub fn apply_mirror(source: &str, ctx: &ApplyContext) -> PatchResult {
    if ctx.settings.thinking_style.reverse_mirror {
        return Err(SkipReason::Disabled);
    }
    let site = find_regex_where(source, "spinner mirror", &MIRROR, |caps| caps[1] == caps[2])?;
    let frames = site.ident(0).ok_or_else(|| malformed("spinner mirror", "1"))?;
    replace_span(
        source,
        &Edit::replace(&site, format!("[...{frames}]")),
        &ctx.reporter,
    )
}

pub fn apply_interval(source: &str, ctx: &ApplyContext) -> PatchResult {
    let interval = ctx.settings.thinking_style.update_interval;
    if interval == 0 {
        return Err(SkipReason::InvalidConfig("spinner interval must be positive".into()));
    }
    let found = find_anchored(
        source,
        "spinner interval",
        INTERVAL_ANCHOR,
        Window::before(300),
        &INTERVAL,
    )?;
    let digits = found
        .group(0)
        .ok_or_else(|| malformed("spinner interval", "1"))?;
    replace_span(
        source,
        &Edit::new(digits.start, digits.end, interval.to_string()),
        &ctx.reporter,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Settings, ThinkingStyle};
    use crate::patches::fixtures::context;

    const BUNDLE: &str = concat!(
        r#"function sP(){if(x)return["*"];return["·","✢","✳","✶","✻","✽"]}"#,
        r#"function Sp(){let K=sP(),V=[...K,...[...K].reverse()];"#,
        r#"H.useEffect(()=>{let q=setInterval(()=>{z((w)=>(w+1)%V.length)},120);return()=>clearInterval(q)},[V])}"#,
    );

    fn style(phases: &[&str], interval: u64, mirror: bool) -> ApplyContext {
        context(Settings {
            thinking_style: ThinkingStyle {
                phases: phases.iter().map(|p| p.to_string()).collect(),
                update_interval: interval,
                reverse_mirror: mirror,
            },
            ..Settings::default()
        })
    }

    #[test]
    fn phases_replace_whole_function() {
        let ctx = style(&["◐", "◓", "◑", "◒"], 120, true);
        let out = apply_phases(BUNDLE, &ctx).expect("phases applied");
        assert!(out.starts_with(r#"function sP(){return["◐","◓","◑","◒"]}function Sp()"#));
    }

    #[test]
    fn phases_are_unicode_escaped_when_target_is() {
        let ctx = style(&["◐"], 120, true);
        let source = r#"function tP(){return["·","✢","\u2722"]}"#;
        let out = apply_phases(source, &ctx).expect("phases applied");
        assert_eq!(out, r#"function tP(){return["\u25d0"]}"#);
    }

    #[test]
    fn mirror_is_removed_only_when_disabled_in_settings() {
        let keep = style(&["·"], 120, true);
        assert_eq!(apply_mirror(BUNDLE, &keep).unwrap_err(), SkipReason::Disabled);

        let drop = style(&["·"], 120, false);
        let out = apply_mirror(BUNDLE, &drop).expect("mirror removed");
        assert!(out.contains("V=[...K];"));
    }

    #[test]
    fn mirror_requires_same_list_on_both_sides() {
        let ctx = style(&["·"], 120, false);
        let source = BUNDLE.replace("[...K].reverse()", "[...J].reverse()");
        assert!(apply_mirror(&source, &ctx).is_err());
    }

    #[test]
    fn interval_replaces_only_the_number() {
        let ctx = style(&["·"], 80, true);
        let out = apply_interval(BUNDLE, &ctx).expect("interval applied");
        assert!(out.contains("%V.length)},80);return()=>clearInterval(q)"));
    }

    #[test]
    fn interval_survives_mirror_removal() {
        let ctx = style(&["·"], 250, false);
        let out = apply_mirror(BUNDLE, &ctx).expect("mirror removed");
        let out = apply_interval(&out, &ctx).expect("interval applied");
        assert!(out.contains("},250);"));
    }
}
