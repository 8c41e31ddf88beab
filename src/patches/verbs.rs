use std::sync::LazyLock;

use regex::Regex;
use serde_json::json;

use crate::location::{
    Found, Location, compile, find_regex, ident_before, malformed, not_found, scan_balanced,
};
use crate::orchestrator::ApplyContext;
use crate::reconcile::{LiteralStyle, encode_for_style, escape_non_ascii, uses_unicode_escapes};
use crate::transform::{Edit, apply_edits, replace_span};

use super::{PatchResult, SkipReason};

const WORDS_ANCHOR: &str = "={words:[";

static VERB_TEMPLATE: LazyLock<Regex> =
    LazyLock::new(|| compile(r"`\$\{([$\w]+)\}(?:…|\\u2026) `"));

/// Replaces the spinner verb object with the configured list and rewrites its
/// getter so it reads the local list instead of the remote-config lookup.
pub fn apply_verbs(source: &str, ctx: &ApplyContext) -> PatchResult {
    let verbs = &ctx.settings.thinking_verbs.verbs;
    if verbs.is_empty() {
        return Err(SkipReason::InvalidConfig("thinking verb list is empty".into()));
    }

    let words = find_words_object(source)?;
    let holder = words.ident(0).ok_or_else(|| malformed("verb object", "1"))?;
    let getter = find_getter(source, holder)?;
    let getter_name = getter.ident(0).ok_or_else(|| malformed("verb getter", "1"))?;

    let edits = vec![
        Edit::replace(&words, json!({ "words": verbs }).to_string()),
        Edit::replace(&getter, format!("function {getter_name}(){{return {holder}.words}}")),
    ];
    apply_edits(source, edits, &ctx.reporter)
}

/// Span of `{words:[...]}`, with the variable it is assigned to as identifier.
fn find_words_object(source: &str) -> Found<Location> {
    let mut from = 0;
    while let Some(rel) = source[from..].find(WORDS_ANCHOR) {
        let eq = from + rel;
        from = eq + WORDS_ANCHOR.len();
        let Some((_, holder)) = ident_before(source, eq) else {
            continue;
        };
        let open = eq + 1;
        let end = scan_balanced(source, open, b'{', b'}').ok_or_else(|| not_found("verb object"))?;
        return Location::new(source, open, end, vec![holder.to_string()])
            .ok_or_else(|| malformed("verb object", "0"));
    }
    Err(not_found("verb object"))
}

fn find_getter(source: &str, holder: &str) -> Found<Location> {
    let pattern = format!(
        r#"function ([$\w]+)\(\)\{{return [$\w]+\("[^"]*",{}\)\.words\}}"#,
        regex::escape(holder)
    );
    let getter = Regex::new(&pattern).map_err(|_| malformed("verb getter", "holder"))?;
    find_regex(source, "verb getter", &getter)
}

/// Rewrites the `${verb}… ` template around the spinner verb.
pub fn apply_format(source: &str, ctx: &ApplyContext) -> PatchResult {
    let format = &ctx.settings.thinking_verbs.format;
    let Some((prefix, suffix)) = format.split_once("{}") else {
        return Err(SkipReason::InvalidConfig(format!(
            "verb format {format:?} has no {{}} placeholder"
        )));
    };

    let site = find_regex(source, "verb format template", &VERB_TEMPLATE)?;
    let verb = site.ident(0).ok_or_else(|| malformed("verb format template", "1"))?;
    let mut template = format!(
        "`{}${{{verb}}}{}`",
        encode_for_style(prefix, LiteralStyle::BacktickTemplate),
        encode_for_style(suffix, LiteralStyle::BacktickTemplate)
    );
    if uses_unicode_escapes(site.text(source)) {
        template = escape_non_ascii(&template);
    }
    replace_span(source, &Edit::replace(&site, template), &ctx.reporter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Settings, ThinkingVerbs};
    use crate::patches::fixtures::context;

    fn with_verbs(verbs: &[&str], format: &str) -> ApplyContext {
        context(Settings {
            thinking_verbs: ThinkingVerbs {
                format: format.into(),
                verbs: verbs.iter().map(|v| v.to_string()).collect(),
            },
            ..Settings::default()
        })
    }

    const BUNDLE: &str = concat!(
        r#"var a=1,kX={words:["Actualizing","Baking"]};"#,
        r#"function f(){return pZ("tengu_spinner_words",kX).words}"#,
        r#"function R(){let V=f();return`${V}… `}"#,
    );

    #[test]
    fn replaces_verb_list_and_getter() {
        let ctx = with_verbs(&["Pondering", "Cogitating"], "{}… ");
        let out = apply_verbs(BUNDLE, &ctx).expect("verbs applied");
        assert!(out.contains(r#"kX={"words":["Pondering","Cogitating"]};"#));
        assert!(out.contains("function f(){return kX.words}"));
        assert!(!out.contains("pZ("));
    }

    #[test]
    fn getter_for_another_holder_does_not_count() {
        let ctx = with_verbs(&["Pondering"], "{}… ");
        let source = BUNDLE.replace("\"tengu_spinner_words\",kX)", "\"tengu_spinner_words\",kY)");
        let err = apply_verbs(&source, &ctx).unwrap_err();
        assert_eq!(
            err,
            SkipReason::PatternNotFound {
                pattern: "verb getter".into()
            }
        );
    }

    #[test]
    fn format_rewrites_template_suffix() {
        let ctx = with_verbs(&["Pondering"], "✻ {} `now`");
        let out = apply_format(BUNDLE, &ctx).expect("format applied");
        assert!(out.ends_with(r"return`✻ ${V} \`now\``}"));
    }

    #[test]
    fn format_keeps_unicode_escaped_builds_escaped() {
        let ctx = with_verbs(&["Pondering"], "{}… ");
        let source = r"return`${V}\u2026 `}";
        let out = apply_format(source, &ctx).expect("format applied");
        assert_eq!(out, r"return`${V}\u2026 `}");
    }

    #[test]
    fn format_without_placeholder_is_rejected() {
        let ctx = with_verbs(&["Pondering"], "thinking…");
        assert!(matches!(
            apply_format(BUNDLE, &ctx),
            Err(SkipReason::InvalidConfig(_))
        ));
    }
}
