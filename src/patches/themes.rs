use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::json;

use crate::config::Theme;
use crate::location::{
    Found, Location, compile, enclosing_open, find_regex, malformed, not_found, scan_balanced,
};
use crate::orchestrator::ApplyContext;
use crate::transform::{Edit, apply_edits};

use super::{PatchResult, SkipReason};

static THEME_SWITCH: LazyLock<Regex> =
    LazyLock::new(|| compile(r#"switch\(([$\w]+)\)\{case"light":return "#));

const OPTIONS_ANCHOR: &str = r#"{label:"Dark mode",value:"dark"}"#;
const NAME_MAP_ENTRY: &str = r#"dark:"Dark mode""#;
const OPTIONS_LOOKBACK: usize = 2_000;
const NAME_MAP_LOOKBACK: usize = 500;

/// Rewrites the theme lookup switch, the picker options and the id-to-name
/// map together. All three must be found or nothing changes.
pub fn apply(source: &str, ctx: &ApplyContext) -> PatchResult {
    let themes = &ctx.settings.themes;
    if themes.is_empty() {
        return Err(SkipReason::Disabled);
    }

    let switch = find_switch(source)?;
    let options = find_options(source)?;
    let names = find_name_map(source)?;

    let selector = switch.ident(0).ok_or_else(|| malformed("theme switch", "1"))?;
    let edits = vec![
        Edit::replace(&switch, render_switch(selector, themes)),
        Edit::replace(&options, render_options(themes)),
        Edit::replace(&names, render_name_map(themes)),
    ];
    apply_edits(source, edits, &ctx.reporter)
}

fn find_switch(source: &str) -> Found<Location> {
    let head = find_regex(source, "theme switch", &THEME_SWITCH)?;
    let open = source[head.start..head.end]
        .find('{')
        .map(|rel| head.start + rel)
        .ok_or_else(|| malformed("theme switch", "0"))?;
    let end = scan_balanced(source, open, b'{', b'}')
        .ok_or_else(|| not_found("theme switch body"))?;
    Location::new(source, head.start, end, head.identifiers)
        .ok_or_else(|| malformed("theme switch", "0"))
}

fn find_options(source: &str) -> Found<Location> {
    let anchor = source
        .find(OPTIONS_ANCHOR)
        .ok_or_else(|| not_found("theme options"))?;
    let floor = anchor.saturating_sub(OPTIONS_LOOKBACK);
    let open = source.as_bytes()[floor..anchor]
        .iter()
        .rposition(|byte| *byte == b'[')
        .map(|rel| floor + rel)
        .ok_or_else(|| not_found("theme options array"))?;
    let end = scan_balanced(source, open, b'[', b']')
        .filter(|end| *end > anchor)
        .ok_or_else(|| not_found("theme options array"))?;
    Location::new(source, open, end, Vec::new()).ok_or_else(|| malformed("theme options", "0"))
}

/// The object literal holding a `dark:"Dark mode"` key, wherever that key
/// sits among the others.
fn find_name_map(source: &str) -> Found<Location> {
    let bytes = source.as_bytes();
    let mut from = 0;
    while let Some(rel) = source[from..].find(NAME_MAP_ENTRY) {
        let entry = from + rel;
        from = entry + NAME_MAP_ENTRY.len();
        if !matches!(entry.checked_sub(1).map(|idx| bytes[idx]), Some(b'{' | b',')) {
            continue;
        }
        let Some(open) = enclosing_open(source, entry, b'{', b'}', NAME_MAP_LOOKBACK) else {
            continue;
        };
        let Some(end) = scan_balanced(source, open, b'{', b'}').filter(|end| *end >= from) else {
            continue;
        };
        return Location::new(source, open, end, Vec::new())
            .ok_or_else(|| malformed("theme name map", "0"));
    }
    Err(not_found("theme name map"))
}

fn render_switch(selector: &str, themes: &[Theme]) -> String {
    let mut out = format!("switch({selector}){{");
    for theme in themes {
        out.push_str(&format!(
            "case{}:return {};",
            json!(theme.id),
            json!(theme.colors)
        ));
    }
    if let Some(first) = themes.first() {
        out.push_str(&format!("default:return {}", json!(first.colors)));
    }
    out.push('}');
    out
}

fn render_options(themes: &[Theme]) -> String {
    let options: Vec<_> = themes
        .iter()
        .map(|theme| json!({ "label": theme.name, "value": theme.id }))
        .collect();
    serde_json::Value::Array(options).to_string()
}

fn render_name_map(themes: &[Theme]) -> String {
    let names: BTreeMap<&str, &str> = themes
        .iter()
        .map(|theme| (theme.id.as_str(), theme.name.as_str()))
        .collect();
    json!(names).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::patches::fixtures::context;

    const BUNDLE: &str = concat!(
        r#"function Tq(A){switch(A){case"light":return PL;case"dark":return PD;default:return PD}}"#,
        r#"var Hk=[{label:"Light mode",value:"light"},{label:"Dark mode",value:"dark"}];"#,
        r#"var Nm={light:"Light mode",dark:"Dark mode",ansi:"ANSI"};"#,
    );

    fn themes() -> Vec<Theme> {
        vec![
            Theme {
                id: "night".into(),
                name: "Night \"owl\"".into(),
                colors: BTreeMap::from([("text".into(), "#fff".into())]),
            },
            Theme {
                id: "day".into(),
                name: "Day".into(),
                colors: BTreeMap::from([("text".into(), "#000".into())]),
            },
        ]
    }

    #[test]
    fn rewrites_all_three_locations() {
        let ctx = context(Settings {
            themes: themes(),
            ..Settings::default()
        });
        let out = apply(BUNDLE, &ctx).expect("themes applied");
        assert!(out.contains(
            r##"function Tq(A){switch(A){case"night":return {"text":"#fff"};case"day":return {"text":"#000"};default:return {"text":"#fff"}}}"##
        ));
        assert!(out.contains(
            r#"var Hk=[{"label":"Night \"owl\"","value":"night"},{"label":"Day","value":"day"}];"#
        ));
        assert!(out.contains(r#"var Nm={"day":"Day","night":"Night \"owl\""};"#));
    }

    #[test]
    fn name_map_is_found_by_key_not_position() {
        let ctx = context(Settings {
            themes: themes(),
            ..Settings::default()
        });
        let dark_first = BUNDLE.replace(
            r#"{light:"Light mode",dark:"Dark mode",ansi:"ANSI"}"#,
            r#"{dark:"Dark mode",light:"Light mode"}"#,
        );
        for source in [BUNDLE.to_string(), dark_first] {
            let out = apply(&source, &ctx).expect("themes applied");
            assert!(out.ends_with(r#"var Nm={"day":"Day","night":"Night \"owl\""};"#));
        }
    }

    #[test]
    fn missing_name_map_leaves_source_alone() {
        let ctx = context(Settings {
            themes: themes(),
            ..Settings::default()
        });
        assert!(apply(BUNDLE, &ctx).is_ok());

        let without_map = BUNDLE.replace(
            r#"var Nm={light:"Light mode",dark:"Dark mode",ansi:"ANSI"};"#,
            "",
        );
        let err = apply(&without_map, &ctx).unwrap_err();
        assert_eq!(
            err,
            SkipReason::PatternNotFound {
                pattern: "theme name map".into()
            }
        );

        let renamed = BUNDLE.replace(r#"dark:"Dark mode","#, r#"dark:"Dark","#);
        assert!(apply(&renamed, &ctx).is_err());
    }

    #[test]
    fn no_configured_themes_is_disabled() {
        let ctx = context(Settings::default());
        assert_eq!(apply(BUNDLE, &ctx).unwrap_err(), SkipReason::Disabled);
    }
}
