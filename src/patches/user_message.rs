use std::sync::LazyLock;

use regex::Regex;
use serde_json::json;

use crate::config::{TextStyle, UserMessageDisplay, is_default_color};
use crate::location::{Window, compile, find_anchored, malformed};
use crate::orchestrator::ApplyContext;
use crate::reconcile::{escape_non_ascii, uses_unicode_escapes};
use crate::transform::{Edit, replace_span};

use super::{PatchResult, SkipReason};

const ANCHOR: &str = r#""userMessageBackground""#;

static MESSAGE_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    compile(r#"([$\w]+)\.createElement\(([$\w]+),\{([^{}]*)\},"> ",([$\w.]+)\)"#)
});
static ROW_BOX: LazyLock<Regex> =
    LazyLock::new(|| compile(r#"\.createElement\(([$\w]+),\{flexDirection:"row""#));

/// Rebuilds the element that renders the user's own chat message: text color,
/// background, text styles, the surrounding format and an optional bordered box.
pub fn apply(source: &str, ctx: &ApplyContext) -> PatchResult {
    let display = &ctx.settings.user_message_display;
    let Some((prefix, suffix)) = display.format.split_once("{}") else {
        return Err(SkipReason::InvalidConfig(format!(
            "message format {:?} has no {{}} placeholder",
            display.format
        )));
    };

    let found = find_anchored(
        source,
        "user message text",
        ANCHOR,
        Window::around(200, 200),
        &MESSAGE_TEXT,
    )?;
    let group = |idx: usize, name: &str| {
        found
            .group_text(source, idx)
            .filter(|text| !text.is_empty() || idx == 2)
            .ok_or_else(|| malformed("user message text", name))
    };
    let react = group(0, "1")?;
    let text_component = group(1, "2")?;
    let original_props = group(2, "3")?;
    let message = group(3, "4")?;

    let props = text_props(display, original_props);
    let mut children = Vec::new();
    if !prefix.is_empty() {
        children.push(json!(prefix).to_string());
    }
    children.push(message.to_string());
    if !suffix.is_empty() {
        children.push(json!(suffix).to_string());
    }
    let mut element = format!(
        "{react}.createElement({text_component},{{{}}},{})",
        props.join(","),
        children.join(",")
    );

    if display.needs_box() {
        let row = find_anchored(source, "user message box", ANCHOR, Window::before(600), &ROW_BOX)?;
        let box_component = row
            .group_text(source, 0)
            .ok_or_else(|| malformed("user message box", "1"))?;
        element = format!(
            "{react}.createElement({box_component},{{{}}},{element})",
            box_props(display).join(",")
        );
    }

    if uses_unicode_escapes(&source[found.span.clone()]) {
        element = escape_non_ascii(&element);
    }
    replace_span(
        source,
        &Edit::new(found.span.start, found.span.end, element),
        &ctx.reporter,
    )
}

/// Props in fixed order: color, backgroundColor, then text styles.
fn text_props(display: &UserMessageDisplay, original: &str) -> Vec<String> {
    let mut props = Vec::new();
    if is_default_color(&display.foreground_color) {
        if let Some(value) = original_prop(original, "color") {
            props.push(format!("color:{value}"));
        }
    } else {
        props.push(format!("color:{}", json!(display.foreground_color)));
    }
    match display.background_color.as_deref() {
        None => {}
        Some(color) if is_default_color(color) => {
            if let Some(value) = original_prop(original, "backgroundColor") {
                props.push(format!("backgroundColor:{value}"));
            }
        }
        Some(color) => props.push(format!("backgroundColor:{}", json!(color))),
    }
    for style in TextStyle::ORDER {
        if display.styling.contains(&style) {
            props.push(format!("{}:!0", style.prop()));
        }
    }
    props
}

fn box_props(display: &UserMessageDisplay) -> Vec<String> {
    let mut props = Vec::new();
    if let Some(style) = display.border_style.ink_name() {
        props.push(format!("borderStyle:{}", json!(style)));
        if let Some(color) = display.border_color.as_deref() {
            props.push(format!("borderColor:{}", json!(color)));
        }
    }
    if display.padding_x > 0 {
        props.push(format!("paddingX:{}", display.padding_x));
    }
    if display.padding_y > 0 {
        props.push(format!("paddingY:{}", display.padding_y));
    }
    if display.fit_box_to_content {
        props.push(r#"alignSelf:"flex-start""#.to_string());
    }
    props
}

fn original_prop<'a>(props: &'a str, key: &str) -> Option<&'a str> {
    props
        .split(',')
        .filter_map(|pair| pair.split_once(':'))
        .find(|(name, _)| name.trim() == key)
        .map(|(_, value)| value.trim())
}
