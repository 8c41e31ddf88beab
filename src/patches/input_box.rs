use std::sync::LazyLock;

use regex::Regex;

use crate::location::{Window, compile, find_anchored, malformed};
use crate::orchestrator::ApplyContext;
use crate::transform::{Edit, replace_span};

use super::{PatchResult, SkipReason};

const ANCHOR: &str = "borderLeft:!1,borderRight:!1,borderBottom:!0";

static BORDER_STYLE: LazyLock<Regex> = LazyLock::new(|| compile(r#"borderStyle:("\w+")"#));

/// Clears the border style of the prompt input box.
pub fn apply(source: &str, ctx: &ApplyContext) -> PatchResult {
    if !ctx.settings.input_box.remove_border {
        return Err(SkipReason::Disabled);
    }
    let found = find_anchored(
        source,
        "input box border",
        ANCHOR,
        Window::before(300),
        &BORDER_STYLE,
    )?;
    let value = found
        .group(0)
        .ok_or_else(|| malformed("input box border", "1"))?;
    replace_span(
        source,
        &Edit::new(value.start, value.end, "undefined"),
        &ctx.reporter,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InputBox, Settings};
    use crate::patches::fixtures::context;

    const BUNDLE: &str = concat!(
        r#"Q.createElement(I,{borderStyle:"single"},x);"#,
        r#"Q.createElement(I,{alignItems:"flex-start",borderColor:z,borderStyle:"round","#,
        r#"borderLeft:!1,borderRight:!1,borderBottom:!0,width:"100%"},y)"#,
    );

    #[test]
    fn removes_only_the_input_box_border() {
        let ctx = context(Settings {
            input_box: InputBox {
                remove_border: true,
            },
            ..Settings::default()
        });
        let out = apply(BUNDLE, &ctx).expect("border removed");
        assert!(out.contains(r#"{borderStyle:"single"}"#));
        assert!(out.contains("borderColor:z,borderStyle:undefined,borderLeft:!1"));
    }

    #[test]
    fn left_alone_unless_enabled() {
        let ctx = context(Settings::default());
        assert_eq!(apply(BUNDLE, &ctx).unwrap_err(), SkipReason::Disabled);
    }
}
