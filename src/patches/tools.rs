use std::sync::LazyLock;

use regex::Regex;
use serde_json::json;

use crate::location::{Window, compile, find_anchored, malformed};
use crate::orchestrator::ApplyContext;
use crate::transform::{Edit, replace_span};

use super::{PatchResult, SkipReason};

const ANCHOR: &str = ".isEnabled());";
const IS_ENABLED_CALL: &str = ".isEnabled()";

static ENABLED_FILTER: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"\.filter\(\(?([$\w]+)\)?=>([$\w]+)\.isEnabled\(\)\)")
});

/// Narrows the enabled tool list to the default toolset's allow-list.
pub fn apply(source: &str, ctx: &ApplyContext) -> PatchResult {
    let Some(selected) = ctx.settings.default_toolset.as_deref() else {
        return Err(SkipReason::Disabled);
    };
    let toolset = ctx
        .settings
        .toolsets
        .iter()
        .find(|set| set.name == selected)
        .ok_or_else(|| SkipReason::InvalidConfig(format!("unknown toolset {selected:?}")))?;
    if toolset.allowed_tools.allows_everything() {
        return Err(SkipReason::Disabled);
    }

    let found = find_anchored(
        source,
        "enabled tools filter",
        ANCHOR,
        Window::before(300),
        &ENABLED_FILTER,
    )?;
    let param = found
        .group_text(source, 0)
        .ok_or_else(|| malformed("enabled tools filter", "1"))?;
    let receiver = found
        .group(1)
        .ok_or_else(|| malformed("enabled tools filter", "2"))?;
    if &source[receiver.clone()] != param {
        return Err(malformed("enabled tools filter", "2"));
    }

    let allowed = json!(toolset.allowed_tools.names()).to_string();
    let at = receiver.end + IS_ENABLED_CALL.len();
    replace_span(
        source,
        &Edit::insert(at, format!("&&{allowed}.includes({param}.name)")),
        &ctx.reporter,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AllowedTools, Settings, Toolset};
    use crate::patches::fixtures::context;

    const BUNDLE: &str = "function Tl(q){let W=q.filter((I)=>I.isEnabled());return W}";

    fn with_toolsets(default: Option<&str>) -> ApplyContext {
        context(Settings {
            toolsets: vec![
                Toolset {
                    name: "read-only".into(),
                    allowed_tools: AllowedTools::List(vec!["Read".into(), "Grep".into()]),
                },
                Toolset {
                    name: "everything".into(),
                    allowed_tools: AllowedTools::Pattern("*".into()),
                },
            ],
            default_toolset: default.map(String::from),
            ..Settings::default()
        })
    }

    #[test]
    fn filter_gains_allow_list_check() {
        let out = apply(BUNDLE, &with_toolsets(Some("read-only"))).expect("applied");
        assert_eq!(
            out,
            r#"function Tl(q){let W=q.filter((I)=>I.isEnabled()&&["Read","Grep"].includes(I.name));return W}"#
        );
    }

    #[test]
    fn star_toolset_and_no_selection_change_nothing() {
        assert_eq!(
            apply(BUNDLE, &with_toolsets(Some("everything"))).unwrap_err(),
            SkipReason::Disabled
        );
        assert_eq!(apply(BUNDLE, &with_toolsets(None)).unwrap_err(), SkipReason::Disabled);
    }

    #[test]
    fn unknown_toolset_is_a_config_error() {
        assert!(matches!(
            apply(BUNDLE, &with_toolsets(Some("missing"))),
            Err(SkipReason::InvalidConfig(_))
        ));
    }

    #[test]
    fn filter_over_a_different_binding_is_malformed() {
        let source = BUNDLE.replace("(I)=>I.", "(I)=>J.");
        assert!(matches!(
            apply(&source, &with_toolsets(Some("read-only"))),
            Err(SkipReason::MalformedCapture { .. })
        ));
    }
}
