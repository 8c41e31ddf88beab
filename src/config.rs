use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// User settings consumed by the patch writers. Every group falls back to
/// built-in defaults, and unknown fields are ignored.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Settings {
    pub themes: Vec<Theme>,
    pub thinking_verbs: ThinkingVerbs,
    pub thinking_style: ThinkingStyle,
    pub user_message_display: UserMessageDisplay,
    pub input_box: InputBox,
    pub toolsets: Vec<Toolset>,
    pub default_toolset: Option<String>,
    pub subagent_models: SubagentModels,
    pub custom_models: Vec<CustomModel>,
    pub misc: Misc,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Theme {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub colors: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ThinkingVerbs {
    /// Suffix template around the verb; `{}` marks the verb.
    pub format: String,
    pub verbs: Vec<String>,
}

impl Default for ThinkingVerbs {
    fn default() -> Self {
        Self {
            format: "{}… ".into(),
            verbs: [
                "Accomplishing",
                "Brewing",
                "Cogitating",
                "Computing",
                "Deliberating",
                "Musing",
                "Pondering",
                "Processing",
                "Ruminating",
                "Thinking",
                "Working",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ThinkingStyle {
    pub phases: Vec<String>,
    /// Spinner frame interval in milliseconds.
    pub update_interval: u64,
    pub reverse_mirror: bool,
}

impl Default for ThinkingStyle {
    fn default() -> Self {
        Self {
            phases: ["·", "✢", "✳", "✶", "✻", "✽"]
                .into_iter()
                .map(String::from)
                .collect(),
            update_interval: 120,
            reverse_mirror: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TextStyle {
    Bold,
    Italic,
    Underline,
    Strikethrough,
    Inverse,
}

impl TextStyle {
    /// Fixed emission order for style attributes.
    pub const ORDER: [TextStyle; 5] = [
        TextStyle::Bold,
        TextStyle::Italic,
        TextStyle::Underline,
        TextStyle::Strikethrough,
        TextStyle::Inverse,
    ];

    pub fn prop(self) -> &'static str {
        match self {
            TextStyle::Bold => "bold",
            TextStyle::Italic => "italic",
            TextStyle::Underline => "underline",
            TextStyle::Strikethrough => "strikethrough",
            TextStyle::Inverse => "inverse",
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum BorderStyle {
    #[default]
    None,
    Single,
    Double,
    Round,
    Bold,
    SingleDouble,
    DoubleSingle,
    Classic,
}

impl BorderStyle {
    pub fn ink_name(self) -> Option<&'static str> {
        match self {
            BorderStyle::None => None,
            BorderStyle::Single => Some("single"),
            BorderStyle::Double => Some("double"),
            BorderStyle::Round => Some("round"),
            BorderStyle::Bold => Some("bold"),
            BorderStyle::SingleDouble => Some("singleDouble"),
            BorderStyle::DoubleSingle => Some("doubleSingle"),
            BorderStyle::Classic => Some("classic"),
        }
    }
}

/// Color value meaning "keep what the target already uses".
pub const DEFAULT_COLOR: &str = "default";

pub fn is_default_color(value: &str) -> bool {
    value == DEFAULT_COLOR
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UserMessageDisplay {
    /// Display template; `{}` marks the message text.
    pub format: String,
    pub foreground_color: String,
    /// `null` removes the background entirely.
    pub background_color: Option<String>,
    pub styling: Vec<TextStyle>,
    pub border_style: BorderStyle,
    pub border_color: Option<String>,
    pub padding_x: u32,
    pub padding_y: u32,
    pub fit_box_to_content: bool,
}

impl Default for UserMessageDisplay {
    fn default() -> Self {
        Self {
            format: "> {}".into(),
            foreground_color: DEFAULT_COLOR.into(),
            background_color: Some(DEFAULT_COLOR.into()),
            styling: Vec::new(),
            border_style: BorderStyle::None,
            border_color: None,
            padding_x: 0,
            padding_y: 0,
            fit_box_to_content: false,
        }
    }
}

impl UserMessageDisplay {
    pub fn needs_box(&self) -> bool {
        self.border_style != BorderStyle::None
            || self.padding_x > 0
            || self.padding_y > 0
            || self.fit_box_to_content
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct InputBox {
    pub remove_border: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum AllowedTools {
    List(Vec<String>),
    /// Only `"*"` is meaningful here: every tool stays available.
    Pattern(String),
}

impl AllowedTools {
    pub fn allows_everything(&self) -> bool {
        matches!(self, AllowedTools::Pattern(pattern) if pattern == "*")
    }

    pub fn names(&self) -> Vec<&str> {
        match self {
            AllowedTools::List(names) => names.iter().map(String::as_str).collect(),
            AllowedTools::Pattern(name) if name == "*" => Vec::new(),
            AllowedTools::Pattern(name) => vec![name.as_str()],
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Toolset {
    pub name: String,
    pub allowed_tools: AllowedTools,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct SubagentModels {
    pub plan: Option<String>,
    pub explore: Option<String>,
    pub general_purpose: Option<String>,
}

impl SubagentModels {
    /// `(agentType label in the target, configured model)` pairs.
    pub fn overrides(&self) -> Vec<(&'static str, &str)> {
        [
            ("Plan", self.plan.as_deref()),
            ("Explore", self.explore.as_deref()),
            ("general-purpose", self.general_purpose.as_deref()),
        ]
        .into_iter()
        .filter_map(|(agent, model)| model.map(|model| (agent, model)))
        .collect()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct CustomModel {
    pub value: String,
    pub label: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Misc {
    pub context_limit_override: bool,
    pub context_limit_env: String,
    pub force_verbose: bool,
    pub suppress_rate_limit_options: bool,
    pub hide_startup_banner: bool,
    pub prevent_freeze: bool,
}

impl Default for Misc {
    fn default() -> Self {
        Self {
            context_limit_override: true,
            context_limit_env: "CLAUDE_CODE_CONTEXT_LIMIT".into(),
            force_verbose: false,
            suppress_rate_limit_options: false,
            hide_startup_banner: false,
            prevent_freeze: false,
        }
    }
}

pub fn load_settings(path: &Path) -> Result<Settings> {
    let data = fs::read(path).with_context(|| format!("reading settings {}", path.display()))?;
    let settings = if path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
    {
        serde_json::from_slice(&data)
            .with_context(|| format!("parsing settings {}", path.display()))?
    } else {
        serde_yaml::from_slice(&data)
            .with_context(|| format!("parsing settings {}", path.display()))?
    };
    Ok(settings)
}
