//! `tools/call` reply normalization.

use serde::Deserialize;
use serde_json::Value;

/// One entry of a tool result's `content`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl ContentPart {
    fn render(&self) -> String {
        match &self.text {
            Some(text) => text.clone(),
            None => self.to_value().to_string(),
        }
    }

    fn to_value(&self) -> Value {
        let mut map = self.extra.clone();
        if let Some(kind) = &self.kind {
            map.insert("type".to_string(), Value::from(kind.as_str()));
        }
        Value::Object(map)
    }
}

/// Shapes a worker may reply with.
///
/// Variants are tried in order, so a `content` array wins over a single
/// `content` object and anything unrecognized lands in `Opaque`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ToolCallResult {
    Parts {
        content: Vec<ContentPart>,
        #[serde(rename = "isError", default)]
        is_error: bool,
    },
    Single {
        content: ContentPart,
        #[serde(rename = "isError", default)]
        is_error: bool,
    },
    Text(String),
    Opaque(Value),
}

impl ToolCallResult {
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        // Untagged deserialization falls through to `Opaque`, so this cannot fail.
        serde_json::from_value(value.clone()).unwrap_or(Self::Opaque(value))
    }

    /// Whether the worker flagged the call as failed.
    #[must_use]
    pub fn is_error(&self) -> bool {
        match self {
            Self::Parts { is_error, .. } | Self::Single { is_error, .. } => *is_error,
            Self::Text(_) | Self::Opaque(_) => false,
        }
    }

    /// Collapse the reply into a single string.
    #[must_use]
    pub fn into_text(self) -> String {
        match self {
            Self::Parts { content, .. } => content
                .iter()
                .map(ContentPart::render)
                .collect::<Vec<_>>()
                .join("\n"),
            Self::Single { content, .. } => content.render(),
            Self::Text(text) => text,
            Self::Opaque(value) => value.to_string(),
        }
    }
}
