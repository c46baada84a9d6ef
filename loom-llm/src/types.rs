use crate::client::Provider;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Arguments of a tool call as emitted by a provider.
///
/// Providers that send arguments as a JSON string (Shape A) can produce text that does not
/// parse; that case is kept as `Malformed` so the caller can feed the error back to the model
/// instead of failing the whole response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ToolArguments {
    Parsed(Map<String, Value>),
    Malformed { raw: String, error: String },
}

impl ToolArguments {
    pub fn parse(raw: &str) -> Self {
        if raw.trim().is_empty() {
            return Self::Parsed(Map::new());
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(v) => Self::from_value_with_raw(v, raw),
            Err(e) => Self::Malformed {
                raw: raw.to_string(),
                error: e.to_string(),
            },
        }
    }

    pub fn from_value(value: Value) -> Self {
        let raw = value.to_string();
        Self::from_value_with_raw(value, &raw)
    }

    fn from_value_with_raw(value: Value, raw: &str) -> Self {
        match value {
            Value::Object(map) => Self::Parsed(map),
            Value::Null => Self::Parsed(Map::new()),
            other => Self::Malformed {
                raw: raw.to_string(),
                error: format!("arguments must be a JSON object, got {}", json_kind(&other)),
            },
        }
    }

    pub fn as_map(&self) -> Option<&Map<String, Value>> {
        match self {
            Self::Parsed(map) => Some(map),
            Self::Malformed { .. } => None,
        }
    }

    /// JSON string form, as Shape A expects on the wire.
    pub fn to_json_string(&self) -> String {
        match self {
            Self::Parsed(map) => Value::Object(map.clone()).to_string(),
            Self::Malformed { raw, .. } => raw.clone(),
        }
    }

    /// Object form, as Shapes B and C expect on the wire. Malformed arguments become `{}`.
    pub fn to_object(&self) -> Value {
        match self {
            Self::Parsed(map) => Value::Object(map.clone()),
            Self::Malformed { .. } => Value::Object(Map::new()),
        }
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: ToolArguments,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub tool_call_id: Option<String>,
    /// Name of the tool that produced a `Role::Tool` message. Gemini needs it.
    #[serde(default)]
    pub tool_name: Option<String>,
}

impl ChatMessage {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: vec![],
            tool_call_id: None,
            tool_name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::plain(Role::Assistant, content)
        }
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            tool_name: Some(tool_name.into()),
            ..Self::plain(Role::Tool, content)
        }
    }
}

/// Wire-level tool definition sent to providers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema.
    pub parameters: Value,
}

impl ToolDefinition {
    /// Create a `ToolDefinition` after validating the name against all provider constraints.
    pub fn validated(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
    ) -> crate::error::Result<Self> {
        let name = name.into();
        crate::client::validate_tool_name(&name)?;
        Ok(Self {
            name,
            description: description.into(),
            parameters,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl Usage {
    pub fn total(&self) -> u32 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }

    pub fn add(&mut self, other: Usage) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(other.prompt_tokens);
        self.completion_tokens = self.completion_tokens.saturating_add(other.completion_tokens);
    }
}

/// Untouched response body, tagged with the backend that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawResponse {
    pub provider: Provider,
    pub body: Value,
}

impl RawResponse {
    pub fn normalize(&self) -> crate::error::Result<NormalizedResponse> {
        crate::client::normalize(self)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedResponse {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Usage,
}

impl NormalizedResponse {
    pub(crate) fn new(text: String, tool_calls: Vec<ToolCall>, usage: Usage) -> Self {
        Self {
            text: Some(text).filter(|t| !t.trim().is_empty()),
            tool_calls,
            usage,
        }
    }
}
