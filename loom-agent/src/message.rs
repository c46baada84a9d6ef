use chrono::{DateTime, Utc};
use loom_llm::{ChatMessage, Role, ToolArguments};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Pending,
    Approved,
    Rejected,
    Executing,
    Completed,
    Failed,
}

/// Why a tool call produced `success: false`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolFailure {
    ParseError,
    UnknownTool,
    MissingExecutor,
    ExecutionFailed,
    Rejected,
}

/// Outcome of one tool call, serialized verbatim into the `tool` message the model sees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<ToolFailure>,
}

pub(crate) const REJECTED_BY_USER: &str = "rejected by user";

impl ToolCallResult {
    pub fn ok(output: Value) -> Self {
        Self {
            success: true,
            output: Some(output),
            error: None,
            failure: None,
        }
    }

    pub fn failed(failure: ToolFailure, error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
            failure: Some(failure),
        }
    }

    pub fn rejected() -> Self {
        Self::failed(ToolFailure::Rejected, REJECTED_BY_USER)
    }

    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            json!({ "success": false, "error": format!("result serialization failed: {e}") })
                .to_string()
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgumentParseError {
    pub raw: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Stable across the assistant message and its tool-result message.
    pub id: String,
    pub tool_name: String,
    pub args: Map<String, Value>,
    /// Set when the provider's arguments could not be parsed; `args` is then empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<ArgumentParseError>,
    pub status: ToolCallStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ToolCallResult>,
    pub created_at: DateTime<Utc>,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        tool_name: impl Into<String>,
        args: Map<String, Value>,
    ) -> Self {
        Self {
            id: id.into(),
            tool_name: tool_name.into(),
            args,
            parse_error: None,
            status: ToolCallStatus::Pending,
            result: None,
            created_at: Utc::now(),
        }
    }

    /// Tool call with a freshly generated id, for calls the agent issues itself.
    pub fn internal(tool_name: impl Into<String>, args: Value) -> Self {
        let args = match args {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self::new(format!("internal_{}", Uuid::new_v4().simple()), tool_name, args)
    }

    pub fn from_provider(call: loom_llm::ToolCall) -> Self {
        let id = if call.id.trim().is_empty() {
            format!("call_{}", Uuid::new_v4().simple())
        } else {
            call.id
        };
        match call.arguments {
            ToolArguments::Parsed(args) => Self::new(id, call.name, args),
            ToolArguments::Malformed { raw, error } => Self {
                parse_error: Some(ArgumentParseError {
                    raw,
                    message: error,
                }),
                ..Self::new(id, call.name, Map::new())
            },
        }
    }

    pub fn args_value(&self) -> Value {
        Value::Object(self.args.clone())
    }

    pub fn to_provider(&self) -> loom_llm::ToolCall {
        let arguments = match &self.parse_error {
            Some(e) => ToolArguments::Malformed {
                raw: e.raw.clone(),
                error: e.message.clone(),
            },
            None => ToolArguments::Parsed(self.args.clone()),
        };
        loom_llm::ToolCall {
            id: self.id.clone(),
            name: self.tool_name.clone(),
            arguments,
        }
    }

    pub(crate) fn finish(&mut self, result: ToolCallResult) -> ToolCallResult {
        if self.status != ToolCallStatus::Rejected {
            self.status = if result.success {
                ToolCallStatus::Completed
            } else {
                ToolCallStatus::Failed
            };
        }
        self.result = Some(result.clone());
        result
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// For `Role::Tool` messages: the id of the originating tool call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AgentMessage {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            tool_calls: vec![],
            tool_call_id: None,
            tool_name: None,
            created_at: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn assistant_with_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::new(Role::Assistant, content)
        }
    }

    pub fn tool_result(call: &ToolCall, result: &ToolCallResult) -> Self {
        Self {
            tool_call_id: Some(call.id.clone()),
            tool_name: Some(call.tool_name.clone()),
            ..Self::new(Role::Tool, result.to_json_string())
        }
    }

    pub fn to_chat_message(&self) -> ChatMessage {
        ChatMessage {
            role: self.role,
            content: self.content.clone(),
            tool_calls: self.tool_calls.iter().map(ToolCall::to_provider).collect(),
            tool_call_id: self.tool_call_id.clone(),
            tool_name: self.tool_name.clone(),
        }
    }
}
