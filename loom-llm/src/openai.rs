//! Shape A: OpenAI chat completions. Ollama serves the same shape on its `/v1` endpoint.

use crate::client::{Provider, ProviderConfig};
use crate::error::{LlmError, Result};
use crate::types::{
    ChatMessage, NormalizedResponse, Role, ToolArguments, ToolCall, ToolDefinition, Usage,
};
use serde::{Deserialize, Serialize};

const OPENAI_BASE_URL: &str = "https://api.openai.com";
const OLLAMA_BASE_URL: &str = "http://localhost:11434";
const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";

pub(crate) async fn send(
    http: &reqwest::Client,
    messages: &[ChatMessage],
    tools: &[ToolDefinition],
    config: &ProviderConfig,
) -> Result<serde_json::Value> {
    let req = OpenAiChatRequest::new(config, messages, tools);
    let (base, label) = match config.provider {
        Provider::Ollama => (config.base_url_or(OLLAMA_BASE_URL), "ollama"),
        _ => (config.base_url_or(OPENAI_BASE_URL), "openai"),
    };
    let url = format!("{base}{CHAT_COMPLETIONS_PATH}");

    let mut builder = http.post(&url).json(&req);
    if config.provider.requires_api_key() {
        builder = builder.bearer_auth(config.require_api_key()?);
    } else if let Some(key) = config.api_key.as_deref() {
        builder = builder.bearer_auth(key);
    }

    let response = builder.send().await?;
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(LlmError::Http(format!(
            "{label} chat status={status} body={body}"
        )));
    }
    Ok(serde_json::from_str(&body)?)
}

#[derive(Debug, Serialize)]
struct OpenAiChatRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OpenAiTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

impl OpenAiChatRequest {
    fn new(config: &ProviderConfig, messages: &[ChatMessage], tools: &[ToolDefinition]) -> Self {
        let tools: Vec<OpenAiTool> = tools.iter().map(to_openai_tool).collect();
        let tool_choice = if tools.is_empty() {
            None
        } else {
            Some("auto".to_string())
        };
        Self {
            model: config.model.clone(),
            messages: messages.iter().map(to_openai_message).collect(),
            tools,
            tool_choice,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }
}

#[derive(Debug, Serialize)]
struct OpenAiTool {
    r#type: String,
    function: OpenAiToolFunction,
}

#[derive(Debug, Serialize)]
struct OpenAiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

fn to_openai_tool(t: &ToolDefinition) -> OpenAiTool {
    OpenAiTool {
        r#type: "function".to_string(),
        function: OpenAiToolFunction {
            name: t.name.clone(),
            description: t.description.clone(),
            parameters: t.parameters.clone(),
        },
    }
}

#[derive(Debug, Serialize)]
struct OpenAiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<OpenAiToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct OpenAiToolCall {
    id: String,
    r#type: String,
    function: OpenAiToolFunctionCall,
}

#[derive(Debug, Serialize)]
struct OpenAiToolFunctionCall {
    name: String,
    arguments: String,
}

fn to_openai_message(m: &ChatMessage) -> OpenAiMessage {
    let role = match m.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };
    OpenAiMessage {
        role: role.to_string(),
        content: Some(m.content.clone()).filter(|s| !s.is_empty() || m.role == Role::Tool),
        tool_calls: m
            .tool_calls
            .iter()
            .map(|tc| OpenAiToolCall {
                id: tc.id.clone(),
                r#type: "function".to_string(),
                function: OpenAiToolFunctionCall {
                    name: tc.name.clone(),
                    arguments: tc.arguments.to_json_string(),
                },
            })
            .collect(),
        tool_call_id: m.tool_call_id.clone(),
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAiChoiceToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoiceToolCall {
    #[serde(default)]
    id: String,
    #[serde(default)]
    function: OpenAiChoiceToolCallFunction,
}

#[derive(Debug, Deserialize, Default)]
struct OpenAiChoiceToolCallFunction {
    #[serde(default)]
    name: String,
    #[serde(default)]
    arguments: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

pub(crate) fn parse_response(body: &serde_json::Value) -> Result<NormalizedResponse> {
    let parsed: OpenAiChatResponse = serde_json::from_value(body.clone())?;
    let choice = parsed.choices.into_iter().next().ok_or_else(|| {
        LlmError::ResponseFormat("openai response missing choices".to_string())
    })?;

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| ToolCall {
            id: tc.id,
            name: tc.function.name,
            arguments: match tc.function.arguments {
                Some(serde_json::Value::String(raw)) => ToolArguments::parse(&raw),
                // Some compatible servers send an object instead of a string.
                Some(other) => ToolArguments::from_value(other),
                None => ToolArguments::parse(""),
            },
        })
        .collect();

    let usage = parsed
        .usage
        .map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
        })
        .unwrap_or_default();

    Ok(NormalizedResponse::new(
        choice.message.content.unwrap_or_default(),
        tool_calls,
        usage,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_text_and_tool_calls_in_order() {
        let body = json!({
            "choices": [{
                "message": {
                    "content": "Let me look.",
                    "tool_calls": [
                        {
                            "id": "call_a",
                            "type": "function",
                            "function": {
                                "name": "read_file",
                                "arguments": "{\"path\":\"src/app.tsx\"}"
                            }
                        },
                        {
                            "id": "call_b",
                            "type": "function",
                            "function": { "name": "git_status", "arguments": "" }
                        }
                    ]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": { "prompt_tokens": 12, "completion_tokens": 7 }
        });
        let out = parse_response(&body).unwrap();
        assert_eq!(out.text.as_deref(), Some("Let me look."));
        let ids: Vec<&str> = out.tool_calls.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["call_a", "call_b"]);
        assert_eq!(out.usage.total(), 19);
        assert_eq!(
            out.tool_calls[1].arguments,
            ToolArguments::Parsed(serde_json::Map::new())
        );
    }

    #[test]
    fn invalid_argument_json_is_tagged_not_fatal() {
        let body = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [
                        {
                            "id": "call_x",
                            "function": { "name": "edit_file", "arguments": "{\"path\": \"a" }
                        }
                    ]
                }
            }]
        });
        let out = parse_response(&body).unwrap();
        assert!(out.text.is_none());
        assert!(matches!(
            out.tool_calls[0].arguments,
            ToolArguments::Malformed { .. }
        ));
    }

    #[test]
    fn tool_messages_keep_their_call_id() {
        let msg = ChatMessage::tool_result("call_9", "read_file", "{\"success\":true}");
        let wire = to_openai_message(&msg);
        assert_eq!(wire.role, "tool");
        assert_eq!(wire.tool_call_id.as_deref(), Some("call_9"));
    }
}
