//! Shape C: Anthropic messages API with typed `content[]` blocks.

use crate::client::ProviderConfig;
use crate::error::{LlmError, Result};
use crate::types::{
    ChatMessage, NormalizedResponse, Role, ToolArguments, ToolCall, ToolDefinition, Usage,
};
use serde::{Deserialize, Serialize};

const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_MESSAGES_PATH: &str = "/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub(crate) async fn send(
    http: &reqwest::Client,
    messages: &[ChatMessage],
    tools: &[ToolDefinition],
    config: &ProviderConfig,
) -> Result<serde_json::Value> {
    let api_key = config.require_api_key()?;
    let req = AnthropicRequest::new(config, messages, tools);
    let url = format!(
        "{}{ANTHROPIC_MESSAGES_PATH}",
        config.base_url_or(ANTHROPIC_BASE_URL)
    );

    let response = http
        .post(&url)
        .header("x-api-key", api_key)
        .header("anthropic-version", ANTHROPIC_VERSION)
        .json(&req)
        .send()
        .await?;

    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(LlmError::Http(format!(
            "anthropic chat status={status} body={body}"
        )));
    }
    Ok(serde_json::from_str(&body)?)
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "String::is_empty")]
    system: String,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<AnthropicTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

impl AnthropicRequest {
    fn new(config: &ProviderConfig, messages: &[ChatMessage], tools: &[ToolDefinition]) -> Self {
        let mut system = String::new();
        let mut out_messages: Vec<AnthropicMessage> = Vec::new();

        for m in messages {
            match m.role {
                Role::System => {
                    if !system.is_empty() {
                        system.push('\n');
                    }
                    system.push_str(m.content.trim());
                }
                Role::User => out_messages.push(to_anthropic_user_message(m)),
                Role::Assistant => out_messages.push(to_anthropic_assistant_message(m)),
                Role::Tool => {
                    // All results answering one assistant turn travel in a single user message.
                    let block = to_anthropic_tool_result(m);
                    match out_messages.last_mut() {
                        Some(last) if last.role == "user" && last.is_tool_results() => {
                            last.content.push(block);
                        }
                        _ => out_messages.push(AnthropicMessage {
                            role: "user".to_string(),
                            content: vec![block],
                        }),
                    }
                }
            }
        }

        Self {
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            system,
            messages: out_messages,
            tools: tools.iter().map(to_anthropic_tool).collect(),
            temperature: config.temperature,
        }
    }
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

fn to_anthropic_tool(t: &ToolDefinition) -> AnthropicTool {
    AnthropicTool {
        name: t.name.clone(),
        description: t.description.clone(),
        input_schema: t.parameters.clone(),
    }
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: Vec<AnthropicContentBlock>,
}

impl AnthropicMessage {
    fn is_tool_results(&self) -> bool {
        self.content
            .iter()
            .all(|b| matches!(b, AnthropicContentBlock::ToolResult { .. }))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
    #[serde(other)]
    Unsupported,
}

fn to_anthropic_user_message(m: &ChatMessage) -> AnthropicMessage {
    AnthropicMessage {
        role: "user".to_string(),
        content: vec![AnthropicContentBlock::Text {
            text: m.content.clone(),
        }],
    }
}

fn to_anthropic_tool_result(m: &ChatMessage) -> AnthropicContentBlock {
    AnthropicContentBlock::ToolResult {
        tool_use_id: m.tool_call_id.clone().unwrap_or_default(),
        content: m.content.clone(),
    }
}

fn to_anthropic_assistant_message(m: &ChatMessage) -> AnthropicMessage {
    let mut blocks = Vec::new();
    if !m.content.trim().is_empty() {
        blocks.push(AnthropicContentBlock::Text {
            text: m.content.clone(),
        });
    }
    for tc in &m.tool_calls {
        blocks.push(AnthropicContentBlock::ToolUse {
            id: tc.id.clone(),
            name: tc.name.clone(),
            input: tc.arguments.to_object(),
        });
    }
    AnthropicMessage {
        role: "assistant".to_string(),
        content: blocks,
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
    #[serde(default)]
    usage: AnthropicUsage,
}

#[derive(Debug, Default, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

pub(crate) fn parse_response(body: &serde_json::Value) -> Result<NormalizedResponse> {
    let parsed: AnthropicResponse = serde_json::from_value(body.clone())?;
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for block in parsed.content {
        match block {
            AnthropicContentBlock::Text { text: t } => text.push_str(&t),
            AnthropicContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                id,
                name,
                arguments: ToolArguments::from_value(input),
            }),
            AnthropicContentBlock::ToolResult { .. } | AnthropicContentBlock::Unsupported => {}
        }
    }

    Ok(NormalizedResponse::new(
        text,
        tool_calls,
        Usage {
            prompt_tokens: u32::try_from(parsed.usage.input_tokens).unwrap_or(u32::MAX),
            completion_tokens: u32::try_from(parsed.usage.output_tokens).unwrap_or(u32::MAX),
        },
    ))
}
