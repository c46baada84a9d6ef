//! Shape B: Gemini `generateContent`. Parts mix text and already-parsed function calls, and
//! the backend assigns no call ids, so ids are synthesized here.

use crate::client::ProviderConfig;
use crate::error::{LlmError, Result};
use crate::types::{
    ChatMessage, NormalizedResponse, Role, ToolArguments, ToolCall, ToolDefinition, Usage,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Schema keywords Gemini's function declaration validator rejects.
const UNSUPPORTED_SCHEMA_KEYS: &[&str] = &["additionalProperties", "$schema"];

pub(crate) async fn send(
    http: &reqwest::Client,
    messages: &[ChatMessage],
    tools: &[ToolDefinition],
    config: &ProviderConfig,
) -> Result<Value> {
    let api_key = config.require_api_key()?;
    let req = GeminiRequest::new(config, messages, tools);
    let url = format!(
        "{}/v1beta/models/{}:generateContent",
        config.base_url_or(GEMINI_BASE_URL),
        config.model
    );

    let response = http
        .post(&url)
        .header("x-goog-api-key", api_key)
        .json(&req)
        .send()
        .await?;

    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(LlmError::Http(format!(
            "gemini generate status={status} body={body}"
        )));
    }
    Ok(serde_json::from_str(&body)?)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<GeminiTools>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiTools {
    function_declarations: Vec<GeminiFunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct GeminiFunctionDeclaration {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<Value>,
}

impl GeminiRequest {
    fn new(config: &ProviderConfig, messages: &[ChatMessage], tools: &[ToolDefinition]) -> Self {
        let mut system_parts = Vec::new();
        let mut contents: Vec<GeminiContent> = Vec::new();

        for m in messages {
            match m.role {
                Role::System => system_parts.push(json!({ "text": m.content })),
                Role::User => contents.push(GeminiContent {
                    role: Some("user".to_string()),
                    parts: vec![json!({ "text": m.content })],
                }),
                Role::Assistant => {
                    let mut parts = Vec::new();
                    if !m.content.trim().is_empty() {
                        parts.push(json!({ "text": m.content }));
                    }
                    for tc in &m.tool_calls {
                        parts.push(json!({
                            "functionCall": { "name": tc.name, "args": tc.arguments.to_object() }
                        }));
                    }
                    contents.push(GeminiContent {
                        role: Some("model".to_string()),
                        parts,
                    });
                }
                Role::Tool => {
                    let part = json!({
                        "functionResponse": {
                            "name": m.tool_name.clone().unwrap_or_default(),
                            "response": function_response_payload(&m.content),
                        }
                    });
                    match contents.last_mut() {
                        Some(last) if is_function_response_content(last) => last.parts.push(part),
                        _ => contents.push(GeminiContent {
                            role: Some("user".to_string()),
                            parts: vec![part],
                        }),
                    }
                }
            }
        }

        let tools = if tools.is_empty() {
            vec![]
        } else {
            vec![GeminiTools {
                function_declarations: tools
                    .iter()
                    .map(|t| GeminiFunctionDeclaration {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: strip_unsupported_schema_keys(t.parameters.clone()),
                    })
                    .collect(),
            }]
        };

        Self {
            contents,
            system_instruction: if system_parts.is_empty() {
                None
            } else {
                Some(GeminiContent {
                    role: None,
                    parts: system_parts,
                })
            },
            tools,
            generation_config: GeminiGenerationConfig {
                max_output_tokens: config.max_tokens,
                temperature: config.temperature,
            },
        }
    }
}

fn is_function_response_content(content: &GeminiContent) -> bool {
    content.role.as_deref() == Some("user")
        && content
            .parts
            .iter()
            .all(|p| p.get("functionResponse").is_some())
}

/// `functionResponse.response` must be an object; wrap anything else.
fn function_response_payload(content: &str) -> Value {
    match serde_json::from_str::<Value>(content) {
        Ok(Value::Object(map)) => Value::Object(map),
        Ok(other) => json!({ "content": other }),
        Err(_) => json!({ "content": content }),
    }
}

fn strip_unsupported_schema_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(k, _)| !UNSUPPORTED_SCHEMA_KEYS.contains(&k.as_str()))
                .map(|(k, v)| {
                    let v = if k == "properties" {
                        strip_property_schemas(v)
                    } else {
                        strip_unsupported_schema_keys(v)
                    };
                    (k, v)
                })
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => {
            Value::Array(items.into_iter().map(strip_unsupported_schema_keys).collect())
        }
        other => other,
    }
}

/// Keys of a `properties` map are parameter names, so only their schemas are cleaned.
fn strip_property_schemas(value: Value) -> Value {
    match value {
        Value::Object(props) => Value::Object(
            props
                .into_iter()
                .map(|(name, schema)| (name, strip_unsupported_schema_keys(schema)))
                .collect(),
        ),
        other => strip_unsupported_schema_keys(other),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiCandidateContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidateContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    function_call: Option<GeminiFunctionCall>,
}

#[derive(Debug, Deserialize)]
struct GeminiFunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

pub(crate) fn parse_response(body: &Value) -> Result<NormalizedResponse> {
    let parsed: GeminiResponse = serde_json::from_value(body.clone())?;
    let candidate = parsed.candidates.into_iter().next().ok_or_else(|| {
        LlmError::ResponseFormat("gemini response missing candidates".to_string())
    })?;

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
        if let Some(t) = part.text {
            text.push_str(&t);
        }
        if let Some(call) = part.function_call {
            tool_calls.push(ToolCall {
                id: format!("call_{}", uuid::Uuid::new_v4().simple()),
                name: call.name,
                arguments: ToolArguments::from_value(call.args),
            });
        }
    }

    let usage = parsed
        .usage_metadata
        .map(|u| Usage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
        })
        .unwrap_or_default();

    Ok(NormalizedResponse::new(text, tool_calls, usage))
}
