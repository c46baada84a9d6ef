use crate::error::{LlmError, Result};
use crate::types::{ChatMessage, NormalizedResponse, RawResponse, ToolDefinition};
use crate::{anthropic, gemini, openai};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const TOOL_NAME_MAX_LEN: usize = 64;
const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Anthropic,
    Gemini,
    Ollama,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
            Self::Ollama => "ollama",
        }
    }

    /// Best guess from a model name; anything unrecognized is treated as OpenAI.
    pub fn detect(model: &str) -> Self {
        let m = model.to_ascii_lowercase();
        if m.starts_with("claude-") {
            return Self::Anthropic;
        }
        if m.starts_with("gemini-") {
            return Self::Gemini;
        }
        Self::OpenAi
    }

    pub fn requires_api_key(&self) -> bool {
        !matches!(self, Self::Ollama)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "gemini" | "google" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            other => Err(LlmError::InvalidInput(format!("unknown provider: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub provider: Provider,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Overrides the backend's default endpoint origin.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: Option<f32>,
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

impl ProviderConfig {
    pub fn new(provider: Provider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            api_key: None,
            base_url: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: None,
        }
    }

    pub fn for_model(model: impl Into<String>) -> Self {
        let model = model.into();
        Self::new(Provider::detect(&model), model)
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into()).filter(|k: &String| !k.trim().is_empty());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub(crate) fn base_url_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.base_url
            .as_deref()
            .map(|s| s.trim_end_matches('/'))
            .unwrap_or(default)
    }

    pub(crate) fn require_api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                LlmError::InvalidInput(format!("{} requires an api key", self.provider))
            })
    }
}

/// One call to an LLM backend. Must preserve message order.
///
/// Transport and HTTP status failures come back as `LlmError::Http`; they never panic.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    async fn send(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        config: &ProviderConfig,
    ) -> Result<RawResponse>;
}

#[derive(Clone)]
pub struct LlmClient {
    http: reqwest::Client,
}

impl LlmClient {
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(15))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(%e, "reqwest client build failed; falling back to default client");
                reqwest::Client::new()
            });
        Self { http }
    }

    pub fn with_http(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl Default for LlmClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderAdapter for LlmClient {
    #[tracing::instrument(
        level = "info",
        skip_all,
        fields(provider = %config.provider, model = %config.model)
    )]
    async fn send(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        config: &ProviderConfig,
    ) -> Result<RawResponse> {
        let started = std::time::Instant::now();
        let body = match config.provider {
            Provider::OpenAi | Provider::Ollama => {
                openai::send(&self.http, messages, tools, config).await?
            }
            Provider::Anthropic => anthropic::send(&self.http, messages, tools, config).await?,
            Provider::Gemini => gemini::send(&self.http, messages, tools, config).await?,
        };
        tracing::debug!(
            message_count = messages.len(),
            tool_count = tools.len(),
            latency_ms = started.elapsed().as_millis() as u64,
            "provider call completed"
        );
        Ok(RawResponse {
            provider: config.provider,
            body,
        })
    }
}

/// Normalize any backend's response into text plus tool calls, dispatching on the provider tag.
pub fn normalize(raw: &RawResponse) -> Result<NormalizedResponse> {
    match raw.provider {
        Provider::OpenAi | Provider::Ollama => openai::parse_response(&raw.body),
        Provider::Anthropic => anthropic::parse_response(&raw.body),
        Provider::Gemini => gemini::parse_response(&raw.body),
    }
}

/// Tool names must satisfy every backend at once: OpenAI and Anthropic allow
/// `[A-Za-z0-9_-]{1,64}`, Gemini additionally requires a letter or underscore first.
pub fn validate_tool_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err(LlmError::InvalidInput("tool name must not be empty".to_string()));
    };
    if name.len() > TOOL_NAME_MAX_LEN {
        return Err(LlmError::InvalidInput(format!(
            "tool name {name:?} exceeds {TOOL_NAME_MAX_LEN} characters"
        )));
    }
    if !(first.is_ascii_alphabetic() || first == '_') {
        return Err(LlmError::InvalidInput(format!(
            "tool name {name:?} must start with a letter or underscore"
        )));
    }
    if let Some(bad) = chars.find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-')) {
        return Err(LlmError::InvalidInput(format!(
            "tool name {name:?} contains invalid character {bad:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolArguments;
    use serde_json::json;

    #[test]
    fn provider_detection_and_parsing() {
        assert_eq!(Provider::detect("claude-sonnet-4"), Provider::Anthropic);
        assert_eq!(Provider::detect("gemini-2.0-flash"), Provider::Gemini);
        assert_eq!(Provider::detect("gpt-4o-mini"), Provider::OpenAi);
        assert_eq!("Ollama".parse::<Provider>().unwrap(), Provider::Ollama);
        assert!("bedrock".parse::<Provider>().is_err());
    }

    #[test]
    fn tool_names_are_validated_for_all_providers() {
        assert!(validate_tool_name("read_file").is_ok());
        assert!(validate_tool_name("git-status").is_ok());
        assert!(validate_tool_name("").is_err());
        assert!(validate_tool_name("1tool").is_err());
        assert!(validate_tool_name("shell.execute").is_err());
        assert!(validate_tool_name(&"a".repeat(65)).is_err());
    }

    #[test]
    fn missing_api_key_is_invalid_input() {
        let cfg = ProviderConfig::new(Provider::OpenAi, "gpt-4o").with_api_key("  ");
        let err = cfg.require_api_key().unwrap_err();
        assert!(matches!(err, LlmError::InvalidInput(_)));
    }

    #[test]
    fn normalize_dispatches_on_provider_tag() {
        let raw = RawResponse {
            provider: Provider::Anthropic,
            body: json!({
                "content": [
                    { "type": "text", "text": "Reading it now." },
                    {
                        "type": "tool_use",
                        "id": "toolu_1",
                        "name": "read_file",
                        "input": { "path": "a.rs" }
                    }
                ]
            }),
        };
        let out = raw.normalize().unwrap();
        assert_eq!(out.text.as_deref(), Some("Reading it now."));
        assert_eq!(out.tool_calls[0].id, "toolu_1");
        assert!(matches!(out.tool_calls[0].arguments, ToolArguments::Parsed(_)));

        // Same body under the OpenAI tag is a shape error, not a silent success.
        let wrong = RawResponse {
            provider: Provider::OpenAi,
            body: raw.body.clone(),
        };
        assert!(wrong.normalize().is_err());
    }
}
