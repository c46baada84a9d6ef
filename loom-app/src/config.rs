//! Loom configuration loader.
//!
//! Order: TOML file, then environment overrides, then validation.

use loom_llm::{Provider, ProviderConfig};
use loom_tools::RiskLevel;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoomConfig {
    pub general: GeneralConfig,
    pub keys: KeysConfig,
    pub agent: AgentConfig,
    pub security: SecurityConfig,
    pub ooda: OodaConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub model: String,
    /// Detected from the model name when unset.
    pub provider: Option<Provider>,
    pub system_prompt: Option<String>,
    /// Directory the file and git tools operate in. Defaults to the current directory.
    pub workspace_root: Option<PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            provider: None,
            system_prompt: None,
            workspace_root: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub ollama_base_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub max_iterations: usize,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: loom_agent::DEFAULT_MAX_ITERATIONS,
            max_tokens: 4096,
            temperature: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Per-tool risk level overrides. Confirm-level tools cannot be lowered.
    pub risk_overrides: HashMap<String, RiskLevel>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OodaConfig {
    pub enabled: bool,
    /// Falls back to `general.model`.
    pub model: Option<String>,
    pub provider: Option<Provider>,
    /// The engine only runs with its own key; it never borrows the chat key.
    pub api_key: Option<String>,
    /// Shell commands run in the workspace during Verify.
    pub verify_commands: Vec<String>,
}

impl Default for OodaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: None,
            provider: None,
            api_key: None,
            verify_commands: vec![],
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    #[default]
    Sqlite,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Defaults to `~/.loom/loom.db`.
    pub path: Option<PathBuf>,
}

impl LoomConfig {
    /// Loads `path`, or the default location. A missing default file yields defaults; a missing
    /// explicit file is an error.
    pub async fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let explicit = path.is_some();
        let path = path.unwrap_or_else(default_config_path);
        let mut cfg = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Self::parse(&contents)
                .map_err(|e| anyhow::anyhow!("parse config {}: {e}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !explicit => {
                tracing::debug!(path = %path.display(), "no config file; using defaults");
                Self::default()
            }
            Err(e) => return Err(anyhow::anyhow!("read config {}: {e}", path.display())),
        };

        cfg.apply_env_overrides(|key| std::env::var(key).ok());
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    pub fn apply_env_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        let var = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("LOOM_MODEL") {
            self.general.model = v;
        }
        if let Some(v) = var("LOOM_PROVIDER") {
            match Provider::from_str(&v) {
                Ok(p) => self.general.provider = Some(p),
                Err(e) => tracing::warn!(%e, "ignoring LOOM_PROVIDER"),
            }
        }
        if let Some(v) = var("OPENAI_API_KEY") {
            self.keys.openai_api_key = Some(v);
        }
        if let Some(v) = var("ANTHROPIC_API_KEY") {
            self.keys.anthropic_api_key = Some(v);
        }
        if let Some(v) = var("GEMINI_API_KEY") {
            self.keys.gemini_api_key = Some(v);
        }
        if let Some(v) = var("OLLAMA_BASE_URL") {
            self.keys.ollama_base_url = Some(v);
        }
        if let Some(v) = var("LOOM_OODA_MODEL") {
            self.ooda.model = Some(v);
        }
        if let Some(v) = var("LOOM_OODA_API_KEY") {
            self.ooda.api_key = Some(v);
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.general.model.trim().is_empty() {
            return Err(anyhow::anyhow!("general.model is required"));
        }
        if self.agent.max_iterations == 0 {
            return Err(anyhow::anyhow!("agent.max_iterations must be >= 1"));
        }
        if self.agent.max_tokens == 0 {
            return Err(anyhow::anyhow!("agent.max_tokens must be > 0"));
        }
        if let Some(t) = self.agent.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(anyhow::anyhow!("agent.temperature must be within 0.0..=2.0"));
            }
        }
        if self.ooda.model.as_deref().is_some_and(|m| m.trim().is_empty()) {
            return Err(anyhow::anyhow!("ooda.model must not be empty when set"));
        }
        if let Some(cmd) = self.ooda.verify_commands.iter().find(|c| c.trim().is_empty()) {
            return Err(anyhow::anyhow!("ooda.verify_commands contains an empty command: {cmd:?}"));
        }
        Ok(())
    }

    pub fn chat_provider_config(&self) -> ProviderConfig {
        let provider = self
            .general
            .provider
            .unwrap_or_else(|| Provider::detect(&self.general.model));
        let mut cfg = self.with_key_for(ProviderConfig::new(provider, &self.general.model));
        cfg.max_tokens = self.agent.max_tokens;
        cfg.temperature = self.agent.temperature;
        cfg
    }

    /// `None` when the engine is disabled. The returned config carries only the OODA key.
    pub fn ooda_provider_config(&self) -> Option<ProviderConfig> {
        if !self.ooda.enabled {
            return None;
        }
        let model = self.ooda.model.as_deref().unwrap_or(&self.general.model);
        let provider = self
            .ooda
            .provider
            .unwrap_or_else(|| Provider::detect(model));
        let mut cfg = ProviderConfig::new(provider, model);
        if let Some(key) = &self.ooda.api_key {
            cfg = cfg.with_api_key(key);
        }
        if provider == Provider::Ollama {
            if let Some(url) = &self.keys.ollama_base_url {
                cfg = cfg.with_base_url(url);
            }
        }
        cfg.max_tokens = self.agent.max_tokens;
        Some(cfg)
    }

    fn with_key_for(&self, cfg: ProviderConfig) -> ProviderConfig {
        let key = match cfg.provider {
            Provider::OpenAi => self.keys.openai_api_key.as_ref(),
            Provider::Anthropic => self.keys.anthropic_api_key.as_ref(),
            Provider::Gemini => self.keys.gemini_api_key.as_ref(),
            Provider::Ollama => None,
        };
        let cfg = match key {
            Some(key) => cfg.with_api_key(key),
            None => cfg,
        };
        match (&self.keys.ollama_base_url, cfg.provider) {
            (Some(url), Provider::Ollama) => cfg.with_base_url(url),
            _ => cfg,
        }
    }

    pub fn workspace_root(&self) -> PathBuf {
        self.general
            .workspace_root
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn storage_path(&self) -> PathBuf {
        self.storage
            .path
            .clone()
            .unwrap_or_else(|| loom_home().join("loom.db"))
    }
}

pub fn loom_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".loom")
}

pub fn default_config_path() -> PathBuf {
    loom_home().join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn template_parses_and_validates() {
        let cfg = LoomConfig::parse(include_str!("../templates/config.toml")).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.storage.backend, StorageBackend::Sqlite);
        assert_eq!(cfg.agent.max_iterations, 10);
    }

    #[test]
    fn sections_parse_with_defaults_for_missing_keys() {
        let cfg = LoomConfig::parse(
            r#"
[general]
model = "claude-sonnet-4"

[security.risk_overrides]
git_status = "notify"
delete_file = "auto"

[storage]
backend = "memory"
"#,
        )
        .unwrap();
        assert_eq!(cfg.general.model, "claude-sonnet-4");
        assert_eq!(cfg.security.risk_overrides["git_status"], RiskLevel::Notify);
        assert_eq!(cfg.storage.backend, StorageBackend::Memory);
        assert!(cfg.ooda.enabled);
        assert_eq!(cfg.chat_provider_config().provider, Provider::Anthropic);
    }

    #[test]
    fn env_overrides_win_and_blank_values_are_ignored() {
        let mut cfg = LoomConfig::default();
        cfg.apply_env_overrides(env(&[
            ("LOOM_MODEL", "gemini-2.0-flash"),
            ("GEMINI_API_KEY", "g-key"),
            ("OPENAI_API_KEY", "   "),
            ("LOOM_OODA_API_KEY", "ooda-key"),
        ]));
        assert_eq!(cfg.general.model, "gemini-2.0-flash");
        assert!(cfg.keys.openai_api_key.is_none());

        let chat = cfg.chat_provider_config();
        assert_eq!(chat.provider, Provider::Gemini);
        assert_eq!(chat.api_key.as_deref(), Some("g-key"));

        let ooda = cfg.ooda_provider_config().unwrap();
        assert_eq!(ooda.model, "gemini-2.0-flash");
        assert_eq!(ooda.api_key.as_deref(), Some("ooda-key"));
    }

    #[test]
    fn ooda_never_borrows_the_chat_key() {
        let mut cfg = LoomConfig::default();
        cfg.keys.openai_api_key = Some("sk-chat".to_string());
        let ooda = cfg.ooda_provider_config().unwrap();
        assert!(ooda.api_key.is_none());

        cfg.ooda.enabled = false;
        assert!(cfg.ooda_provider_config().is_none());
    }

    #[test]
    fn validation_rejects_zero_iterations() {
        let mut cfg = LoomConfig::default();
        cfg.agent.max_iterations = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("max_iterations"));
    }

    #[tokio::test]
    async fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = LoomConfig::load(Some(dir.path().join("nope.toml")))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("read config"));
    }
}
