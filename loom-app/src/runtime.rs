//! Wires configuration into the agent stack.

use crate::config::{LoomConfig, StorageBackend};
use loom_agent::ooda::CommandCheck;
use loom_agent::store::SqliteStore;
use loom_agent::{
    AgentOrchestrator, Approver, Assistant, AuditLog, InMemoryAuditLog, InMemoryLearningStore,
    LearningMemory, LearningStore, Notifier, OodaEngine, OrchestratorConfig, RiskGate, RiskPolicy,
};
use loom_llm::{LlmClient, ProviderAdapter};
use loom_tools::{ExecutorRegistry, GitCli, ToolRegistry, WorkspaceFs};
use std::path::PathBuf;
use std::sync::Arc;

pub struct Runtime {
    pub assistant: Assistant,
    pub workspace_root: PathBuf,
}

impl Runtime {
    pub fn ooda(&self) -> Option<&Arc<OodaEngine>> {
        self.assistant.ooda()
    }
}

#[tracing::instrument(level = "info", skip_all)]
pub fn build(
    cfg: &LoomConfig,
    approver: Arc<dyn Approver>,
    notifier: Arc<dyn Notifier>,
) -> anyhow::Result<Runtime> {
    build_with_provider(cfg, Arc::new(LlmClient::new()), approver, notifier)
}

pub fn build_with_provider(
    cfg: &LoomConfig,
    provider: Arc<dyn ProviderAdapter>,
    approver: Arc<dyn Approver>,
    notifier: Arc<dyn Notifier>,
) -> anyhow::Result<Runtime> {
    let workspace_root = cfg.workspace_root();
    let (audit, learning_store) = open_stores(cfg)?;

    let mut executors = ExecutorRegistry::new();
    let fs = Arc::new(
        WorkspaceFs::new(&workspace_root)
            .map_err(|e| anyhow::anyhow!("workspace {}: {e}", workspace_root.display()))?,
    );
    fs.register(&mut executors);
    Arc::new(GitCli::new(&workspace_root)).register(&mut executors);

    let registry = Arc::new(ToolRegistry::builtin()?);
    let gate = Arc::new(
        RiskGate::new(
            registry,
            Arc::new(executors),
            approver,
            notifier,
            audit,
        )
        .with_policy(RiskPolicy::new(cfg.security.risk_overrides.clone())),
    );

    let mut orchestrator_config = OrchestratorConfig::new(cfg.chat_provider_config())
        .with_max_iterations(cfg.agent.max_iterations);
    if let Some(prompt) = &cfg.general.system_prompt {
        orchestrator_config = orchestrator_config.with_system_prompt(prompt);
    }
    let orchestrator = Arc::new(AgentOrchestrator::new(
        provider.clone(),
        orchestrator_config,
        gate.clone(),
    ));

    let learning = Arc::new(LearningMemory::new(learning_store));
    let ooda = cfg.ooda_provider_config().map(|ooda_config| {
        let engine = cfg.ooda.verify_commands.iter().fold(
            OodaEngine::new(provider, ooda_config, gate.clone(), learning.clone()),
            |engine, command| {
                engine.with_check(Arc::new(CommandCheck::new(command, &workspace_root)))
            },
        );
        if !engine.is_ready() {
            tracing::warn!("ooda engine has no api key; improvement requests will go to chat");
        }
        Arc::new(engine)
    });

    tracing::info!(
        model = %cfg.general.model,
        workspace_root = %workspace_root.display(),
        storage = ?cfg.storage.backend,
        ooda_ready = ooda.as_ref().is_some_and(|e| e.is_ready()),
        "runtime ready"
    );

    Ok(Runtime {
        assistant: Assistant::new(orchestrator, ooda),
        workspace_root,
    })
}

pub(crate) fn open_stores(
    cfg: &LoomConfig,
) -> anyhow::Result<(Arc<dyn AuditLog>, Arc<dyn LearningStore>)> {
    match cfg.storage.backend {
        StorageBackend::Memory => Ok((
            Arc::new(InMemoryAuditLog::new()),
            Arc::new(InMemoryLearningStore::new()),
        )),
        StorageBackend::Sqlite => {
            let path = cfg.storage_path();
            let store = Arc::new(
                SqliteStore::open(&path)
                    .map_err(|e| anyhow::anyhow!("open store {}: {e}", path.display()))?,
            );
            Ok((store.clone(), store))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use loom_agent::{AssistantReply, PendingApproval, TracingNotifier};
    use loom_llm::{ChatMessage, ProviderConfig, RawResponse, ToolDefinition};
    use serde_json::json;

    struct Deny;

    #[async_trait]
    impl Approver for Deny {
        async fn request_approval(&self, _approval: &PendingApproval) -> bool {
            false
        }
    }

    struct Echo;

    #[async_trait]
    impl ProviderAdapter for Echo {
        async fn send(
            &self,
            _messages: &[ChatMessage],
            _tools: &[ToolDefinition],
            config: &ProviderConfig,
        ) -> loom_llm::Result<RawResponse> {
            Ok(RawResponse {
                provider: config.provider,
                body: json!({
                    "choices": [{ "message": { "role": "assistant", "content": "hello" } }]
                }),
            })
        }
    }

    fn config(root: &std::path::Path, storage: StorageBackend) -> LoomConfig {
        let mut cfg = LoomConfig::default();
        cfg.general.workspace_root = Some(root.to_path_buf());
        cfg.keys.openai_api_key = Some("sk-test".to_string());
        cfg.storage.backend = storage;
        cfg.storage.path = Some(root.join("state/loom.db"));
        cfg
    }

    #[tokio::test]
    async fn builds_a_chat_runtime_without_ooda_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), StorageBackend::Memory);
        let rt = build_with_provider(
            &cfg,
            Arc::new(Echo),
            Arc::new(Deny),
            Arc::new(TracingNotifier),
        )
        .unwrap();

        assert!(rt.ooda().is_some_and(|e| !e.is_ready()));
        let gate = rt.assistant.orchestrator().gate();
        assert!(gate.registry().get_by_name("git_status").is_some());

        let mut transcript = vec![];
        let reply = rt
            .assistant
            .handle(&mut transcript, "hi", None)
            .await
            .unwrap();
        assert!(matches!(reply, AssistantReply::Chat(_)));
        assert_eq!(reply.text(), "hello");
    }

    #[tokio::test]
    async fn sqlite_backend_creates_the_database() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path(), StorageBackend::Sqlite);
        cfg.ooda.api_key = Some("sk-ooda".to_string());
        let rt = build_with_provider(
            &cfg,
            Arc::new(Echo),
            Arc::new(Deny),
            Arc::new(TracingNotifier),
        )
        .unwrap();

        assert!(dir.path().join("state/loom.db").exists());
        assert!(rt.ooda().is_some_and(|e| e.is_ready()));
        let audit = rt.assistant.orchestrator().gate().audit_log();
        assert!(audit.read_all().await.unwrap().is_empty());
    }
}
