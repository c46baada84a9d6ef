use crate::classifier::{RequestKind, classify_request};
use crate::error::Result;
use crate::message::AgentMessage;
use crate::ooda::{ImprovementRequest, OodaCycle, OodaEngine};
use crate::orchestrator::{AgentOrchestrator, ProjectContext, TurnOutcome};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum AssistantReply {
    Chat(TurnOutcome),
    Improvement(OodaCycle),
}

impl AssistantReply {
    pub fn text(&self) -> String {
        match self {
            Self::Chat(outcome) => outcome.reply.content.clone(),
            Self::Improvement(cycle) => cycle.summary(),
        }
    }
}

/// Front door for free-text input: chat turns go to the orchestrator, self-improvement
/// requests go to the OODA engine when it has credentials.
pub struct Assistant {
    orchestrator: Arc<AgentOrchestrator>,
    ooda: Option<Arc<OodaEngine>>,
}

impl Assistant {
    pub fn new(orchestrator: Arc<AgentOrchestrator>, ooda: Option<Arc<OodaEngine>>) -> Self {
        Self { orchestrator, ooda }
    }

    pub fn orchestrator(&self) -> &Arc<AgentOrchestrator> {
        &self.orchestrator
    }

    pub fn ooda(&self) -> Option<&Arc<OodaEngine>> {
        self.ooda.as_ref()
    }

    fn ready_engine(&self) -> Option<&Arc<OodaEngine>> {
        self.ooda.as_ref().filter(|engine| engine.is_ready())
    }

    #[tracing::instrument(level = "info", skip_all)]
    pub async fn handle(
        &self,
        transcript: &mut Vec<AgentMessage>,
        input: &str,
        project: Option<&ProjectContext>,
    ) -> Result<AssistantReply> {
        let kind = classify_request(input);
        tracing::debug!(?kind, "request classified");

        if let (RequestKind::SelfImprove { category }, Some(engine)) = (kind, self.ready_engine()) {
            let mut request = ImprovementRequest::new(input, category);
            if let Some(project) = project {
                request = request.with_project(project.clone());
            }
            let cycle = engine.run_cycle(request).await;
            transcript.push(AgentMessage::user(input));
            transcript.push(AgentMessage::assistant(cycle.summary()));
            return Ok(AssistantReply::Improvement(cycle));
        }

        let outcome = self
            .orchestrator
            .send_message(transcript, input, project)
            .await?;
        Ok(AssistantReply::Chat(outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditLog;
    use crate::classifier::IssueCategory;
    use crate::learning::LearningMemory;
    use crate::notify::TracingNotifier;
    use crate::ooda::{CycleStatus, OodaPhase};
    use crate::orchestrator::OrchestratorConfig;
    use crate::orchestrator::tests::{ScriptedProvider, text_body};
    use crate::risk_gate::RiskGate;
    use crate::risk_gate::tests::FixedApprover;
    use loom_llm::ProviderConfig;
    use loom_tools::{ExecutorRegistry, ToolRegistry, WorkspaceFs};
    use serde_json::json;
    use std::sync::atomic::Ordering;

    const ARABIC_REPORT: &str = "الزر لا يعمل في الشريط الجانبي";

    fn assistant(
        root: &std::path::Path,
        chat: Arc<ScriptedProvider>,
        ooda: Arc<ScriptedProvider>,
        ooda_key: Option<&str>,
    ) -> Assistant {
        let fs = Arc::new(WorkspaceFs::new(root).unwrap());
        let mut executors = ExecutorRegistry::new();
        fs.register(&mut executors);
        let gate = Arc::new(RiskGate::new(
            Arc::new(ToolRegistry::builtin().unwrap()),
            Arc::new(executors),
            FixedApprover::new(true),
            Arc::new(TracingNotifier),
            Arc::new(InMemoryAuditLog::new()),
        ));
        let orchestrator = Arc::new(AgentOrchestrator::new(
            chat,
            OrchestratorConfig::new(ProviderConfig::for_model("gpt-4o").with_api_key("sk-chat")),
            gate.clone(),
        ));
        let mut ooda_config = ProviderConfig::for_model("claude-sonnet-4");
        if let Some(key) = ooda_key {
            ooda_config = ooda_config.with_api_key(key);
        }
        let engine = OodaEngine::new(
            ooda,
            ooda_config,
            gate,
            Arc::new(LearningMemory::in_memory()),
        );
        Assistant::new(orchestrator, Some(Arc::new(engine)))
    }

    fn ooda_script() -> Vec<serde_json::Value> {
        vec![
            text_body(
                &json!({
                    "analysis": "The sidebar toggle button has no click handler.",
                    "suggestions": ["Bind onClick to the toggle"]
                })
                .to_string(),
            ),
            text_body(
                &json!({
                    "fixes": [{
                        "filePath": "src/components/Sidebar.tsx",
                        "type": "edit",
                        "explanation": "Bind the toggle handler",
                        "oldStr": "<button>",
                        "newStr": "<button onClick={toggle}>"
                    }]
                })
                .to_string(),
            ),
        ]
    }

    #[tokio::test]
    async fn arabic_ui_report_runs_an_improvement_cycle() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("src/components")).unwrap();
        std::fs::write(
            tmp.path().join("src/components/Sidebar.tsx"),
            "export const Sidebar = () => <button>Menu</button>;\n",
        )
        .unwrap();
        let chat = ScriptedProvider::new(vec![text_body("unused")]);
        let ooda = ScriptedProvider::new(ooda_script());
        let assistant = assistant(tmp.path(), chat.clone(), ooda.clone(), Some("sk-ooda"));

        let mut transcript = vec![];
        let project = ProjectContext {
            name: "ide".to_string(),
            open_file: Some("src/components/Sidebar.tsx".to_string()),
            files: vec!["src/components/Sidebar.tsx".to_string()],
        };
        let reply = assistant
            .handle(&mut transcript, ARABIC_REPORT, Some(&project))
            .await
            .unwrap();

        let AssistantReply::Improvement(cycle) = reply else {
            panic!("expected an improvement cycle");
        };
        assert_eq!(cycle.category, IssueCategory::UiBug);
        for phase in [OodaPhase::Observe, OodaPhase::Orient, OodaPhase::Decide] {
            assert!(cycle.phase(phase).is_some(), "missing {phase}");
        }
        assert!(!cycle.proposed_fixes.is_empty());
        assert!(cycle.proposed_fixes.iter().all(|f| !f.file_path.is_empty()));
        assert_eq!(cycle.status, CycleStatus::Completed, "{:?}", cycle.error);

        assert_eq!(chat.calls.load(Ordering::SeqCst), 0);
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[1].content, cycle.summary());
    }

    #[tokio::test]
    async fn improvement_requests_fall_back_to_chat_without_credentials() {
        let tmp = tempfile::tempdir().unwrap();
        let chat = ScriptedProvider::new(vec![text_body("Let me take a look.")]);
        let ooda = ScriptedProvider::new(ooda_script());
        let assistant = assistant(tmp.path(), chat.clone(), ooda.clone(), None);

        let mut transcript = vec![];
        let reply = assistant
            .handle(&mut transcript, ARABIC_REPORT, None)
            .await
            .unwrap();

        assert!(matches!(reply, AssistantReply::Chat(_)));
        assert_eq!(reply.text(), "Let me take a look.");
        assert_eq!(ooda.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn plain_questions_go_to_chat() {
        let tmp = tempfile::tempdir().unwrap();
        let chat = ScriptedProvider::new(vec![text_body("It renders the file tree.")]);
        let ooda = ScriptedProvider::new(ooda_script());
        let assistant = assistant(tmp.path(), chat.clone(), ooda.clone(), Some("sk-ooda"));

        let mut transcript = vec![];
        let reply = assistant
            .handle(&mut transcript, "What does FileTree.tsx do?", None)
            .await
            .unwrap();

        assert_eq!(reply.text(), "It renders the file tree.");
        assert_eq!(ooda.calls.load(Ordering::SeqCst), 0);
        assert_eq!(chat.calls.load(Ordering::SeqCst), 1);
    }
}
