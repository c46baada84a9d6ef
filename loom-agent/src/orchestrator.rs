use crate::error::Result;
use crate::message::{AgentMessage, ToolCall};
use crate::risk_gate::RiskGate;
use loom_llm::{ChatMessage, ProviderAdapter, ProviderConfig, Usage};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;

pub const DEFAULT_MAX_ITERATIONS: usize = 10;

/// Closing reply when a turn exhausts its provider-call budget.
pub const REPHRASE_MESSAGE: &str = "I couldn't finish this request within the allowed number \
of steps. Please rephrase it or break it into smaller requests.";

const DEFAULT_SYSTEM_PROMPT: &str = "You are Loom, a coding assistant embedded in a browser IDE. \
Use the provided tools to inspect and change the user's project. Prefer small, targeted edits \
and explain what you changed.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub provider: ProviderConfig,
    pub system_prompt: String,
    /// Read through `max_iterations()`, which never yields zero.
    max_iterations: usize,
}

impl OrchestratorConfig {
    pub fn new(provider: ProviderConfig) -> Self {
        Self {
            provider,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    /// Provider calls allowed per turn. A deserialized zero still allows one.
    pub fn max_iterations(&self) -> usize {
        self.max_iterations.max(1)
    }
}

/// What the model is told about the project the user has open.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectContext {
    pub name: String,
    #[serde(default)]
    pub open_file: Option<String>,
    #[serde(default)]
    pub files: Vec<String>,
}

impl ProjectContext {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn render(&self) -> String {
        let mut out = format!("## Project\nName: {}\n", self.name);
        if let Some(open) = &self.open_file {
            let _ = writeln!(out, "Open file: {open}");
        }
        if !self.files.is_empty() {
            out.push_str("Files:\n");
            for f in &self.files {
                let _ = writeln!(out, "- {f}");
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnOutcome {
    /// The final assistant message, already appended to the transcript.
    pub reply: AgentMessage,
    pub provider_calls: usize,
    pub usage: Usage,
    pub iteration_limit_reached: bool,
}

/// The bounded provider/tool loop for one conversation.
///
/// Callers serialize turns for a given transcript; the orchestrator itself holds no
/// per-conversation state.
pub struct AgentOrchestrator {
    provider: Arc<dyn ProviderAdapter>,
    config: OrchestratorConfig,
    gate: Arc<RiskGate>,
}

impl AgentOrchestrator {
    pub fn new(
        provider: Arc<dyn ProviderAdapter>,
        config: OrchestratorConfig,
        gate: Arc<RiskGate>,
    ) -> Self {
        Self {
            provider,
            config,
            gate,
        }
    }

    pub fn gate(&self) -> &Arc<RiskGate> {
        &self.gate
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    fn system_prompt(&self, project: Option<&ProjectContext>) -> String {
        match project {
            Some(p) => format!("{}\n\n{}", self.config.system_prompt, p.render()),
            None => self.config.system_prompt.clone(),
        }
    }

    /// Runs one user turn to completion, appending every message it produces to `transcript`.
    ///
    /// Provider failures abort the turn. Tool failures never do; they are fed back to the
    /// model as failed results.
    #[tracing::instrument(level = "info", skip_all, fields(model = %self.config.provider.model))]
    pub async fn send_message(
        &self,
        transcript: &mut Vec<AgentMessage>,
        input: &str,
        project: Option<&ProjectContext>,
    ) -> Result<TurnOutcome> {
        transcript.push(AgentMessage::user(input));

        let system = ChatMessage::system(self.system_prompt(project));
        let tools = self.gate.registry().llm_definitions();
        let mut usage = Usage::default();
        let mut seen_ids: HashSet<String> = HashSet::new();

        let max_iterations = self.config.max_iterations();
        tracing::info!(
            prior_messages = transcript.len() - 1,
            tools_registered = tools.len(),
            max_iterations,
            "turn started"
        );

        for iteration in 1..=max_iterations {
            let mut messages = Vec::with_capacity(transcript.len() + 1);
            messages.push(system.clone());
            messages.extend(transcript.iter().map(AgentMessage::to_chat_message));

            let started = Instant::now();
            let raw = self
                .provider
                .send(&messages, &tools, &self.config.provider)
                .await?;
            let response = raw.normalize()?;
            usage.add(response.usage);
            tracing::info!(
                iteration,
                latency_ms = started.elapsed().as_millis() as u64,
                prompt_tokens = response.usage.prompt_tokens,
                completion_tokens = response.usage.completion_tokens,
                tool_calls = response.tool_calls.len(),
                "provider call completed"
            );

            let text = response.text.unwrap_or_default();
            if response.tool_calls.is_empty() {
                let reply = AgentMessage::assistant(text);
                transcript.push(reply.clone());
                return Ok(TurnOutcome {
                    reply,
                    provider_calls: iteration,
                    usage,
                    iteration_limit_reached: false,
                });
            }

            let mut calls: Vec<ToolCall> = response
                .tool_calls
                .into_iter()
                .map(ToolCall::from_provider)
                .collect();
            for call in &mut calls {
                call.id = unique_id(&call.id, &mut seen_ids);
            }

            let mut results = Vec::with_capacity(calls.len());
            for call in &mut calls {
                let result = self.gate.execute(call).await;
                tracing::debug!(
                    iteration,
                    tool_call_id = %call.id,
                    tool_name = %call.tool_name,
                    success = result.success,
                    "tool call finished"
                );
                results.push(AgentMessage::tool_result(call, &result));
            }
            transcript.push(AgentMessage::assistant_with_calls(text, calls));
            transcript.extend(results);
        }

        tracing::warn!(max_iterations, "turn hit the iteration limit");
        let reply = AgentMessage::assistant(REPHRASE_MESSAGE);
        transcript.push(reply.clone());
        Ok(TurnOutcome {
            reply,
            provider_calls: max_iterations,
            usage,
            iteration_limit_reached: true,
        })
    }
}

fn unique_id(id: &str, seen: &mut HashSet<String>) -> String {
    if seen.insert(id.to_string()) {
        return id.to_string();
    }
    let mut n = 2usize;
    loop {
        let candidate = format!("{id}_{n}");
        if seen.insert(candidate.clone()) {
            tracing::debug!(
                original = %id,
                rekeyed = %candidate,
                "duplicate tool call id re-keyed"
            );
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::audit::{AuditLog, InMemoryAuditLog};
    use crate::error::AgentError;
    use crate::notify::TracingNotifier;
    use crate::risk_gate::tests::FixedApprover;
    use async_trait::async_trait;
    use loom_llm::{LlmError, Provider, RawResponse, Role, ToolDefinition};
    use loom_tools::{ExecutorRegistry, ToolRegistry};
    use serde_json::{Value, json};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replays canned OpenAI-shaped bodies; repeats the last one when the script runs out.
    pub(crate) struct ScriptedProvider {
        script: Mutex<VecDeque<Value>>,
        last: Mutex<Option<Value>>,
        pub calls: AtomicUsize,
        pub seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedProvider {
        pub(crate) fn new(bodies: Vec<Value>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(bodies.into()),
                last: Mutex::new(None),
                calls: AtomicUsize::new(0),
                seen: Mutex::new(vec![]),
            })
        }
    }

    #[async_trait]
    impl ProviderAdapter for ScriptedProvider {
        async fn send(
            &self,
            messages: &[ChatMessage],
            _tools: &[ToolDefinition],
            _config: &ProviderConfig,
        ) -> loom_llm::Result<RawResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(messages.to_vec());
            let next = self.script.lock().unwrap().pop_front();
            let body = match next {
                Some(body) => {
                    *self.last.lock().unwrap() = Some(body.clone());
                    body
                }
                None => self
                    .last
                    .lock()
                    .unwrap()
                    .clone()
                    .ok_or_else(|| LlmError::Http("script exhausted".to_string()))?,
            };
            Ok(RawResponse {
                provider: Provider::OpenAi,
                body,
            })
        }
    }

    pub(crate) fn text_body(text: &str) -> Value {
        json!({
            "choices": [{ "message": { "role": "assistant", "content": text } }],
            "usage": { "prompt_tokens": 10, "completion_tokens": 5 }
        })
    }

    pub(crate) fn tool_body(calls: &[(&str, &str, Value)]) -> Value {
        let tool_calls: Vec<Value> = calls
            .iter()
            .map(|(id, name, args)| {
                json!({
                    "id": id,
                    "type": "function",
                    "function": { "name": name, "arguments": args.to_string() }
                })
            })
            .collect();
        json!({
            "choices": [{
                "message": { "role": "assistant", "content": null, "tool_calls": tool_calls }
            }],
            "usage": { "prompt_tokens": 10, "completion_tokens": 5 }
        })
    }

    fn orchestrator(
        provider: Arc<ScriptedProvider>,
        runs: Arc<AtomicUsize>,
        audit: Arc<InMemoryAuditLog>,
    ) -> AgentOrchestrator {
        let config = OrchestratorConfig::new(ProviderConfig::for_model("gpt-4o"));
        orchestrator_with(config, provider, runs, audit)
    }

    fn orchestrator_with(
        config: OrchestratorConfig,
        provider: Arc<ScriptedProvider>,
        runs: Arc<AtomicUsize>,
        audit: Arc<InMemoryAuditLog>,
    ) -> AgentOrchestrator {
        let mut executors = ExecutorRegistry::new();
        executors.register_fn("read_file", move |args| {
            let runs = runs.clone();
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(json!({ "path": args["path"], "content": "hello" }))
            }
        });
        let gate = RiskGate::new(
            Arc::new(ToolRegistry::builtin().unwrap()),
            Arc::new(executors),
            FixedApprover::new(false),
            Arc::new(TracingNotifier),
            audit,
        );
        AgentOrchestrator::new(provider, config, Arc::new(gate))
    }

    #[tokio::test]
    async fn a_zero_iteration_bound_still_calls_the_provider_once() {
        let mut raw = serde_json::to_value(OrchestratorConfig::new(ProviderConfig::for_model(
            "gpt-4o",
        )))
        .unwrap();
        raw["max_iterations"] = json!(0);
        let config: OrchestratorConfig = serde_json::from_value(raw).unwrap();
        assert_eq!(config.max_iterations(), 1);
        assert_eq!(config.clone().with_max_iterations(0).max_iterations(), 1);

        let provider = ScriptedProvider::new(vec![text_body("Done.")]);
        let orch = orchestrator_with(
            config,
            provider.clone(),
            Arc::new(AtomicUsize::new(0)),
            Arc::new(InMemoryAuditLog::new()),
        );
        let mut transcript = vec![];
        let outcome = orch.send_message(&mut transcript, "hi", None).await.unwrap();

        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.reply.content, "Done.");
        assert!(!outcome.iteration_limit_reached);
    }

    #[tokio::test]
    async fn text_only_response_ends_the_turn_without_executions() {
        let provider = ScriptedProvider::new(vec![text_body("All good.")]);
        let runs = Arc::new(AtomicUsize::new(0));
        let orch = orchestrator(provider.clone(), runs.clone(), Arc::new(InMemoryAuditLog::new()));

        let mut transcript = vec![];
        let outcome = orch.send_message(&mut transcript, "hi", None).await.unwrap();

        assert_eq!(outcome.reply.content, "All good.");
        assert_eq!(outcome.provider_calls, 1);
        assert!(!outcome.iteration_limit_reached);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[1].role, Role::Assistant);
        assert_eq!(outcome.usage.total(), 15);
    }

    #[tokio::test]
    async fn tool_results_follow_their_calls_in_order() {
        let provider = ScriptedProvider::new(vec![
            tool_body(&[
                ("call_a", "read_file", json!({ "path": "a.txt" })),
                ("call_b", "read_file", json!({ "path": "b.txt" })),
            ]),
            text_body("Read both."),
        ]);
        let runs = Arc::new(AtomicUsize::new(0));
        let audit = Arc::new(InMemoryAuditLog::new());
        let orch = orchestrator(provider.clone(), runs.clone(), audit.clone());

        let mut transcript = vec![];
        let project = ProjectContext {
            name: "demo".to_string(),
            open_file: Some("a.txt".to_string()),
            files: vec!["a.txt".to_string(), "b.txt".to_string()],
        };
        let outcome = orch
            .send_message(&mut transcript, "read a and b", Some(&project))
            .await
            .unwrap();

        assert_eq!(outcome.provider_calls, 2);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        let roles: Vec<Role> = transcript.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::Tool, Role::Tool, Role::Assistant]
        );
        let call_ids: Vec<&str> = transcript[1].tool_calls.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(call_ids, vec!["call_a", "call_b"]);
        assert_eq!(transcript[2].tool_call_id.as_deref(), Some("call_a"));
        assert_eq!(transcript[3].tool_call_id.as_deref(), Some("call_b"));
        assert_eq!(audit.read_all().await.unwrap().len(), 2);

        let seen = provider.seen.lock().unwrap();
        assert!(seen[0][0].content.contains("Name: demo"));
        assert_eq!(seen[1].len(), 5);
    }

    #[tokio::test]
    async fn endless_tool_calls_stop_at_the_iteration_bound() {
        let provider = ScriptedProvider::new(vec![tool_body(&[(
            "call_loop",
            "read_file",
            json!({ "path": "a.txt" }),
        )])]);
        let orch = orchestrator(
            provider.clone(),
            Arc::new(AtomicUsize::new(0)),
            Arc::new(InMemoryAuditLog::new()),
        );

        let mut transcript = vec![];
        let outcome = orch.send_message(&mut transcript, "loop", None).await.unwrap();

        assert_eq!(provider.calls.load(Ordering::SeqCst), DEFAULT_MAX_ITERATIONS);
        assert!(outcome.iteration_limit_reached);
        assert_eq!(outcome.reply.content, REPHRASE_MESSAGE);

        // The same provider id repeats every iteration but stays unique within the turn.
        let ids: HashSet<&str> = transcript
            .iter()
            .flat_map(|m| m.tool_calls.iter().map(|c| c.id.as_str()))
            .collect();
        assert_eq!(ids.len(), DEFAULT_MAX_ITERATIONS);
        for pair in transcript.windows(2) {
            if let [assistant, tool] = pair {
                if let Some(call) = assistant.tool_calls.first() {
                    assert_eq!(tool.tool_call_id.as_deref(), Some(call.id.as_str()));
                }
            }
        }
    }

    #[tokio::test]
    async fn rejected_and_malformed_calls_are_fed_back_not_raised() {
        let provider = ScriptedProvider::new(vec![
            json!({
                "choices": [{ "message": { "content": null, "tool_calls": [
                    { "id": "c1", "function": { "name": "read_file", "arguments": "{\"path\":" } },
                    {
                        "id": "c2",
                        "function": { "name": "delete_file", "arguments": "{\"path\":\"a.txt\"}" }
                    }
                ] } }]
            }),
            text_body("Okay, I won't."),
        ]);
        let orch = orchestrator(
            provider,
            Arc::new(AtomicUsize::new(0)),
            Arc::new(InMemoryAuditLog::new()),
        );

        let mut transcript = vec![];
        let outcome = orch.send_message(&mut transcript, "delete", None).await.unwrap();
        assert_eq!(outcome.reply.content, "Okay, I won't.");

        let first: Value = serde_json::from_str(&transcript[2].content).unwrap();
        assert_eq!(first["failure"], "parse_error");
        let second: Value = serde_json::from_str(&transcript[3].content).unwrap();
        assert_eq!(second["error"], "rejected by user");
    }

    #[tokio::test]
    async fn provider_failure_aborts_the_turn() {
        let provider = ScriptedProvider::new(vec![]);
        let orch = orchestrator(
            provider,
            Arc::new(AtomicUsize::new(0)),
            Arc::new(InMemoryAuditLog::new()),
        );
        let mut transcript = vec![];
        let err = orch.send_message(&mut transcript, "hi", None).await.unwrap_err();
        assert!(matches!(err, AgentError::Provider(LlmError::Http(_))));
        assert_eq!(transcript.len(), 1);
    }

    #[test]
    fn duplicate_ids_get_a_numeric_suffix() {
        let mut seen = HashSet::new();
        assert_eq!(unique_id("x", &mut seen), "x");
        assert_eq!(unique_id("x", &mut seen), "x_2");
        assert_eq!(unique_id("x", &mut seen), "x_3");
    }
}
