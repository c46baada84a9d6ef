use crate::approval::{ApprovalStatus, Approver, PendingApproval};
use crate::audit::{ApprovedBy, AuditLog, AuditLogEntry};
use crate::message::{ToolCall, ToolCallResult, ToolCallStatus, ToolFailure};
use crate::notify::{Notifier, NotifyLevel};
use chrono::Utc;
use loom_tools::{ExecutorRegistry, RiskLevel, ToolDefinition, ToolRegistry};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use uuid::Uuid;

/// Operator risk overrides. Confirm-level tools can never be lowered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskPolicy {
    #[serde(default)]
    pub overrides: HashMap<String, RiskLevel>,
}

impl RiskPolicy {
    pub fn new(overrides: HashMap<String, RiskLevel>) -> Self {
        Self { overrides }
    }

    pub fn effective_level(&self, def: &ToolDefinition) -> RiskLevel {
        if def.risk_level == RiskLevel::Confirm {
            return RiskLevel::Confirm;
        }
        self.overrides
            .get(&def.name)
            .copied()
            .unwrap_or(def.risk_level)
    }
}

/// Classifies, approves, executes and audits tool calls.
///
/// Never returns an error: every outcome, including rejection and executor failure,
/// is a `ToolCallResult` the model can react to.
pub struct RiskGate {
    registry: Arc<ToolRegistry>,
    executors: Arc<ExecutorRegistry>,
    approver: Arc<dyn Approver>,
    notifier: Arc<dyn Notifier>,
    audit: Arc<dyn AuditLog>,
    policy: RiskPolicy,
    pending: Mutex<HashMap<String, PendingApproval>>,
}

impl RiskGate {
    pub fn new(
        registry: Arc<ToolRegistry>,
        executors: Arc<ExecutorRegistry>,
        approver: Arc<dyn Approver>,
        notifier: Arc<dyn Notifier>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self {
            registry,
            executors,
            approver,
            notifier,
            audit,
            policy: RiskPolicy::default(),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_policy(mut self, policy: RiskPolicy) -> Self {
        for name in policy.overrides.keys() {
            if self.registry.get_by_name(name).is_none() {
                tracing::warn!(tool_name = %name, "risk override names an unregistered tool");
            }
        }
        self.policy = policy;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn notifier(&self) -> Arc<dyn Notifier> {
        self.notifier.clone()
    }

    pub fn audit_log(&self) -> Arc<dyn AuditLog> {
        self.audit.clone()
    }

    pub fn risk_level(&self, tool_name: &str) -> Option<RiskLevel> {
        self.registry
            .get_by_name(tool_name)
            .map(|def| self.policy.effective_level(def))
    }

    /// Confirm-risk calls currently waiting on the approver.
    pub fn pending_approvals(&self) -> Vec<PendingApproval> {
        match self.pending.lock() {
            Ok(pending) => pending.values().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().values().cloned().collect(),
        }
    }

    #[tracing::instrument(
        level = "info",
        skip_all,
        fields(tool_call_id = %call.id, tool_name = %call.tool_name)
    )]
    pub async fn execute(&self, call: &mut ToolCall) -> ToolCallResult {
        if let Some(parse_error) = &call.parse_error {
            tracing::warn!(error = %parse_error.message, "tool call arguments did not parse");
            let message = format!("invalid tool arguments: {}", parse_error.message);
            return call.finish(ToolCallResult::failed(ToolFailure::ParseError, message));
        }
        let Some(def) = self.registry.get_by_name(&call.tool_name) else {
            tracing::warn!("model requested an unknown tool");
            let message = format!("unknown tool: {}", call.tool_name);
            return call.finish(ToolCallResult::failed(ToolFailure::UnknownTool, message));
        };

        let risk = self.policy.effective_level(def);
        tracing::debug!(risk = %risk, "tool call classified");

        let approved_by = match risk {
            RiskLevel::Auto => ApprovedBy::Auto,
            RiskLevel::Notify => {
                self.notifier.notify(
                    &format!("{}: {}", def.name, summarize_args(call)),
                    NotifyLevel::Info,
                );
                ApprovedBy::Auto
            }
            RiskLevel::Confirm => {
                if !self.await_approval(call, def, risk).await {
                    call.status = ToolCallStatus::Rejected;
                    let result = call.finish(ToolCallResult::rejected());
                    self.record(call, &result, ApprovedBy::User).await;
                    return result;
                }
                ApprovedBy::User
            }
        };

        call.status = ToolCallStatus::Approved;
        let result = self.run_executor(call).await;
        let result = call.finish(result);
        self.record(call, &result, approved_by).await;
        result
    }

    async fn await_approval(&self, call: &ToolCall, def: &ToolDefinition, risk: RiskLevel) -> bool {
        let mut pending = PendingApproval::new(call, def, risk);
        let approval_id = pending.id.clone();
        self.with_pending(|map| {
            map.insert(approval_id.clone(), pending.clone());
        });

        tracing::info!(approval_id = %approval_id, "awaiting user approval");
        let approved = self.approver.request_approval(&pending).await;
        pending.status = if approved {
            ApprovalStatus::Approved
        } else {
            ApprovalStatus::Rejected
        };
        self.with_pending(|map| {
            map.remove(&approval_id);
        });
        tracing::info!(approval_id = %approval_id, status = ?pending.status, "approval resolved");
        approved
    }

    fn with_pending(&self, f: impl FnOnce(&mut HashMap<String, PendingApproval>)) {
        match self.pending.lock() {
            Ok(mut map) => f(&mut map),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    async fn run_executor(&self, call: &mut ToolCall) -> ToolCallResult {
        let Some(executor) = self.executors.get(&call.tool_name) else {
            tracing::warn!("no executor registered for tool");
            return ToolCallResult::failed(
                ToolFailure::MissingExecutor,
                format!("no executor registered for {}", call.tool_name),
            );
        };

        call.status = ToolCallStatus::Executing;
        let started = Instant::now();
        let outcome = executor.execute(call.args_value()).await;
        let latency_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(output) => {
                tracing::info!(latency_ms, "tool call completed");
                ToolCallResult::ok(output)
            }
            Err(e) => {
                tracing::warn!(latency_ms, error = %e, "tool call failed");
                ToolCallResult::failed(ToolFailure::ExecutionFailed, e.to_string())
            }
        }
    }

    async fn record(&self, call: &ToolCall, result: &ToolCallResult, approved_by: ApprovedBy) {
        let entry = AuditLogEntry {
            id: Uuid::new_v4().to_string(),
            tool_call_id: call.id.clone(),
            tool_name: call.tool_name.clone(),
            args: call.args_value(),
            result: result.clone(),
            approved_by,
            success: result.success,
            timestamp: Utc::now(),
        };
        if let Err(e) = self.audit.append(entry).await {
            tracing::warn!(error = %e, "failed to append audit log entry");
        }
    }
}

fn summarize_args(call: &ToolCall) -> String {
    let files = crate::approval::extract_affected_files(&call.args_value());
    if files.is_empty() {
        call.args_value().to_string()
    } else {
        files.join(", ")
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::audit::InMemoryAuditLog;
    use async_trait::async_trait;
    use loom_tools::ToolCategory;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    pub(crate) struct FixedApprover {
        pub answer: bool,
        pub asked: AtomicUsize,
    }

    impl FixedApprover {
        pub(crate) fn new(answer: bool) -> Arc<Self> {
            Arc::new(Self {
                answer,
                asked: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Approver for FixedApprover {
        async fn request_approval(&self, _pending: &PendingApproval) -> bool {
            self.asked.fetch_add(1, Ordering::SeqCst);
            self.answer
        }
    }

    #[derive(Default)]
    pub(crate) struct RecordingNotifier {
        pub messages: Mutex<Vec<String>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, message: &str, _level: NotifyLevel) {
            if let Ok(mut m) = self.messages.lock() {
                m.push(message.to_string());
            }
        }
    }

    fn registry() -> Arc<ToolRegistry> {
        let def = |name: &str, risk| {
            ToolDefinition::new(
                name,
                format!("{name} tool"),
                json!({}),
                risk,
                ToolCategory::FileSystem,
            )
        };
        Arc::new(
            ToolRegistry::new(vec![
                def("read_file", RiskLevel::Auto),
                def("create_file", RiskLevel::Notify),
                def("delete_file", RiskLevel::Confirm),
                def("git_push", RiskLevel::Confirm),
            ])
            .unwrap(),
        )
    }

    fn counting_executors(runs: Arc<AtomicUsize>) -> Arc<ExecutorRegistry> {
        let mut executors = ExecutorRegistry::new();
        for name in ["read_file", "create_file", "delete_file"] {
            let runs = runs.clone();
            executors.register_fn(name, move |args| {
                let runs = runs.clone();
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(json!({ "echo": args }))
                }
            });
        }
        Arc::new(executors)
    }

    fn gate(
        executors: Arc<ExecutorRegistry>,
        approver: Arc<dyn Approver>,
        audit: Arc<InMemoryAuditLog>,
    ) -> RiskGate {
        RiskGate::new(
            registry(),
            executors,
            approver,
            Arc::new(RecordingNotifier::default()),
            audit,
        )
    }

    #[tokio::test]
    async fn auto_runs_once_and_audits_as_auto() {
        let runs = Arc::new(AtomicUsize::new(0));
        let audit = Arc::new(InMemoryAuditLog::new());
        let approver = FixedApprover::new(false);
        let gate = gate(counting_executors(runs.clone()), approver.clone(), audit.clone());

        let mut call = ToolCall::internal("read_file", json!({ "path": "a.txt" }));
        let result = gate.execute(&mut call).await;

        assert!(result.success);
        assert_eq!(call.status, ToolCallStatus::Completed);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(approver.asked.load(Ordering::SeqCst), 0);
        let entries = audit.read_all().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].approved_by, ApprovedBy::Auto);
        assert_eq!(entries[0].tool_call_id, call.id);
    }

    #[tokio::test]
    async fn notify_runs_and_emits_a_notification() {
        let runs = Arc::new(AtomicUsize::new(0));
        let notifier = Arc::new(RecordingNotifier::default());
        let gate = RiskGate::new(
            registry(),
            counting_executors(runs.clone()),
            FixedApprover::new(false),
            notifier.clone(),
            Arc::new(InMemoryAuditLog::new()),
        );

        let mut call = ToolCall::internal("create_file", json!({ "path": "new.txt" }));
        assert!(gate.execute(&mut call).await.success);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        let messages = notifier.messages.lock().unwrap().clone();
        assert_eq!(messages, vec!["create_file: new.txt".to_string()]);
    }

    #[tokio::test]
    async fn confirm_rejection_never_touches_the_executor() {
        let runs = Arc::new(AtomicUsize::new(0));
        let audit = Arc::new(InMemoryAuditLog::new());
        let gate = gate(counting_executors(runs.clone()), FixedApprover::new(false), audit.clone());

        let mut call = ToolCall::internal("delete_file", json!({ "path": "a.txt" }));
        let result = gate.execute(&mut call).await;

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("rejected by user"));
        assert_eq!(result.failure, Some(ToolFailure::Rejected));
        assert_eq!(call.status, ToolCallStatus::Rejected);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        let entries = audit.read_all().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].approved_by, ApprovedBy::User);
        assert!(!entries[0].success);
        assert!(gate.pending_approvals().is_empty());
    }

    #[tokio::test]
    async fn confirm_waits_for_the_approver_before_executing() {
        struct OrderCheckingApprover {
            ran_early: Arc<AtomicUsize>,
            saw_execution: AtomicBool,
        }

        #[async_trait]
        impl Approver for OrderCheckingApprover {
            async fn request_approval(&self, pending: &PendingApproval) -> bool {
                assert_eq!(pending.affected_files, vec!["a.txt"]);
                if self.ran_early.load(Ordering::SeqCst) > 0 {
                    self.saw_execution.store(true, Ordering::SeqCst);
                }
                tokio::task::yield_now().await;
                true
            }
        }

        let runs = Arc::new(AtomicUsize::new(0));
        let audit = Arc::new(InMemoryAuditLog::new());
        let approver = Arc::new(OrderCheckingApprover {
            ran_early: runs.clone(),
            saw_execution: AtomicBool::new(false),
        });
        let gate = gate(counting_executors(runs.clone()), approver.clone(), audit.clone());

        let mut call = ToolCall::internal("delete_file", json!({ "path": "a.txt" }));
        assert!(gate.execute(&mut call).await.success);
        assert!(!approver.saw_execution.load(Ordering::SeqCst));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        let entries = audit.read_all().await.unwrap();
        assert_eq!(entries[0].approved_by, ApprovedBy::User);
        assert!(entries[0].success);
    }

    #[tokio::test]
    async fn overrides_cannot_lower_confirm_tools() {
        let policy = RiskPolicy::new(HashMap::from([
            ("delete_file".to_string(), RiskLevel::Auto),
            ("read_file".to_string(), RiskLevel::Confirm),
        ]));
        let runs = Arc::new(AtomicUsize::new(0));
        let approver = FixedApprover::new(false);
        let gate = gate(
            counting_executors(runs.clone()),
            approver.clone(),
            Arc::new(InMemoryAuditLog::new()),
        )
        .with_policy(policy);

        assert_eq!(gate.risk_level("delete_file"), Some(RiskLevel::Confirm));
        assert_eq!(gate.risk_level("read_file"), Some(RiskLevel::Confirm));

        let mut call = ToolCall::internal("delete_file", json!({ "path": "a.txt" }));
        assert!(!gate.execute(&mut call).await.success);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(approver.asked.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn executor_errors_become_failed_results() {
        let mut executors = ExecutorRegistry::new();
        executors.register_fn("read_file", |_args| async {
            Err(loom_tools::ToolError::NotFound("a.txt".to_string()))
        });
        let audit = Arc::new(InMemoryAuditLog::new());
        let gate = gate(Arc::new(executors), FixedApprover::new(true), audit.clone());

        let mut call = ToolCall::internal("read_file", json!({ "path": "a.txt" }));
        let result = gate.execute(&mut call).await;
        assert!(!result.success);
        assert_eq!(result.failure, Some(ToolFailure::ExecutionFailed));
        assert_eq!(call.status, ToolCallStatus::Failed);
        assert!(!audit.read_all().await.unwrap()[0].success);
    }

    #[tokio::test]
    async fn undispatchable_calls_fail_without_audit() {
        let audit = Arc::new(InMemoryAuditLog::new());
        let gate = gate(
            counting_executors(Arc::new(AtomicUsize::new(0))),
            FixedApprover::new(true),
            audit.clone(),
        );

        let mut unknown = ToolCall::internal("format_disk", json!({}));
        assert_eq!(
            gate.execute(&mut unknown).await.failure,
            Some(ToolFailure::UnknownTool)
        );

        let mut malformed = ToolCall::from_provider(loom_llm::ToolCall {
            id: "call_1".to_string(),
            name: "read_file".to_string(),
            arguments: loom_llm::ToolArguments::parse("{\"path\":"),
        });
        assert_eq!(
            gate.execute(&mut malformed).await.failure,
            Some(ToolFailure::ParseError)
        );
        assert!(audit.read_all().await.unwrap().is_empty());

        // git_push is registered but nothing executes it.
        let mut orphan = ToolCall::internal("git_push", json!({}));
        assert_eq!(
            gate.execute(&mut orphan).await.failure,
            Some(ToolFailure::MissingExecutor)
        );
        assert_eq!(audit.read_all().await.unwrap().len(), 1);
    }
}
