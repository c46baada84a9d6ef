//! Observe → orient → decide → act → verify self-improvement cycle.
//!
//! Observe is local. Orient and Decide are single tool-less LLM calls with JSON replies.
//! Act and Verify only touch the workspace through the shared `RiskGate`, so every write is
//! still risk-gated and audited.

mod cycle;
mod events;
mod prompts;
mod verify;

pub use cycle::{CycleStatus, FixKind, OodaCycle, OodaPhase, PhaseRecord, ProposedFix};
pub use events::{EventKind, OodaEvent};
pub use verify::{CheckOutcome, CommandCheck, VerificationCheck};

use crate::classifier::IssueCategory;
use crate::error::AgentError;
use crate::learning::LearningMemory;
use crate::message::{ToolCall, ToolCallResult};
use crate::notify::NotifyLevel;
use crate::orchestrator::ProjectContext;
use crate::risk_gate::RiskGate;
use chrono::Utc;
use dashmap::DashMap;
use events::EventBus;
use loom_llm::{ChatMessage, ProviderAdapter, ProviderConfig};
use loom_tools::RiskLevel;
use prompts::{DecideReply, OrientReply};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::mpsc::UnboundedReceiver;

const DEFAULT_PROJECT_KEY: &str = "default";
const OBSERVE_FILES_MAX: usize = 5;
const OBSERVE_SNIPPET_CHARS: usize = 2_000;
const OBSERVE_LISTED_FILES_MAX: usize = 50;
const SIMILAR_PATTERNS_MAX: usize = 3;
const HISTORY_MAX: usize = 100;

type PhaseResult = std::result::Result<PhaseRecord, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImprovementRequest {
    pub issue: String,
    pub category: IssueCategory,
    #[serde(default)]
    pub affected_files: Vec<String>,
    #[serde(default)]
    pub project: Option<ProjectContext>,
}

impl ImprovementRequest {
    pub fn new(issue: impl Into<String>, category: IssueCategory) -> Self {
        Self {
            issue: issue.into(),
            category,
            affected_files: vec![],
            project: None,
        }
    }

    pub fn with_affected_files(mut self, files: Vec<String>) -> Self {
        self.affected_files = files;
        self
    }

    pub fn with_project(mut self, project: ProjectContext) -> Self {
        self.project = Some(project);
        self
    }

    fn project_key(&self) -> String {
        self.project
            .as_ref()
            .map(|p| p.name.trim())
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_PROJECT_KEY)
            .to_string()
    }
}

#[derive(Default)]
struct CycleState {
    observation: String,
    analysis: String,
    suggestions: Vec<String>,
    applied: Vec<ProposedFix>,
}

pub struct OodaEngine {
    provider: Arc<dyn ProviderAdapter>,
    /// Separate from the chat model's settings; the engine carries its own credentials.
    config: ProviderConfig,
    gate: Arc<RiskGate>,
    learning: Arc<LearningMemory>,
    checks: Vec<Arc<dyn VerificationCheck>>,
    events: EventBus,
    locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    history: Mutex<Vec<OodaCycle>>,
}

impl OodaEngine {
    pub fn new(
        provider: Arc<dyn ProviderAdapter>,
        config: ProviderConfig,
        gate: Arc<RiskGate>,
        learning: Arc<LearningMemory>,
    ) -> Self {
        Self {
            provider,
            config,
            gate,
            learning,
            checks: vec![],
            events: EventBus::default(),
            locks: DashMap::new(),
            history: Mutex::new(vec![]),
        }
    }

    pub fn with_check(mut self, check: Arc<dyn VerificationCheck>) -> Self {
        self.checks.push(check);
        self
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn learning(&self) -> &Arc<LearningMemory> {
        &self.learning
    }

    /// True when the engine can reach its own model.
    pub fn is_ready(&self) -> bool {
        !self.config.provider.requires_api_key()
            || self
                .config
                .api_key
                .as_deref()
                .is_some_and(|k| !k.trim().is_empty())
    }

    pub fn subscribe(&self) -> UnboundedReceiver<OodaEvent> {
        self.events.subscribe()
    }

    /// Finished cycles, oldest first.
    pub fn history(&self) -> Vec<OodaCycle> {
        match self.history.lock() {
            Ok(h) => h.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Runs one full cycle. Never fails: a phase error is recorded on the returned cycle.
    ///
    /// Cycles for the same project run one at a time.
    #[tracing::instrument(level = "info", skip_all, fields(category = %request.category))]
    pub async fn run_cycle(&self, request: ImprovementRequest) -> OodaCycle {
        let key = request.project_key();
        let lock = self.locks.entry(key.clone()).or_default().clone();
        let _serialized = lock.lock().await;

        let mut cycle = OodaCycle::new(
            &request.issue,
            request.category,
            request.project.as_ref().map(|p| p.name.clone()),
        );
        tracing::info!(cycle_id = %cycle.id, project = %key, "ooda cycle started");
        let started = Instant::now();
        let mut state = CycleState::default();

        for phase in OodaPhase::ALL {
            self.emit(&cycle, phase, EventKind::Started, format!("{phase} started"), None);
            let outcome = match phase {
                OodaPhase::Observe => self.observe(&request, &mut state).await,
                OodaPhase::Orient => self.orient(&request, &mut state, &mut cycle).await,
                OodaPhase::Decide => self.decide(&mut state, &mut cycle).await,
                OodaPhase::Act => self.act(&mut state, &cycle).await,
                OodaPhase::Verify => self.verify(&state, &cycle).await,
            };
            match outcome {
                Ok(record) => {
                    self.emit(
                        &cycle,
                        phase,
                        EventKind::Completed,
                        record.analysis.clone(),
                        record.data.clone(),
                    );
                    self.gate.notifier().notify(
                        &format!("OODA {phase}: {}", first_line(&record.analysis)),
                        NotifyLevel::Info,
                    );
                    cycle.phases.push(record);
                }
                Err(message) => {
                    cycle.status = CycleStatus::Failed;
                    cycle.failed_phase = Some(phase);
                    cycle.error = Some(message.clone());
                    let failure = AgentError::CycleFailure { phase, message };
                    tracing::warn!(cycle_id = %cycle.id, error = %failure, "ooda phase failed");
                    self.emit(&cycle, phase, EventKind::Failed, failure.to_string(), None);
                    self.gate
                        .notifier()
                        .notify(&cycle.summary(), NotifyLevel::Error);
                    break;
                }
            }
        }

        if cycle.status == CycleStatus::Running {
            cycle.status = CycleStatus::Completed;
            self.gate
                .notifier()
                .notify(&cycle.summary(), NotifyLevel::Success);
        }
        cycle.finished_at = Some(Utc::now());
        tracing::info!(
            cycle_id = %cycle.id,
            status = ?cycle.status,
            token_usage = cycle.token_usage,
            latency_ms = started.elapsed().as_millis() as u64,
            "ooda cycle finished"
        );

        self.learn(&cycle).await;
        self.remember(cycle.clone());
        cycle
    }

    async fn observe(&self, request: &ImprovementRequest, state: &mut CycleState) -> PhaseResult {
        let mut text = format!(
            "Reported issue: {}\nCategory: {}\n",
            request.issue, request.category
        );
        let mut candidates = request.affected_files.clone();
        if let Some(project) = &request.project {
            let _ = writeln!(text, "Project: {}", project.name);
            if let Some(open) = &project.open_file {
                let _ = writeln!(text, "Open file: {open}");
                if !candidates.contains(open) {
                    candidates.push(open.clone());
                }
            }
            if !project.files.is_empty() {
                text.push_str("Project files:\n");
                for f in project.files.iter().take(OBSERVE_LISTED_FILES_MAX) {
                    let _ = writeln!(text, "- {f}");
                }
            }
        }

        let mut read = Vec::new();
        if self.gate.risk_level("read_file") == Some(RiskLevel::Auto) {
            for path in candidates.iter().take(OBSERVE_FILES_MAX) {
                let result = self.read_file(path).await;
                match file_content(&result) {
                    Some(content) => {
                        let _ = writeln!(
                            text,
                            "\n--- {path} ---\n{}",
                            truncate_chars(content, OBSERVE_SNIPPET_CHARS)
                        );
                        read.push(path.clone());
                    }
                    None => {
                        let _ = writeln!(text, "\n--- {path} --- (unreadable)");
                    }
                }
            }
        }

        state.observation = text.clone();
        Ok(record(
            OodaPhase::Observe,
            text,
            Some(json!({ "affected_files": candidates, "read_files": read })),
        ))
    }

    async fn orient(
        &self,
        request: &ImprovementRequest,
        state: &mut CycleState,
        cycle: &mut OodaCycle,
    ) -> PhaseResult {
        let mut similar = match self.learning.find_similar(&request.issue).await {
            Ok(similar) => similar,
            Err(e) => {
                tracing::warn!(error = %e, "learning lookup failed; orienting without history");
                vec![]
            }
        };
        similar.truncate(SIMILAR_PATTERNS_MAX);

        let prompt = prompts::orient_prompt(&state.observation, &similar);
        let reply = self.complete(prompts::ORIENT_SYSTEM, prompt, cycle).await?;
        let parsed: OrientReply = prompts::parse_reply(&reply).unwrap_or_else(|| OrientReply {
            analysis: reply.trim().to_string(),
            suggestions: vec![],
        });
        if parsed.analysis.trim().is_empty() && parsed.suggestions.is_empty() {
            return Err("model produced no root-cause analysis".to_string());
        }

        state.analysis = parsed.analysis.trim().to_string();
        state.suggestions = parsed.suggestions;
        let similar_categories: Vec<&str> = similar.iter().map(|p| p.category.as_str()).collect();
        Ok(record(
            OodaPhase::Orient,
            state.analysis.clone(),
            Some(json!({
                "suggestions": state.suggestions,
                "similar_patterns": similar_categories,
            })),
        ))
    }

    async fn decide(&self, state: &mut CycleState, cycle: &mut OodaCycle) -> PhaseResult {
        let prompt =
            prompts::decide_prompt(&state.observation, &state.analysis, &state.suggestions);
        let reply = self.complete(prompts::DECIDE_SYSTEM, prompt, cycle).await?;
        let parsed: DecideReply = prompts::parse_reply(&reply)
            .ok_or_else(|| "model reply did not contain a fixes object".to_string())?;

        let fixes: Vec<ProposedFix> = parsed
            .fixes
            .iter()
            .filter_map(|entry| match prompts::parse_fix(entry) {
                Ok(fix) if is_applicable(&fix) => Some(fix),
                Ok(fix) => {
                    tracing::warn!(
                        file_path = %fix.file_path,
                        kind = ?fix.kind,
                        "dropping incomplete fix"
                    );
                    None
                }
                Err(e) => {
                    tracing::warn!(error = %e, "dropping malformed fix");
                    None
                }
            })
            .collect();
        if fixes.is_empty() {
            return Err("no applicable fixes were proposed".to_string());
        }

        let analysis = fixes
            .iter()
            .map(|f| format!("{} {}: {}", f.kind.as_str(), f.file_path, f.explanation))
            .collect::<Vec<_>>()
            .join("\n");
        cycle.proposed_fixes = fixes;
        Ok(record(
            OodaPhase::Decide,
            analysis,
            Some(json!({ "fixes": cycle.proposed_fixes })),
        ))
    }

    async fn act(&self, state: &mut CycleState, cycle: &OodaCycle) -> PhaseResult {
        let mut outcomes = Vec::with_capacity(cycle.proposed_fixes.len());
        let mut errors = Vec::new();
        for fix in &cycle.proposed_fixes {
            let mut call = fix_call(fix);
            let result = self.gate.execute(&mut call).await;
            self.emit(
                cycle,
                OodaPhase::Act,
                EventKind::Progress,
                format!("{} {}", call.tool_name, fix.file_path),
                Some(json!({ "success": result.success })),
            );
            outcomes.push(json!({
                "file_path": fix.file_path,
                "type": fix.kind,
                "success": result.success,
                "error": result.error,
            }));
            if result.success {
                state.applied.push(fix.clone());
            } else {
                errors.push(format!(
                    "{}: {}",
                    fix.file_path,
                    result.error.unwrap_or_default()
                ));
            }
        }

        if state.applied.is_empty() {
            return Err(format!("no fix could be applied ({})", errors.join("; ")));
        }
        Ok(record(
            OodaPhase::Act,
            format!(
                "applied {} of {} fixes",
                state.applied.len(),
                cycle.proposed_fixes.len()
            ),
            Some(json!({ "results": outcomes })),
        ))
    }

    async fn verify(&self, state: &CycleState, cycle: &OodaCycle) -> PhaseResult {
        let mut problems = Vec::new();
        let mut reread = 0usize;

        if self.gate.risk_level("read_file") == Some(RiskLevel::Auto) {
            for fix in &state.applied {
                let result = self.read_file(&fix.file_path).await;
                reread += 1;
                match fix.kind {
                    FixKind::Delete if result.success => {
                        problems.push(format!("{} still exists", fix.file_path));
                    }
                    FixKind::Delete => {}
                    FixKind::Create | FixKind::Edit => match file_content(&result) {
                        None => problems.push(format!("{} could not be re-read", fix.file_path)),
                        Some(content) => {
                            let expected = fix.new_str.as_deref().unwrap_or_default();
                            if !expected.is_empty() && !content.contains(expected) {
                                problems.push(format!(
                                    "{} does not contain the applied change",
                                    fix.file_path
                                ));
                            }
                        }
                    },
                }
            }
        }

        let mut checks = Vec::with_capacity(self.checks.len());
        for check in &self.checks {
            self.emit(
                cycle,
                OodaPhase::Verify,
                EventKind::Progress,
                format!("running {}", check.name()),
                None,
            );
            let outcome = check.run(cycle).await;
            if !outcome.passed {
                problems.push(format!("{} failed: {}", outcome.name, outcome.detail));
            }
            checks.push(outcome);
        }

        if !problems.is_empty() {
            return Err(problems.join("; "));
        }
        Ok(record(
            OodaPhase::Verify,
            format!("re-read {reread} files, {} checks passed", checks.len()),
            Some(json!({ "checks": checks })),
        ))
    }

    async fn read_file(&self, path: &str) -> ToolCallResult {
        let mut call = ToolCall::internal("read_file", json!({ "path": path }));
        self.gate.execute(&mut call).await
    }

    async fn complete(
        &self,
        system: &str,
        prompt: String,
        cycle: &mut OodaCycle,
    ) -> std::result::Result<String, String> {
        let messages = [ChatMessage::system(system), ChatMessage::user(prompt)];
        let started = Instant::now();
        let raw = self
            .provider
            .send(&messages, &[], &self.config)
            .await
            .map_err(|e| AgentError::from(e).to_string())?;
        let response = raw.normalize().map_err(|e| AgentError::from(e).to_string())?;
        cycle.token_usage = cycle
            .token_usage
            .saturating_add(u64::from(response.usage.total()));
        tracing::info!(
            cycle_id = %cycle.id,
            latency_ms = started.elapsed().as_millis() as u64,
            tokens = response.usage.total(),
            "ooda llm call completed"
        );
        response
            .text
            .ok_or_else(|| "model returned an empty reply".to_string())
    }

    async fn learn(&self, cycle: &OodaCycle) {
        let description = cycle
            .proposed_fixes
            .first()
            .map(|f| f.explanation.clone())
            .filter(|e| !e.trim().is_empty())
            .or_else(|| cycle.error.clone())
            .unwrap_or_default();
        if let Err(e) = self
            .learning
            .record_outcome(cycle.category, &cycle.issue, cycle.succeeded(), &description)
            .await
        {
            tracing::warn!(cycle_id = %cycle.id, error = %e, "failed to record learning outcome");
        }
    }

    fn remember(&self, cycle: OodaCycle) {
        let mut history = match self.history.lock() {
            Ok(h) => h,
            Err(poisoned) => poisoned.into_inner(),
        };
        history.push(cycle);
        if history.len() > HISTORY_MAX {
            let excess = history.len() - HISTORY_MAX;
            history.drain(..excess);
        }
    }

    fn emit(
        &self,
        cycle: &OodaCycle,
        phase: OodaPhase,
        kind: EventKind,
        message: String,
        data: Option<Value>,
    ) {
        self.events.emit(OodaEvent {
            cycle_id: cycle.id.clone(),
            phase,
            kind,
            message,
            timestamp: Utc::now(),
            data,
        });
    }
}

fn record(phase: OodaPhase, analysis: String, data: Option<Value>) -> PhaseRecord {
    PhaseRecord {
        phase,
        analysis,
        timestamp: Utc::now(),
        data,
    }
}

fn is_applicable(fix: &ProposedFix) -> bool {
    if fix.file_path.trim().is_empty() {
        return false;
    }
    match fix.kind {
        FixKind::Create | FixKind::Delete => true,
        FixKind::Edit => {
            fix.old_str.as_deref().is_some_and(|s| !s.is_empty()) && fix.new_str.is_some()
        }
    }
}

fn fix_call(fix: &ProposedFix) -> ToolCall {
    match fix.kind {
        FixKind::Create => ToolCall::internal(
            "create_file",
            json!({
                "path": fix.file_path,
                "content": fix.new_str.clone().unwrap_or_default(),
            }),
        ),
        FixKind::Edit => ToolCall::internal(
            "edit_file",
            json!({
                "path": fix.file_path,
                "old_str": fix.old_str,
                "new_str": fix.new_str,
            }),
        ),
        FixKind::Delete => ToolCall::internal("delete_file", json!({ "path": fix.file_path })),
    }
}

fn file_content(result: &ToolCallResult) -> Option<&str> {
    if !result.success {
        return None;
    }
    result.output.as_ref()?.get("content")?.as_str()
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or_default()
}
