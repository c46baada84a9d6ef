//! Agent tool-calling core for the Loom IDE.
//!
//! A turn runs through `AgentOrchestrator`: provider call, normalization, risk-gated tool
//! execution, repeat until the model answers in plain text or the iteration bound is hit.
//! `OodaEngine` layers the observe → orient → decide → act → verify self-improvement
//! cycle on the same gate, and `Assistant` routes free-text input between the two.

mod approval;
mod assistant;
mod audit;
mod classifier;
mod error;
mod learning;
mod message;
mod notify;
pub mod ooda;
mod orchestrator;
mod risk_gate;
pub mod store;

pub use approval::{
    ApprovalRequest, ApprovalStatus, Approver, ChannelApprover, PendingApproval,
    extract_affected_files,
};
pub use assistant::{Assistant, AssistantReply};
pub use audit::{ApprovedBy, AuditLog, AuditLogEntry, InMemoryAuditLog};
pub use classifier::{IssueCategory, RequestKind, classify_request};
pub use error::{AgentError, Result};
pub use learning::{InMemoryLearningStore, LearningMemory, LearningPattern, LearningStore};
pub use message::{AgentMessage, ToolCall, ToolCallResult, ToolCallStatus, ToolFailure};
pub use notify::{ChannelNotifier, Notification, Notifier, NotifyLevel, TracingNotifier};
pub use ooda::{ImprovementRequest, OodaCycle, OodaEngine, OodaEvent, OodaPhase};
pub use orchestrator::{
    AgentOrchestrator, DEFAULT_MAX_ITERATIONS, OrchestratorConfig, ProjectContext,
    REPHRASE_MESSAGE, TurnOutcome,
};
pub use risk_gate::{RiskGate, RiskPolicy};
