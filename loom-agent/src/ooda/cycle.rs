use crate::classifier::IssueCategory;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OodaPhase {
    Observe,
    Orient,
    Decide,
    Act,
    Verify,
}

impl OodaPhase {
    /// Execution order. Phases are never skipped or reordered.
    pub const ALL: [OodaPhase; 5] = [
        Self::Observe,
        Self::Orient,
        Self::Decide,
        Self::Act,
        Self::Verify,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Observe => "observe",
            Self::Orient => "orient",
            Self::Decide => "decide",
            Self::Act => "act",
            Self::Verify => "verify",
        }
    }
}

impl fmt::Display for OodaPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub phase: OodaPhase,
    pub analysis: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FixKind {
    Create,
    Edit,
    Delete,
}

impl FixKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Edit => "edit",
            Self::Delete => "delete",
        }
    }
}

impl std::str::FromStr for FixKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create" => Ok(Self::Create),
            "edit" => Ok(Self::Edit),
            "delete" => Ok(Self::Delete),
            other => Err(format!("unknown fix type: {other}")),
        }
    }
}

/// One concrete change produced by Decide. Model replies are read key by key in
/// `prompts::parse_fix`; this is the stored shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedFix {
    pub file_path: String,
    #[serde(rename = "type")]
    pub kind: FixKind,
    #[serde(default)]
    pub explanation: String,
    /// Text to replace, for edits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_str: Option<String>,
    /// Replacement text for edits, full content for creates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_str: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OodaCycle {
    pub id: String,
    pub issue: String,
    pub category: IssueCategory,
    #[serde(default)]
    pub project: Option<String>,
    /// In execution order. A failed phase leaves no record for itself or anything after it.
    pub phases: Vec<PhaseRecord>,
    pub proposed_fixes: Vec<ProposedFix>,
    /// Prompt plus completion tokens across every LLM call in the cycle.
    pub token_usage: u64,
    pub status: CycleStatus,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub failed_phase: Option<OodaPhase>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl OodaCycle {
    pub(crate) fn new(issue: &str, category: IssueCategory, project: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            issue: issue.to_string(),
            category,
            project,
            phases: vec![],
            proposed_fixes: vec![],
            token_usage: 0,
            status: CycleStatus::Running,
            error: None,
            failed_phase: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn phase(&self, phase: OodaPhase) -> Option<&PhaseRecord> {
        self.phases.iter().find(|r| r.phase == phase)
    }

    pub fn succeeded(&self) -> bool {
        self.status == CycleStatus::Completed
    }

    /// User-facing one-paragraph report.
    pub fn summary(&self) -> String {
        match self.status {
            CycleStatus::Completed => {
                let files: Vec<&str> = self
                    .proposed_fixes
                    .iter()
                    .map(|f| f.file_path.as_str())
                    .collect();
                let analysis = self
                    .phase(OodaPhase::Orient)
                    .map(|r| r.analysis.as_str())
                    .unwrap_or_default();
                format!(
                    "Improvement applied ({}). Changed: {}. {}",
                    self.category,
                    files.join(", "),
                    analysis
                )
                .trim_end()
                .to_string()
            }
            CycleStatus::Failed => format!(
                "Improvement failed during {}: {}",
                self.failed_phase.map(|p| p.as_str()).unwrap_or("unknown phase"),
                self.error.as_deref().unwrap_or("unknown error")
            ),
            CycleStatus::Running => format!("Improvement in progress ({})", self.category),
        }
    }
}
