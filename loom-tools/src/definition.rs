use serde::{Deserialize, Serialize};
use std::fmt;

/// How much human involvement a tool call needs before it runs.
///
/// Ordered from least to most restrictive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Runs immediately.
    Auto,
    /// Runs immediately and emits a notification.
    Notify,
    /// Waits for explicit user approval.
    Confirm,
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 3] = [Self::Auto, Self::Notify, Self::Confirm];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Notify => "notify",
            Self::Confirm => "confirm",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    FileSystem,
    VersionControl,
    RemoteRepository,
    Project,
}

impl ToolCategory {
    pub const ALL: [ToolCategory; 4] = [
        Self::FileSystem,
        Self::VersionControl,
        Self::RemoteRepository,
        Self::Project,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FileSystem => "file_system",
            Self::VersionControl => "version_control",
            Self::RemoteRepository => "remote_repository",
            Self::Project => "project",
        }
    }
}

impl fmt::Display for ToolCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the arguments object.
    pub parameters: serde_json::Value,
    pub risk_level: RiskLevel,
    pub category: ToolCategory,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
        risk_level: RiskLevel,
        category: ToolCategory,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            risk_level,
            category,
        }
    }

    pub fn to_llm(&self) -> loom_llm::ToolDefinition {
        loom_llm::ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }
}
