use crate::error::Result;
use crate::message::ToolCallResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovedBy {
    Auto,
    User,
}

impl ApprovedBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::User => "user",
        }
    }
}

/// One executed (or explicitly rejected) tool call. Never modified after it is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: String,
    pub tool_call_id: String,
    pub tool_name: String,
    pub args: Value,
    pub result: ToolCallResult,
    pub approved_by: ApprovedBy,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

/// Append-only audit store.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, entry: AuditLogEntry) -> Result<()>;
    async fn read_all(&self) -> Result<Vec<AuditLogEntry>>;
}

#[derive(Debug, Default)]
pub struct InMemoryAuditLog {
    entries: Mutex<Vec<AuditLogEntry>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn append(&self, entry: AuditLogEntry) -> Result<()> {
        self.entries.lock().await.push(entry);
        Ok(())
    }

    async fn read_all(&self) -> Result<Vec<AuditLogEntry>> {
        Ok(self.entries.lock().await.clone())
    }
}
