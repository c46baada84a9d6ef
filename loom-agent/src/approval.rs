use crate::message::ToolCall;
use async_trait::async_trait;
use loom_tools::{RiskLevel, ToolDefinition};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Argument keys that usually name a workspace file or tree node.
const FILE_ARGUMENT_KEYS: &[&str] = &["path", "filePath", "file_path", "fileId", "nodeId", "paths"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

/// A confirm-risk tool call waiting on a human decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingApproval {
    pub id: String,
    pub tool_call: ToolCall,
    pub description: String,
    pub risk_level: RiskLevel,
    /// Best effort, for display only.
    pub affected_files: Vec<String>,
    pub status: ApprovalStatus,
}

impl PendingApproval {
    pub fn new(tool_call: &ToolCall, definition: &ToolDefinition, risk_level: RiskLevel) -> Self {
        let args = tool_call.args_value();
        let rendered_args =
            serde_json::to_string_pretty(&args).unwrap_or_else(|_| args.to_string());
        Self {
            id: Uuid::new_v4().to_string(),
            tool_call: tool_call.clone(),
            description: format!(
                "{}\n{}({rendered_args})",
                definition.description, definition.name
            ),
            risk_level,
            affected_files: extract_affected_files(&args),
            status: ApprovalStatus::Pending,
        }
    }
}

/// Collects file-like values from well-known argument keys, at any depth.
pub fn extract_affected_files(args: &Value) -> Vec<String> {
    let mut out = Vec::new();
    collect_files(args, &mut out);
    out
}

fn collect_files(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, v) in map {
                if FILE_ARGUMENT_KEYS.contains(&key.as_str()) {
                    push_file_values(v, out);
                } else {
                    collect_files(v, out);
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_files(v, out)),
        _ => {}
    }
}

fn push_file_values(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) if !s.trim().is_empty() => {
            if !out.iter().any(|existing| existing == s) {
                out.push(s.clone());
            }
        }
        Value::Number(n) => {
            let s = n.to_string();
            if !out.contains(&s) {
                out.push(s);
            }
        }
        Value::Array(items) => items.iter().for_each(|v| push_file_values(v, out)),
        _ => {}
    }
}

/// Human approval boundary. Anything other than an explicit `true` means rejected.
#[async_trait]
pub trait Approver: Send + Sync {
    async fn request_approval(&self, pending: &PendingApproval) -> bool;
}

/// Sent when a tool call requires human approval.
/// The UI side answers on `response_tx`; dropping it without answering counts as rejection.
pub struct ApprovalRequest {
    pub approval: PendingApproval,
    pub response_tx: oneshot::Sender<bool>,
}

impl ApprovalRequest {
    pub fn approve(self) {
        let _ = self.response_tx.send(true);
    }

    pub fn reject(self) {
        let _ = self.response_tx.send(false);
    }
}

/// Approver that hands requests to another task over a channel.
#[derive(Debug, Clone)]
pub struct ChannelApprover {
    tx: mpsc::Sender<ApprovalRequest>,
}

impl ChannelApprover {
    pub fn new(tx: mpsc::Sender<ApprovalRequest>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl Approver for ChannelApprover {
    #[tracing::instrument(level = "debug", skip_all, fields(approval_id = %pending.id))]
    async fn request_approval(&self, pending: &PendingApproval) -> bool {
        let (response_tx, response_rx) = oneshot::channel();
        let request = ApprovalRequest {
            approval: pending.clone(),
            response_tx,
        };
        if self.tx.send(request).await.is_err() {
            tracing::warn!("approval receiver closed; treating as rejected");
            return false;
        }
        match response_rx.await {
            Ok(approved) => approved,
            Err(_) => {
                tracing::info!("approval dismissed without a decision; treating as rejected");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_tools::ToolCategory;
    use serde_json::json;

    #[test]
    fn affected_files_come_from_known_keys_at_any_depth() {
        let args = json!({
            "path": "src/a.ts",
            "paths": ["src/b.ts", "src/a.ts"],
            "nested": { "filePath": "src/c.ts", "nodeId": 42 },
            "content": "path: not-a-file"
        });
        assert_eq!(
            extract_affected_files(&args),
            vec!["src/a.ts", "src/b.ts", "src/c.ts", "42"]
        );
    }

    #[test]
    fn pending_approval_renders_tool_and_args() {
        let call = ToolCall::internal("delete_file", json!({ "path": "old.txt" }));
        let def = ToolDefinition::new(
            "delete_file",
            "Delete a file.",
            json!({}),
            RiskLevel::Confirm,
            ToolCategory::FileSystem,
        );
        let pending = PendingApproval::new(&call, &def, RiskLevel::Confirm);
        assert!(pending.description.starts_with("Delete a file.\ndelete_file("));
        assert!(pending.description.contains("old.txt"));
        assert_eq!(pending.affected_files, vec!["old.txt"]);
        assert_eq!(pending.status, ApprovalStatus::Pending);
    }

    #[tokio::test]
    async fn dismissed_request_resolves_to_rejected() {
        let (tx, mut rx) = mpsc::channel(1);
        let approver = ChannelApprover::new(tx);
        let call = ToolCall::internal("delete_file", json!({ "path": "x" }));
        let def = ToolDefinition::new(
            "delete_file",
            "Delete a file.",
            json!({}),
            RiskLevel::Confirm,
            ToolCategory::FileSystem,
        );
        let pending = PendingApproval::new(&call, &def, RiskLevel::Confirm);

        let ui = tokio::spawn(async move {
            // The UI closes without deciding.
            let request = rx.recv().await.unwrap();
            drop(request);
        });
        assert!(!approver.request_approval(&pending).await);
        ui.await.unwrap();
    }

    #[tokio::test]
    async fn answered_request_resolves_to_the_decision() {
        let (tx, mut rx) = mpsc::channel(1);
        let approver = ChannelApprover::new(tx);
        let call = ToolCall::internal("rename_file", json!({ "path": "a", "new_path": "b" }));
        let def = ToolDefinition::new(
            "rename_file",
            "Rename a file.",
            json!({}),
            RiskLevel::Confirm,
            ToolCategory::FileSystem,
        );
        let pending = PendingApproval::new(&call, &def, RiskLevel::Confirm);

        let ui = tokio::spawn(async move {
            let request = rx.recv().await.unwrap();
            assert_eq!(request.approval.tool_call.tool_name, "rename_file");
            request.approve();
            rx
        });
        assert!(approver.request_approval(&pending).await);

        // Nobody listening any more.
        drop(ui.await.unwrap());
        assert!(!approver.request_approval(&pending).await);
    }
}
