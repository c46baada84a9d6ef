//! Terminal side of the approval and notification channels.
//!
//! The agent only sees a `ChannelApprover` and a `ChannelNotifier`. One task owns the terminal
//! and answers approval requests one at a time, so prompts never interleave.

use loom_agent::{
    ApprovalRequest, Approver, ChannelApprover, ChannelNotifier, Notification, Notifier,
    NotifyLevel, PendingApproval,
};
use std::io::{BufRead, Write};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const APPROVAL_QUEUE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalMode {
    /// Ask on stderr and read y/N from stdin.
    Prompt,
    /// Reject every request without reading stdin.
    RejectAll,
}

pub struct Console {
    pub approver: Arc<dyn Approver>,
    pub notifier: Arc<dyn Notifier>,
    /// Ends once both channel ends held by the agent are dropped.
    pub task: JoinHandle<()>,
}

pub fn spawn(mode: ApprovalMode) -> Console {
    let (approval_tx, approval_rx) = mpsc::channel(APPROVAL_QUEUE);
    let (note_tx, note_rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(serve(mode, approval_rx, note_rx));
    Console {
        approver: Arc::new(ChannelApprover::new(approval_tx)),
        notifier: Arc::new(ChannelNotifier::new(note_tx)),
        task,
    }
}

async fn serve(
    mode: ApprovalMode,
    mut approvals: mpsc::Receiver<ApprovalRequest>,
    mut notes: mpsc::UnboundedReceiver<Notification>,
) {
    loop {
        tokio::select! {
            Some(request) = approvals.recv() => answer(mode, request).await,
            Some(note) = notes.recv() => print_notification(&note),
            else => break,
        }
    }
    tracing::debug!("console task finished");
}

#[tracing::instrument(
    level = "info",
    skip_all,
    fields(
        tool_name = %request.approval.tool_call.tool_name,
        risk = %request.approval.risk_level,
        ?mode
    )
)]
async fn answer(mode: ApprovalMode, request: ApprovalRequest) {
    let prompt = render_prompt(&request.approval);
    let approved = match mode {
        ApprovalMode::RejectAll => {
            eprintln!("{prompt}n (no input)");
            false
        }
        ApprovalMode::Prompt => tokio::task::spawn_blocking(move || {
            let mut stderr = std::io::stderr();
            let _ = write!(stderr, "{prompt}");
            let _ = stderr.flush();
            read_answer(&mut std::io::stdin().lock())
        })
        .await
        .unwrap_or_else(|e| {
            tracing::warn!(%e, "approval prompt task failed");
            false
        }),
    };
    tracing::info!(approved, "approval answered");
    if approved {
        request.approve();
    } else {
        request.reject();
    }
}

fn render_prompt(approval: &PendingApproval) -> String {
    let mut out = format!(
        "\n[approval needed: {}]\n{}\n",
        approval.risk_level, approval.description
    );
    if !approval.affected_files.is_empty() {
        out.push_str(&format!("affects: {}\n", approval.affected_files.join(", ")));
    }
    out.push_str("approve? [y/N] ");
    out
}

/// EOF and read errors count as a rejection.
fn read_answer(input: &mut impl BufRead) -> bool {
    let mut line = String::new();
    match input.read_line(&mut line) {
        Ok(0) | Err(_) => false,
        Ok(_) => matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
    }
}

/// Stderr, so notifications do not interleave with replies on stdout.
fn print_notification(note: &Notification) {
    let tag = match note.level {
        NotifyLevel::Info => "info",
        NotifyLevel::Success => "ok",
        NotifyLevel::Warning => "warn",
        NotifyLevel::Error => "error",
    };
    eprintln!("[{tag}] {}", note.message);
}
