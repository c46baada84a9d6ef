use super::cycle::OodaCycle;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

impl CheckOutcome {
    pub fn pass(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            detail: detail.into(),
        }
    }

    pub fn fail(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            detail: detail.into(),
        }
    }
}

/// An automated check run during Verify, after fixes are applied and re-read.
///
/// Typical implementations run a type checker or test suite over the workspace.
#[async_trait]
pub trait VerificationCheck: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self, cycle: &OodaCycle) -> CheckOutcome;
}

/// Runs a shell command in the workspace; exit code 0 passes.
#[derive(Debug, Clone)]
pub struct CommandCheck {
    name: String,
    command: String,
    working_directory: PathBuf,
    timeout: Duration,
}

const OUTPUT_TAIL_CHARS: usize = 2_000;

impl CommandCheck {
    pub fn new(command: impl Into<String>, working_directory: impl Into<PathBuf>) -> Self {
        let command = command.into();
        Self {
            name: command.clone(),
            command,
            working_directory: working_directory.into(),
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl VerificationCheck for CommandCheck {
    fn name(&self) -> &str {
        &self.name
    }

    #[tracing::instrument(level = "info", skip_all, fields(command = %self.command))]
    async fn run(&self, _cycle: &OodaCycle) -> CheckOutcome {
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c")
            .arg(&self.command)
            .current_dir(&self.working_directory)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Err(_) => return CheckOutcome::fail(&self.name, "timed out"),
            Ok(Err(e)) => return CheckOutcome::fail(&self.name, e.to_string()),
            Ok(Ok(output)) => output,
        };
        let mut detail = String::from_utf8_lossy(&output.stdout).to_string();
        detail.push_str(&String::from_utf8_lossy(&output.stderr));
        let detail = tail(&detail, OUTPUT_TAIL_CHARS);
        tracing::info!(
            exit_code = output.status.code().unwrap_or(-1),
            "verification command finished"
        );
        if output.status.success() {
            CheckOutcome::pass(&self.name, detail)
        } else {
            CheckOutcome::fail(&self.name, detail)
        }
    }
}

fn tail(s: &str, max_chars: usize) -> String {
    let count = s.chars().count();
    if count <= max_chars {
        return s.trim().to_string();
    }
    s.chars().skip(count - max_chars).collect::<String>().trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::IssueCategory;

    #[tokio::test]
    async fn command_exit_status_decides_the_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let cycle = OodaCycle::new("x", IssueCategory::Logic, None);

        let ok = CommandCheck::new("echo fine", dir.path()).run(&cycle).await;
        assert!(ok.passed);
        assert_eq!(ok.detail, "fine");

        let bad = CommandCheck::new("echo broken >&2; exit 3", dir.path())
            .run(&cycle)
            .await;
        assert!(!bad.passed);
        assert_eq!(bad.detail, "broken");
    }

    #[test]
    fn tail_keeps_the_end() {
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail(" ab ", 10), "ab");
    }
}
