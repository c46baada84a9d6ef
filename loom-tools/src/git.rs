use crate::error::{Result, ToolError};
use crate::executor::{ExecutorRegistry, ToolExecutor, require_string};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

const GIT_LOG_LIMIT_DEFAULT: u64 = 20;
const GIT_LOG_LIMIT_MAX: u64 = 100;
const OUTPUT_BYTES_MAX: usize = 200_000;

/// Version-control collaborator backed by the `git` binary.
///
/// `github_push` is served here too: it is a plain `git push` to the configured remote.
pub struct GitCli {
    repo_dir: PathBuf,
    remote: String,
    timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GitOp {
    Status,
    Diff,
    Log,
    Commit,
    CheckoutBranch,
    Push,
}

impl GitOp {
    const ALL: [GitOp; 6] = [
        Self::Status,
        Self::Diff,
        Self::Log,
        Self::Commit,
        Self::CheckoutBranch,
        Self::Push,
    ];

    fn tool_name(&self) -> &'static str {
        match self {
            Self::Status => "git_status",
            Self::Diff => "git_diff",
            Self::Log => "git_log",
            Self::Commit => "git_commit",
            Self::CheckoutBranch => "git_checkout_branch",
            Self::Push => "github_push",
        }
    }
}

struct GitExecutor {
    git: Arc<GitCli>,
    op: GitOp,
}

#[async_trait]
impl ToolExecutor for GitExecutor {
    #[tracing::instrument(level = "info", skip_all, fields(tool_name = self.op.tool_name()))]
    async fn execute(&self, arguments: Value) -> Result<Value> {
        self.git.execute(self.op, &arguments).await
    }
}

impl GitCli {
    pub fn new(repo_dir: impl AsRef<Path>) -> Self {
        Self {
            repo_dir: repo_dir.as_ref().to_path_buf(),
            remote: "origin".to_string(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_remote(mut self, remote: impl Into<String>) -> Self {
        self.remote = remote.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn register(self: &Arc<Self>, registry: &mut ExecutorRegistry) {
        for op in GitOp::ALL {
            registry.register(
                op.tool_name(),
                Arc::new(GitExecutor {
                    git: Arc::clone(self),
                    op,
                }),
            );
        }
    }

    async fn execute(&self, op: GitOp, arguments: &Value) -> Result<Value> {
        match op {
            GitOp::Status => {
                let out = self.git(&["status", "--porcelain=v1", "--branch"]).await?;
                Ok(json!({ "status": out }))
            }
            GitOp::Diff => {
                let paths = path_list(arguments)?;
                let mut args = vec!["diff", "--no-color"];
                if !paths.is_empty() {
                    args.push("--");
                    args.extend(paths.iter().map(String::as_str));
                }
                Ok(json!({ "diff": self.git(&args).await? }))
            }
            GitOp::Log => {
                let limit = arguments
                    .get("limit")
                    .and_then(Value::as_u64)
                    .unwrap_or(GIT_LOG_LIMIT_DEFAULT)
                    .clamp(1, GIT_LOG_LIMIT_MAX);
                let count = format!("-{limit}");
                let out = self
                    .git(&["log", &count, "--pretty=format:%H%x09%an%x09%ad%x09%s", "--date=iso"])
                    .await?;
                let commits: Vec<Value> = out
                    .lines()
                    .filter_map(|line| {
                        let mut parts = line.splitn(4, '\t');
                        Some(json!({
                            "hash": parts.next()?,
                            "author": parts.next()?,
                            "date": parts.next()?,
                            "subject": parts.next().unwrap_or_default(),
                        }))
                    })
                    .collect();
                Ok(json!({ "commits": commits }))
            }
            GitOp::Commit => {
                let message = require_string(arguments, "message")?;
                if message.trim().is_empty() {
                    return Err(ToolError::InvalidArguments(
                        "commit message must not be empty".to_string(),
                    ));
                }
                let paths = path_list(arguments)?;
                let mut add = vec!["add", "--"];
                if paths.is_empty() {
                    add.push(".");
                } else {
                    add.extend(paths.iter().map(String::as_str));
                }
                self.git(&add).await?;
                let out = self.git(&["commit", "-m", &message]).await?;
                Ok(json!({ "status": "committed", "output": out }))
            }
            GitOp::CheckoutBranch => {
                let branch = require_branch(arguments)?;
                let create = arguments
                    .get("create")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let args = if create {
                    vec!["checkout", "-b", branch.as_str()]
                } else {
                    vec!["checkout", branch.as_str()]
                };
                self.git(&args).await?;
                Ok(json!({ "branch": branch, "created": create }))
            }
            GitOp::Push => {
                let branch = require_branch(arguments)?;
                let force = arguments
                    .get("force")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let mut args = vec!["push"];
                if force {
                    args.push("--force-with-lease");
                }
                args.extend([self.remote.as_str(), branch.as_str()]);
                let out = self.git(&args).await?;
                Ok(json!({ "branch": branch, "remote": self.remote, "output": out }))
            }
        }
    }

    async fn git(&self, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new("git");
        cmd.args(args)
            .current_dir(&self.repo_dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| ToolError::ExecutionFailed("git command timed out".to_string()))?
            .map_err(|e| ToolError::ExecutionFailed(format!("spawn git: {e}")))?;

        let stdout = truncate_output(&output.stdout);
        if !output.status.success() {
            let stderr = truncate_output(&output.stderr);
            let detail = if stderr.trim().is_empty() { stdout } else { stderr };
            return Err(ToolError::ExecutionFailed(format!(
                "git {} exited with {}: {}",
                args.first().copied().unwrap_or_default(),
                output.status.code().unwrap_or(-1),
                detail.trim()
            )));
        }
        Ok(stdout)
    }
}

fn truncate_output(bytes: &[u8]) -> String {
    let slice = &bytes[..bytes.len().min(OUTPUT_BYTES_MAX)];
    String::from_utf8_lossy(slice).to_string()
}

fn path_list(arguments: &Value) -> Result<Vec<String>> {
    let Some(v) = arguments.get("paths") else {
        return Ok(vec![]);
    };
    let Some(items) = v.as_array() else {
        return Err(ToolError::InvalidArguments(
            "paths must be an array of strings".to_string(),
        ));
    };
    items
        .iter()
        .map(|item| {
            let path = item.as_str().ok_or_else(|| {
                ToolError::InvalidArguments("paths must be an array of strings".to_string())
            })?;
            let p = Path::new(path);
            let escapes = p.is_absolute()
                || p.components().any(|c| matches!(c, Component::ParentDir))
                || path.starts_with('-');
            if escapes {
                return Err(ToolError::Unauthorized(format!(
                    "path outside the repository: {path}"
                )));
            }
            Ok(path.to_string())
        })
        .collect()
}

fn require_branch(arguments: &Value) -> Result<String> {
    let branch = require_string(arguments, "branch")?;
    let valid = !branch.is_empty()
        && !branch.starts_with('-')
        && !branch.contains("..")
        && !branch.chars().any(|c| c.is_whitespace() || c.is_control() || "~^:?*[\\".contains(c));
    if !valid {
        return Err(ToolError::InvalidArguments(format!(
            "invalid branch name: {branch:?}"
        )));
    }
    Ok(branch)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn repo() -> (tempfile::TempDir, ExecutorRegistry) {
        let tmp = tempfile::tempdir().unwrap();
        let git = Arc::new(GitCli::new(tmp.path()));
        git.git(&["init", "-q"]).await.unwrap();
        git.git(&["config", "user.email", "dev@example.com"]).await.unwrap();
        git.git(&["config", "user.name", "Dev"]).await.unwrap();
        let mut registry = ExecutorRegistry::new();
        git.register(&mut registry);
        (tmp, registry)
    }

    async fn run(registry: &ExecutorRegistry, tool: &str, args: Value) -> Result<Value> {
        registry.get(tool).unwrap().execute(args).await
    }

    #[tokio::test]
    async fn commit_then_log_and_branch() {
        let (tmp, registry) = repo().await;
        std::fs::write(tmp.path().join("README.md"), "# demo\n").unwrap();

        let status = run(&registry, "git_status", json!({})).await.unwrap();
        assert!(status["status"].as_str().unwrap().contains("README.md"));

        run(
            &registry,
            "git_commit",
            json!({ "message": "Add readme", "paths": ["README.md"] }),
        )
        .await
        .unwrap();

        let log = run(&registry, "git_log", json!({ "limit": 5 })).await.unwrap();
        let commits = log["commits"].as_array().unwrap();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0]["subject"], "Add readme");

        let out = run(
            &registry,
            "git_checkout_branch",
            json!({ "branch": "fix/sidebar", "create": true }),
        )
        .await
        .unwrap();
        assert_eq!(out["created"], true);
    }

    #[tokio::test]
    async fn rejects_option_injection_and_escaping_paths() {
        let (_tmp, registry) = repo().await;
        let err = run(&registry, "git_checkout_branch", json!({ "branch": "--orphan" }))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));

        let err = run(&registry, "git_diff", json!({ "paths": ["../outside"] }))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn git_failures_surface_as_execution_errors() {
        let (_tmp, registry) = repo().await;
        // Nothing staged, so the commit fails.
        let err = run(&registry, "git_commit", json!({ "message": "empty", "paths": [] }))
            .await;
        assert!(matches!(err, Err(ToolError::ExecutionFailed(_))));
    }
}
