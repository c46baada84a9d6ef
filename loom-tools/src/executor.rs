use crate::error::{Result, ToolError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Side-effecting implementation behind one tool name.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, arguments: Value) -> Result<Value>;
}

/// Adapts an async closure into a `ToolExecutor`.
pub struct FnExecutor<F> {
    f: F,
}

impl<F> FnExecutor<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> ToolExecutor for FnExecutor<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send,
{
    async fn execute(&self, arguments: Value) -> Result<Value> {
        (self.f)(arguments).await
    }
}

/// Tool name → executor. External subsystems register here; callers never reach them directly.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn ToolExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, executor: Arc<dyn ToolExecutor>) {
        let name = name.into();
        if self.executors.insert(name.clone(), executor).is_some() {
            tracing::warn!(tool_name = %name, "executor replaced an earlier registration");
        }
    }

    pub fn register_fn<F, Fut>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.register(name, Arc::new(FnExecutor::new(f)));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolExecutor>> {
        self.executors.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.executors.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.executors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

pub fn require_string(args: &Value, key: &str) -> Result<String> {
    let Some(v) = args.get(key) else {
        return Err(ToolError::InvalidArguments(format!("missing key: {key}")));
    };
    match v {
        Value::String(s) => Ok(s.clone()),
        other => Err(ToolError::InvalidArguments(format!(
            "key {key} must be string, got {other:?}"
        ))),
    }
}

pub fn optional_string(args: &Value, key: &str) -> Result<Option<String>> {
    let Some(v) = args.get(key) else {
        return Ok(None);
    };
    match v {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        other => Err(ToolError::InvalidArguments(format!(
            "key {key} must be string, got {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn closures_register_per_tool_name() {
        let mut registry = ExecutorRegistry::new();
        registry.register_fn("git_status", |_args| async { Ok(json!({ "clean": true })) });
        registry.register_fn("echo", |args| async move {
            let text = require_string(&args, "text")?;
            Ok(json!({ "text": text }))
        });

        assert_eq!(registry.names(), vec!["echo", "git_status"]);
        let out = registry
            .get("echo")
            .unwrap()
            .execute(json!({ "text": "hi" }))
            .await
            .unwrap();
        assert_eq!(out["text"], "hi");

        let err = registry
            .get("echo")
            .unwrap()
            .execute(json!({ "text": 3 }))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
        assert!(registry.get("git_push").is_none());
    }
}
