use crate::error::{Result, ToolError};
use crate::executor::{ExecutorRegistry, ToolExecutor, optional_string, require_string};
use async_trait::async_trait;
use regex::Regex;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

/// Directories the walker never descends into.
const WALK_SKIPPED_DIRS: [&str; 2] = [".git", "node_modules"];

/// Local file store rooted at one directory. Registers an executor per file-system tool.
pub struct WorkspaceFs {
    root_dir: PathBuf,
    listing_max: usize,
    walk_files_max: usize,
    file_bytes_max: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkspaceOp {
    ReadFile,
    ListFiles,
    SearchFiles,
    CreateFile,
    EditFile,
    CreateFolder,
    DeleteFile,
    RenameFile,
    ProjectSummary,
}

impl WorkspaceOp {
    const ALL: [WorkspaceOp; 9] = [
        Self::ReadFile,
        Self::ListFiles,
        Self::SearchFiles,
        Self::CreateFile,
        Self::EditFile,
        Self::CreateFolder,
        Self::DeleteFile,
        Self::RenameFile,
        Self::ProjectSummary,
    ];

    fn tool_name(&self) -> &'static str {
        match self {
            Self::ReadFile => "read_file",
            Self::ListFiles => "list_files",
            Self::SearchFiles => "search_files",
            Self::CreateFile => "create_file",
            Self::EditFile => "edit_file",
            Self::CreateFolder => "create_folder",
            Self::DeleteFile => "delete_file",
            Self::RenameFile => "rename_file",
            Self::ProjectSummary => "project_summary",
        }
    }
}

struct WorkspaceExecutor {
    fs: Arc<WorkspaceFs>,
    op: WorkspaceOp,
}

#[async_trait]
impl ToolExecutor for WorkspaceExecutor {
    #[tracing::instrument(level = "info", skip_all, fields(tool_name = self.op.tool_name()))]
    async fn execute(&self, arguments: Value) -> Result<Value> {
        self.fs.execute(self.op, &arguments).await
    }
}

/// A model-supplied path that was checked to stay under the workspace root,
/// including through symlinks that already exist on disk.
#[derive(Debug, Clone)]
struct WorkspacePath {
    /// Normalized, `/`-separated, empty for the root itself.
    rel: String,
    abs: PathBuf,
}

impl WorkspacePath {
    fn is_root(&self) -> bool {
        self.rel.is_empty()
    }

    /// Mutating tools must name something below the root.
    fn entry(self) -> Result<Self> {
        if self.is_root() {
            return Err(ToolError::InvalidArguments(
                "path must name an entry inside the workspace".to_string(),
            ));
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteMode {
    CreateNew,
    Replace,
}

#[derive(Debug, Default)]
struct WalkStats {
    files: usize,
    truncated: bool,
}

impl WorkspaceFs {
    pub fn new(root_dir: impl AsRef<Path>) -> Result<Self> {
        let root_dir = root_dir.as_ref().to_path_buf();
        if root_dir.as_os_str().is_empty() {
            return Err(ToolError::InvalidArguments(
                "root_dir is required".to_string(),
            ));
        }
        Ok(Self {
            root_dir,
            listing_max: 200,
            walk_files_max: 50_000,
            file_bytes_max: 1_000_000,
        })
    }

    /// Register one executor per workspace tool name.
    pub fn register(self: &Arc<Self>, registry: &mut ExecutorRegistry) {
        for op in WorkspaceOp::ALL {
            registry.register(
                op.tool_name(),
                Arc::new(WorkspaceExecutor {
                    fs: Arc::clone(self),
                    op,
                }),
            );
        }
    }

    async fn execute(&self, op: WorkspaceOp, arguments: &Value) -> Result<Value> {
        match op {
            WorkspaceOp::ReadFile => {
                let target = self.resolve(&require_string(arguments, "path")?).await?;
                let content = self.read_text(&target).await?;
                Ok(json!({ "path": target.rel, "content": content }))
            }
            WorkspaceOp::ListFiles => {
                let path = optional_string(arguments, "path")?.unwrap_or_default();
                let target = self.resolve(&path).await?;
                let (entries, truncated) = self.list_entries(&target).await?;
                Ok(json!({ "entries": entries, "truncated": truncated }))
            }
            WorkspaceOp::SearchFiles => {
                let path = optional_string(arguments, "path")?.unwrap_or_default();
                let pattern = require_string(arguments, "pattern")?;
                let regex = Regex::new(&pattern)
                    .map_err(|e| ToolError::InvalidArguments(format!("invalid regex: {e}")))?;
                let target = self.resolve(&path).await?;

                let mut matches = Vec::new();
                let mut truncated = false;
                self.walk(&target, |rel, name| {
                    if !regex.is_match(name) {
                        return;
                    }
                    if matches.len() < self.listing_max {
                        matches.push(rel.to_string());
                    } else {
                        truncated = true;
                    }
                })
                .await?;
                matches.sort();
                Ok(json!({ "matches": matches, "truncated": truncated }))
            }
            WorkspaceOp::CreateFile => {
                let target = self.resolve(&require_string(arguments, "path")?).await?.entry()?;
                let content = require_string(arguments, "content")?;
                self.write_text(&target, &content, WriteMode::CreateNew).await?;
                Ok(json!({ "path": target.rel, "status": "created" }))
            }
            WorkspaceOp::EditFile => {
                let target = self.resolve(&require_string(arguments, "path")?).await?.entry()?;
                let old_str = require_string(arguments, "old_str")?;
                let new_str = require_string(arguments, "new_str")?;
                let content = self.read_text(&target).await?;
                let updated = replace_once(&content, &old_str, &new_str)?;
                self.write_text(&target, &updated, WriteMode::Replace).await?;
                Ok(json!({ "path": target.rel, "status": "edited" }))
            }
            WorkspaceOp::CreateFolder => {
                let target = self.resolve(&require_string(arguments, "path")?).await?.entry()?;
                tokio::fs::create_dir_all(&target.abs).await?;
                Ok(json!({ "path": target.rel, "status": "created" }))
            }
            WorkspaceOp::DeleteFile => {
                let target = self.resolve(&require_string(arguments, "path")?).await?.entry()?;
                let meta = tokio::fs::symlink_metadata(&target.abs).await?;
                if meta.is_dir() {
                    return Err(ToolError::InvalidArguments(format!(
                        "{} is a directory",
                        target.rel
                    )));
                }
                tokio::fs::remove_file(&target.abs).await?;
                Ok(json!({ "path": target.rel, "status": "deleted" }))
            }
            WorkspaceOp::RenameFile => {
                let from = self.resolve(&require_string(arguments, "path")?).await?.entry()?;
                let to = self
                    .resolve(&require_string(arguments, "new_path")?)
                    .await?
                    .entry()?;
                if tokio::fs::try_exists(&to.abs).await? {
                    return Err(ToolError::ExecutionFailed(format!(
                        "destination already exists: {}",
                        to.rel
                    )));
                }
                if let Some(parent) = to.abs.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::rename(&from.abs, &to.abs).await?;
                Ok(json!({ "from": from.rel, "path": to.rel, "status": "renamed" }))
            }
            WorkspaceOp::ProjectSummary => {
                let root = self.resolve("").await?;
                let (top_level, _) = self.list_entries(&root).await?;
                let stats = self.walk(&root, |_, _| {}).await?;
                Ok(json!({
                    "root": self.root_dir.display().to_string(),
                    "top_level": top_level,
                    "file_count": stats.files,
                    "file_count_truncated": stats.truncated,
                }))
            }
        }
    }

    /// Maps a relative path onto the root. Absolute paths and `..` are refused outright;
    /// the deepest part that exists on disk is then canonicalized so a symlink cannot
    /// lead outside the root either.
    async fn resolve(&self, user_path: &str) -> Result<WorkspacePath> {
        let mut parts: Vec<String> = Vec::new();
        for component in Path::new(user_path).components() {
            match component {
                Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
                Component::CurDir => {}
                Component::ParentDir => {
                    return Err(ToolError::Unauthorized(
                        "path traversal is not allowed".to_string(),
                    ));
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(ToolError::Unauthorized(
                        "absolute paths are not allowed".to_string(),
                    ));
                }
            }
        }
        let abs = parts.iter().fold(self.root_dir.clone(), |p, part| p.join(part));
        let target = WorkspacePath {
            rel: parts.join("/"),
            abs,
        };
        self.ensure_contained(&target).await?;
        Ok(target)
    }

    async fn ensure_contained(&self, target: &WorkspacePath) -> Result<()> {
        let root = tokio::fs::canonicalize(&self.root_dir).await?;
        for existing in target.abs.ancestors() {
            match tokio::fs::symlink_metadata(existing).await {
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
                Ok(_) => {}
            }
            let real = tokio::fs::canonicalize(existing).await.map_err(|_| {
                ToolError::Unauthorized(format!("{} is a dangling symlink", target.rel))
            })?;
            if !real.starts_with(&root) {
                return Err(ToolError::Unauthorized(format!(
                    "{} resolves outside the workspace",
                    target.rel
                )));
            }
            return Ok(());
        }
        Err(ToolError::NotFound(format!(
            "workspace root {}",
            self.root_dir.display()
        )))
    }

    async fn read_text(&self, target: &WorkspacePath) -> Result<String> {
        let meta = tokio::fs::metadata(&target.abs).await?;
        if meta.is_dir() {
            return Err(ToolError::InvalidArguments(format!(
                "{} is a directory",
                target.rel
            )));
        }
        if meta.len() > self.file_bytes_max {
            return Err(ToolError::ExecutionFailed(format!(
                "{} is {} bytes; the limit is {}",
                target.rel,
                meta.len(),
                self.file_bytes_max
            )));
        }
        let bytes = tokio::fs::read(&target.abs).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    async fn write_text(
        &self,
        target: &WorkspacePath,
        content: &str,
        mode: WriteMode,
    ) -> Result<()> {
        if content.len() as u64 > self.file_bytes_max {
            return Err(ToolError::ExecutionFailed(format!(
                "content is {} bytes; the limit is {}",
                content.len(),
                self.file_bytes_max
            )));
        }
        if let Some(parent) = target.abs.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        match mode {
            WriteMode::Replace => tokio::fs::write(&target.abs, content).await?,
            WriteMode::CreateNew => {
                let mut file = tokio::fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(&target.abs)
                    .await
                    .map_err(|e| match e.kind() {
                        ErrorKind::AlreadyExists => ToolError::ExecutionFailed(format!(
                            "file already exists: {}",
                            target.rel
                        )),
                        _ => e.into(),
                    })?;
                file.write_all(content.as_bytes()).await?;
                file.flush().await?;
            }
        }
        Ok(())
    }

    /// Directories first, each group sorted; directory names carry a trailing `/`.
    async fn list_entries(&self, target: &WorkspacePath) -> Result<(Vec<String>, bool)> {
        let mut dirs = Vec::new();
        let mut files = Vec::new();
        let mut rd = tokio::fs::read_dir(&target.abs).await?;
        while let Some(entry) = rd.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            match entry.file_type().await {
                Ok(t) if t.is_dir() => dirs.push(format!("{name}/")),
                _ => files.push(name),
            }
        }
        dirs.sort();
        files.sort();
        let mut entries = dirs;
        entries.extend(files);
        let truncated = entries.len() > self.listing_max;
        entries.truncate(self.listing_max);
        Ok((entries, truncated))
    }

    /// Breadth-first walk over regular files below `start`. Symlinks are not followed.
    /// `on_file` gets the root-relative path and the file name.
    async fn walk(
        &self,
        start: &WorkspacePath,
        mut on_file: impl FnMut(&str, &str),
    ) -> Result<WalkStats> {
        let mut stats = WalkStats::default();
        let mut queue = VecDeque::from([(start.abs.clone(), start.rel.clone())]);

        while let Some((dir, rel_dir)) = queue.pop_front() {
            let mut rd = match tokio::fs::read_dir(&dir).await {
                Ok(rd) => rd,
                Err(e) if dir == start.abs => return Err(e.into()),
                Err(e) => {
                    tracing::debug!(dir = %dir.display(), %e, "skipping unreadable directory");
                    continue;
                }
            };
            while let Some(entry) = rd.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                let rel = if rel_dir.is_empty() {
                    name.clone()
                } else {
                    format!("{rel_dir}/{name}")
                };
                let Ok(file_type) = entry.file_type().await else {
                    continue;
                };
                if file_type.is_dir() {
                    if !WALK_SKIPPED_DIRS.contains(&name.as_str()) {
                        queue.push_back((entry.path(), rel));
                    }
                } else if file_type.is_file() {
                    if stats.files >= self.walk_files_max {
                        stats.truncated = true;
                        return Ok(stats);
                    }
                    stats.files += 1;
                    on_file(&rel, &name);
                }
            }
        }
        Ok(stats)
    }
}

fn replace_once(content: &str, old_str: &str, new_str: &str) -> Result<String> {
    if old_str.is_empty() {
        return Err(ToolError::InvalidArguments(
            "old_str must not be empty".to_string(),
        ));
    }
    match content.matches(old_str).count() {
        0 => Err(ToolError::ExecutionFailed(
            "old_str not found in file".to_string(),
        )),
        1 => Ok(content.replacen(old_str, new_str, 1)),
        n => Err(ToolError::ExecutionFailed(format!(
            "old_str matches {n} times; it must be unique"
        ))),
    }
}
