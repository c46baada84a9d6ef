use crate::definition::{RiskLevel, ToolCategory, ToolDefinition};
use serde_json::{Value, json};

fn object_schema(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "properties": properties,
        "required": required,
    })
}

fn path_only() -> Value {
    object_schema(
        json!({ "path": { "type": "string", "description": "Workspace-relative path." } }),
        &["path"],
    )
}

/// Tools the IDE agent exposes to every provider.
pub fn builtin_tools() -> Vec<ToolDefinition> {
    use RiskLevel::{Auto, Confirm, Notify};
    use ToolCategory::{FileSystem, Project, RemoteRepository, VersionControl};

    vec![
        // Workspace files.
        ToolDefinition::new(
            "read_file",
            "Read the contents of a file in the workspace.",
            path_only(),
            Auto,
            FileSystem,
        ),
        ToolDefinition::new(
            "list_files",
            "List the entries of a workspace directory.",
            object_schema(json!({ "path": { "type": "string" } }), &[]),
            Auto,
            FileSystem,
        ),
        ToolDefinition::new(
            "search_files",
            "Find files whose name matches a regular expression.",
            object_schema(
                json!({
                    "path": { "type": "string" },
                    "pattern": { "type": "string" }
                }),
                &["pattern"],
            ),
            Auto,
            FileSystem,
        ),
        ToolDefinition::new(
            "create_file",
            "Create a new file with the given content.",
            object_schema(
                json!({
                    "path": { "type": "string" },
                    "content": { "type": "string" }
                }),
                &["path", "content"],
            ),
            Notify,
            FileSystem,
        ),
        ToolDefinition::new(
            "edit_file",
            "Replace exactly one occurrence of old_str with new_str in a file.",
            object_schema(
                json!({
                    "path": { "type": "string" },
                    "old_str": { "type": "string" },
                    "new_str": { "type": "string" }
                }),
                &["path", "old_str", "new_str"],
            ),
            Notify,
            FileSystem,
        ),
        ToolDefinition::new(
            "create_folder",
            "Create a directory (and missing parents).",
            path_only(),
            Notify,
            FileSystem,
        ),
        ToolDefinition::new(
            "delete_file",
            "Delete a file from the workspace.",
            path_only(),
            Confirm,
            FileSystem,
        ),
        ToolDefinition::new(
            "rename_file",
            "Move or rename a file within the workspace.",
            object_schema(
                json!({
                    "path": { "type": "string" },
                    "new_path": { "type": "string" }
                }),
                &["path", "new_path"],
            ),
            Confirm,
            FileSystem,
        ),
        // Version control.
        ToolDefinition::new(
            "git_status",
            "Show the working tree status of the project repository.",
            object_schema(json!({}), &[]),
            Auto,
            VersionControl,
        ),
        ToolDefinition::new(
            "git_diff",
            "Show uncommitted changes, optionally limited to some paths.",
            object_schema(
                json!({ "paths": { "type": "array", "items": { "type": "string" } } }),
                &[],
            ),
            Auto,
            VersionControl,
        ),
        ToolDefinition::new(
            "git_log",
            "Show recent commits.",
            object_schema(
                json!({ "limit": { "type": "integer", "minimum": 1, "maximum": 100 } }),
                &[],
            ),
            Auto,
            VersionControl,
        ),
        ToolDefinition::new(
            "git_commit",
            "Stage the given paths and create a commit.",
            object_schema(
                json!({
                    "message": { "type": "string" },
                    "paths": { "type": "array", "items": { "type": "string" } }
                }),
                &["message"],
            ),
            Notify,
            VersionControl,
        ),
        ToolDefinition::new(
            "git_checkout_branch",
            "Switch to a branch, creating it when requested.",
            object_schema(
                json!({
                    "branch": { "type": "string" },
                    "create": { "type": "boolean" }
                }),
                &["branch"],
            ),
            Confirm,
            VersionControl,
        ),
        // Remote repository host.
        ToolDefinition::new(
            "github_list_repos",
            "List repositories visible to the connected GitHub account.",
            object_schema(json!({}), &[]),
            Auto,
            RemoteRepository,
        ),
        ToolDefinition::new(
            "github_get_file",
            "Fetch a file from a GitHub repository.",
            object_schema(
                json!({
                    "repo": { "type": "string", "description": "owner/name" },
                    "path": { "type": "string" },
                    "ref": { "type": "string" }
                }),
                &["repo", "path"],
            ),
            Auto,
            RemoteRepository,
        ),
        ToolDefinition::new(
            "github_create_pull_request",
            "Open a pull request on GitHub.",
            object_schema(
                json!({
                    "repo": { "type": "string" },
                    "title": { "type": "string" },
                    "head": { "type": "string" },
                    "base": { "type": "string" },
                    "body": { "type": "string" }
                }),
                &["repo", "title", "head", "base"],
            ),
            Confirm,
            RemoteRepository,
        ),
        ToolDefinition::new(
            "github_push",
            "Push the current branch to its GitHub remote.",
            object_schema(
                json!({
                    "branch": { "type": "string" },
                    "force": { "type": "boolean" }
                }),
                &["branch"],
            ),
            Confirm,
            RemoteRepository,
        ),
        // Project.
        ToolDefinition::new(
            "project_summary",
            "Summarize the open project: file count and top-level layout.",
            object_schema(json!({}), &[]),
            Auto,
            Project,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn builtin_names_are_unique_and_valid() {
        let tools = builtin_tools();
        let mut seen = HashSet::new();
        for tool in &tools {
            assert!(seen.insert(tool.name.as_str()), "duplicate {}", tool.name);
            loom_llm::validate_tool_name(&tool.name).expect("valid tool name");
            assert_eq!(tool.parameters["type"], "object");
        }
    }
}
