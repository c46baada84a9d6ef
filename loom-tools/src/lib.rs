//! Tool table and executor seam for the Loom agent.
//!
//! The registry is the immutable list of tools the model may call. Executors are registered
//! separately by the subsystems that own the side effects (workspace files, version control,
//! remote repositories); the risk gate only ever reaches them through `ExecutorRegistry`.

mod builtin;
mod definition;
mod error;
mod executor;
mod git;
mod registry;
mod workspace;

pub use builtin::builtin_tools;
pub use definition::{RiskLevel, ToolCategory, ToolDefinition};
pub use error::{Result, ToolError};
pub use executor::{ExecutorRegistry, FnExecutor, ToolExecutor, optional_string, require_string};
pub use git::GitCli;
pub use registry::{RegistryStats, ToolRegistry};
pub use workspace::WorkspaceFs;
