//! # Code Execution Service
//!
//! Runs untrusted source code in one of several languages. Each request gets
//! a private workspace directory, its toolchain steps run as child processes
//! under a single wall-clock deadline, and the whole process group is killed
//! when that deadline passes.

mod config;
mod error;
mod executor;
mod process;
mod registry;
mod report;
mod service;
mod types;
mod workspace;

#[cfg(test)]
mod tests;

pub use config::ExecutorConfig;
pub use error::Error;
pub use executor::CodeExecutor;
pub use registry::{CommandLine, Registry, TemplateVars, ToolchainRecipe};
pub use report::{redact, report, ExecuteResponse};
pub use service::CodeExecutionService;
pub use types::{ExecutionRequest, ExecutionResult, ExecutionStatus, Phase, ResourceLimits};
pub use workspace::{Workspace, WorkspaceManager};

/// Result type for code execution operations
pub type Result<T> = std::result::Result<T, Error>;
