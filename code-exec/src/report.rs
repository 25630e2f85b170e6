//! Caller-facing view of an [`ExecutionResult`].

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::types::{ExecutionResult, ExecutionStatus, Phase};

/// Response body returned to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExecuteResponse {
    Output {
        output: String,
        status: String,
        timed_out: bool,
    },
    Error {
        error: String,
    },
}

/// Map a result onto the response shape. Only program output and a status
/// string leave the service.
pub fn report(result: &ExecutionResult) -> ExecuteResponse {
    if result.status() == ExecutionStatus::UnsupportedLanguage {
        return ExecuteResponse::Error {
            error: result.output().to_string(),
        };
    }

    let mut output = result.output().to_string();
    if result.timed_out() {
        if !output.is_empty() && !output.ends_with('\n') {
            output.push('\n');
        }
        let what = match result.phase() {
            Some(Phase::Compile) => "Compilation",
            _ => "Execution",
        };
        output.push_str(&format!(
            "{} timed out after {} ms",
            what,
            result.duration().as_millis()
        ));
    }

    ExecuteResponse::Output {
        output,
        status: result.status().to_string(),
        timed_out: result.timed_out(),
    }
}

/// Replace every occurrence of the workspace directory with `.`
pub fn redact(output: &str, dir: &Path) -> String {
    let dir = dir.to_string_lossy();
    if dir.is_empty() {
        return output.to_string();
    }
    output.replace(&*dir, ".")
}
