use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Code execution request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Language identifier, matched case-insensitively against the registry
    pub language: String,
    /// Source code to execute. Only ever written to a file.
    pub code: String,
    /// Requested wall-clock budget; clamped to the configured maximum
    #[serde(default, with = "millis::option")]
    pub timeout: Option<Duration>,
}

impl ExecutionRequest {
    pub fn new(language: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            code: code.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    UnsupportedLanguage,
    CompilationError,
    RuntimeError,
    Timeout,
    ToolchainUnavailable,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::UnsupportedLanguage => "unsupported_language",
            ExecutionStatus::CompilationError => "compilation_error",
            ExecutionStatus::RuntimeError => "runtime_error",
            ExecutionStatus::Timeout => "timeout",
            ExecutionStatus::ToolchainUnavailable => "toolchain_unavailable",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Step of a recipe that produced a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Compile,
    Run,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Compile => f.write_str("compile"),
            Phase::Run => f.write_str("run"),
        }
    }
}

/// Outcome of one execution request.
///
/// Built once by the dispatcher and never mutated afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    status: ExecutionStatus,
    output: String,
    timed_out: bool,
    failed: bool,
    exit_code: Option<i32>,
    phase: Option<Phase>,
    #[serde(rename = "duration_ms", serialize_with = "millis::serialize")]
    duration: Duration,
}

impl ExecutionResult {
    fn new(status: ExecutionStatus, output: String, duration: Duration) -> Self {
        Self {
            status,
            output,
            timed_out: status == ExecutionStatus::Timeout,
            failed: status != ExecutionStatus::Success,
            exit_code: None,
            phase: None,
            duration,
        }
    }

    pub(crate) fn success(output: String, duration: Duration) -> Self {
        Self {
            exit_code: Some(0),
            ..Self::new(ExecutionStatus::Success, output, duration)
        }
    }

    pub(crate) fn unsupported_language(language: &str) -> Self {
        Self::new(
            ExecutionStatus::UnsupportedLanguage,
            format!("Unsupported language: {}", language),
            Duration::ZERO,
        )
    }

    pub(crate) fn toolchain_unavailable(
        output: String,
        reason: &str,
        phase: Option<Phase>,
        duration: Duration,
    ) -> Self {
        let mut output = output;
        if !output.is_empty() && !output.ends_with('\n') {
            output.push('\n');
        }
        output.push_str(&format!("Error: {}", reason));
        Self {
            phase,
            ..Self::new(ExecutionStatus::ToolchainUnavailable, output, duration)
        }
    }

    pub(crate) fn compilation_error(
        output: String,
        exit_code: Option<i32>,
        duration: Duration,
    ) -> Self {
        Self {
            exit_code,
            phase: Some(Phase::Compile),
            ..Self::new(ExecutionStatus::CompilationError, output, duration)
        }
    }

    pub(crate) fn runtime_error(output: String, exit_code: Option<i32>, duration: Duration) -> Self {
        Self {
            exit_code,
            phase: Some(Phase::Run),
            ..Self::new(ExecutionStatus::RuntimeError, output, duration)
        }
    }

    pub(crate) fn timeout(output: String, phase: Phase, duration: Duration) -> Self {
        Self {
            phase: Some(phase),
            ..Self::new(ExecutionStatus::Timeout, output, duration)
        }
    }

    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    /// Compile output (if any) followed by run output
    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    pub fn failed(&self) -> bool {
        self.failed
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Phase that failed, if the failure happened inside a recipe step
    pub fn phase(&self) -> Option<Phase> {
        self.phase
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}

/// Resource limits applied to every child process
#[derive(Debug, Clone)]
pub struct ResourceLimits {
    /// Maximum CPU time (seconds)
    pub cpu_time: u32,
    /// Maximum size of any file the child writes (bytes)
    pub file_size: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_time: 30,
            file_size: 64 * 1024 * 1024, // 64MB
        }
    }
}

mod millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let ms = Option::<u64>::deserialize(deserializer)?;
            Ok(ms.map(Duration::from_millis))
        }
    }
}
