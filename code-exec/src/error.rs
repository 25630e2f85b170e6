use thiserror::Error;

/// Faults of the execution service itself.
///
/// Problems with the submitted program (compile errors, crashes, timeouts,
/// missing toolchains) are not errors; they are reported through
/// [`ExecutionResult`](crate::ExecutionResult).
#[derive(Error, Debug)]
pub enum Error {
    #[error("Workspace error: {0}")]
    Workspace(String),

    #[error("Invalid recipe table: {0}")]
    Registry(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("System error: {0}")]
    System(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True when the host, not the submitted code, is unhealthy.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Error::Workspace(_) | Error::Io(_) | Error::System(_))
    }
}
