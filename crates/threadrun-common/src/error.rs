use std::time::Duration;

/// Errors surfaced by the orchestration core and its collaborators.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Network failure or timeout while talking to the assistant service.
    #[error("transport error: {0}")]
    Transport(String),

    /// The assistant service rejected the request.
    #[error("provider error (status {status}): {detail}")]
    Provider { status: u16, detail: String },

    /// A run ended without producing a reply.
    #[error("run {run_id} {cause}")]
    RunFailure {
        run_id: String,
        cause: RunFailureCause,
    },

    /// A completed run left no assistant message behind.
    #[error("data consistency: {0}")]
    DataConsistency(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("config: {0}")]
    Config(String),

    #[error("database: {0}")]
    Database(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RunFailureCause {
    #[error("ended with status {status}{}", .last_error.as_deref().map(|e| format!(": {e}")).unwrap_or_default())]
    Status {
        status: String,
        last_error: Option<String>,
    },

    #[error("timed out after {elapsed:?} without reaching a terminal status")]
    Timeout { elapsed: Duration },

    #[error("tool dispatch failed: {0}")]
    Dispatch(String),
}

impl Error {
    /// Short machine-readable label used by the HTTP layer.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Transport(_) => "transport",
            Error::Provider { .. } => "provider",
            Error::RunFailure {
                cause: RunFailureCause::Timeout { .. },
                ..
            } => "run_timeout",
            Error::RunFailure {
                cause: RunFailureCause::Dispatch(_),
                ..
            } => "dispatch",
            Error::RunFailure { .. } => "run_failure",
            Error::DataConsistency(_) => "data_consistency",
            Error::InvalidRequest(_) => "invalid_request",
            Error::Config(_) => "config",
            Error::Database(_) => "database",
            Error::Io(_) => "io",
            Error::Serialization(_) => "serialization",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Error::RunFailure {
                cause: RunFailureCause::Timeout { .. },
                ..
            }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
