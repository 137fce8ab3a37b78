//! Error types shared by the store and the pipeline

use thiserror::Error;

/// Errors raised by the SQLite store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("refused: {0}")]
    Refused(String),

    #[error("database connection lock poisoned")]
    Poisoned,

    #[error("database task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Errors raised while running a pipeline stage
///
/// The variant decides what the task runner does with a failed stage:
/// transient upstream failures are retried, everything else is terminal.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{service} request failed{}: {message}", .status.map(|s| format!(" with status {s}")).unwrap_or_default())]
    Upstream {
        service: &'static str,
        status: Option<u16>,
        message: String,
    },

    #[error("{service} rejected the request with status {status}: {message}")]
    Rejected {
        service: &'static str,
        status: u16,
        message: String,
    },

    #[error("invalid generation response: {0}")]
    InvalidGenerationResponse(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("{0}")]
    Logic(String),

    #[error(transparent)]
    Store(StoreError),
}

impl PipelineError {
    pub fn upstream(service: &'static str, status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Upstream {
            service,
            status,
            message: message.into(),
        }
    }

    /// Error for a non-success HTTP status
    ///
    /// Timeouts, rate limits and server errors may pass; any other 4xx will
    /// fail the same way again.
    pub fn from_status(service: &'static str, status: u16, message: impl Into<String>) -> Self {
        if status == 408 || status == 429 || status >= 500 {
            return Self::upstream(service, Some(status), message);
        }
        Self::Rejected {
            service,
            status,
            message: message.into(),
        }
    }

    /// Whether the task runner should try the stage again
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Upstream { .. })
    }
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => Self::NotFound { entity, id },
            other => Self::Store(other),
        }
    }
}

impl From<rusqlite::Error> for PipelineError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(StoreError::Sqlite(err))
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
