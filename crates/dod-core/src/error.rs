use serde::Serialize;
use std::fmt;
use thiserror::Error;

// ---------------------------------------------------------------------------
// AdapterError
// ---------------------------------------------------------------------------

/// A failed call against the issue tracker.
///
/// Carries the adapter operation that failed, the HTTP status when the
/// tracker answered at all, and a human-readable detail string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterError {
    pub operation: String,
    pub status_code: Option<u16>,
    pub detail: String,
}

impl AdapterError {
    pub fn new(operation: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            status_code: None,
            detail: detail.into(),
        }
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Jira API call failed ({})", self.operation)?;
        if let Some(code) = self.status_code {
            write!(f, " [status={code}]")?;
        }
        write!(f, ": {}", self.detail)
    }
}

impl std::error::Error for AdapterError {}

// ---------------------------------------------------------------------------
// DodError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum DodError {
    #[error("{0}")]
    Config(String),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error("storage error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },

    #[error("corrupt stored value in {column}: {detail}")]
    Corrupt { column: &'static str, detail: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Coarse error bucket for callers that map failures onto their own
/// surface (exit codes, HTTP statuses).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    Adapter,
    Store,
    NotFound,
    Internal,
}

impl DodError {
    pub fn not_found(kind: &'static str, key: impl Into<String>) -> Self {
        DodError::NotFound {
            kind,
            key: key.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DodError::Config(_) => ErrorKind::Config,
            DodError::Adapter(_) => ErrorKind::Adapter,
            DodError::Store(_) | DodError::Corrupt { .. } => ErrorKind::Store,
            DodError::NotFound { .. } => ErrorKind::NotFound,
            DodError::Io(_) | DodError::Yaml(_) | DodError::Json(_) => ErrorKind::Internal,
        }
    }

    /// True when the store rejected a write because of a UNIQUE constraint.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            DodError::Store(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}

pub type Result<T> = std::result::Result<T, DodError>;
