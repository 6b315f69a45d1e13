use serde_json::json;

/// Failure raised by any of the external collaborators (record store,
/// document store, session properties).
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid identifier: {0}")]
    BadIdentifier(String),

    #[error("{kind} not found: {id}")]
    Missing { kind: &'static str, id: String },

    /// A uniqueness constraint rejected the write.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl GatewayError {
    pub fn missing(kind: &'static str, id: impl Into<String>) -> Self {
        Self::Missing {
            kind,
            id: id.into(),
        }
    }
}

/// Orchestrator-level failure. Every variant maps to one user-facing message
/// and one stable IPC error code.
#[derive(Debug, thiserror::Error)]
pub enum VisitError {
    #[error("{0}")]
    NotFound(String),

    #[error("visit has not been started")]
    NotStarted,

    #[error("visit {sequence} was already started")]
    AlreadyStarted { sequence: i64 },

    #[error("sequence mismatch: expected visit {expected}, but this document is visit {actual}")]
    SequenceMismatch { expected: i64, actual: i64 },

    #[error("no cut-off week configured for {date}")]
    NoCutoffWeek { date: chrono::NaiveDate },

    #[error("{0}")]
    ValidationFailed(String),

    #[error("could not save visit data: {0}")]
    PersistenceFailure(String),

    #[error("visit data was saved but the document could not be locked: {0}")]
    LockFailure(String),
}

impl VisitError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::NotStarted => "not_started",
            Self::AlreadyStarted { .. } => "already_started",
            Self::SequenceMismatch { .. } => "sequence_mismatch",
            Self::NoCutoffWeek { .. } => "no_cutoff_week",
            Self::ValidationFailed(_) => "validation_failed",
            Self::PersistenceFailure(_) => "persistence_failure",
            Self::LockFailure(_) => "lock_failure",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::SequenceMismatch { expected, actual } => {
                Some(json!({ "expected": expected, "actual": actual }))
            }
            Self::AlreadyStarted { sequence } => Some(json!({ "sequenceNumber": sequence })),
            Self::NoCutoffWeek { date } => Some(json!({ "date": date.to_string() })),
            _ => None,
        }
    }
}

impl From<GatewayError> for VisitError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::Missing { kind, id } => Self::NotFound(format!("{kind} not found: {id}")),
            other => Self::PersistenceFailure(other.to_string()),
        }
    }
}
