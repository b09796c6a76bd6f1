use thiserror::Error;

use crate::scoring::Outcome;
use crate::service::ServiceError;
use crate::session::Phase;

/// Failures surfaced by the session engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("stimulus pool exhausted: requested {requested}, pool holds {available}")]
    StimulusPoolExhausted { requested: usize, available: usize },

    #[error("could not start session: {0}")]
    SessionStartFailed(#[source] ServiceError),

    /// The outcome is kept so the caller can retry or persist it
    #[error("could not submit outcome for session {}: {source}", .outcome.session_id)]
    SubmissionFailed {
        #[source]
        source: ServiceError,
        outcome: Box<Outcome>,
    },

    #[error("response for stimulus {got} does not match the current stimulus {expected:?}")]
    InvalidResponse { expected: Option<usize>, got: usize },

    #[error("cannot {action} while {phase}")]
    WrongPhase { phase: Phase, action: &'static str },
}

/// Malformed or missing stimulus pool data
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("pool file {0} not found")]
    Missing(String),
    #[error("pool file {0} is not valid UTF-8")]
    Encoding(String),
    #[error("pool {name} has no items")]
    Empty { name: String },
    #[error("could not read pool: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not parse pool: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Failures of the local result store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not encode outcome: {0}")]
    Json(#[from] serde_json::Error),
    #[error("could not write csv: {0}")]
    Csv(#[from] csv::Error),
}
