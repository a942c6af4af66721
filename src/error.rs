use thiserror::Error;

use crate::oracle::OracleError;

/// Errors that unwind the whole run.
///
/// Recoverable conditions (validation failures, supervisor ambiguity) never
/// travel through this type; they are returned as [`Problem`](crate::validation::Problem) values.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Oracle quota exhausted: {0}")]
    QuotaExhausted(String),

    #[error("Oracle rejected credentials (status {status}): {message}")]
    Unauthorized { status: u16, message: String },

    #[error("Oracle unreachable after {attempts} attempts: {last_error}")]
    OracleUnavailable { attempts: u32, last_error: String },

    #[error("Problem not registered in vocabulary: {0}")]
    UnregisteredProblem(String),

    #[error("Run aborted by operator")]
    Aborted,

    #[error("Ledger error: {0}")]
    Ledger(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl FatalError {
    /// Promote a non-retryable oracle failure. Transient errors are the
    /// caller's to count against its attempt budget.
    pub fn from_fatal_oracle(err: OracleError) -> Self {
        match err {
            OracleError::QuotaExhausted(message) => FatalError::QuotaExhausted(message),
            OracleError::Unauthorized { status, message } => {
                FatalError::Unauthorized { status, message }
            }
            other => FatalError::OracleUnavailable {
                attempts: 1,
                last_error: other.to_string(),
            },
        }
    }
}

pub type Result<T, E = FatalError> = std::result::Result<T, E>;
