use crate::utils::logs;
use chrono::{DateTime, Utc};
use diesel::r2d2::PoolError;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use rand::Rng;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    /// Expected business rejection: duplicate vote or bump cooldown.
    #[error("conflict: {reason}")]
    Conflict {
        reason: String,
        next_eligible_at: Option<DateTime<Utc>>,
    },

    #[error("transient store failure: {0}")]
    TransientStore(String),

    #[error("validation failed: {0}")]
    Validation(String),
}

impl Error {
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::TransientStore(_))
    }

    /// `NotFound` and `Conflict` are outcomes callers handle, not faults.
    pub fn is_expected(&self) -> bool {
        matches!(self, Error::NotFound(_) | Error::Conflict { .. })
    }

    pub fn next_eligible_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Error::Conflict {
                next_eligible_at, ..
            } => *next_eligible_at,
            _ => None,
        }
    }
}

/// Constraint violations are deterministic and never retried; everything
/// else from the store (busy, locked, closed connection) is transient.
impl From<DieselError> for Error {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::NotFound => Error::NotFound("record".to_string()),
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                Error::Conflict {
                    reason: info.message().to_string(),
                    next_eligible_at: None,
                }
            }
            DieselError::DatabaseError(
                DatabaseErrorKind::ForeignKeyViolation
                | DatabaseErrorKind::NotNullViolation
                | DatabaseErrorKind::CheckViolation,
                info,
            ) => Error::Validation(info.message().to_string()),
            other => Error::TransientStore(other.to_string()),
        }
    }
}

impl From<PoolError> for Error {
    fn from(err: PoolError) -> Self {
        Error::TransientStore(err.to_string())
    }
}

pub fn ensure_id(field: &str, value: &str, max_len: usize) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::Validation(format!("{field} must not be empty")));
    }
    if value.chars().count() > max_len {
        return Err(Error::Validation(format!(
            "{field} exceeds {max_len} characters"
        )));
    }
    Ok(())
}

/// Runs `op` and, if it fails with a transient store error, runs it exactly
/// once more after a jittered pause. Store mutations are atomic, so the
/// failed attempt left nothing behind.
pub fn retry_once<T>(operation: &str, backoff_ms: u64, mut op: impl FnMut() -> Result<T>) -> Result<T> {
    match op() {
        Err(err) if err.is_transient() => {
            logs::log_retry(operation, &err);
            if backoff_ms > 0 {
                let pause = rand::rng().random_range(backoff_ms / 2..=backoff_ms);
                std::thread::sleep(Duration::from_millis(pause));
            }
            op()
        }
        result => result,
    }
}
