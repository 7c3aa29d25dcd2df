use deadpool_postgres::{BuildError, PoolError};
use thiserror::Error;
use tokio_postgres::error::SqlState;

// DbError is the lowest level error type, wrapping errors from the store layer. It does not wrap
// any higher level errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Concurrent transaction touched the same keys, attempt must be retried
    #[error("transaction conflict")]
    Conflict,

    /// Conflicts persisted through every allowed attempt
    #[error("transaction retries exhausted after {attempts} attempts")]
    RetriesExhausted { attempts: usize },

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Pg(#[from] tokio_postgres::Error),

    #[error(transparent)]
    Migrate(#[from] refinery::Error),

    #[error(transparent)]
    Build(#[from] BuildError),
}

impl DbError {
    /// Whether a fresh attempt of the same transaction could succeed.
    pub fn is_conflict(&self) -> bool {
        match self {
            DbError::Conflict => true,
            DbError::Pg(e) => matches!(
                e.code(),
                Some(code) if *code == SqlState::T_R_SERIALIZATION_FAILURE
                    || *code == SqlState::T_R_DEADLOCK_DETECTED
                    || *code == SqlState::UNIQUE_VIOLATION
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_conflicts_are_retried() {
        assert!(DbError::Conflict.is_conflict());
        assert!(!DbError::RetriesExhausted { attempts: 3 }.is_conflict());
    }
}
