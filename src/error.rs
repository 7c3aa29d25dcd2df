use crate::db::error::DbError;
use thiserror::Error;

pub type AppResult<T> = Result<T, RenameError>;

/// Errors visible at the rename boundary. Each variant maps onto exactly one
/// boundary code, see [`RenameError::code`].
#[derive(Debug, Error)]
pub enum RenameError {
    /// No verified identity was presented
    #[error("you must be signed in to rename")]
    Unauthenticated,

    /// Input missing, wrong length or containing characters outside [A-Za-z0-9_]
    #[error("username must be 3-15 characters (letters, numbers, underscore)")]
    InvalidFormat,

    /// Renamed too recently
    #[error("you can change your username again in {remaining_days} day(s)")]
    CooldownActive { remaining_days: u32 },

    /// Normalized key is held by another identity
    #[error("that username is already taken")]
    AlreadyTaken,

    #[error(transparent)]
    Store(#[from] DbError),
}

impl RenameError {
    pub fn code(&self) -> &'static str {
        match self {
            RenameError::Unauthenticated => "unauthenticated",
            RenameError::InvalidFormat => "invalid-argument",
            RenameError::CooldownActive { .. } => "failed-precondition",
            RenameError::AlreadyTaken => "already-exists",
            RenameError::Store(_) => "internal",
        }
    }

    /// Only store failures may succeed when repeated unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RenameError::Store(_))
    }
}

#[derive(Debug, Error)]
pub enum ConfigErrorKind {
    #[error("failed to read file: {0}")]
    Read(std::io::Error),

    #[error("failed to parse file: {0}")]
    Parse(toml::de::Error),

    #[error("missing environment variable: {0}")]
    MissingEnv(String),

    #[error("invalid environment variable {0}: {1}")]
    InvalidEnv(String, String),
}

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("invalid configuration in {path}: {source}")]
    Config {
        path: std::path::PathBuf,
        #[source]
        source: ConfigErrorKind,
    },

    #[error("invalid configuration: {0}")]
    Env(#[source] ConfigErrorKind),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinct_per_kind() {
        let errs = [
            RenameError::Unauthenticated,
            RenameError::InvalidFormat,
            RenameError::CooldownActive { remaining_days: 3 },
            RenameError::AlreadyTaken,
            RenameError::Store(DbError::Conflict),
        ];
        let mut codes: Vec<_> = errs.iter().map(|e| e.code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), errs.len());
    }

    #[test]
    fn cooldown_message_carries_days() {
        let e = RenameError::CooldownActive { remaining_days: 5 };
        assert_eq!(e.to_string(), "you can change your username again in 5 day(s)");
        assert!(!e.is_retryable());
        assert!(RenameError::Store(DbError::RetriesExhausted { attempts: 6 }).is_retryable());
    }
}
