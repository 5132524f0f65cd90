//! Error types for the weekly ledger.
//!
//! Store failures are split into transient ones, which the core recovers from
//! by reporting "no data yet", and configuration failures, which always reach
//! the caller.

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("store misconfigured: {0}")]
    Misconfigured(String),

    #[error("malformed store row: {0}")]
    Decode(String),
}

impl StoreError {
    /// Only a misconfigured store is fatal; everything else is retried later.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::Misconfigured(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(ref db_err) => {
                let fatal = db_err.code().is_some_and(|code| is_config_sqlstate(&code));
                if fatal {
                    StoreError::Misconfigured(err.to_string())
                } else {
                    StoreError::Unavailable(err.to_string())
                }
            }
            sqlx::Error::Configuration(_) | sqlx::Error::Tls(_) | sqlx::Error::Migrate(_) => {
                StoreError::Misconfigured(err.to_string())
            }
            sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::Decode(_)
            | sqlx::Error::TypeNotFound { .. } => StoreError::Decode(err.to_string()),
            _ => StoreError::Unavailable(err.to_string()),
        }
    }
}

/// SQLSTATE classes no retry will fix (auth, missing database or schema,
/// undefined objects). Every other class is treated as transient.
fn is_config_sqlstate(code: &str) -> bool {
    matches!(code.get(..2), Some("28" | "3D" | "3F" | "42"))
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("week starting {0} is closed; start a new session")]
    WeekClosed(String),

    #[error("no assignment for task {0}")]
    UnknownTask(String),

    #[error("records for {0} could not all be loaded; reload before changing ticks")]
    SessionDegraded(String),

    #[error("{0} is counted from exam results and cannot be ticked")]
    ExamTaskNotToggleable(String),

    #[error("change to {task} was not saved: {source}")]
    NotPersisted {
        task: String,
        #[source]
        source: StoreError,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use std::borrow::Cow;
    use std::fmt;

    use sqlx::error::{DatabaseError, ErrorKind};

    use super::*;

    #[derive(Debug)]
    struct ServerError(&'static str);

    impl fmt::Display for ServerError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "server error {}", self.0)
        }
    }

    impl std::error::Error for ServerError {}

    impl DatabaseError for ServerError {
        fn message(&self) -> &str {
            "server error"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            Some(Cow::Borrowed(self.0))
        }

        fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::Other
        }
    }

    fn from_sqlstate(code: &'static str) -> StoreError {
        sqlx::Error::Database(Box::new(ServerError(code))).into()
    }

    #[test]
    fn only_misconfiguration_is_fatal() {
        assert!(StoreError::Misconfigured("no pool".into()).is_fatal());
        assert!(!StoreError::Unavailable("reset".into()).is_fatal());
        assert!(!StoreError::Timeout(Duration::from_secs(3)).is_fatal());
        assert!(!StoreError::Decode("bad day".into()).is_fatal());
    }

    #[test]
    fn pool_timeouts_are_transient() {
        let err: StoreError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, StoreError::Unavailable(_)));
        let err: StoreError = sqlx::Error::Configuration("bad url".into()).into();
        assert!(err.is_fatal());
    }

    #[test]
    fn busy_or_restarting_server_is_transient() {
        for code in ["53300", "40001", "57P01", "57014", "08006"] {
            let err = from_sqlstate(code);
            assert!(matches!(err, StoreError::Unavailable(_)), "{code}: {err:?}");
        }
    }

    #[test]
    fn schema_and_auth_errors_are_fatal() {
        for code in ["28P01", "3D000", "3F000", "42P01"] {
            assert!(from_sqlstate(code).is_fatal(), "{code}");
        }
    }
}
