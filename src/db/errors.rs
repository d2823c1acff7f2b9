use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    ConnectionError(String),

    #[error("Query execution error: {0}")]
    QueryError(#[from] sqlx::Error),

    #[error("Transaction error: {0}")]
    TransactionError(String),

    #[error("Integrity constraint violation: {0}")]
    IntegrityError(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Retry limit exceeded after {attempts} attempts")]
    RetryLimitExceeded { attempts: u8 },
}

/// Error classification for [`crate::db::with_retry`]: which failures are
/// worth repeating, and what to return when the attempt cap is hit.
pub trait Retryable: std::fmt::Display {
    fn is_retryable(&self) -> bool;
    fn retry_limit_exceeded(attempts: u8) -> Self;
}

impl Retryable for DatabaseError {
    fn is_retryable(&self) -> bool {
        DatabaseError::is_retryable(self)
    }

    fn retry_limit_exceeded(attempts: u8) -> Self {
        DatabaseError::RetryLimitExceeded { attempts }
    }
}

impl DatabaseError {
    /// Transient storage failures the caller may retry with backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ConnectionError(_) => true,
            Self::QueryError(e) => {
                if let Some(db_error) = e.as_database_error() {
                    matches!(
                        db_error.code().as_deref(),
                        Some("40001") | // serialization_failure
                        Some("40P01") | // deadlock_detected
                        Some("57P03")   // cannot_connect_now
                    )
                } else {
                    matches!(
                        e,
                        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::Protocol(_)
                    )
                }
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, DatabaseError>;
