//! Error taxonomy for posting and reconciliation.
//!
//! Validation and concurrency errors are recoverable and reach the caller as
//! typed values. Integrity errors abort the unit of work; the candidate stays
//! unposted and can be submitted again.

use rust_decimal::Decimal;
use service_core::error::AppError;
use thiserror::Error;
use uuid::Uuid;

/// Why a candidate or allocation was refused. Never partially applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("voucher is unbalanced: debit {debit} != credit {credit} (difference {difference})")]
    Unbalanced {
        debit: Decimal,
        credit: Decimal,
        difference: Decimal,
    },

    #[error("account '{account_code}' does not exist in the chart of accounts")]
    InvalidAccount { account_code: String },

    #[error("a voucher needs at least two lines, got {count}")]
    TooFewLines { count: usize },

    #[error("line {index} is invalid: {reason}")]
    InvalidLine { index: usize, reason: String },

    #[error("required field '{field}' is missing")]
    MissingField { field: String },

    #[error("allocation rejected: {reason}")]
    InvalidAllocation { reason: String },
}

/// Lost or conflicting ownership. Callers re-fetch state before retrying.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConcurrencyError {
    #[error("claim on task {task_id} is not held by this worker or its lease has expired")]
    StaleClaim { task_id: Uuid },

    #[error("task {task_id} was already resolved with a different outcome")]
    TaskAlreadyResolved { task_id: Uuid },

    #[error("bank transaction {transaction_id} is already matched")]
    AlreadyMatched { transaction_id: Uuid },
}

#[derive(Debug, Error)]
pub enum PostingError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Concurrency(#[from] ConcurrencyError),

    #[error("ledger integrity violation: {0}")]
    Integrity(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("task {task_id} is a {actual} task and cannot take this decision")]
    WrongTaskKind { task_id: Uuid, actual: &'static str },

    #[error("{operation} timed out")]
    Timeout { operation: &'static str },

    #[error("database error: {0}")]
    Database(anyhow::Error),
}

impl PostingError {
    /// Taxonomy class, used as a metrics label and log field.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Concurrency(_) => "concurrency",
            Self::Integrity(_) => "integrity",
            Self::NotFound { .. } => "not_found",
            Self::WrongTaskKind { .. } => "wrong_task_kind",
            Self::Timeout { .. } => "timeout",
            Self::Database(_) => "database",
        }
    }

    /// Transient failures worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Database(_))
    }

    pub fn db(context: &str, err: sqlx::Error) -> Self {
        Self::Database(anyhow::anyhow!("{}: {}", context, err))
    }
}

impl From<PostingError> for AppError {
    fn from(err: PostingError) -> Self {
        match err {
            PostingError::Validation(e) => AppError::BadRequest(anyhow::Error::new(e)),
            PostingError::WrongTaskKind { .. } => AppError::BadRequest(anyhow::anyhow!("{}", err)),
            PostingError::Concurrency(e) => AppError::Conflict(anyhow::Error::new(e)),
            PostingError::NotFound { .. } => AppError::NotFound(anyhow::anyhow!("{}", err)),
            PostingError::Timeout { .. } => AppError::ServiceUnavailable,
            PostingError::Integrity(msg) => {
                AppError::InternalError(anyhow::anyhow!("Ledger integrity violation: {}", msg))
            }
            PostingError::Database(e) => AppError::DatabaseError(e),
        }
    }
}

pub type PostingResult<T> = Result<T, PostingError>;
