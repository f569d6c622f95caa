//! Store error taxonomy

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

/// Categorized data-service failure. The business engine folds these into
/// `ExecutionResult` codes; nothing here crashes a session.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("customer with phone {phone} already exists: {name}")]
    DuplicatePhone {
        existing_id: Uuid,
        name: String,
        phone: String,
    },

    #[error("insufficient stock for {product}: have {available}, need {requested}")]
    InsufficientStock {
        product: String,
        available: i64,
        requested: i64,
    },

    #[error("invoice already cancelled")]
    AlreadyCancelled,

    #[error("opening balance already set ({existing})")]
    OpeningBalanceExists { existing: Decimal },

    #[error("validation: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("cache error: {0}")]
    Cache(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound("row"),
            other => StoreError::Database(other.to_string()),
        }
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Cache(err.to_string())
    }
}
