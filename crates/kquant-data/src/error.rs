//! 데이터 레이어 에러 타입.

use kquant_core::KquantError;
use thiserror::Error;

/// 데이터 레이어 에러.
#[derive(Debug, Error)]
pub enum DataError {
    /// 데이터베이스 에러
    #[error("Database error: {0}")]
    Database(String),

    /// 캐시 에러
    #[error("Cache error: {0}")]
    Cache(String),

    /// 찾을 수 없음
    #[error("Not found: {0}")]
    NotFound(String),

    /// 잔고 부족
    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    /// 잘못된 입력
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// 불변식 위반
    #[error("Invariant violation: {0}")]
    Invariant(String),

    /// 직렬화 에러
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// 데이터 레이어 Result 타입.
pub type Result<T> = std::result::Result<T, DataError>;

impl From<sqlx::Error> for DataError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DataError::NotFound(err.to_string()),
            _ => DataError::Database(err.to_string()),
        }
    }
}

impl From<DataError> for KquantError {
    fn from(err: DataError) -> Self {
        match err {
            DataError::Database(m) => KquantError::Database(m),
            DataError::Cache(m) => KquantError::Cache(m),
            DataError::NotFound(m) => KquantError::NotFound(m),
            DataError::InsufficientFunds(m) => KquantError::InsufficientFunds(m),
            DataError::InvalidInput(m) => KquantError::InvalidInput(m),
            DataError::Invariant(m) => KquantError::Invariant(m),
            DataError::Serialization(m) => KquantError::Serialization(m),
        }
    }
}

impl From<KquantError> for DataError {
    fn from(err: KquantError) -> Self {
        match err {
            KquantError::InsufficientFunds(m) => DataError::InsufficientFunds(m),
            KquantError::InvalidInput(m) => DataError::InvalidInput(m),
            KquantError::Invariant(m) => DataError::Invariant(m),
            KquantError::NotFound(m) => DataError::NotFound(m),
            other => DataError::InvalidInput(other.to_string()),
        }
    }
}
