use thiserror::Error;

use crate::error::BusError;

#[derive(Debug, Error)]
pub enum SqlError {
    #[error("sqlx error: {0}")]
    Sql(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("corrupt log entry: {0}")]
    Decode(#[from] prost::DecodeError),
}

impl From<SqlError> for BusError {
    fn from(error: SqlError) -> Self {
        BusError::Retention(error.to_string())
    }
}
