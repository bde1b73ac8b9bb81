//! Typed error type for the db crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// The row does not exist, or was not in the state the statement required.
    #[error("row not found")]
    NotFound,

    /// A column held a value the row model cannot represent.
    #[error("invalid value in column '{column}': {message}")]
    Decode {
        column: &'static str,
        message: String,
    },

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}
