//! Errors raised by the credential store.

use thiserror::Error;

/// A result type using `StoreError`.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur while reading or writing stored records.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database could not be opened, read or written.
    #[error("database error: {0}")]
    Database(String),

    /// A record could not be encoded, or the stored bytes are not a valid record.
    #[error("record encoding error: {0}")]
    Encoding(String),
}
