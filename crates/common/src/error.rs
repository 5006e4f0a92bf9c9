//! Common error types for Winmon components.

use std::fmt;

/// A specialized Result type for Winmon operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for Winmon operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Inventory error: {0}")]
    Inventory(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a new inventory error.
    pub fn inventory(msg: impl fmt::Display) -> Self {
        Error::Inventory(msg.to_string())
    }
}
