//! Error types for field-level value parsing

use thiserror::Error;

/// Result type alias for value parsing
pub type Result<T> = std::result::Result<T, ValueError>;

/// A scalar XML value that could not be converted into its typed form
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValueError {
    #[error("invalid decimal '{0}'")]
    InvalidDecimal(String),

    #[error("invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("unknown direction '{0}', expected CRDT or DBIT")]
    UnknownDirection(String),
}
