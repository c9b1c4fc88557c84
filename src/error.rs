//! Error types for the expression core

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// A persisted expression references a column the schema no longer has.
    /// Kept distinct from every other failure so callers can trigger a
    /// schema-refresh or expression-repair flow instead of surfacing a crash.
    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    /// Unknown expression or operator tag. Always a programming error.
    #[error("Unsupported expression: {0}")]
    Unsupported(String),

    /// The schema cannot support the requested operation, e.g. a "last"
    /// aggregation on a table without an ordering column.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Evaluation error: {0}")]
    Evaluation(String),
}
