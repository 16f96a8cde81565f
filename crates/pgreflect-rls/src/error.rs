//! Error types for the RLS crate.

use thiserror::Error;

/// Errors that can occur while scoping a query.
#[derive(Debug, Error)]
pub enum RlsError {
    /// SQL parsing failed.
    #[error("failed to parse SQL: {0}")]
    ParseError(String),
}
