//! Common error types for prepgate.

use thiserror::Error;

/// Common result type for prepgate operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for the service.
///
/// Validation errors map to 4xx responses with no side effects, upstream
/// errors to 502 with a generic message, and not-found conditions are a
/// normal negative result rather than a failure path.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Configuration loading or validation error
    #[error("configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Upstream service failure (AI generator, payment gateway)
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Internal server error
    #[error("internal error: {0}")]
    Internal(String),
}
