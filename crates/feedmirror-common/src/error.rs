//! Error types shared across feedmirror crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, CommonError>;

/// Errors raised by the shared types and helpers
#[derive(Error, Debug)]
pub enum CommonError {
    #[error("Invalid HTTP date '{value}': {reason}")]
    InvalidHttpDate { value: String, reason: String },

    #[error("Invalid feed URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}
