//! Service-wide error taxonomy
//!
//! Every failure that crosses the wire maps to one of these variants; the
//! `kind()` string is the stable machine-readable discriminator callers
//! switch on.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    /// Bad input from the caller (empty term, out-of-range rating, ...).
    #[error("invalid request: {0}")]
    Validation(String),

    /// The upstream catalog or the local store has no such record.
    #[error("not found: {0}")]
    NotFound(String),

    /// A uniqueness rule rejected the write (duplicate save, duplicate username).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The catalog provider was unavailable or answered with an unexpected
    /// status. Retryable by the caller; no retries happen here.
    #[error("upstream service error{}", status_suffix(.status))]
    Remote { status: Option<u16> },

    /// Local persistence failure.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl ServiceError {
    /// Stable snake_case kind for wire responses.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::Validation(_) => "validation",
            ServiceError::NotFound(_) => "not_found",
            ServiceError::Conflict(_) => "conflict",
            ServiceError::Remote { .. } => "remote",
            ServiceError::Storage(_) => "storage",
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" (status {code})"),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(ServiceError::Validation("x".into()).kind(), "validation");
        assert_eq!(ServiceError::NotFound("x".into()).kind(), "not_found");
        assert_eq!(ServiceError::Conflict("x".into()).kind(), "conflict");
        assert_eq!(ServiceError::Remote { status: Some(503) }.kind(), "remote");
    }

    #[test]
    fn remote_message_carries_status() {
        let err = ServiceError::Remote { status: Some(503) };
        assert!(err.to_string().contains("503"));

        let err = ServiceError::Remote { status: None };
        assert_eq!(err.to_string(), "upstream service error");
    }
}
