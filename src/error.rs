//! # Errors
//!
//! The error taxonomy surfaced by message handlers. Each variant maps to an
//! HTTP-style status code in replies; provider failures are wrapped so stack
//! detail never leaks to callers.

use http::StatusCode;
use thiserror::Error;

/// Errors returned by message handlers and stores.
#[derive(Error, Debug)]
pub enum Error {
    /// The message envelope is malformed: failed schema validation, an
    /// integrity check, or URL normalization.
    #[error("{0}")]
    BadRequest(String),

    /// Signature verification failed or the signer could not be resolved.
    #[error("{0}")]
    Unauthorized(String),

    /// The message was authenticated but is not permitted to perform the
    /// requested operation.
    #[error("{0}")]
    Forbidden(String),

    /// No matching item was found.
    #[error("{0}")]
    NotFound(String),

    /// The message is older than (or tied with a smaller CID than) the
    /// currently persisted state.
    #[error("{0}")]
    Conflict(String),

    /// The requested capability is not configured on this node.
    #[error("{0}")]
    Unimplemented(String),

    /// A failure not attributable to the message itself.
    #[error(transparent)]
    InternalServerError(#[from] anyhow::Error),
}

impl Error {
    /// The HTTP-style status code for the error.
    #[must_use]
    pub const fn code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) | Self::Forbidden(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Unimplemented(_) => StatusCode::NOT_IMPLEMENTED,
            Self::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The detail message accompanying the status code.
    #[must_use]
    pub fn detail(&self) -> String {
        self.to_string()
    }
}

/// Construct a `BadRequest` error from a format string.
#[macro_export]
macro_rules! unexpected {
    ($($arg:tt)*) => {
        $crate::Error::BadRequest(format!($($arg)*))
    };
}

/// Construct a `Forbidden` error from a format string.
#[macro_export]
macro_rules! forbidden {
    ($($arg:tt)*) => {
        $crate::Error::Forbidden(format!($($arg)*))
    };
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Self::BadRequest(format!("serialization issue: {error}"))
    }
}

impl From<base64ct::Error> for Error {
    fn from(error: base64ct::Error) -> Self {
        Self::BadRequest(format!("base64 issue: {error}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(unexpected!("oops").code(), StatusCode::BAD_REQUEST);
        assert_eq!(forbidden!("no").code(), StatusCode::UNAUTHORIZED);
        assert_eq!(Error::Conflict("tie".to_string()).code(), StatusCode::CONFLICT);
        assert_eq!(Error::Unimplemented("no stream".to_string()).code(), StatusCode::NOT_IMPLEMENTED);
    }
}
