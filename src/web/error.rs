//! Error types and helpers for mapping failures to HTTP responses.
//!
//! The [`ApiError`] type carries an HTTP status code, a stable error code,
//! and a message. Use [`ResultExt`] to attach status codes to
//! `anyhow::Error` chains, or the [`client_bail!`] and [`status_bail!`]
//! macros for early returns. Clients always receive the
//! `{code, message, details}` shape and never raw internal error text.

use serde::Serialize;
use serde_json::Value;
use std::fmt::{Debug, Display, Formatter};
use warp::http::StatusCode;
use warp::reject::Reject;

/// Stable error codes exposed to clients.
pub mod codes {
    /// Invalid or missing request input.
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
    /// No route matched the request.
    pub const NOT_FOUND: &str = "NOT_FOUND";
    /// The requested object does not exist in the bucket.
    pub const FILE_NOT_FOUND: &str = "FILE_NOT_FOUND";
    /// Ambient Google Cloud credentials are invalid or unrefreshable.
    pub const GCP_AUTH_FAILED: &str = "GCP_AUTH_FAILED";
    /// The resolved credentials cannot provide a signing identity.
    pub const SIGNING_IDENTITY_UNKNOWN: &str = "SIGNING_IDENTITY_UNKNOWN";
    /// Anything unexpected; details stay in the server logs.
    pub const UNEXPECTED_ERROR: &str = "UNEXPECTED_ERROR";
}

/// An error that can be serialized to JSON and returned as an HTTP response.
///
/// The `status` field determines the HTTP status code but is not serialized.
#[derive(Clone, Serialize, Debug)]
pub struct ApiError {
    /// HTTP status code for the response (not serialized).
    #[serde(skip)]
    pub status: StatusCode,
    /// Stable, machine-readable error code.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Optional granular detail, safe for client consumption.
    pub details: Option<Value>,
}

impl Display for ApiError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl Reject for ApiError {}

impl ApiError {
    /// Creates a new API error with the given HTTP status, code, and message.
    pub fn new(status: StatusCode, code: &str, message: impl ToString) -> Self {
        ApiError {
            status,
            code: code.to_string(),
            message: message.to_string(),
            details: None,
        }
    }

    /// The generic server error returned whenever a failure has no
    /// client-facing mapping of its own.
    pub fn unexpected() -> Self {
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            codes::UNEXPECTED_ERROR,
            "An unexpected server error occurred. Please try again later.",
        )
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Extension trait for attaching HTTP status codes to error results.
pub trait ResultExt<T> {
    /// Wraps the error with an [`ApiError`] carrying the given status and code.
    fn with_status(self, status: StatusCode, code: &str) -> Result<T, anyhow::Error>;

    /// Convenience method for `with_status(StatusCode::BAD_REQUEST, INVALID_REQUEST)`.
    fn mark_client_error(self) -> Result<T, anyhow::Error>;
}

impl<T> ResultExt<T> for Result<T, anyhow::Error> {
    fn with_status(self, status: StatusCode, code: &str) -> Result<T, anyhow::Error> {
        match self {
            Ok(t) => Ok(t),
            Err(err) => {
                let message = format!("{:#}", err);
                Err(err.context(ApiError::new(status, code, message)))
            }
        }
    }

    fn mark_client_error(self) -> Result<T, anyhow::Error> {
        self.with_status(StatusCode::BAD_REQUEST, codes::INVALID_REQUEST)
    }
}

/// Early return with a 400 Bad Request error.
#[macro_export]
macro_rules! client_bail {
    ($err:expr $(,)?) => {
        return $crate::web::error::ResultExt::mark_client_error(Err(::anyhow::anyhow!($err)))
    };
    ($fmt:expr, $($arg:tt)*) => {
        return $crate::web::error::ResultExt::mark_client_error(Err(::anyhow::anyhow!($fmt, $($arg)*)))
    };
}

/// Early return with a custom HTTP status and error code.
#[macro_export]
macro_rules! status_bail {
    ($status:expr, $code:expr, $msg:literal $(,)?) => {
        return $crate::web::error::ResultExt::with_status(
            Err(::anyhow::anyhow!($msg)),
            $status,
            $code,
        )
    };
    ($status:expr, $code:expr, $fmt:literal, $($arg:tt)*) => {
        return $crate::web::error::ResultExt::with_status(
            Err(::anyhow::anyhow!($fmt, $($arg)*)),
            $status,
            $code,
        )
    };
}
