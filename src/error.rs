//! Unified application error model and mapping helpers.
//! The gate, the validation pipeline and the request service all return `AppError`;
//! the HTTP layer only maps kinds to status codes and `{"error","reason"}` bodies.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    /// Caller may not attempt the operation at all.
    #[error("unauthorized: {reason}")]
    Unauthorized { reason: String },
    /// Caller was allowed to write but a validation function rejected the content.
    #[error("forbidden: {reason}")]
    Forbidden { reason: String },
    /// Security object failed type checks; nothing was persisted.
    #[error("invalid security object: {reason}")]
    InvalidPolicy { reason: String },
    #[error("bad request: {reason}")]
    BadRequest { reason: String },
    #[error("not found: {reason}")]
    NotFound { reason: String },
    #[error("conflict: {reason}")]
    Conflict { reason: String },
    #[error("method not allowed: {reason}")]
    MethodNotAllowed { reason: String },
    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl AppError {
    pub fn unauthorized<S: Into<String>>(reason: S) -> Self { AppError::Unauthorized { reason: reason.into() } }
    pub fn forbidden<S: Into<String>>(reason: S) -> Self { AppError::Forbidden { reason: reason.into() } }
    pub fn invalid_policy<S: Into<String>>(reason: S) -> Self { AppError::InvalidPolicy { reason: reason.into() } }
    pub fn bad_request<S: Into<String>>(reason: S) -> Self { AppError::BadRequest { reason: reason.into() } }
    pub fn not_found<S: Into<String>>(reason: S) -> Self { AppError::NotFound { reason: reason.into() } }
    pub fn conflict<S: Into<String>>(reason: S) -> Self { AppError::Conflict { reason: reason.into() } }
    pub fn method_not_allowed<S: Into<String>>(reason: S) -> Self { AppError::MethodNotAllowed { reason: reason.into() } }
    pub fn internal<S: Into<String>>(reason: S) -> Self { AppError::Internal { reason: reason.into() } }

    pub fn reason(&self) -> &str {
        match self {
            AppError::Unauthorized { reason }
            | AppError::Forbidden { reason }
            | AppError::InvalidPolicy { reason }
            | AppError::BadRequest { reason }
            | AppError::NotFound { reason }
            | AppError::Conflict { reason }
            | AppError::MethodNotAllowed { reason }
            | AppError::Internal { reason } => reason.as_str(),
        }
    }

    /// Wire token placed in the `error` field of response bodies.
    pub fn error_str(&self) -> &'static str {
        match self {
            AppError::Unauthorized { .. } => "unauthorized",
            AppError::Forbidden { .. } => "forbidden",
            AppError::InvalidPolicy { .. } | AppError::BadRequest { .. } => "bad_request",
            AppError::NotFound { .. } => "not_found",
            AppError::Conflict { .. } => "conflict",
            AppError::MethodNotAllowed { .. } => "method_not_allowed",
            AppError::Internal { .. } => "internal_server_error",
        }
    }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::Unauthorized { .. } => 401,
            AppError::Forbidden { .. } => 403,
            AppError::InvalidPolicy { .. } | AppError::BadRequest { .. } => 400,
            AppError::NotFound { .. } => 404,
            AppError::Conflict { .. } => 409,
            AppError::MethodNotAllowed { .. } => 405,
            AppError::Internal { .. } => 500,
        }
    }

    pub fn to_body(&self) -> serde_json::Value {
        serde_json::json!({ "error": self.error_str(), "reason": self.reason() })
    }
}

pub type AppResult<T> = Result<T, AppError>;

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal { reason: err.to_string() }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest { reason: format!("invalid json: {}", err) }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod error_tests;
