//! Unified application error model and mapping helpers.
//! One enum used across the token, access, retrieval and HTTP layers, with a
//! helper mapper to HTTP status codes.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    Validation { message: String },
    InvalidToken,
    ExpiredToken,
    AccessDenied,
    NotFound { message: String },
    ContentMissing { message: String },
    Delivery { message: String },
    Store { message: String },
}

impl AppError {
    pub fn code_str(&self) -> &str {
        match self {
            AppError::Validation { .. } => "validation",
            AppError::InvalidToken => "invalid_token",
            AppError::ExpiredToken => "expired_token",
            AppError::AccessDenied => "access_denied",
            AppError::NotFound { .. } => "not_found",
            AppError::ContentMissing { .. } => "content_missing",
            AppError::Delivery { .. } => "delivery",
            AppError::Store { .. } => "store",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::Validation { message }
            | AppError::NotFound { message }
            | AppError::ContentMissing { message }
            | AppError::Delivery { message }
            | AppError::Store { message } => message.as_str(),
            AppError::InvalidToken => "Invalid login code.",
            AppError::ExpiredToken => "Login code expired. Request a new one.",
            AppError::AccessDenied => "Access denied.",
        }
    }

    pub fn validation<S: Into<String>>(msg: S) -> Self { AppError::Validation { message: msg.into() } }
    pub fn not_found<S: Into<String>>(msg: S) -> Self { AppError::NotFound { message: msg.into() } }
    pub fn content_missing<S: Into<String>>(msg: S) -> Self { AppError::ContentMissing { message: msg.into() } }
    pub fn delivery<S: Into<String>>(msg: S) -> Self { AppError::Delivery { message: msg.into() } }
    pub fn store<S: Into<String>>(msg: S) -> Self { AppError::Store { message: msg.into() } }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::Validation { .. } => 400,
            AppError::InvalidToken => 400,
            AppError::ExpiredToken => 400,
            AppError::AccessDenied => 403,
            AppError::NotFound { .. } => 404,
            AppError::ContentMissing { .. } => 404,
            AppError::Delivery { .. } => 500,
            AppError::Store { .. } => 500,
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Store { message: err.to_string() }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Store { message: err.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_mapping() {
        assert_eq!(AppError::validation("email is required").http_status(), 400);
        assert_eq!(AppError::InvalidToken.http_status(), 400);
        assert_eq!(AppError::ExpiredToken.http_status(), 400);
        assert_eq!(AppError::AccessDenied.http_status(), 403);
        assert_eq!(AppError::not_found("no document").http_status(), 404);
        assert_eq!(AppError::content_missing("blob gone").http_status(), 404);
        assert_eq!(AppError::delivery("mail provider down").http_status(), 500);
        assert_eq!(AppError::store("write failed").http_status(), 500);
    }

    #[test]
    fn display_carries_code_and_message() {
        let e = AppError::not_found("no such document");
        assert_eq!(e.to_string(), "not_found: no such document");
        assert_eq!(AppError::InvalidToken.code_str(), "invalid_token");
        assert!(!AppError::ExpiredToken.message().is_empty());
    }
}
