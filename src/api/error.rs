//! Shared error handling for API endpoints.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::error;

use crate::license::GatewayError;
use crate::otp::OtpError;
use crate::password::PasswordError;

/// Extension trait for concise error mapping on Results.
pub trait ResultExt<T> {
    fn db_err(self, msg: &str) -> Result<T, ApiError>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for Result<T, E> {
    fn db_err(self, msg: &str) -> Result<T, ApiError> {
        self.map_err(|e| ApiError::db_error(msg, e))
    }
}

/// API error type with automatic response conversion.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Forbidden(String),
    NotFound(String),
    Unauthorized(String),
    Conflict(String),
    /// A signed link or token that was valid once but has expired.
    Gone(String),
    TooManyRequests {
        message: String,
        retry_after_secs: Option<u64>,
    },
    BadGateway(String),
    Internal(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn gone(msg: impl Into<String>) -> Self {
        Self::Gone(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn db_error(context: &str, e: impl std::fmt::Display) -> Self {
        error!("{}: {}", context, e);
        Self::Internal("Database error".into())
    }
}

impl From<OtpError> for ApiError {
    fn from(e: OtpError) -> Self {
        match e {
            OtpError::TokenInvalid => ApiError::bad_request("Invalid or expired link"),
            OtpError::TokenExpired => {
                ApiError::gone("This link has expired. Please request a new one.")
            }
            OtpError::Incorrect => ApiError::bad_request("Incorrect code"),
            OtpError::Cooldown { remaining_secs } => ApiError::TooManyRequests {
                message: format!(
                    "Please wait {} seconds before requesting another code",
                    remaining_secs
                ),
                retry_after_secs: Some(remaining_secs),
            },
            OtpError::DailyLimit => ApiError::TooManyRequests {
                message: "You have reached the daily limit for verification codes. Try again tomorrow."
                    .into(),
                retry_after_secs: None,
            },
            OtpError::Signature(e) => {
                error!("Failed to sign verification token: {}", e);
                ApiError::internal("Failed to issue code")
            }
            OtpError::Storage(e) => ApiError::db_error("One-time code storage failed", e),
        }
    }
}

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::Vendor(e) => {
                error!("License vendor call failed: {}", e);
                ApiError::BadGateway("License service unavailable, please retry".into())
            }
            GatewayError::Rejected(reason) => {
                tracing::info!(reason = %reason, "License rejected by vendor");
                ApiError::bad_request("This license key is not valid")
            }
            GatewayError::Storage(e) => ApiError::db_error("Failed to store license", e),
        }
    }
}

impl From<PasswordError> for ApiError {
    fn from(e: PasswordError) -> Self {
        match e {
            PasswordError::InvalidLength => ApiError::bad_request(e.to_string()),
            PasswordError::Hash(e) => {
                error!("Failed to hash password: {}", e);
                ApiError::internal("Failed to set password")
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_secs: Option<u64>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, retry_after_secs) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, None),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg, None),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, None),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg, None),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg, None),
            ApiError::Gone(msg) => (StatusCode::GONE, msg, None),
            ApiError::TooManyRequests {
                message,
                retry_after_secs,
            } => (StatusCode::TOO_MANY_REQUESTS, message, retry_after_secs),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg, None),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg, None),
        };
        (
            status,
            Json(ErrorResponse {
                error: message,
                retry_after_secs,
            }),
        )
            .into_response()
    }
}

/// Validate a UUID string format.
pub fn validate_uuid(uuid: &str) -> Result<(), ApiError> {
    if uuid.is_empty() {
        return Err(ApiError::bad_request("UUID cannot be empty"));
    }
    if uuid.len() > 36 {
        return Err(ApiError::bad_request("UUID is too long"));
    }
    if uuid::Uuid::parse_str(uuid).is_err() {
        return Err(ApiError::bad_request("Invalid UUID format"));
    }
    Ok(())
}

/// Normalize and sanity-check an email address.
pub fn validate_email(email: &str) -> Result<String, ApiError> {
    let email = email.trim();
    if email.len() > 254 {
        return Err(ApiError::bad_request("Email is too long"));
    }
    let valid = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'))
        && !email.chars().any(char::is_whitespace);
    if !valid {
        return Err(ApiError::bad_request("Invalid email address"));
    }
    Ok(email.to_string())
}
