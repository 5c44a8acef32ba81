use reqwest::StatusCode;
use thiserror::Error;

use crate::auth::StoreError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Authentication rejected ({status}): {body}")]
    Authentication { status: StatusCode, body: String },

    #[error("Refresh token is missing")]
    RefreshTokenMissing,

    #[error("Refresh token has expired")]
    RefreshTokenExpired,

    #[error("No username/password configured for login")]
    MissingCredentials,

    #[error("Unauthorized - token may be expired")]
    Unauthorized,

    #[error("Still unauthorized after a fresh login")]
    UnauthorizedAfterLogin,

    #[error("Unrecognized response ({status}): {body}")]
    Unrecognized { status: StatusCode, body: String },

    #[error("Network error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Token storage error: {0}")]
    Storage(#[from] StoreError),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        match body.char_indices().nth(MAX_ERROR_BODY_LENGTH) {
            None => body.to_string(),
            Some((cut, _)) => format!(
                "{}... (truncated, {} total bytes)",
                &body[..cut],
                body.len()
            ),
        }
    }

    /// Error for a non-200 answer from the login or refresh endpoint
    pub fn rejected(status: StatusCode, body: &str) -> Self {
        ApiError::Authentication {
            status,
            body: Self::truncate_body(body),
        }
    }

    /// Error for a non-200 answer from the protected endpoint
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        match status {
            StatusCode::UNAUTHORIZED => ApiError::Unauthorized,
            _ => ApiError::Unrecognized {
                status,
                body: Self::truncate_body(body),
            },
        }
    }

    /// The credentials or tokens were refused or unusable.
    pub fn is_authentication(&self) -> bool {
        matches!(
            self,
            ApiError::Authentication { .. }
                | ApiError::RefreshTokenMissing
                | ApiError::RefreshTokenExpired
                | ApiError::MissingCredentials
        )
    }

    /// The protected endpoint answered with a status we do not handle.
    /// Reported without retry; not a reason to fail the process.
    pub fn is_unrecognized(&self) -> bool {
        matches!(self, ApiError::Unrecognized { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status() {
        assert!(matches!(
            ApiError::from_status(StatusCode::UNAUTHORIZED, "expired"),
            ApiError::Unauthorized
        ));

        let err = ApiError::from_status(StatusCode::INTERNAL_SERVER_ERROR, "boom");
        assert!(err.is_unrecognized());
        assert_eq!(err.to_string(), "Unrecognized response (500 Internal Server Error): boom");

        assert!(ApiError::from_status(StatusCode::FORBIDDEN, "").is_unrecognized());
    }

    #[test]
    fn test_rejected_is_authentication() {
        let err = ApiError::rejected(StatusCode::FORBIDDEN, "{\"message\":\"nope\"}");
        assert!(err.is_authentication());
        assert!(!err.is_unrecognized());
        assert!(err.to_string().contains("403"));
        assert!(err.to_string().contains("nope"));

        assert!(ApiError::RefreshTokenExpired.is_authentication());
        assert!(ApiError::RefreshTokenMissing.is_authentication());
        assert!(!ApiError::Unauthorized.is_authentication());
    }

    #[test]
    fn test_truncate_body() {
        let short = "short body";
        assert_eq!(ApiError::truncate_body(short), short);

        let long = "x".repeat(MAX_ERROR_BODY_LENGTH + 10);
        let truncated = ApiError::truncate_body(&long);
        assert!(truncated.starts_with(&"x".repeat(MAX_ERROR_BODY_LENGTH)));
        assert!(truncated.ends_with("(truncated, 510 total bytes)"));
    }

    #[test]
    fn test_truncate_body_multibyte() {
        let long = "é".repeat(MAX_ERROR_BODY_LENGTH + 1);
        let truncated = ApiError::truncate_body(&long);
        assert!(truncated.starts_with(&"é".repeat(MAX_ERROR_BODY_LENGTH)));
    }
}
