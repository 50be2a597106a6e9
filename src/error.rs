//! Error types for the client.
//!
//! Each service area has its own error enum so callers only match on the
//! failures that area can produce. Remote failures keep the service's own
//! message; everything else collapses to a fixed fallback when rendered
//! through `user_message`.

use reqwest::StatusCode;
use serde::Deserialize;
use std::fmt;
use thiserror::Error;

/// Shown when a failure carries no usable remote message.
pub const FALLBACK_ERROR_MESSAGE: &str = "An unexpected error occurred";

/// Structured error body returned by the data API.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ApiErrorBody {
    pub code: Option<String>,
    pub message: Option<String>,
    pub details: Option<String>,
    pub hint: Option<String>,
}

impl fmt::Display for ApiErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(code) = &self.code {
            parts.push(format!("Code: {}", code));
        }
        if let Some(message) = &self.message {
            parts.push(format!("Message: {}", message));
        }
        if let Some(details) = &self.details {
            parts.push(format!("Details: {}", details));
        }
        if let Some(hint) = &self.hint {
            parts.push(format!("Hint: {}", hint));
        }
        write!(f, "{}", parts.join(", "))
    }
}

/// Errors from the authentication endpoints.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("API error: {message} (Status: {status})")]
    Api {
        message: String,
        status: StatusCode,
    },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Missing session")]
    MissingSession,
}

// The auth service is inconsistent about where it puts the human-readable
// message, depending on endpoint and version.
#[derive(Deserialize)]
struct AuthErrorBody {
    msg: Option<String>,
    message: Option<String>,
    error_description: Option<String>,
    error: Option<String>,
}

impl AuthError {
    /// Build an [`AuthError::Api`] from a failed response body.
    pub(crate) fn from_response(status: StatusCode, body: &str) -> Self {
        let message = serde_json::from_str::<AuthErrorBody>(body)
            .ok()
            .and_then(|parsed| {
                parsed
                    .msg
                    .or(parsed.message)
                    .or(parsed.error_description)
                    .or(parsed.error)
            })
            .filter(|message| !message.is_empty())
            .unwrap_or_else(|| body.to_string());

        AuthError::Api { message, status }
    }

    /// Message suitable for direct display to a user.
    pub fn user_message(&self) -> String {
        match self {
            AuthError::Api { message, .. } if !message.is_empty() => message.clone(),
            _ => FALLBACK_ERROR_MESSAGE.to_string(),
        }
    }
}

/// Errors from the data endpoints.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("API error: {body} (Status: {status})")]
    Api {
        body: ApiErrorBody,
        status: StatusCode,
    },

    #[error("API error (unparsed): {message} (Status: {status})")]
    UnparsedApi {
        message: String,
        status: StatusCode,
    },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

impl DataError {
    /// Parse a failed response body, falling back to the raw text when it
    /// is not the structured shape.
    pub(crate) fn from_response(status: StatusCode, body: &str) -> Self {
        match serde_json::from_str::<ApiErrorBody>(body) {
            Ok(parsed) => DataError::Api {
                body: parsed,
                status,
            },
            Err(_) => DataError::UnparsedApi {
                message: body.to_string(),
                status,
            },
        }
    }

    /// Message suitable for direct display to a user.
    pub fn user_message(&self) -> String {
        match self {
            DataError::Api { body, .. } => body
                .message
                .clone()
                .filter(|message| !message.is_empty())
                .unwrap_or_else(|| FALLBACK_ERROR_MESSAGE.to_string()),
            DataError::UnparsedApi { message, .. } if !message.is_empty() => message.clone(),
            _ => FALLBACK_ERROR_MESSAGE.to_string(),
        }
    }
}

/// Errors from the storage endpoints.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("API error: {message} (Status: {status})")]
    Api {
        message: String,
        status: StatusCode,
    },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Deserialize)]
struct StorageErrorBody {
    message: Option<String>,
    error: Option<String>,
}

impl StorageError {
    pub(crate) fn from_response(status: StatusCode, body: &str) -> Self {
        let message = serde_json::from_str::<StorageErrorBody>(body)
            .ok()
            .and_then(|parsed| parsed.message.or(parsed.error))
            .filter(|message| !message.is_empty())
            .unwrap_or_else(|| body.to_string());

        StorageError::Api { message, status }
    }

    /// Message suitable for direct display to a user.
    pub fn user_message(&self) -> String {
        match self {
            StorageError::Api { message, .. } if !message.is_empty() => message.clone(),
            _ => FALLBACK_ERROR_MESSAGE.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_error_prefers_msg_field() {
        let error = AuthError::from_response(
            StatusCode::BAD_REQUEST,
            r#"{"code":400,"msg":"Invalid login credentials"}"#,
        );
        assert_eq!(error.user_message(), "Invalid login credentials");
    }

    #[test]
    fn test_auth_error_reads_error_description() {
        let error = AuthError::from_response(
            StatusCode::BAD_REQUEST,
            r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#,
        );
        assert_eq!(error.user_message(), "Invalid login credentials");
    }

    #[test]
    fn test_auth_error_keeps_raw_text_body() {
        let error = AuthError::from_response(StatusCode::BAD_GATEWAY, "upstream timeout");
        match &error {
            AuthError::Api { message, status } => {
                assert_eq!(message, "upstream timeout");
                assert_eq!(*status, StatusCode::BAD_GATEWAY);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_non_api_auth_error_falls_back() {
        assert_eq!(
            AuthError::MissingSession.user_message(),
            FALLBACK_ERROR_MESSAGE
        );
    }

    #[test]
    fn test_data_error_parses_structured_body() {
        let error = DataError::from_response(
            StatusCode::BAD_REQUEST,
            r#"{"code":"22P02","message":"invalid input syntax","details":null,"hint":null}"#,
        );
        match &error {
            DataError::Api { body, .. } => {
                assert_eq!(body.code.as_deref(), Some("22P02"));
                assert_eq!(body.message.as_deref(), Some("invalid input syntax"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(error.user_message(), "invalid input syntax");
    }

    #[test]
    fn test_data_error_unparsed_body() {
        let error = DataError::from_response(StatusCode::INTERNAL_SERVER_ERROR, "boom");
        match &error {
            DataError::UnparsedApi { message, .. } => assert_eq!(message, "boom"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_data_error_empty_message_falls_back() {
        let error = DataError::from_response(StatusCode::BAD_REQUEST, "{}");
        assert_eq!(error.user_message(), FALLBACK_ERROR_MESSAGE);
    }

    #[test]
    fn test_api_error_body_display() {
        let body = ApiErrorBody {
            code: Some("23505".to_string()),
            message: Some("duplicate key".to_string()),
            details: None,
            hint: Some("try upsert".to_string()),
        };
        assert_eq!(
            body.to_string(),
            "Code: 23505, Message: duplicate key, Hint: try upsert"
        );
    }
}
