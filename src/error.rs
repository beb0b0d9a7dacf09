use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Session expired or invalid, please log in again")]
    Unauthorized,

    #[error("Login required")]
    LoginRequired,

    #[error("Not found: {detail}")]
    NotFound { detail: String },

    #[error("{detail}")]
    Validation { status: u16, detail: String },

    #[error("Server error {status}: {detail}")]
    Server { status: u16, detail: String },

    #[error("Request timed out")]
    Timeout,

    #[error("Network error: {0}")]
    Transport(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Token store error: {0}")]
    TokenStore(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("{0}")]
    InvalidInput(String),
}

/// Coarse classes the callers use to decide how a failure is surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Handled globally: token cleared, caller sent to login.
    AuthFailure,
    /// The asset or job exists but is not materialised yet.
    NotReadyYet,
    /// Shown inline on the originating form.
    ValidationFailure,
    /// Logged and skipped; the broader operation continues.
    TransientNetworkFailure,
    /// Blocking message; the user retries explicitly.
    UnrecoverableFailure,
}

impl ClientError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ClientError::Unauthorized | ClientError::LoginRequired => ErrorClass::AuthFailure,
            ClientError::NotFound { .. } => ErrorClass::NotReadyYet,
            ClientError::Validation { .. } | ClientError::InvalidInput(_) => {
                ErrorClass::ValidationFailure
            }
            ClientError::Timeout | ClientError::Transport(_) => {
                ErrorClass::TransientNetworkFailure
            }
            ClientError::Server { status, .. } if *status >= 500 => {
                ErrorClass::TransientNetworkFailure
            }
            ClientError::Server { .. }
            | ClientError::Decode(_)
            | ClientError::TokenStore(_)
            | ClientError::Config(_) => ErrorClass::UnrecoverableFailure,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound { .. })
    }

    /// Map a non-success status and its body to an error. 401 is not handled
    /// here: the client clears the session before producing `Unauthorized`.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let detail = extract_detail(body).unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("Unknown error")
                .to_string()
        });
        match status.as_u16() {
            401 => ClientError::Unauthorized,
            404 => ClientError::NotFound { detail },
            400 | 402 | 403 | 409 | 422 => ClientError::Validation {
                status: status.as_u16(),
                detail,
            },
            code => ClientError::Server {
                status: code,
                detail,
            },
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout
        } else if err.is_decode() {
            ClientError::Decode(err.to_string())
        } else {
            ClientError::Transport(err.to_string())
        }
    }
}

impl From<ClientError> for String {
    fn from(err: ClientError) -> Self {
        err.to_string()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Detail {
    Text(String),
    Items(Vec<DetailItem>),
}

#[derive(Deserialize)]
struct DetailItem {
    msg: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: Detail,
}

/// Pull the human message out of a `{"detail": ...}` error body. FastAPI
/// validation errors arrive as a list of `{msg}` objects.
fn extract_detail(body: &str) -> Option<String> {
    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    match parsed.detail {
        Detail::Text(text) => Some(text),
        Detail::Items(items) if !items.is_empty() => Some(
            items
                .into_iter()
                .map(|i| i.msg)
                .collect::<Vec<_>>()
                .join("; "),
        ),
        Detail::Items(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detail_string_is_used_as_message() {
        let err = ClientError::from_status(
            StatusCode::PAYMENT_REQUIRED,
            r#"{"detail": "Please purchase premium tier to continue"}"#,
        );
        assert_eq!(err.to_string(), "Please purchase premium tier to continue");
        assert_eq!(err.class(), ErrorClass::ValidationFailure);
    }

    #[test]
    fn test_detail_list_is_joined() {
        let body = r#"{"detail": [{"loc": ["body", "email"], "msg": "field required"}, {"msg": "bad password"}]}"#;
        let err = ClientError::from_status(StatusCode::UNPROCESSABLE_ENTITY, body);
        match err {
            ClientError::Validation { status, detail } => {
                assert_eq!(status, 422);
                assert_eq!(detail, "field required; bad password");
            }
            other => panic!("Expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_non_json_body_falls_back_to_reason() {
        let err = ClientError::from_status(StatusCode::NOT_FOUND, "<html>nope</html>");
        match err {
            ClientError::NotFound { detail } => assert_eq!(detail, "Not Found"),
            other => panic!("Expected not found, got {:?}", other),
        }
    }

    #[test]
    fn test_error_classes() {
        assert_eq!(ClientError::Unauthorized.class(), ErrorClass::AuthFailure);
        assert_eq!(ClientError::Timeout.class(), ErrorClass::TransientNetworkFailure);
        assert_eq!(
            ClientError::Server { status: 503, detail: "busy".into() }.class(),
            ErrorClass::TransientNetworkFailure
        );
        assert_eq!(
            ClientError::Server { status: 418, detail: "teapot".into() }.class(),
            ErrorClass::UnrecoverableFailure
        );
        assert_eq!(
            ClientError::NotFound { detail: "Generated image not ready".into() }.class(),
            ErrorClass::NotReadyYet
        );
    }
}
