use shared::error::{ApiErrorBody, RejectionCode};
use thiserror::Error;

pub type ClientResult<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("network failure (timeout={timeout}): {message}")]
    NetworkFailure { timeout: bool, message: String },
    #[error("remote rejected request with status {status}: {message}")]
    RemoteRejection { status: u16, message: String },
    #[error("all {attempts} strategies for '{action}' failed; last error: {last}")]
    AllFallbacksExhausted {
        action: String,
        attempts: usize,
        #[source]
        last: Box<ClientError>,
    },
    #[error("local value '{key}' is corrupt: {message}")]
    LocalStorageCorrupt { key: String, message: String },
    #[error("{0}")]
    ValidationFailure(String),
    #[error("invalid response payload: {0}")]
    Decode(String),
    #[error("local storage failure: {0}")]
    Storage(#[from] anyhow::Error),
}

impl ClientError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkFailure {
            timeout: false,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::NetworkFailure {
            timeout: true,
            message: message.into(),
        }
    }

    pub fn rejection(status: u16, body: &ApiErrorBody, fallback: &str) -> Self {
        Self::RemoteRejection {
            status,
            message: body.message_or(fallback),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationFailure(message.into())
    }

    /// True for transport timeouts, including one wrapped by an exhausted
    /// fallback chain.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::NetworkFailure { timeout, .. } => *timeout,
            Self::AllFallbacksExhausted { last, .. } => last.is_timeout(),
            _ => false,
        }
    }

    pub fn rejection_code(&self) -> Option<RejectionCode> {
        match self {
            Self::RemoteRejection { status, .. } => Some(RejectionCode::from_status(*status)),
            Self::AllFallbacksExhausted { last, .. } => last.rejection_code(),
            _ => None,
        }
    }

    /// Message suitable for a transient status line.
    pub fn user_message(&self) -> String {
        match self {
            Self::NetworkFailure { timeout: true, .. } => {
                "The server took too long to respond".into()
            }
            Self::NetworkFailure { .. } => "Could not reach the server".into(),
            Self::RemoteRejection { message, .. } => message.clone(),
            Self::AllFallbacksExhausted { last, .. } => last.user_message(),
            Self::LocalStorageCorrupt { .. } | Self::Storage(_) => {
                "Could not save changes on this device".into()
            }
            Self::ValidationFailure(message) => message.clone(),
            Self::Decode(_) => "The server sent an unexpected response".into(),
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::timeout(err.to_string());
        }
        if let Some(status) = err.status() {
            return Self::RemoteRejection {
                status: status.as_u16(),
                message: err.to_string(),
            };
        }
        if err.is_decode() {
            return Self::Decode(err.to_string());
        }
        Self::network(err.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_chain_reports_wrapped_timeout() {
        let err = ClientError::AllFallbacksExhausted {
            action: "delete product".into(),
            attempts: 3,
            last: Box::new(ClientError::timeout("deadline elapsed")),
        };
        assert!(err.is_timeout());
        assert_eq!(err.user_message(), "The server took too long to respond");
        assert!(err.to_string().contains("all 3 strategies for 'delete product'"));
    }

    #[test]
    fn rejection_uses_body_message() {
        let err = ClientError::rejection(404, &ApiErrorBody::new("Cart not found"), "Failed");
        assert_eq!(err.user_message(), "Cart not found");
        assert_eq!(err.rejection_code(), Some(RejectionCode::NotFound));
        assert!(!err.is_timeout());
    }
}
