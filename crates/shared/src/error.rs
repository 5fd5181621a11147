use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionCode {
    Unauthorized,
    Forbidden,
    NotFound,
    Validation,
    Conflict,
    RateLimited,
    Internal,
    Other,
}

impl RejectionCode {
    pub fn from_status(status: u16) -> Self {
        match status {
            400 | 422 => RejectionCode::Validation,
            401 => RejectionCode::Unauthorized,
            403 => RejectionCode::Forbidden,
            404 => RejectionCode::NotFound,
            409 => RejectionCode::Conflict,
            429 => RejectionCode::RateLimited,
            500..=599 => RejectionCode::Internal,
            _ => RejectionCode::Other,
        }
    }
}

/// Error body returned by the backend on non-2xx responses.
///
/// Every field is optional; the backend is not consistent about which one it
/// fills in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub status: Option<u16>,
}

impl ApiErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            error: None,
            status: None,
        }
    }

    /// Best human-readable message, or `fallback` when the body carried none.
    pub fn message_or(&self, fallback: &str) -> String {
        self.message
            .as_deref()
            .or(self.error.as_deref())
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(fallback)
            .to_string()
    }
}
