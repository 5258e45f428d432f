//! Panel error taxonomy.

use thiserror::Error;

/// Result type for panel calls.
pub type PanelResult<T> = Result<T, PanelError>;

/// Errors returned by panel calls.
#[derive(Debug, Error)]
pub enum PanelError {
    /// Connection failed or the deadline passed before a response arrived.
    #[error("panel unreachable: {0}")]
    Unreachable(String),

    /// The panel refused the credentials or the session expired.
    #[error("panel rejected credentials")]
    AuthRejected,

    /// The panel answered `success: false`.
    #[error("panel rejected request: {message}")]
    Rejected { message: String },

    /// Unexpected HTTP status.
    #[error("panel returned HTTP {status}")]
    Http { status: u16 },

    /// The response body did not match the expected shape.
    #[error("malformed panel response: {0}")]
    Malformed(String),
}

impl PanelError {
    /// Returns true for connection failures and timeouts.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unreachable(_))
    }

    /// Short label for logs and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unreachable(_) => "unreachable",
            Self::AuthRejected => "auth_rejected",
            Self::Rejected { .. } => "rejected",
            Self::Http { .. } => "http",
            Self::Malformed(_) => "malformed",
        }
    }
}

impl From<reqwest::Error> for PanelError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Malformed(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Http {
                status: status.as_u16(),
            }
        } else {
            Self::Unreachable(err.to_string())
        }
    }
}

impl From<serde_json::Error> for PanelError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}
