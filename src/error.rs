use thiserror::Error;

/// Main error type for Keystone API operations
#[derive(Debug, Error)]
pub enum KeystoneError {
    /// A token string is not a JWT or carries no usable `exp` claim
    #[error("failed to decode token: {0}")]
    Decode(String),

    /// Non-2xx response from the API
    #[error("HTTP error {status}: {body}")]
    Http { status: u16, body: String },

    /// The refresh token itself has expired
    #[error("refresh token has expired, login again to continue")]
    SessionExpired,

    /// An authenticated call was made without a session
    #[error("not authenticated, login first")]
    NotAuthenticated,

    /// A successful response lacked a required field
    #[error("response is missing the `{0}` field")]
    MissingField(&'static str),

    /// Invalid or missing configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Request building error
    #[error("failed to build request: {0}")]
    RequestBuild(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    /// URL parsing error
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

impl KeystoneError {
    /// Create a new HTTP error
    pub fn http(status: u16, body: impl Into<String>) -> Self {
        KeystoneError::Http {
            status,
            body: body.into(),
        }
    }

    /// Check if this error is a permission denied error (403)
    pub fn is_permission_denied(&self) -> bool {
        self.status_code() == Some(403)
    }

    /// Check if this error is a not found error (404)
    pub fn is_not_found(&self) -> bool {
        self.status_code() == Some(404)
    }

    /// Check if this error came from the server or the transport while
    /// talking to it, as opposed to a local decoding or session problem
    pub fn is_auth_error(&self) -> bool {
        matches!(self, KeystoneError::Http { .. } | KeystoneError::Reqwest(_))
    }

    /// Get the HTTP status code if the server answered
    pub fn status_code(&self) -> Option<u16> {
        match self {
            KeystoneError::Http { status, .. } => Some(*status),
            KeystoneError::Reqwest(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Result type for Keystone operations
pub type Result<T> = std::result::Result<T, KeystoneError>;
