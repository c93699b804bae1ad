// file: src/error.rs
// version: 2.1.0
// guid: 57b83a63-07b6-4534-aa6c-51e8797254e0

use thiserror::Error;

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, ImageSyncError>;

/// Error types for the TMOS image sync tool
#[derive(Error, Debug)]
pub enum ImageSyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("{service} API returned {status}: {body}")]
    ApiError {
        service: String,
        status: u16,
        body: String,
    },

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Image error: {0}")]
    ImageError(String),

    #[error("Patch error: {0}")]
    PatchError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::DeError),

    #[error("Pattern error: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Signing error: {0}")]
    Signing(#[from] openssl::error::ErrorStack),

    #[error("{store} sync finished with {failures} failed operations")]
    SyncFailed { store: String, failures: usize },
}

impl ImageSyncError {
    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Create a new validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }

    /// Create a new network error
    pub fn network(msg: impl Into<String>) -> Self {
        Self::NetworkError(msg.into())
    }

    /// Create a new API error from a non-success HTTP response
    pub fn api(service: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Self::ApiError {
            service: service.into(),
            status,
            body: body.into(),
        }
    }

    /// Create a new authentication error
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::AuthError(msg.into())
    }

    /// Create a new image error
    pub fn image(msg: impl Into<String>) -> Self {
        Self::ImageError(msg.into())
    }

    /// Create a new patch error
    pub fn patch(msg: impl Into<String>) -> Self {
        Self::PatchError(msg.into())
    }

    /// Create a new timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Whether retrying the failed call could succeed.
    ///
    /// Network failures, timeouts and HTTP 408/429/5xx responses are
    /// transient; everything else is a caller or data problem.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NetworkError(_) | Self::Timeout(_) => true,
            Self::ApiError { status, .. } => {
                *status == 408 || *status == 429 || (500..600).contains(status)
            }
            _ => false,
        }
    }

    /// HTTP status carried by an API error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::ApiError { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ImageSyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_decode() {
            Self::NetworkError(format!("invalid response body: {}", err))
        } else {
            Self::NetworkError(err.to_string())
        }
    }
}

impl From<walkdir::Error> for ImageSyncError {
    fn from(err: walkdir::Error) -> Self {
        match err.into_io_error() {
            Some(io) => Self::Io(io),
            None => Self::ImageError("filesystem loop while scanning images".to_string()),
        }
    }
}

impl From<url::ParseError> for ImageSyncError {
    fn from(err: url::ParseError) -> Self {
        Self::ConfigError(format!("invalid URL: {}", err))
    }
}
