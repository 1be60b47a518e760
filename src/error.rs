use thiserror::Error;

/// Main error type for configuration client operations
#[derive(Debug, Error)]
pub enum AppConfigError {
    /// Fatal at startup: the process must not serve traffic.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    #[error("Azure API error: {0}")]
    AzureApiError(String),

    #[error("Cannot reach configuration store: {0}")]
    ConnectivityError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Connection timeout: {0}")]
    ConnectionTimeout(String),

    #[error("Secret reference could not be resolved: {reference}: {details}")]
    SecretResolutionError { reference: String, details: String },

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("Configuration loading error: {0}")]
    ConfigLoadError(#[from] config::ConfigError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Operation timeout")]
    Timeout,

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl AppConfigError {
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Self::ConfigurationError(msg.into())
    }

    pub fn authentication<S: Into<String>>(msg: S) -> Self {
        Self::AuthenticationError(msg.into())
    }

    pub fn azure_api<S: Into<String>>(msg: S) -> Self {
        Self::AzureApiError(msg.into())
    }

    pub fn connectivity<S: Into<String>>(msg: S) -> Self {
        Self::ConnectivityError(msg.into())
    }

    pub fn network<S: Into<String>>(msg: S) -> Self {
        Self::NetworkError(msg.into())
    }

    pub fn connection_timeout<S: Into<String>>(msg: S) -> Self {
        Self::ConnectionTimeout(msg.into())
    }

    pub fn secret_resolution<S: Into<String>>(reference: S, details: S) -> Self {
        Self::SecretResolutionError {
            reference: reference.into(),
            details: details.into(),
        }
    }

    pub fn serialization<S: Into<String>>(msg: S) -> Self {
        Self::SerializationError(msg.into())
    }

    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn unknown<S: Into<String>>(msg: S) -> Self {
        Self::Unknown(msg.into())
    }

    /// Fatal errors abort startup. Everything else is confined to the reload path.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigurationError(_) | Self::ConfigLoadError(_) | Self::UrlError(_)
        )
    }
}

/// Result type alias for configuration client operations
pub type Result<T> = std::result::Result<T, AppConfigError>;

/// Convert Azure Core errors to AppConfigError
impl From<azure_core::Error> for AppConfigError {
    fn from(error: azure_core::Error) -> Self {
        match error.kind() {
            azure_core::error::ErrorKind::Credential => Self::AuthenticationError(error.to_string()),
            azure_core::error::ErrorKind::Io => Self::ConnectivityError(error.to_string()),
            _ => Self::AzureApiError(error.to_string()),
        }
    }
}
