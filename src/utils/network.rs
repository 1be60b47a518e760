use crate::error::{AppConfigError, Result};
use reqwest::{Client, StatusCode};
use std::time::Duration;

/// Configuration for HTTP client with proper timeouts
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(5),
            user_agent: format!("appconfig-refresh/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl NetworkConfig {
    /// Profile with both connect and request timeouts set to `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            connect_timeout: timeout,
            request_timeout: timeout,
            ..Self::default()
        }
    }
}

/// Create a properly configured HTTP client with timeouts
pub fn create_http_client(config: &NetworkConfig) -> Result<Client> {
    Client::builder()
        .connect_timeout(config.connect_timeout)
        .timeout(config.request_timeout)
        .user_agent(&config.user_agent)
        .build()
        .map_err(|e| AppConfigError::network(format!("Failed to create HTTP client: {}", e)))
}

/// Map a transport failure into a recoverable error with the host name in the message
pub fn classify_network_error(error: &reqwest::Error, url: &str) -> AppConfigError {
    let host = extract_host(url);

    if error.is_timeout() {
        return AppConfigError::connection_timeout(format!(
            "Request to '{}' timed out",
            host
        ));
    }

    if error.is_connect() {
        if is_dns_resolution_error(error) {
            return AppConfigError::connectivity(format!(
                "Unable to resolve host '{}'. Check the endpoint configured in AppConfig:Uri",
                host
            ));
        }
        return AppConfigError::connectivity(format!("Failed to connect to '{}': {}", host, error));
    }

    if let Some(status) = error.status() {
        return classify_status(status, &host, &error.to_string());
    }

    AppConfigError::network(format!("Network error when accessing '{}': {}", host, error))
}

/// Map a non-success HTTP status into an error
pub fn classify_status(status: StatusCode, host: &str, body: &str) -> AppConfigError {
    match status.as_u16() {
        401 | 403 => AppConfigError::authentication(format!(
            "Access to '{}' denied: HTTP {} - {}",
            host, status, body
        )),
        408 => AppConfigError::connection_timeout(format!("'{}' returned HTTP 408", host)),
        429 => AppConfigError::azure_api(format!("'{}' throttled the request: HTTP 429", host)),
        502..=504 => AppConfigError::network(format!(
            "'{}' is temporarily unavailable: HTTP {}",
            host, status
        )),
        _ => AppConfigError::azure_api(format!("'{}' returned HTTP {} - {}", host, status, body)),
    }
}

fn is_dns_resolution_error(error: &reqwest::Error) -> bool {
    let error_msg = error.to_string().to_lowercase();
    let dns_indicators = [
        "dns",
        "name resolution",
        "name or service not known",
        "no such host",
        "failed to lookup address",
        "could not resolve host",
    ];

    dns_indicators
        .iter()
        .any(|&indicator| error_msg.contains(indicator))
}

fn extract_host(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(|h| h.to_string()))
        .unwrap_or_else(|| "unknown-host".to_string())
}

/// Check if an error is worth another attempt within the retry budget
pub fn is_retryable_error(error: &AppConfigError) -> bool {
    match error {
        AppConfigError::ConnectionTimeout(_) | AppConfigError::Timeout => true,
        AppConfigError::NetworkError(msg) => {
            let msg_lower = msg.to_lowercase();
            msg_lower.contains("timeout")
                || msg_lower.contains("temporar")
                || msg_lower.contains("502")
                || msg_lower.contains("503")
                || msg_lower.contains("504")
        }
        AppConfigError::AzureApiError(msg) => {
            let msg_lower = msg.to_lowercase();
            msg_lower.contains("429") || msg_lower.contains("throttled") || msg_lower.contains("500")
        }
        AppConfigError::HttpError(e) => e.is_timeout() || e.is_connect(),
        // DNS and refused connections are not transient within a 5s budget
        AppConfigError::ConnectivityError(_) => false,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_host() {
        assert_eq!(extract_host("https://cfg.example.com/kv?key=a"), "cfg.example.com");
        assert_eq!(extract_host("not a url"), "unknown-host");
    }

    #[test]
    fn test_classify_status() {
        let err = classify_status(StatusCode::FORBIDDEN, "cfg.example.com", "denied");
        assert!(matches!(err, AppConfigError::AuthenticationError(_)));

        let err = classify_status(StatusCode::SERVICE_UNAVAILABLE, "cfg.example.com", "");
        assert!(is_retryable_error(&err));

        let err = classify_status(StatusCode::TOO_MANY_REQUESTS, "cfg.example.com", "");
        assert!(is_retryable_error(&err));

        let err = classify_status(StatusCode::BAD_REQUEST, "cfg.example.com", "bad filter");
        assert!(!is_retryable_error(&err));
    }

    #[test]
    fn test_is_retryable_error() {
        let timeout_error = AppConfigError::connection_timeout("timeout");
        assert!(is_retryable_error(&timeout_error));

        let dns_error = AppConfigError::connectivity("DNS failed");
        assert!(!is_retryable_error(&dns_error));

        let config_error = AppConfigError::configuration("bad");
        assert!(!is_retryable_error(&config_error));
    }

    #[test]
    fn test_default_profile_uses_short_timeouts() {
        let config = NetworkConfig::default();
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert!(config.user_agent.starts_with("appconfig-refresh/"));
    }
}
