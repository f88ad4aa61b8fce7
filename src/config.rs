use crate::query::retry::RetryConfig;

pub const DEFAULT_BACKEND: &str = "http://127.0.0.1:8000";

#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the benchmark analysis service
    pub backend_address: String,
    pub retry: RetryConfig,
    /// Transport timeout; `None` leaves requests unbounded
    pub request_timeout_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_address: DEFAULT_BACKEND.to_string(),
            retry: RetryConfig::default(),
            request_timeout_secs: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = RetryConfig::default();
        Self {
            backend_address: std::env::var("BACKEND_ADDRESS").unwrap_or_else(|_| DEFAULT_BACKEND.to_string()),
            retry: RetryConfig {
                max_retries: std::env::var("QUERY_RETRIES").ok().and_then(|v| v.parse().ok()).unwrap_or(defaults.max_retries),
                base_delay_ms: std::env::var("RETRY_BASE_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(defaults.base_delay_ms),
                max_delay_ms: std::env::var("RETRY_MAX_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(defaults.max_delay_ms),
                ..defaults
            },
            request_timeout_secs: std::env::var("REQUEST_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok()),
        }
    }
}
