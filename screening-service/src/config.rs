use std::time::Duration;
use tracing::warn;

pub const DEFAULT_PREDICTION_API_URL: &str = "http://localhost:5000";
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Structured JSON logging for production
    Json,
    /// Human-readable logging for development
    Pretty,
}

impl LogFormat {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        match lookup("LOG_FORMAT").as_deref() {
            Some("pretty") => LogFormat::Pretty,
            _ => LogFormat::Json,
        }
    }
}

/// Startup configuration, read from environment variables
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub prediction_api_url: String,
    pub port: u16,
    pub log_format: LogFormat,
    /// Transport timeout for prediction calls; none when unset
    pub prediction_timeout: Option<Duration>,
    /// Idle sessions older than this are dropped; `SESSION_TTL_SECS=0` keeps them forever
    pub session_ttl: Option<Duration>,
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let prediction_api_url = lookup("PREDICTION_API_URL")
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| DEFAULT_PREDICTION_API_URL.to_string());

        let port = match lookup("PORT") {
            Some(raw) => raw.trim().parse::<u16>().unwrap_or_else(|_| {
                warn!(value = %raw, "Invalid PORT, using {}", DEFAULT_PORT);
                DEFAULT_PORT
            }),
            None => DEFAULT_PORT,
        };

        let log_format = LogFormat::from_lookup(&lookup);

        let prediction_timeout = lookup("PREDICTION_TIMEOUT_SECS").and_then(|raw| {
            match raw.trim().parse::<u64>() {
                Ok(0) => None,
                Ok(secs) => Some(Duration::from_secs(secs)),
                Err(_) => {
                    warn!(value = %raw, "Invalid PREDICTION_TIMEOUT_SECS, no timeout applied");
                    None
                }
            }
        });

        let session_ttl = match lookup("SESSION_TTL_SECS") {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(0) => None,
                Ok(secs) => Some(Duration::from_secs(secs)),
                Err(_) => {
                    warn!(value = %raw, "Invalid SESSION_TTL_SECS, using default");
                    Some(DEFAULT_SESSION_TTL)
                }
            },
            None => Some(DEFAULT_SESSION_TTL),
        };

        Self {
            prediction_api_url,
            port,
            log_format,
            prediction_timeout,
            session_ttl,
        }
    }
}
