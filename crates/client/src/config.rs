//! Client configuration from environment variables.

use std::str::FromStr;
use std::time::Duration;

use url::Url;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8080";
pub const DEFAULT_WS_PATH: &str = "ws";
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(20);
pub const DEFAULT_RECONNECT_BASE: Duration = Duration::from_secs(1);
pub const DEFAULT_RECONNECT_MAX: Duration = Duration::from_secs(20);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_DECISION_WINDOW_SECS: u32 = 30;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid base URL {url:?}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },
    #[error("unsupported URL scheme {0:?} (expected http or https)")]
    UnsupportedScheme(String),
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },
}

/// Exponential backoff for reconnect attempts: `min(max, base * 2^attempt)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_RECONNECT_BASE,
            max_delay: DEFAULT_RECONNECT_MAX,
        }
    }
}

impl ReconnectPolicy {
    /// Calculate delay for a given attempt number
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Settings for the realtime channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// `ws(s)://host[/prefix]/<path>` without the query string.
    endpoint: String,
    pub heartbeat_interval: Duration,
    pub connect_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl ChannelConfig {
    /// Derive the socket endpoint from the HTTP base URL of the backend.
    /// `http` becomes `ws` and `https` becomes `wss`.
    pub fn new(base_url: &str, ws_path: &str) -> Result<Self, ConfigError> {
        let mut url = Url::parse(base_url).map_err(|e| ConfigError::InvalidBaseUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;

        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
        };
        url.set_scheme(scheme)
            .map_err(|()| ConfigError::UnsupportedScheme(url.scheme().to_string()))?;
        url.set_query(None);
        url.set_fragment(None);

        let base = url.as_str().trim_end_matches('/');
        let path = ws_path.trim_matches('/');
        Ok(Self {
            endpoint: format!("{base}/{path}"),
            heartbeat_interval: DEFAULT_HEARTBEAT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect: ReconnectPolicy::default(),
        })
    }

    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Full socket URL carrying the url-encoded bearer token.
    pub fn socket_url(&self, token: &str) -> String {
        format!("{}?token={}", self.endpoint, urlencoding::encode(token))
    }
}

/// Top-level client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub http_timeout: Duration,
    pub decision_window_secs: u32,
    pub channel: ChannelConfig,
}

impl ClientConfig {
    /// Build a configuration with defaults for everything but the backend URL.
    pub fn new(api_base_url: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            decision_window_secs: DEFAULT_DECISION_WINDOW_SECS,
            channel: ChannelConfig::new(api_base_url, DEFAULT_WS_PATH)?,
        })
    }

    /// Parse configuration from environment variables.
    ///
    /// Environment variables:
    /// - `CAPTAIN_API_BASE_URL`: backend HTTP base URL (default: "http://localhost:8080")
    /// - `CAPTAIN_WS_PATH`: socket endpoint path (default: "ws")
    /// - `CAPTAIN_HEARTBEAT_SECS`: ping interval (default: 20)
    /// - `CAPTAIN_RECONNECT_BASE_MS` / `CAPTAIN_RECONNECT_MAX_MS`: backoff bounds (default: 1000 / 20000)
    /// - `CAPTAIN_CONNECT_TIMEOUT_SECS`: socket handshake timeout (default: 10)
    /// - `CAPTAIN_HTTP_TIMEOUT_SECS`: HTTP request timeout (default: 30)
    /// - `CAPTAIN_DECISION_WINDOW_SECS`: offer countdown length (default: 30)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ClientConfig::from_env`] with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let base_url =
            lookup("CAPTAIN_API_BASE_URL").unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());
        let ws_path = lookup("CAPTAIN_WS_PATH").unwrap_or_else(|| DEFAULT_WS_PATH.to_string());

        let heartbeat = parse_var(&lookup, "CAPTAIN_HEARTBEAT_SECS", DEFAULT_HEARTBEAT.as_secs())?;
        let base_ms = parse_var(
            &lookup,
            "CAPTAIN_RECONNECT_BASE_MS",
            DEFAULT_RECONNECT_BASE.as_millis() as u64,
        )?;
        let max_ms = parse_var(
            &lookup,
            "CAPTAIN_RECONNECT_MAX_MS",
            DEFAULT_RECONNECT_MAX.as_millis() as u64,
        )?;
        let connect_timeout = parse_var(
            &lookup,
            "CAPTAIN_CONNECT_TIMEOUT_SECS",
            DEFAULT_CONNECT_TIMEOUT.as_secs(),
        )?;
        let http_timeout =
            parse_var(&lookup, "CAPTAIN_HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT.as_secs())?;
        let decision_window_secs = parse_var(
            &lookup,
            "CAPTAIN_DECISION_WINDOW_SECS",
            DEFAULT_DECISION_WINDOW_SECS,
        )?;

        let channel = ChannelConfig::new(&base_url, &ws_path)?
            .with_heartbeat(Duration::from_secs(heartbeat))
            .with_connect_timeout(Duration::from_secs(connect_timeout))
            .with_reconnect(ReconnectPolicy {
                base_delay: Duration::from_millis(base_ms),
                max_delay: Duration::from_millis(max_ms),
            });

        Ok(Self {
            api_base_url: base_url.trim_end_matches('/').to_string(),
            http_timeout: Duration::from_secs(http_timeout),
            decision_window_secs,
            channel,
        })
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw,
        }),
    }
}
