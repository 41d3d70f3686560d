//! Proxy Configuration Settings
//!
//! Configuration types for the stream proxy, loaded from environment variables.

use std::time::Duration;

/// Default Finnhub WebSocket endpoint.
pub const DEFAULT_FINNHUB_WS_URL: &str = "wss://ws.finnhub.io";

/// Finnhub API credentials.
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
}

impl Credentials {
    /// Create new credentials.
    #[must_use]
    pub const fn new(api_key: String) -> Self {
        Self { api_key }
    }

    /// Get the API key.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

/// Upstream WebSocket connection settings.
#[derive(Debug, Clone)]
pub struct WebSocketSettings {
    /// Finnhub endpoint, without the token.
    pub url: String,
    /// Silence before a heartbeat ping.
    pub heartbeat_interval: Duration,
    /// Wait for a response after a ping before declaring the link dead.
    pub heartbeat_timeout: Duration,
    /// Delay after the first failure.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Jitter fraction applied to each delay (0 = none).
    pub reconnect_jitter: f64,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_FINNHUB_WS_URL.to_string(),
            heartbeat_interval: Duration::from_secs(20),
            heartbeat_timeout: Duration::from_secs(10),
            reconnect_delay_initial: Duration::from_millis(1000),
            reconnect_delay_max: Duration::from_secs(60),
            reconnect_delay_multiplier: 2.0,
            reconnect_jitter: 0.0,
        }
    }
}

/// Queue capacities.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    /// Commands waiting to be written upstream.
    pub command_capacity: usize,
    /// Messages waiting for fan-out.
    pub inbound_capacity: usize,
    /// Events waiting to be written to one client.
    pub client_capacity: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            command_capacity: 1024,
            inbound_capacity: 4096,
            client_capacity: 256,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Downstream WebSocket port.
    pub ws_port: u16,
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            ws_port: 8000,
            health_port: 8082,
        }
    }
}

/// Complete proxy configuration.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// API credentials.
    pub credentials: Credentials,
    /// Server port settings.
    pub server: ServerSettings,
    /// Upstream connection settings.
    pub websocket: WebSocketSettings,
    /// Queue capacities.
    pub queues: QueueSettings,
}

impl ProxyConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if `FINNHUB_API_KEY` is missing or empty, or a
    /// queue capacity is zero.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let api_key = env
            .get("FINNHUB_API_KEY")
            .ok_or_else(|| ConfigError::MissingEnvVar("FINNHUB_API_KEY".to_string()))?;
        if api_key.trim().is_empty() {
            return Err(ConfigError::EmptyValue("FINNHUB_API_KEY".to_string()));
        }

        let server_defaults = ServerSettings::default();
        let server = ServerSettings {
            ws_port: env.parse("STREAM_PROXY_WS_PORT", server_defaults.ws_port),
            health_port: env.parse("STREAM_PROXY_HEALTH_PORT", server_defaults.health_port),
        };

        let ws_defaults = WebSocketSettings::default();
        let websocket = WebSocketSettings {
            url: env
                .get("FINNHUB_WS_URL")
                .filter(|url| !url.trim().is_empty())
                .unwrap_or(ws_defaults.url),
            heartbeat_interval: env.duration_secs(
                "STREAM_PROXY_HEARTBEAT_INTERVAL_SECS",
                ws_defaults.heartbeat_interval,
            ),
            heartbeat_timeout: env.duration_secs(
                "STREAM_PROXY_HEARTBEAT_TIMEOUT_SECS",
                ws_defaults.heartbeat_timeout,
            ),
            reconnect_delay_initial: env.duration_millis(
                "STREAM_PROXY_RECONNECT_DELAY_INITIAL_MS",
                ws_defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: env.duration_secs(
                "STREAM_PROXY_RECONNECT_DELAY_MAX_SECS",
                ws_defaults.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: env.factor(
                "STREAM_PROXY_RECONNECT_DELAY_MULTIPLIER",
                ws_defaults.reconnect_delay_multiplier,
                1.0,
            )?,
            reconnect_jitter: env.factor(
                "STREAM_PROXY_RECONNECT_JITTER",
                ws_defaults.reconnect_jitter,
                0.0,
            )?,
        };

        let queue_defaults = QueueSettings::default();
        let queues = QueueSettings {
            command_capacity: env.capacity(
                "STREAM_PROXY_COMMAND_QUEUE_CAPACITY",
                queue_defaults.command_capacity,
            )?,
            inbound_capacity: env.capacity(
                "STREAM_PROXY_INBOUND_QUEUE_CAPACITY",
                queue_defaults.inbound_capacity,
            )?,
            client_capacity: env.capacity(
                "STREAM_PROXY_CLIENT_QUEUE_CAPACITY",
                queue_defaults.client_capacity,
            )?,
        };

        Ok(Self {
            credentials: Credentials::new(api_key),
            server,
            websocket,
            queues,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable has a value outside its allowed range.
    #[error("environment variable {name} has invalid value {value:?}")]
    InvalidValue {
        /// Variable name.
        name: String,
        /// Offending value.
        value: String,
    },
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn duration_secs(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }

    fn capacity(&self, key: &str, default: usize) -> Result<usize, ConfigError> {
        match self.parse(key, default) {
            0 => Err(ConfigError::InvalidValue {
                name: key.to_string(),
                value: "0".to_string(),
            }),
            n => Ok(n),
        }
    }

    /// A finite factor no smaller than `min`.
    fn factor(&self, key: &str, default: f64, min: f64) -> Result<f64, ConfigError> {
        let value = self.parse(key, default);
        if value.is_finite() && value >= min {
            Ok(value)
        } else {
            Err(ConfigError::InvalidValue {
                name: key.to_string(),
                value: value.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use test_case::test_case;

    use super::*;

    fn config_from(vars: &[(&str, &str)]) -> Result<ProxyConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ProxyConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn credentials_redacted_debug() {
        let creds = Credentials::new("key123".to_string());
        let debug = format!("{creds:?}");
        assert!(!debug.contains("key123"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn api_key_is_required() {
        assert!(matches!(
            config_from(&[]),
            Err(ConfigError::MissingEnvVar(name)) if name == "FINNHUB_API_KEY"
        ));
        assert!(matches!(
            config_from(&[("FINNHUB_API_KEY", "  ")]),
            Err(ConfigError::EmptyValue(_))
        ));
    }

    #[test]
    fn defaults_apply() {
        let config = config_from(&[("FINNHUB_API_KEY", "k")]).unwrap();

        assert_eq!(config.credentials.api_key(), "k");
        assert_eq!(config.server.ws_port, 8000);
        assert_eq!(config.server.health_port, 8082);
        assert_eq!(config.websocket.url, DEFAULT_FINNHUB_WS_URL);
        assert_eq!(config.websocket.heartbeat_interval, Duration::from_secs(20));
        assert_eq!(config.websocket.heartbeat_timeout, Duration::from_secs(10));
        assert_eq!(config.websocket.reconnect_delay_initial, Duration::from_secs(1));
        assert_eq!(config.websocket.reconnect_delay_max, Duration::from_secs(60));
        assert!((config.websocket.reconnect_delay_multiplier - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.queues.command_capacity, 1024);
        assert_eq!(config.queues.inbound_capacity, 4096);
        assert_eq!(config.queues.client_capacity, 256);
    }

    #[test]
    fn overrides_apply() {
        let config = config_from(&[
            ("FINNHUB_API_KEY", "k"),
            ("FINNHUB_WS_URL", "ws://localhost:9999/feed"),
            ("STREAM_PROXY_WS_PORT", "9000"),
            ("STREAM_PROXY_RECONNECT_DELAY_INITIAL_MS", "250"),
            ("STREAM_PROXY_RECONNECT_JITTER", "0.2"),
            ("STREAM_PROXY_CLIENT_QUEUE_CAPACITY", "8"),
        ])
        .unwrap();

        assert_eq!(config.websocket.url, "ws://localhost:9999/feed");
        assert_eq!(config.server.ws_port, 9000);
        assert_eq!(config.websocket.reconnect_delay_initial, Duration::from_millis(250));
        assert!((config.websocket.reconnect_jitter - 0.2).abs() < f64::EPSILON);
        assert_eq!(config.queues.client_capacity, 8);
    }

    #[test]
    fn unparseable_values_fall_back_to_defaults() {
        let config = config_from(&[
            ("FINNHUB_API_KEY", "k"),
            ("STREAM_PROXY_WS_PORT", "not-a-port"),
            ("STREAM_PROXY_HEARTBEAT_INTERVAL_SECS", "-5"),
        ])
        .unwrap();

        assert_eq!(config.server.ws_port, 8000);
        assert_eq!(config.websocket.heartbeat_interval, Duration::from_secs(20));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let result = config_from(&[
            ("FINNHUB_API_KEY", "k"),
            ("STREAM_PROXY_INBOUND_QUEUE_CAPACITY", "0"),
        ]);

        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { name, .. }) if name == "STREAM_PROXY_INBOUND_QUEUE_CAPACITY"
        ));
    }

    #[test_case("STREAM_PROXY_RECONNECT_JITTER", "NaN" ; "nan jitter")]
    #[test_case("STREAM_PROXY_RECONNECT_JITTER", "inf" ; "infinite jitter")]
    #[test_case("STREAM_PROXY_RECONNECT_JITTER", "-0.5" ; "negative jitter")]
    #[test_case("STREAM_PROXY_RECONNECT_DELAY_MULTIPLIER", "NaN" ; "nan multiplier")]
    #[test_case("STREAM_PROXY_RECONNECT_DELAY_MULTIPLIER", "inf" ; "infinite multiplier")]
    #[test_case("STREAM_PROXY_RECONNECT_DELAY_MULTIPLIER", "0.5" ; "shrinking multiplier")]
    fn out_of_range_backoff_factor_is_rejected(key: &str, value: &str) {
        let result = config_from(&[("FINNHUB_API_KEY", "k"), (key, value)]);

        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { name, .. }) if name == key
        ));
    }

    #[test]
    fn finite_backoff_factors_are_accepted() {
        let config = config_from(&[
            ("FINNHUB_API_KEY", "k"),
            ("STREAM_PROXY_RECONNECT_DELAY_MULTIPLIER", "1.5"),
            ("STREAM_PROXY_RECONNECT_JITTER", "0.25"),
        ])
        .unwrap();

        assert!((config.websocket.reconnect_delay_multiplier - 1.5).abs() < f64::EPSILON);
        assert!((config.websocket.reconnect_jitter - 0.25).abs() < f64::EPSILON);
    }
}
