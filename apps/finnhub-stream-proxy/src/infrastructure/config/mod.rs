//! Configuration Module
//!
//! Configuration loading for the proxy service.

mod settings;

pub use settings::{
    ConfigError, Credentials, DEFAULT_FINNHUB_WS_URL, ProxyConfig, QueueSettings, ServerSettings,
    WebSocketSettings,
};
