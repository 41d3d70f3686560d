#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Finnhub Stream Proxy - Trade Feed Multiplexer
//!
//! Holds one WebSocket connection to Finnhub's trade stream and relays
//! trades to any number of downstream WebSocket clients. Each symbol is
//! subscribed upstream exactly while at least one client wants it.
//!
//! # Layers (inside -> outside)
//!
//! - **Domain**: symbols, interest reference counting, wire types
//! - **Application**: ports, subscription service, fan-out, client sessions
//! - **Infrastructure**: Finnhub link, relay server, config, health, metrics
//!
//! # Data Flow
//!
//! ```text
//!                     subscribe / unsubscribe
//!   Client 1 ──┐   ┌──────────────────────────┐
//!   Client 2 ──┼──►│  SubscriptionRegistry    │──► command queue ──┐
//!   Client N ──┘   └──────────────────────────┘                    ▼
//!       ▲                                                   ┌─────────────┐
//!       │          ┌──────────────┐    inbound queue        │ UpstreamLink│◄──► Finnhub WS
//!       └──────────│ FanoutRouter │◄────────────────────────└─────────────┘
//!                  └──────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - core types with no I/O.
pub mod domain;

/// Application layer - use cases and port definitions.
pub mod application;

/// Infrastructure layer - adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::session::{ClientCommand, ClientEvent, ClientProtocolError, EncodedEvent};
pub use domain::streaming::{
    ConnectionState, FeedSnapshot, FeedState, TradeEntry, UpstreamCommand, UpstreamMessage,
};
pub use domain::subscription::{
    ClientId, InterestTransition, SubscriptionRegistry, SubscriptionStats, Symbol,
};

// Application services
pub use application::services::{
    ClientDirectory, ClientSession, FanoutRouter, RouteOutcome, SubscriptionService,
};

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, Credentials, ProxyConfig, QueueSettings, ServerSettings, WebSocketSettings,
};

// Upstream link
pub use infrastructure::finnhub::{
    LinkEvent, UpstreamLink, UpstreamLinkConfig, WebSocketConnector,
};

// Servers
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};
pub use infrastructure::relay::{RelayServer, RelayServerError, RelayState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
