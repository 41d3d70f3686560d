//! Heartbeat Monitor
//!
//! Detects dead upstream connections. The link ticks the monitor on a
//! fixed interval and records every inbound frame as activity. After
//! `ping_interval` of silence a ping is requested; if nothing arrives
//! within `pong_timeout` of that ping the connection is declared dead.

use std::time::Duration;

use tokio::time::Instant;

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Silence after which a ping is sent.
    pub ping_interval: Duration,
    /// Time to wait for any frame after a ping.
    pub pong_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(20),
            pong_timeout: Duration::from_secs(10),
        }
    }
}

impl HeartbeatConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(ping_interval: Duration, pong_timeout: Duration) -> Self {
        Self {
            ping_interval,
            pong_timeout,
        }
    }

    /// Create configuration from `WebSocketSettings`.
    #[must_use]
    pub const fn from_websocket_settings(settings: &crate::WebSocketSettings) -> Self {
        Self {
            ping_interval: settings.heartbeat_interval,
            pong_timeout: settings.heartbeat_timeout,
        }
    }

    /// How often the link should call [`HeartbeatMonitor::on_tick`].
    #[must_use]
    pub fn tick_period(&self) -> Duration {
        self.ping_interval
            .min(self.pong_timeout)
            .max(Duration::from_millis(10))
    }
}

/// What the link should do after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Nothing to do.
    Idle,
    /// Send a ping frame.
    SendPing,
    /// No frame arrived after the ping; drop the connection.
    TimedOut,
}

/// Per-connection heartbeat state.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    last_activity: Instant,
    ping_sent_at: Option<Instant>,
}

impl HeartbeatMonitor {
    /// Start monitoring a connection opened at `now`.
    #[must_use]
    pub const fn new(config: HeartbeatConfig, now: Instant) -> Self {
        Self {
            config,
            last_activity: now,
            ping_sent_at: None,
        }
    }

    /// Record an inbound frame.
    pub const fn record_activity(&mut self, now: Instant) {
        self.last_activity = now;
        self.ping_sent_at = None;
    }

    /// Whether a ping is outstanding.
    #[must_use]
    pub const fn is_waiting_for_pong(&self) -> bool {
        self.ping_sent_at.is_some()
    }

    /// Advance the monitor.
    pub fn on_tick(&mut self, now: Instant) -> HeartbeatAction {
        if let Some(sent) = self.ping_sent_at {
            let elapsed = now.saturating_duration_since(sent);
            if elapsed >= self.config.pong_timeout {
                tracing::warn!(
                    elapsed_secs = elapsed.as_secs(),
                    timeout_secs = self.config.pong_timeout.as_secs(),
                    "Heartbeat timeout detected"
                );
                return HeartbeatAction::TimedOut;
            }
            return HeartbeatAction::Idle;
        }

        if now.saturating_duration_since(self.last_activity) >= self.config.ping_interval {
            self.ping_sent_at = Some(now);
            return HeartbeatAction::SendPing;
        }

        HeartbeatAction::Idle
    }
}
