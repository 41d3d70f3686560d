//! Infrastructure Layer - Adapters and external integrations.

/// Finnhub upstream connection, codec and policies.
pub mod finnhub;

/// Downstream WebSocket server.
pub mod relay;

/// Environment configuration.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Logging and OpenTelemetry tracing.
pub mod telemetry;
