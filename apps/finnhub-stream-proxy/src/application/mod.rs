//! Application Layer - Use cases and port definitions.

/// Port interfaces for the upstream provider.
pub mod ports;

/// Subscription, fan-out and client session services.
pub mod services;
