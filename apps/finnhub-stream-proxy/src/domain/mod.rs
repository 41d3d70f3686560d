//! Domain Layer - Core relay types and business rules.
//!
//! Nothing in this layer performs I/O. Shared state uses `parking_lot`
//! locks and atomics so it can be read from any task.

/// Upstream feed types and connection state.
pub mod streaming;

/// Symbol interest tracking with upstream reference counting.
pub mod subscription;

/// Downstream client commands and events.
pub mod session;
