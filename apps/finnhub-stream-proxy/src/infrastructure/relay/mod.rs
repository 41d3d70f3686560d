//! Downstream Relay
//!
//! The axum WebSocket server clients connect to, and the task that keeps
//! them informed of upstream link status.

pub mod server;
pub mod status;

pub use server::{RelayServer, RelayServerError, RelayState, router, serve};
pub use status::publish_link_status;
