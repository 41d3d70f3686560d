//! Application Services
//!
//! - `SubscriptionService`: registry changes and the upstream commands they emit
//! - `ClientDirectory`: connected clients and their outbound queues
//! - `FanoutRouter`: upstream trades to interested clients
//! - `ClientSession`: per-client command handling

mod directory;
mod fanout;
mod session;
mod subscription;

pub use directory::{ClientDirectory, ClientRegistration, Delivery};
pub use fanout::{FanoutRouter, RouteOutcome};
pub use session::{ClientSession, SessionClosed};
pub use subscription::SubscriptionService;
