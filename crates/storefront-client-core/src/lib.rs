//! Session-continuity core for the storefront client.
//!
//! Wraps every authenticated API call behind a coordinator that renews
//! short-lived credentials at most once per failure episode, replays the
//! requests that were blocked waiting for the renewal in submission order,
//! and keeps the session fresh with a proactive background probe.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod session;
pub mod transport;

pub use config::{ClientConfig, ConfigError};
pub use coordinator::SessionCoordinator;
pub use error::ApiError;
pub use session::{Identity, Session};
pub use transport::{ApiRequest, ApiResponse, ApiTransport, Method};
