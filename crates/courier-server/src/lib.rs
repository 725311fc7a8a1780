//! # courier-server
//!
//! WebSocket front end for the Courier relay: accepts connections, feeds
//! their events to the relay and writes outbound frames back.

pub mod auth;
pub mod config;
pub mod handlers;
pub mod metrics;

pub use config::Config;
pub use handlers::{app, run_server, AppState};
