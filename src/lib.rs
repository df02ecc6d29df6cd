//! # Pullwatch
//!
//! `pullwatch` is an inspection dashboard backend for pull-based message
//! brokers. It pulls messages on demand or on a timer, keeps a local view of
//! what is still waiting for acknowledgment, tracks how long each delivery's
//! lease stays valid and acknowledges messages one by one. Dashboards talk to
//! it over WebSockets.
//!
//! ## Core Modules
//!
//! - `store`: The local message store and its reconciliation rules.
//! - `lease`: Lease eligibility and the periodic lease timer.
//! - `scheduler`: Manual and auto-refresh pulls behind one shared cooldown.
//! - `ack`: Single-message acknowledgment.
//! - `filter`: Search and time-range filtering for the dashboard view.
//! - `session`: Per-connection state tying the pieces together.
//! - `broker`: The broker contract plus Pub/Sub REST and in-memory bindings.
//! - `logs`: Browsing the function logs next to the messages.
//! - `config`: Loads configuration from file and environment.
//! - `transport`: The WebSocket server and its JSON protocol.
//! - `utils`: Errors, logging and owned background tasks.

pub mod ack;
pub mod broker;
pub mod config;
pub mod filter;
pub mod lease;
pub mod logs;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod target;
pub mod transport;
pub mod utils;

#[cfg(test)]
mod testing;
