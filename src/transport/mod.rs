//! The `transport` module connects dashboards to sessions over WebSockets.
//!
//! It defines the JSON protocol spoken with the dashboard and the server that
//! runs one `Session` per connection, forwarding client requests to it and
//! rendering its results back.

pub mod message;
pub mod websocket;
