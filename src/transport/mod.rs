//! The `transport` module is responsible for handling network communication
//! with clients via WebSockets.
//!
//! It defines the JSON protocol spoken with clients and implements the
//! WebSocket server: publishes are forwarded to the broker, subscriptions are
//! answered with a stream of binary JPEG frames.

pub mod message;
pub mod websocket;

pub use websocket::{serve, start_websocket_server};
