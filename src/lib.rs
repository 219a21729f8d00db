//! # chatframe
//!
//! `chatframe` is a chat service whose subscribers receive the conversation as
//! a stream of JPEG frames. Messages live in a durable `sled` log, subscribers
//! poll it, and a pool of out-of-process workers renders the frames.
//!
//! ## Core Modules
//!
//! - `persistence`: the topic-scoped message log, subscriber sessions and
//!   retention sweep.
//! - `broker`: publishing, per-subscriber topic feeds and rendered frame
//!   streams.
//! - `render`: render jobs, the worker pool and the worker process itself.
//! - `transport`: the WebSocket server.
//! - `config`: loading settings from file and environment.
//! - `utils`: shared error type and logging setup.

pub mod broker;
pub mod config;
pub mod persistence;
pub mod render;
pub mod transport;
pub mod utils;
