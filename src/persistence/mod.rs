//! The `persistence` module is both the message log and the coordination
//! layer between subscribers.
//!
//! There is no broker process: publishers append to a durable `sled` log,
//! subscribers poll it with a timestamp cursor, and subscriber sessions are
//! rows in the same database so every subscription can count its peers.

pub mod clock;
mod keys;
pub mod messages;
pub mod sessions;
pub mod sled_store;

pub use clock::Timestamp;
pub use messages::{Message, MessageStore};
pub use sessions::{SessionGuard, SessionHandle, SubscriberSession, SubscriberTracker};
pub use sled_store::Store;

#[cfg(test)]
mod tests;
