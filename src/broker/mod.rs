//! The `broker` module ties the message log to its consumers: publishing,
//! per-subscriber topic feeds, and feeds rendered to JPEG frames.

pub mod engine;
pub mod feed;
pub mod frames;
pub mod message;

pub use engine::Broker;
pub use feed::TopicFeed;
pub use frames::FrameStream;
pub use message::FeedItem;
