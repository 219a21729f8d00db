use std::sync::Arc;

use tracing::{info, warn};

use super::feed::TopicFeed;
use super::frames::FrameStream;
use crate::config::Settings;
use crate::persistence::{Message, Store};
use crate::render::{RenderJob, RenderWorkerPool};
use crate::utils::{Error, Result};

/// The consumer-facing surface of the service.
///
/// Holds the store and the render pool, both built once per process. Cheap to
/// share behind an `Arc`; every method takes `&self`.
#[derive(Debug)]
pub struct Broker {
    store: Store,
    pool: Arc<RenderWorkerPool>,
    settings: Settings,
}

impl Broker {
    pub fn new(store: Store, pool: RenderWorkerPool, settings: Settings) -> Self {
        Self {
            store,
            pool: Arc::new(pool),
            settings,
        }
    }

    /// Persist a message; it is visible to every feed of `topic` from the
    /// next poll round on.
    pub async fn publish(&self, topic: &str, author: &str, body: &str) -> Result<Message> {
        if topic.is_empty() {
            return Err(Error::InvalidInput("topic must not be empty".into()));
        }
        let message = self.store.messages().publish(topic, author, body).await?;
        info!(topic, author, "message stored");
        Ok(message)
    }

    /// A new feed of `topic`. Nothing is registered until the feed is first
    /// polled past its priming sentinel.
    pub fn subscribe(&self, topic: &str) -> TopicFeed {
        TopicFeed::new(
            topic,
            self.store.messages().clone(),
            self.store.subscribers().clone(),
            self.settings.feed.clone(),
        )
    }

    /// A feed of `topic` rendered to JPEG frames.
    pub fn frames(&self, topic: &str) -> FrameStream {
        FrameStream::new(self.subscribe(topic), self.pool.clone(), &self.settings.render)
    }

    pub async fn render(&self, job: &RenderJob) -> Result<Vec<u8>> {
        self.pool.render(job).await
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn pool(&self) -> &RenderWorkerPool {
        &self.pool
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Stop the workers, then flush and close the store.
    pub async fn shutdown(&self) -> Result<()> {
        let stopped = self.pool.stop();
        if stopped < self.pool.size() {
            warn!(stopped, size = self.pool.size(), "some render workers were busy at shutdown");
        }
        self.store.close().await
    }
}
