use std::collections::VecDeque;
use std::sync::Arc;

use futures::Stream;
use tracing::warn;

use super::feed::TopicFeed;
use crate::config::RenderSettings;
use crate::render::{Instruction, RenderJob, RenderWorkerPool};
use crate::utils::Result;

/// Renders a topic feed into JPEG frames.
///
/// Keeps a rolling window of the most recent messages and renders one frame
/// per feed item, sentinels included, so the visitor count stays current.
#[derive(Debug)]
pub struct FrameStream {
    feed: TopicFeed,
    pool: Arc<RenderWorkerPool>,
    window: VecDeque<Instruction>,
    capacity: usize,
    width: u32,
    height: u32,
}

impl FrameStream {
    pub fn new(feed: TopicFeed, pool: Arc<RenderWorkerPool>, settings: &RenderSettings) -> Self {
        Self {
            feed,
            pool,
            window: VecDeque::with_capacity(settings.window),
            capacity: settings.window,
            width: settings.width,
            height: settings.height,
        }
    }

    pub fn topic(&self) -> &str {
        self.feed.topic()
    }

    /// Messages currently on screen, oldest first.
    pub fn window(&self) -> impl Iterator<Item = &Instruction> {
        self.window.iter()
    }

    /// Render the next frame. `Ok(None)` once the feed has ended.
    pub async fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        let Some(item) = self.feed.next().await else {
            return Ok(None);
        };
        if let Some(message) = item.message {
            self.push(Instruction {
                author: message.author,
                body: message.body,
            });
        }

        let job = RenderJob::from_window(self.width, self.height, item.visitors, &self.window);
        self.pool.render(&job).await.map(Some)
    }

    /// Frames until the feed ends or a render fails; a failure is the last
    /// item.
    pub fn into_stream(self) -> impl Stream<Item = Result<Vec<u8>>> + Send {
        futures::stream::unfold(Some(self), |frames| async move {
            let mut frames = frames?;
            match frames.next_frame().await {
                Ok(Some(image)) => Some((Ok(image), Some(frames))),
                Ok(None) => None,
                Err(e) => {
                    warn!(topic = %frames.topic(), error = %e, "frame stream stopped");
                    Some((Err(e), None))
                }
            }
        })
    }

    fn push(&mut self, instruction: Instruction) {
        if self.capacity == 0 {
            return;
        }
        while self.window.len() >= self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(instruction);
    }
}
