//! Per-subscription polling feed.
//!
//! A [`TopicFeed`] turns the message log into a lazy, endless sequence of
//! [`FeedItem`]s for one subscriber:
//!
//! 1. a `(0, none)` sentinel before any I/O
//! 2. open a subscriber session and queue the latest messages as catch-up
//! 3. poll rounds: count open sessions, read past the cursor, hand out the
//!    queued messages oldest first, and emit two sentinels whenever "this
//!    round saw a message" flips
//! 4. sleep the poll interval, or less if a publish to the topic wakes us
//!
//! Every piece of state lives in the struct and is only changed after the
//! await points (session open, sleep), so dropping a pending `next()` loses
//! nothing. The session is held by
//! a [`SessionGuard`]: however the feed ends, it is closed exactly once.

use std::collections::VecDeque;

use futures::Stream;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{error, info};

use super::message::FeedItem;
use crate::config::FeedSettings;
use crate::persistence::{
    Message, MessageStore, SessionGuard, SessionHandle, SubscriberTracker, Timestamp,
};
use crate::utils::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    Register,
    Poll { wait: bool },
    Done,
}

#[derive(Debug)]
pub struct TopicFeed {
    topic: String,
    messages: MessageStore,
    subscribers: SubscriberTracker,
    settings: FeedSettings,
    state: State,
    outbox: VecDeque<FeedItem>,
    buffer: VecDeque<Message>,
    cursor: Timestamp,
    got_message_last: bool,
    session: Option<SessionGuard>,
    wakeups: Option<broadcast::Receiver<String>>,
}

impl TopicFeed {
    pub fn new(
        topic: impl Into<String>,
        messages: MessageStore,
        subscribers: SubscriberTracker,
        settings: FeedSettings,
    ) -> Self {
        let wakeups = settings.wake_on_publish.then(|| messages.watch());
        Self {
            topic: topic.into(),
            messages,
            subscribers,
            settings,
            state: State::Start,
            outbox: VecDeque::new(),
            buffer: VecDeque::new(),
            cursor: Timestamp::epoch(),
            got_message_last: true,
            session: None,
            wakeups,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The open session, once the feed has registered and until it ends.
    pub fn session(&self) -> Option<&SessionHandle> {
        self.session.as_ref().and_then(SessionGuard::handle)
    }

    /// Next item of the feed. `None` only after a failure, which is logged
    /// and has already closed the session.
    pub async fn next(&mut self) -> Option<FeedItem> {
        loop {
            if let Some(item) = self.outbox.pop_front() {
                return Some(item);
            }
            match self.state {
                State::Start => {
                    self.state = State::Register;
                    return Some(FeedItem::sentinel(0));
                }
                State::Register => match self.register().await {
                    Ok(()) => self.state = State::Poll { wait: false },
                    Err(e) => self.fail(e),
                },
                State::Poll { wait } => {
                    if wait {
                        self.wait().await;
                    }
                    match self.poll_round() {
                        Ok(()) => self.state = State::Poll { wait: true },
                        Err(e) => self.fail(e),
                    }
                }
                State::Done => return None,
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = FeedItem> + Send {
        futures::stream::unfold(self, |mut feed| async move {
            let item = feed.next().await?;
            Some((item, feed))
        })
    }

    async fn register(&mut self) -> Result<()> {
        let session = SessionGuard::acquire(&self.subscribers, &self.topic).await?;
        let latest = self
            .messages
            .read_latest(&self.topic, self.settings.catchup_limit)?;

        self.cursor = latest
            .last()
            .map(|message| message.timestamp)
            .unwrap_or_else(Timestamp::epoch);
        self.buffer.extend(latest);
        if let Some(handle) = session.handle() {
            info!(topic = %self.topic, start = %handle.start, catchup = self.buffer.len(), "subscribed");
        }
        self.session = Some(session);
        Ok(())
    }

    fn poll_round(&mut self) -> Result<()> {
        let visitors = self.subscribers.active_count(&self.topic)?;
        let fresh = self.messages.read_since(&self.topic, &self.cursor, None)?;

        let got_message = !fresh.is_empty();
        if let Some(newest) = fresh.last() {
            self.cursor = newest.timestamp;
        }
        self.buffer.extend(fresh);

        while let Some(message) = self.buffer.pop_front() {
            self.outbox.push_back(FeedItem::message(visitors, message));
        }
        if got_message != self.got_message_last {
            self.outbox.push_back(FeedItem::sentinel(visitors));
            self.outbox.push_back(FeedItem::sentinel(visitors));
        }
        self.got_message_last = got_message;
        Ok(())
    }

    async fn wait(&mut self) {
        let sleep = tokio::time::sleep(self.settings.poll_interval());
        tokio::pin!(sleep);

        let Some(wakeups) = self.wakeups.as_mut() else {
            sleep.await;
            return;
        };
        loop {
            tokio::select! {
                _ = &mut sleep => return,
                received = wakeups.recv() => match received {
                    Ok(topic) if topic == self.topic => return,
                    Ok(_) => {}
                    Err(RecvError::Lagged(_)) => return,
                    Err(RecvError::Closed) => break,
                },
            }
        }
        self.wakeups = None;
        sleep.await;
    }

    fn fail(&mut self, e: Error) {
        error!(topic = %self.topic, error = %e, "topic feed stopped");
        self.state = State::Done;
        self.outbox.clear();
        self.buffer.clear();
        if let Some(session) = self.session.take() {
            if let Err(e) = session.close() {
                error!(topic = %self.topic, error = %e, "failed to close subscriber session");
            }
        }
    }
}
