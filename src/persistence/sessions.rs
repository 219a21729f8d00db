//! Subscriber session bookkeeping.
//!
//! Every subscription writes a row to `subscriber_sessions` when it starts
//! and stamps `end` when it stops. A second tree, `open_sessions`, holds the
//! keys of rows whose `end` is still null; both trees change in one
//! transaction, so counting the open index always agrees with the history.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sled::transaction::abort;
use sled::{Db, Transactional, Tree};
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, warn};
use uuid::Uuid;

use super::clock::{Clock, Timestamp};
use super::keys::{session_key, topic_prefix};
use crate::utils::{Error, Result};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SubscriberSession {
    pub topic: String,
    pub start: Timestamp,
    pub end: Option<Timestamp>,
}

impl SubscriberSession {
    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }
}

/// Identifies one open session. The nonce keeps two sessions that start in
/// the same clock tick apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    pub topic: String,
    pub start: Timestamp,
    nonce: Uuid,
}

impl SessionHandle {
    fn key(&self) -> Vec<u8> {
        session_key(&self.topic, &self.start, &self.nonce)
    }
}

#[derive(Clone)]
pub struct SubscriberTracker {
    sessions: Tree,
    open: Tree,
    clock: Arc<Clock>,
}

impl SubscriberTracker {
    pub(super) fn open(db: &Db, clock: Arc<Clock>) -> Result<Self> {
        Ok(Self {
            sessions: db.open_tree("subscriber_sessions")?,
            open: db.open_tree("open_sessions")?,
            clock,
        })
    }

    /// Record a new open session for `topic`.
    pub fn open_session(&self, topic: &str) -> Result<SessionHandle> {
        let handle = SessionHandle {
            topic: topic.to_string(),
            start: self.clock.now(),
            nonce: Uuid::new_v4(),
        };
        let key = handle.key();
        let value = serde_json::to_vec(&SubscriberSession {
            topic: handle.topic.clone(),
            start: handle.start,
            end: None,
        })?;

        (&self.sessions, &self.open).transaction(|(sessions, open)| {
            if sessions.get(key.as_slice())?.is_some() {
                return abort(Error::Corrupt(format!(
                    "session key collision on topic '{topic}'"
                )));
            }
            sessions.insert(key.as_slice(), value.as_slice())?;
            open.insert(key.as_slice(), Vec::<u8>::new())?;
            Ok(())
        })?;

        debug!(topic, start = %handle.start, "subscriber session opened");
        Ok(handle)
    }

    /// Stamp the session's end. Closing an already closed session leaves the
    /// first end time in place.
    pub fn close_session(&self, handle: &SessionHandle) -> Result<SubscriberSession> {
        let session = self.close_key(&handle.key(), self.clock.now())?;
        debug!(topic = %handle.topic, start = %handle.start, "subscriber session closed");
        Ok(session)
    }

    /// Sessions of `topic` whose end is still null, counted now.
    pub fn active_count(&self, topic: &str) -> Result<usize> {
        let mut count = 0;
        for entry in self.open.scan_prefix(topic_prefix(topic)) {
            entry?;
            count += 1;
        }
        Ok(count)
    }

    /// Full session history of `topic`, oldest first.
    pub fn sessions(&self, topic: &str) -> Result<Vec<SubscriberSession>> {
        self.sessions
            .scan_prefix(topic_prefix(topic))
            .map(|entry| -> Result<SubscriberSession> {
                let (_, value) = entry?;
                Ok(serde_json::from_slice(&value)?)
            })
            .collect()
    }

    /// Close every session left open, e.g. by a process that died without
    /// running its cleanup. Only valid before any subscription of this
    /// process has started.
    pub fn close_dangling(&self) -> Result<usize> {
        let now = self.clock.now();
        let keys = self
            .open
            .iter()
            .keys()
            .collect::<std::result::Result<Vec<_>, _>>()?;
        for key in &keys {
            if let Err(e) = self.close_key(key, now) {
                warn!(error = %e, "failed to close dangling subscriber session");
            }
        }
        Ok(keys.len())
    }

    fn close_key(&self, key: &[u8], end: Timestamp) -> Result<SubscriberSession> {
        let session = (&self.sessions, &self.open).transaction(|(sessions, open)| {
            let Some(raw) = sessions.get(key)? else {
                return abort(Error::UnknownSession(String::from_utf8_lossy(key).into_owned()));
            };
            let mut session: SubscriberSession = match serde_json::from_slice(&raw) {
                Ok(session) => session,
                Err(e) => return abort(Error::Serialization(e)),
            };
            if session.end.is_none() {
                session.end = Some(end);
                let value = match serde_json::to_vec(&session) {
                    Ok(value) => value,
                    Err(e) => return abort(Error::Serialization(e)),
                };
                sessions.insert(key, value)?;
            }
            open.remove(key)?;
            Ok(session)
        })?;
        Ok(session)
    }
}

impl std::fmt::Debug for SubscriberTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberTracker").finish_non_exhaustive()
    }
}

/// Keeps one session open for as long as it lives.
///
/// The session is closed exactly once: by [`SessionGuard::close`], or on drop
/// when the owner is cancelled, fails, or simply goes away.
#[derive(Debug)]
pub struct SessionGuard {
    tracker: SubscriberTracker,
    handle: Option<SessionHandle>,
}

impl SessionGuard {
    pub fn open(tracker: &SubscriberTracker, topic: &str) -> Result<Self> {
        let handle = tracker.open_session(topic)?;
        Ok(Self {
            tracker: tracker.clone(),
            handle: Some(handle),
        })
    }

    /// [`SessionGuard::open`] on the blocking pool. If the caller stops
    /// waiting, the guard is dropped where it was built and the session
    /// closes again.
    pub async fn acquire(tracker: &SubscriberTracker, topic: &str) -> Result<Self> {
        let tracker = tracker.clone();
        let topic = topic.to_string();
        tokio::task::spawn_blocking(move || Self::open(&tracker, &topic)).await?
    }

    pub fn handle(&self) -> Option<&SessionHandle> {
        self.handle.as_ref()
    }

    pub fn close(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        let tracker = &self.tracker;
        off_async_worker(|| tracker.close_session(&handle))?;
        Ok(())
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(error = %e, "failed to close subscriber session");
        }
    }
}

/// Run a sled transaction from synchronous code that may sit on an async
/// worker thread. On a multi-thread runtime the worker hands its other tasks
/// off first, so a transaction that waits on sled cannot starve them.
fn off_async_worker<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current().map(|handle| handle.runtime_flavor()) {
        Ok(RuntimeFlavor::MultiThread) => tokio::task::block_in_place(f),
        _ => f(),
    }
}
