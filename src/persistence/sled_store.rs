//! Store lifecycle backed by `sled`.
//!
//! One sled database holds the message log and the subscriber sessions. A
//! [`Store`] is opened once per process, handed to every task by cloning (all
//! clones share the same database), and closed once at shutdown.
//!
//! Retention runs as a background task: every `sweep_interval` it deletes
//! messages older than `retention`. A failed sweep is logged and retried on
//! the next tick.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sled::Db;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::clock::{Clock, Timestamp};
use super::messages::MessageStore;
use super::sessions::SubscriberTracker;
use crate::config::StoreSettings;
use crate::utils::Result;

#[derive(Clone)]
pub struct Store {
    db: Db,
    messages: MessageStore,
    subscribers: SubscriberTracker,
    sweeper: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Store {
    /// Open or create the database at `path`. Sessions a previous process
    /// left open are closed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path)?;
        Self::with_db(db)
    }

    /// A throwaway database, removed when the last handle drops.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::with_db(db)
    }

    /// Open the configured database and start its retention sweep. Must be
    /// called inside a tokio runtime.
    pub fn start(settings: &StoreSettings) -> Result<Self> {
        let store = Self::open(&settings.path)?;
        store.spawn_sweeper(settings.retention(), settings.sweep_interval());
        Ok(store)
    }

    fn with_db(db: Db) -> Result<Self> {
        let clock = Arc::new(Clock::new());
        let messages = MessageStore::open(&db, clock.clone())?;
        if let Some(newest) = messages.newest_timestamp()? {
            clock.advance_past(newest);
        }
        let subscribers = SubscriberTracker::open(&db, clock)?;

        let dangling = subscribers.close_dangling()?;
        if dangling > 0 {
            warn!(dangling, "closed subscriber sessions left open by a previous run");
        }

        Ok(Self {
            db,
            messages,
            subscribers,
            sweeper: Arc::new(Mutex::new(None)),
        })
    }

    pub fn messages(&self) -> &MessageStore {
        &self.messages
    }

    pub fn subscribers(&self) -> &SubscriberTracker {
        &self.subscribers
    }

    /// Start the periodic retention sweep, replacing any running one. The
    /// first sweep runs immediately.
    pub fn spawn_sweeper(&self, retention: Duration, interval: Duration) {
        if interval.is_zero() {
            warn!("retention sweep disabled: zero interval");
            return;
        }
        let messages = self.messages.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let cutoff = Timestamp::now().minus(retention);
                let store = messages.clone();
                // a full scan; keep it off the async workers
                match tokio::task::spawn_blocking(move || store.sweep_expired(&cutoff)).await {
                    Ok(Ok(removed)) => info!(removed, %cutoff, "swept expired messages"),
                    Ok(Err(e)) => warn!(error = %e, "retention sweep failed"),
                    Err(e) => error!(error = %e, "retention sweep task died"),
                }
            }
        });

        let mut sweeper = self.sweeper.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = sweeper.replace(handle) {
            previous.abort();
        }
    }

    /// Stop the sweep and flush everything to disk.
    pub async fn close(&self) -> Result<()> {
        let sweeper = self
            .sweeper
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = sweeper {
            handle.abort();
        }
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || db.flush()).await??;
        info!("store closed");
        Ok(())
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("db", &"sled::Db")
            .finish()
    }
}
