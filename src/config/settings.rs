use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Top-level configuration settings for the application.
///
/// One section per subsystem: the WebSocket server, the sled store, the
/// per-subscriber feed loop and the render worker pool.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub store: StoreSettings,
    pub feed: FeedSettings,
    pub render: RenderSettings,
}

/// Configuration settings for the server.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub log_level: String,
}

/// Where messages live and how long they are kept.
#[derive(Debug, Deserialize, Clone)]
pub struct StoreSettings {
    pub path: PathBuf,
    pub retention_secs: u64,
    pub sweep_interval_secs: u64,
}

impl StoreSettings {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Polling behaviour of each subscription.
#[derive(Debug, Deserialize, Clone)]
pub struct FeedSettings {
    pub poll_interval_ms: u64,
    pub catchup_limit: usize,
    /// Poll early when a message is published in this process.
    pub wake_on_publish: bool,
}

impl FeedSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Render worker pool and frame geometry.
#[derive(Debug, Deserialize, Clone)]
pub struct RenderSettings {
    pub workers: usize,
    pub width: u32,
    pub height: u32,
    pub timeout_ms: u64,
    pub max_frame_bytes: usize,
    pub window: usize,
    /// Program to spawn for each worker. `None` re-runs this executable
    /// with the `worker` subcommand.
    pub worker_program: Option<PathBuf>,
}

impl RenderSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Default, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub store: Option<PartialStoreSettings>,
    pub feed: Option<PartialFeedSettings>,
    pub render: Option<PartialRenderSettings>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub log_level: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialStoreSettings {
    pub path: Option<PathBuf>,
    pub retention_secs: Option<u64>,
    pub sweep_interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialFeedSettings {
    pub poll_interval_ms: Option<u64>,
    pub catchup_limit: Option<usize>,
    pub wake_on_publish: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialRenderSettings {
    pub workers: Option<usize>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub timeout_ms: Option<u64>,
    pub max_frame_bytes: Option<usize>,
    pub window: Option<usize>,
    pub worker_program: Option<PathBuf>,
}

/// Provides default values for `Settings`.
///
/// Retention of one hour swept every 1000 seconds, a one second poll, ten
/// messages of catch-up and four render workers.
impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8080,
                log_level: "info".to_string(),
            },
            store: StoreSettings {
                path: PathBuf::from("chatframe_db"),
                retention_secs: 3600,
                sweep_interval_secs: 1000,
            },
            feed: FeedSettings::default(),
            render: RenderSettings::default(),
        }
    }
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            catchup_limit: 10,
            wake_on_publish: true,
        }
    }
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            width: 500,
            height: 400,
            timeout_ms: 5000,
            max_frame_bytes: 8 * 1024 * 1024,
            window: 10,
            worker_program: None,
        }
    }
}
