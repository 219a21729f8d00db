mod settings;

use crate::config::settings::PartialSettings;
use config::{Config, ConfigError, Environment, File};

pub use settings::{FeedSettings, RenderSettings, ServerSettings, Settings, StoreSettings};

/// Loads the configuration from the default file and environment variables
/// (`CHATFRAME__RENDER__WORKERS=8` style) and merges it over the defaults.
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix("CHATFRAME")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(merge(partial, Settings::default()))
}

fn merge(partial: PartialSettings, default: Settings) -> Settings {
    let server = partial.server.unwrap_or_default();
    let store = partial.store.unwrap_or_default();
    let feed = partial.feed.unwrap_or_default();
    let render = partial.render.unwrap_or_default();

    Settings {
        server: ServerSettings {
            host: server.host.unwrap_or(default.server.host),
            port: server.port.unwrap_or(default.server.port),
            log_level: server.log_level.unwrap_or(default.server.log_level),
        },
        store: StoreSettings {
            path: store.path.unwrap_or(default.store.path),
            retention_secs: store.retention_secs.unwrap_or(default.store.retention_secs),
            sweep_interval_secs: store
                .sweep_interval_secs
                .unwrap_or(default.store.sweep_interval_secs),
        },
        feed: FeedSettings {
            poll_interval_ms: feed
                .poll_interval_ms
                .unwrap_or(default.feed.poll_interval_ms),
            catchup_limit: feed.catchup_limit.unwrap_or(default.feed.catchup_limit),
            wake_on_publish: feed.wake_on_publish.unwrap_or(default.feed.wake_on_publish),
        },
        render: RenderSettings {
            workers: render.workers.unwrap_or(default.render.workers),
            width: render.width.unwrap_or(default.render.width),
            height: render.height.unwrap_or(default.render.height),
            timeout_ms: render.timeout_ms.unwrap_or(default.render.timeout_ms),
            max_frame_bytes: render
                .max_frame_bytes
                .unwrap_or(default.render.max_frame_bytes),
            window: render.window.unwrap_or(default.render.window),
            worker_program: render.worker_program.or(default.render.worker_program),
        },
    }
}
