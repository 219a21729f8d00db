//! CLI for chatframe
//!
//! Subcommands:
//! - `serve`: run the WebSocket server with its store and render pool
//! - `worker`: run one render worker on stdin/stdout (spawned by the pool)

use std::sync::Arc;

use chatframe::broker::Broker;
use chatframe::config::{Settings, load_config};
use chatframe::persistence::Store;
use chatframe::render::{RenderWorkerPool, WorkerCommand, worker};
use chatframe::transport::start_websocket_server;
use chatframe::utils::{Error, Result, logging};
use clap::Parser;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "chatframe")]
enum Command {
    /// Start the WebSocket server
    Serve,
    /// Render jobs read from stdin, one frame per job on stdout
    Worker,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cmd = Command::parse();

    match cmd {
        Command::Serve => {
            let config = match load_config() {
                Ok(config) => config,
                Err(e) => {
                    logging::init("info");
                    error!("Invalid configuration: {}", e);
                    std::process::exit(1);
                }
            };
            logging::init(&config.server.log_level);
            if let Err(e) = run_server(config).await {
                error!("Server failed: {}", e);
                std::process::exit(1);
            }
        }
        Command::Worker => {
            logging::init("warn");
            if let Err(e) = run_worker().await {
                error!("Worker failed: {}", e);
                std::process::exit(1);
            }
        }
    }
}

async fn run_server(config: Settings) -> Result<()> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let store = Store::start(&config.store)?;
    let command = WorkerCommand::from_settings(&config.render)?;
    let pool = RenderWorkerPool::start(command, &config.render)?;
    let broker = Arc::new(Broker::new(store, pool, config));

    let served = tokio::select! {
        served = start_websocket_server(&addr, broker.clone()) => {
            error!("WebSocket server exited unexpectedly.");
            served
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
            Ok(())
        }
    };

    broker.shutdown().await?;
    served
}

async fn run_worker() -> Result<()> {
    let rendered = tokio::task::spawn_blocking(|| {
        let stdin = std::io::stdin();
        let stdout = std::io::stdout();
        worker::run(stdin.lock(), stdout.lock())
    })
    .await
    .map_err(|e| Error::WorkerFailed(e.to_string()))??;
    info!(rendered, "render worker finished");
    Ok(())
}
