mod commands;
pub mod config;
pub mod pipeline;

use anyhow::{Context, Result};
use arena_capture::MonitorCapture;
use arena_data::ArenaData;
use arena_vision::{HistogramIndex, ScreenLocator};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

pub use commands::{handle_line, Command};
pub use config::AppConfig;
pub use pipeline::{Control, Pipeline};

/// Run the draft engine as a JSON-lines process: commands on stdin, events and
/// replies on stdout, logs on stderr.
pub async fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "arena_draft=debug,arena_draft_lib=debug,arena_vision=debug,arena_state=debug"
                    .into()
            }),
        )
        .init();

    let config = AppConfig::load()?;
    let data = Arc::new(ArenaData::load(&config.data_dir)?);
    let locator = ScreenLocator::load(&config.anchor_template, config.locator.clone())
        .context("Draft screen anchor template is required")?;
    let index = Arc::new(HistogramIndex::new());

    let (pipeline, mut events) = Pipeline::start(
        &config,
        data,
        index,
        Arc::new(locator),
        Arc::new(MonitorCapture),
    );

    let writer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!("Failed to encode event: {}", e),
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        match handle_line(&pipeline, &line) {
            Ok(Some(reply)) => println!("{}", reply),
            Ok(None) => {}
            Err(e) => {
                warn!("{:#}", e);
                println!("{}", serde_json::json!({ "reply": "error", "message": format!("{:#}", e) }));
            }
        }
    }

    info!("Input closed, shutting down");
    pipeline.shutdown().await;
    let _ = writer.await;
    Ok(())
}
