//! BingoBongo - HTTP Server Entry Point
//!
//! Loads the task catalog and group directory, then serves the event.

use bingo_bongo::{api, config::Config};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bingo_bongo=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!(
        "Loaded configuration: tasks={}, groups={}, upload limit={}",
        config.tasks_file.display(),
        config.groups_file.display(),
        config.upload_limit_label()
    );

    api::serve(config).await?;

    Ok(())
}
