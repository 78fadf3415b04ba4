use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shuttle::{Config, JobKind, LocalStorage, Transfer};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().await?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("shuttle={}", config.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let job = config
        .job
        .clone()
        .context("no [job] section in configuration; set SHUTTLE_CONFIG_PATH")?;
    info!("Starting {:?} transfer {:?} -> {:?}", job.kind, job.source_root, job.destination_root);

    let transfer = Transfer::builder(
        Arc::new(LocalStorage::new(&job.source_root)),
        Arc::new(LocalStorage::new(&job.destination_root)),
    )
    .config(config.transfer.clone())
    .build()?;

    let destination = if job.destination.is_empty() {
        job.source.as_str()
    } else {
        job.destination.as_str()
    };
    let outcome = match job.kind {
        JobKind::Dir => transfer.copy_dir(&job.source, destination).await,
        JobKind::File => transfer.copy_file(&job.source, destination).await,
        JobKind::Stream => transfer.copy_stream(&job.source, destination).await,
    };

    if let Err(e) = outcome {
        error!("Transfer failed: {} (cause: {})", e, e.root_cause());
        if e.is_retryable() {
            warn!("The failure looks transient; rerunning the job may succeed");
        }
        std::process::exit(e.exit_code());
    }

    println!("{}", serde_json::to_string_pretty(&transfer.stats())?);
    Ok(())
}
