use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use tokio_util::sync::CancellationToken;
use wgkex_common::{config::Config, WorkerId};
use wgkex_worker::{flusher, installer, metrics, mqtt, queue::WorkQueue};

#[derive(Debug, Parser)]
#[clap(name = "wgkex-worker", author, version, about)]
struct Opts {
    /// Overrides `$WGKEX_CONFIG_FILE`.
    #[clap(short, long)]
    config: Option<PathBuf>,
}

/// Grace period given to the last-will/shutdown publishes before the
/// process actually exits.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();
    let opts = Opts::parse();

    let config = match opts.config {
        Some(path) => Config::load(&path)?,
        None => Config::load_from_env()?,
    };
    let known_domains = config.validated_domains()?;

    let worker_id = match &config.external_name {
        Some(name) => WorkerId::new(name.as_str()),
        None => WorkerId::new(hostname::get()?.to_string_lossy().into_owned()),
    };

    let exit = CancellationToken::new();
    let queue = Arc::new(WorkQueue::new());

    let mqtt_handle = mqtt::spawn(
        &config.mqtt,
        worker_id.clone(),
        known_domains.clone(),
        queue.clone(),
        exit.clone(),
    );

    flusher::spawn(
        known_domains.clone(),
        Duration::from_secs(config.flush_interval_secs),
        exit.clone(),
    );
    metrics::spawn(
        mqtt_handle,
        worker_id.clone(),
        known_domains,
        Duration::from_secs(config.metrics_interval_secs),
        exit.clone(),
    );

    log::info!("wgkex-worker {} starting as {worker_id}", env!("CARGO_PKG_VERSION"));

    let installer_task = tokio::spawn(installer::run(queue, exit.clone()));

    tokio::signal::ctrl_c().await?;
    log::info!("shutdown signal received");
    exit.cancel();
    let _ = installer_task.await;
    tokio::time::sleep(SHUTDOWN_GRACE).await;

    Ok(())
}
