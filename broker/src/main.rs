use std::{net::TcpListener, path::PathBuf, sync::Arc};

use clap::Parser;
use tokio_util::sync::CancellationToken;
use wgkex_broker::{
    context::BrokerContext,
    http,
    ipam,
    lists::{AllowList, DenyList},
    mqtt,
    registry::Registry,
    signer::Ed25519Signer,
};
use wgkex_common::config::Config;

#[derive(Debug, Parser)]
#[clap(name = "wgkex-broker", author, version, about)]
struct Opts {
    /// Overrides `$WGKEX_CONFIG_FILE`.
    #[clap(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();
    let opts = Opts::parse();

    let config = match opts.config {
        Some(path) => Config::load(&path)?,
        None => Config::load_from_env()?,
    };
    let known_domains = config.validated_domains()?;

    let exit = CancellationToken::new();
    let registry = Arc::new(Registry::new());

    let deny_list = DenyList::load(PathBuf::from(config.blacklist_file.clone().unwrap_or_default()));
    deny_list.clone().spawn_reloader(exit.clone());

    let allow_list = AllowList::load(PathBuf::from(config.allowlist_file.clone().unwrap_or_default()));
    allow_list.clone().spawn_reloader(
        std::time::Duration::from_secs(config.allowlist_refresh_interval_secs),
        exit.clone(),
    );

    let mqtt_handle = mqtt::spawn(&config.mqtt, "wgkex-broker", registry.clone(), known_domains, exit.clone());

    let (ipam, signer) = if config.parker.enabled {
        let ipam = ipam::build(&config.parker)?;
        let signing_key = config
            .broker_signing_key
            .as_deref()
            .expect("validated at config load time");
        let signer = Arc::new(Ed25519Signer::from_config_str(signing_key)?);
        (Some(ipam), Some(signer))
    } else {
        (None, None)
    };

    let listener = TcpListener::bind((config.broker_listen.host.as_str(), config.broker_listen.port))?;

    let ctx = Arc::new(BrokerContext {
        config,
        registry,
        deny_list,
        allow_list,
        mqtt: mqtt_handle,
        ipam,
        signer,
    });

    log::info!("wgkex-broker {} starting", env!("CARGO_PKG_VERSION"));

    let shutdown_exit = exit.clone();
    let shutdown = async move {
        let _ = tokio::signal::ctrl_c().await;
        log::info!("shutdown signal received");
        shutdown_exit.cancel();
    };

    http::serve(ctx, listener, shutdown).await?;
    Ok(())
}
