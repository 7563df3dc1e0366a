use std::sync::Arc;

use anyhow::Context;
use clap::ArgMatches;
use studio_runtime::api::HttpApiServer;
use studio_runtime::StudioRuntime;
use tokio::net::TcpListener;

use super::{init_tracing, load_config};

pub async fn run(matches: &ArgMatches) -> anyhow::Result<()> {
    let mut config = load_config(matches)?;
    if let Some(host) = matches.get_one::<String>("host") {
        config.api.host = host.clone();
    }
    if let Some(port) = matches.get_one::<u16>("port") {
        config.api.port = *port;
    }
    config.validate().context("Invalid configuration")?;

    init_tracing(&config);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting BERT Studio");

    let runtime = Arc::new(StudioRuntime::new(config.clone()).context("Failed to build runtime")?);
    let server = HttpApiServer::new(config.api.clone(), runtime.clone());

    let addr = format!("{}:{}", config.api.host, config.api.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    server
        .serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutdown signal received");
        })
        .await?;

    runtime.shutdown().await;
    Ok(())
}
