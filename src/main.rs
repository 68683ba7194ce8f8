mod buffer_pool;
mod config;
mod credentials;
mod error;
mod filter;
mod metrics;
mod request;
mod server;
mod tunnel;

use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::{Cli, ProxyConfig};
use crate::metrics::{serve_metrics, TunnelGauge};
use crate::server::Server;

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("httun=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    color_eyre::install()?;

    let args = Cli::parse();
    let config = ProxyConfig::from_cli(args)?;

    let gauge = Arc::new(TunnelGauge::new());
    if let Some(addr) = config.metrics_addr {
        let listener = TcpListener::bind(addr).await?;
        info!("metrics listening on http://{addr}");
        tokio::spawn(serve_metrics(listener, Arc::clone(&gauge)));
    }

    let server = Server::new(
        config.listen_addr,
        config.credentials,
        config.blacklist,
        Some(gauge),
    );
    let bound = server.bind().await?;

    tokio::select! {
        result = bound.run() => result?,
        _ = signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    Ok(())
}
