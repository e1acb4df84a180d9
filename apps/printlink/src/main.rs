//! printlink loopback demo.
//!
//! Usage: `printlink [FILE]...`. Every file is announced by a customer
//! engine, requested by the admin engine, streamed, printed to the spool
//! directory and finally exported as one zip.

mod config;
mod demo;

use std::path::PathBuf;

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting printlink");

    let config = match config::PrintlinkConfig::load() {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(error = %e, "failed to load config, using defaults");
            config::PrintlinkConfig::default()
        }
    };

    let paths: Vec<PathBuf> = std::env::args_os().skip(1).map(PathBuf::from).collect();
    demo::run(config, paths).await
}
