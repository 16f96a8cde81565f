//! `pgreflect serve` - start the reflection proxy.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use pgreflect_core::ReflectionConfig;
use pgreflect_proxy::ReflectionProxy;

/// Overrides applied on top of the configuration file.
#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// Default backend host.
    #[arg(long, env = "PGREFLECT_BACKEND_HOST")]
    pub backend_host: Option<String>,

    /// Default backend port.
    #[arg(long, env = "PGREFLECT_BACKEND_PORT")]
    pub backend_port: Option<u16>,

    /// Rate limit window in milliseconds.
    #[arg(long = "window-ms", env = "PGREFLECT_WINDOW_SIZE")]
    pub window_ms: Option<u64>,

    /// Queries allowed per window and session.
    #[arg(long, env = "PGREFLECT_QUERY_LIMIT")]
    pub query_limit: Option<usize>,
}

impl ServeArgs {
    /// Apply the overrides and re-validate.
    pub fn apply(&self, config: &mut ReflectionConfig) -> Result<()> {
        if let Some(host) = &self.backend_host {
            config.backend.host = host.clone();
        }
        if let Some(port) = self.backend_port {
            config.backend.port = port;
        }
        if let Some(window_ms) = self.window_ms {
            config.rate_limit.window_ms = window_ms;
        }
        if let Some(limit) = self.query_limit {
            config.rate_limit.max_queries = limit;
        }
        config.validate().context("invalid configuration after overrides")?;
        Ok(())
    }
}

pub async fn run(config_path: &Path, args: &ServeArgs) -> Result<()> {
    let mut config = super::load_config(config_path)?;
    args.apply(&mut config)?;

    tracing::info!(
        backend = %config.backend.address(),
        tenants = config.tenants.len(),
        rules = config.interception.rules.len(),
        window_ms = config.rate_limit.window_ms,
        max_queries = config.rate_limit.max_queries,
        "Starting reflection proxy"
    );

    let proxy = ReflectionProxy::from_config(&config);
    let listener = proxy.bind().await?;
    println!("pgreflect listening on {}", listener.local_addr());

    proxy.serve_with_shutdown(listener, shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Ctrl-C received, shutting down"),
        Err(e) => {
            tracing::warn!(error = %e, "Cannot listen for Ctrl-C, running until killed");
            std::future::pending::<()>().await;
        }
    }
}
