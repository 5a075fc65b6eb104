// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! BizCore Gateway
//!
//! HTTP entry point of the multi-tenant business backend.

use anyhow::Result;
use domain_services::ServiceRegistry;
use gateway::{Server, ServerConfig, ShutdownConfig, lifecycle::EXIT_SUCCESS};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Panics on runtime threads are reported through the log before unwinding
    std::panic::set_hook(Box::new(|panic_info| {
        error!(panic = %panic_info, "panic");
    }));

    info!("Starting BizCore gateway with coordinated shutdown support");

    let config = ServerConfig::from_env()?;
    let registry = ServiceRegistry::with_default_services();
    let server = Server::new(config, ShutdownConfig::default(), registry)?;

    let exit_code = server.run().await?;
    if exit_code != EXIT_SUCCESS {
        std::process::exit(exit_code);
    }

    Ok(())
}
