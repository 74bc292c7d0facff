// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Weighbridge — scale reader, live push and print service
//
// Entry point. Initialises logging, loads configuration, prepares the
// history and temp directories, starts the backend services and serves the
// HTTP/WebSocket front end until Ctrl-C.

mod api;
mod http;
mod multipart;
mod server;
mod services;
mod ws;

use std::path::PathBuf;
use std::process::ExitCode;

use tracing::{error, info};

use weighbridge_core::error::Result;

use server::FrontEnd;
use services::app_services::{AppServices, load_config};
use services::data_dir;

/// Config file used when none is named on the command line.
const DEFAULT_CONFIG_FILE: &str = "config.json";

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "Weighbridge starting");

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, class = ?e.class(), "startup failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let config_path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let config = load_config(&config_path, &data_dir::base_dir())?;

    data_dir::ensure_dir(&config.history_dir, "history")?;
    data_dir::ensure_dir(&config.temp_dir, "temp")?;

    let port = config.websocket_port;
    let services = AppServices::init(config);
    let front = FrontEnd::bind(port, services.clone()).await?;
    info!(port, "push endpoint at ws://localhost:{port}/ws");

    tokio::select! {
        _ = front.run() => {}
        signal = tokio::signal::ctrl_c() => match signal {
            Ok(()) => info!("shutdown requested"),
            Err(e) => error!(error = %e, "cannot listen for Ctrl-C; shutting down"),
        },
    }

    services.shutdown().await;
    info!("Weighbridge stopped");
    Ok(())
}
