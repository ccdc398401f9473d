// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use anyhow::{Context, Result};
use rina_control_rs::{
    cfg::{cli::config_path_from_args, config::Config, logger::init_logger},
    daemon::IpcpDaemon,
    transport::family::FamilyRegistry,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let _logger_guard = init_logger("config/logger.yaml")?;

    let config_path = config_path_from_args("config/ipcp.yaml")?;
    let cfg = Config::load_from_file(&config_path)
        .with_context(|| format!("failed to load config {config_path:?}"))?;
    info!(process = %cfg.process.process_name, "starting the IPC Process daemon");

    let cancel = CancellationToken::new();
    let families = FamilyRegistry::new();

    // Every bring-up failure below is unrecoverable for this process.
    let daemon = IpcpDaemon::build(&cfg, &families, cancel.clone())
        .await
        .context("control-plane bring-up failed")?;

    let dispatch = tokio::spawn(Arc::clone(&daemon).run());

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested");
    cancel.cancel();

    dispatch.await.context("dispatch loop panicked")??;
    Ok(())
}
