//! `switchboard run`: poll Telegram and feed messages through the gateway.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use {
    anyhow::{Context, Result},
    switchboard_common::ReplySink,
    switchboard_config::{SwitchboardConfig, apply_env_overrides, discover_and_load, load_config},
    switchboard_gateway::{Gateway, ReplyDownstream},
    switchboard_telegram::{TelegramReplier, TelegramSource},
    tokio::sync::mpsc,
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
};

use crate::app;

/// Inbound messages buffered between the poller and the gateway.
const INBOUND_BUFFER: usize = 256;

/// Load config from `path`, or discover it when `None`, then apply
/// environment overrides.
pub fn load(path: Option<&Path>) -> Result<(SwitchboardConfig, Option<PathBuf>)> {
    let (mut config, found) = match path {
        Some(path) => (load_config(path)?, Some(path.to_path_buf())),
        None => discover_and_load(),
    };
    apply_env_overrides(&mut config);
    Ok((config, found))
}

pub async fn handle_run(config_path: Option<&Path>) -> Result<()> {
    let (config, found) = load(config_path)?;
    match &found {
        Some(path) => info!(path = %path.display(), "using config"),
        None => info!("no config file found, using defaults"),
    }

    let source = TelegramSource::new(&config.telegram)
        .context("set telegram.token or TELEGRAM_BOT_TOKEN")?;
    source.connect().await?;

    let replier: Arc<dyn ReplySink> = Arc::new(TelegramReplier::new(source.bot().clone()));
    let router = Arc::new(app::build_router(&config, Some(Arc::clone(&replier)))?);

    let cancel = CancellationToken::new();
    let gateway = Gateway::from_config(
        &config,
        router,
        Arc::new(ReplyDownstream::new(replier)),
        cancel.child_token(),
    )?;

    let (tx, rx) = mpsc::channel(INBOUND_BUFFER);
    let poller = tokio::spawn(source.run(tx, cancel.clone()));
    let gateway_task = tokio::spawn(gateway.run(rx, cancel.clone()));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("listening for Ctrl-C")?;
            info!("shutting down");
        },
        () = cancel.cancelled() => warn!("telegram polling stopped, shutting down"),
    }
    cancel.cancel();

    let polled = poller.await?;
    gateway_task.await?;
    polled?;
    Ok(())
}
