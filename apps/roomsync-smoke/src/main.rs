mod config;
mod logging;

use std::{process::ExitCode, sync::Arc};

use roomsync_core::{Event, EventHandler, HandlerResult, SyncError};
use roomsync_rest::{RoomSyncClient, RoomSyncConfig};
use roomsync_transport::{ReqwestTransport, ScopedTransport};
use tracing::{error, info, warn};

use crate::config::SmokeConfig;

/// Logs every callback.
struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_chat(&self, event: &Event) -> HandlerResult {
        info!(id = %event.id, author = %event.author.user_id, body = %event.body, "chat");
        Ok(())
    }

    fn on_reaction(&self, event: &Event) -> HandlerResult {
        info!(id = %event.id, body = %event.body, "reaction");
        Ok(())
    }

    fn on_reply(&self, event: &Event) -> HandlerResult {
        info!(id = %event.id, body = %event.body, "reply");
        Ok(())
    }

    fn on_speech(&self, event: &Event) -> HandlerResult {
        info!(id = %event.id, room_id = %event.room_id, body = %event.body, "speech");
        Ok(())
    }

    fn on_purge(&self, event: &Event) -> HandlerResult {
        info!(id = %event.id, "purge");
        Ok(())
    }

    fn on_batch(&self, events: &[Event]) -> HandlerResult {
        info!(count = events.len(), "batch dispatched");
        Ok(())
    }

    fn on_network_error(&self, error: &SyncError) -> HandlerResult {
        warn!(%error, "poll failed");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();

    let config = match SmokeConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "invalid smoke configuration");
            return ExitCode::FAILURE;
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "smoke run failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: SmokeConfig) -> Result<(), SyncError> {
    let client_config = RoomSyncConfig::new(&config.endpoint, &config.app_id)
        .and_then(|c| c.with_poll_interval_ms(config.poll_interval_ms))?;

    let mut transport = ScopedTransport::new(ReqwestTransport::new());
    if let Some(token) = &config.api_token {
        transport = transport.with_header("x-api-token", token);
    }

    let client = RoomSyncClient::new(client_config, Arc::new(transport), Arc::new(LoggingHandler));
    client.set_user(config.user.clone());

    if let Err(err) = client.join_room(&config.room_id).await {
        warn!(error = %err, room_id = %config.room_id, "join failed, polling without joining");
        client.set_room(&config.room_id)?;
    }

    client.start().await;
    info!(run_secs = config.run_for.as_secs(), "polling");
    tokio::select! {
        _ = tokio::time::sleep(config.run_for) => {}
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
    }
    client.stop().await;

    if let Err(err) = client.exit_room().await {
        warn!(error = %err, "exit failed");
    }
    Ok(())
}
