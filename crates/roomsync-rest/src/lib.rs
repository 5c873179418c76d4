//! Polling client for a single chat room.
//!
//! `RoomSyncClient` owns the current-room context, runs the `/updates` poll
//! loop on a tokio task and exposes the one-shot room operations
//! (join, exit, commands, reactions, reports, votes).

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use roomsync_core::{
    ConfigError, DispatchReport, Dispatcher, EventHandler, PollInterval, PollLoopState,
    PollStateMachine, RoomContext, RoomUrls, SyncCursor, SyncError, SyncErrorCategory, UserRef,
    classify_http_status,
};
use roomsync_transport::{HttpRequest, HttpTransport, TransportError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

mod commands;
mod poller;

pub use commands::{ChatCommand, ReportKind, VoteDirection};

use poller::{PollLoop, RunningPollTask};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSyncConfig {
    /// API base, for example `https://api.example.org/api/v3`.
    pub endpoint: String,
    pub app_id: String,
    pub poll_interval: PollInterval,
}

impl RoomSyncConfig {
    /// Validate the endpoint (http/https URL) and app id.
    pub fn new(endpoint: impl Into<String>, app_id: impl Into<String>) -> Result<Self, ConfigError> {
        let endpoint = endpoint.into().trim().to_owned();
        let app_id = app_id.into().trim().to_owned();

        let parsed = Url::parse(&endpoint).map_err(|err| ConfigError::InvalidValue {
            key: "endpoint",
            value: endpoint.clone(),
            reason: err.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidValue {
                key: "endpoint",
                value: endpoint,
                reason: "scheme must be http or https".to_owned(),
            });
        }
        if app_id.is_empty() {
            return Err(ConfigError::Missing("app_id"));
        }
        if app_id.contains('/') {
            return Err(ConfigError::InvalidValue {
                key: "app_id",
                value: app_id,
                reason: "must not contain '/'".to_owned(),
            });
        }

        Ok(Self {
            endpoint,
            app_id,
            poll_interval: PollInterval::default(),
        })
    }

    pub fn with_poll_interval(mut self, poll_interval: PollInterval) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Set the poll period, rejecting values outside `250..=5000` ms.
    pub fn with_poll_interval_ms(self, millis: u64) -> Result<Self, ConfigError> {
        Ok(self.with_poll_interval(PollInterval::from_millis(millis)?))
    }
}

/// Everything the poll loop and caller threads share. Never held across `.await`.
#[derive(Debug)]
pub(crate) struct SharedState {
    pub(crate) context: RoomContext,
    pub(crate) user: Option<UserRef>,
    pub(crate) poll: PollStateMachine,
    /// Outstanding `/updates` fetch per room, keyed by room id. Outlives any
    /// single loop so a restart or a room bounce cannot overlap a slow fetch.
    pub(crate) in_flight: HashMap<String, u64>,
    pub(crate) next_fetch_id: u64,
}

impl SharedState {
    pub(crate) fn new(context: RoomContext) -> Self {
        Self {
            context,
            user: None,
            poll: PollStateMachine::default(),
            in_flight: HashMap::new(),
            next_fetch_id: 0,
        }
    }
}

pub(crate) fn lock_shared(shared: &Mutex<SharedState>) -> MutexGuard<'_, SharedState> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct RoomSyncClient {
    config: RoomSyncConfig,
    transport: Arc<dyn HttpTransport>,
    dispatcher: Dispatcher,
    shared: Arc<Mutex<SharedState>>,
    poll_task: tokio::sync::Mutex<Option<RunningPollTask>>,
}

impl std::fmt::Debug for RoomSyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomSyncClient")
            .field("config", &self.config)
            .field("shared", &self.shared)
            .finish_non_exhaustive()
    }
}

impl RoomSyncClient {
    pub fn new(
        config: RoomSyncConfig,
        transport: Arc<dyn HttpTransport>,
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        let context = RoomContext::new(&config.endpoint, &config.app_id);
        Self {
            config,
            transport,
            dispatcher: Dispatcher::new(handler),
            shared: Arc::new(Mutex::new(SharedState::new(context))),
            poll_task: tokio::sync::Mutex::new(None),
        }
    }

    pub fn config(&self) -> &RoomSyncConfig {
        &self.config
    }

    /// Switch the polled room. A fetch already in flight finishes against the
    /// previous room; the next tick polls the new one.
    pub fn set_room(&self, room_id: &str) -> Result<(), SyncError> {
        lock_shared(&self.shared).context.set_room(room_id)?;
        info!(%room_id, "current room changed");
        Ok(())
    }

    /// Forget the current room; ticks become no-ops until a room is set again.
    pub fn clear_room(&self) {
        lock_shared(&self.shared).context.clear_room();
        info!("current room cleared");
    }

    pub fn current_room(&self) -> Option<String> {
        lock_shared(&self.shared)
            .context
            .current_room()
            .map(str::to_owned)
    }

    pub fn room_urls(&self) -> Option<RoomUrls> {
        lock_shared(&self.shared).context.urls().cloned()
    }

    pub fn cursor(&self) -> SyncCursor {
        lock_shared(&self.shared).context.cursor().clone()
    }

    /// Identity used by one-shot operations.
    pub fn set_user(&self, user: UserRef) {
        debug!(user_id = %user.user_id, "current user changed");
        lock_shared(&self.shared).user = Some(user);
    }

    pub fn current_user(&self) -> Option<UserRef> {
        lock_shared(&self.shared).user.clone()
    }

    pub fn poll_state(&self) -> PollLoopState {
        lock_shared(&self.shared).poll.state()
    }

    /// Start polling. Returns `false` when the loop was already running.
    ///
    /// The first fetch fires immediately, then one per poll interval.
    pub async fn start(&self) -> bool {
        let mut guard = self.poll_task.lock().await;
        if let Some(running) = guard.as_ref()
            && !running.is_finished()
        {
            debug!("poll loop already running");
            return false;
        }

        lock_shared(&self.shared).poll.start();
        let stop = CancellationToken::new();
        let poll_loop = PollLoop::new(
            self.shared.clone(),
            self.transport.clone(),
            self.dispatcher.clone(),
            self.config.poll_interval,
        );
        let task = tokio::spawn(poll_loop.run(stop.child_token()));
        *guard = Some(RunningPollTask::new(stop, task));

        info!(
            interval_ms = self.config.poll_interval.as_millis(),
            "poll loop started"
        );
        true
    }

    /// Stop polling. Returns `false` when the loop was not running.
    ///
    /// Waits for the loop task to exit, so no handler runs after this returns.
    /// A fetch still in flight completes in the background and is discarded.
    pub async fn stop(&self) -> bool {
        let running = {
            let mut guard = self.poll_task.lock().await;
            lock_shared(&self.shared).poll.stop();
            guard.take()
        };

        let Some(running) = running else {
            debug!("poll loop not running");
            return false;
        };

        running.shutdown().await;
        info!("poll loop stopped");
        true
    }

    /// Run one fetch-and-dispatch cycle inline, independent of the loop.
    ///
    /// Unlike loop ticks, failures are returned to the caller.
    pub async fn poll_once(&self) -> Result<DispatchReport, SyncError> {
        let snapshot = lock_shared(&self.shared)
            .context
            .snapshot()
            .ok_or_else(|| SyncError::room_not_set("poll_once"))?;

        let document = self
            .transport
            .fetch(HttpRequest::get(&snapshot.updates_url))
            .await
            .map_err(map_transport_error)?;

        poller::deliver(&self.shared, &self.dispatcher, &snapshot, &document)
    }
}

impl Drop for RoomSyncClient {
    fn drop(&mut self) {
        if let Some(running) = self.poll_task.get_mut().take() {
            running.cancel();
        }
    }
}

fn map_transport_error(err: TransportError) -> SyncError {
    match err {
        TransportError::Request(message) => {
            SyncError::new(SyncErrorCategory::Network, "transport_error", message)
        }
        TransportError::Status { status, body } => SyncError::new(
            classify_http_status(status),
            "http_status",
            format!("server returned {status}: {body}"),
        )
        .with_status(status),
        TransportError::InvalidBody(message) => {
            SyncError::new(SyncErrorCategory::Decode, "invalid_body", message)
        }
    }
}

fn log_operation_failure(action: &str, err: &SyncError) {
    warn!(action, code = %err.code, category = ?err.category, error = %err, "room operation failed");
}


#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use roomsync_transport::{HttpMethod, ScriptedTransport};
    use serde_json::json;

    use super::*;
    use crate::test_support::{Recorder, client, events_doc, speech};

    #[test]
    fn config_rejects_bad_endpoint_and_interval() {
        assert!(matches!(
            RoomSyncConfig::new("not a url", "app"),
            Err(ConfigError::InvalidValue { key: "endpoint", .. })
        ));
        assert!(matches!(
            RoomSyncConfig::new("ftp://api.example.org", "app"),
            Err(ConfigError::InvalidValue { key: "endpoint", .. })
        ));
        assert_eq!(
            RoomSyncConfig::new("https://api.example.org", " "),
            Err(ConfigError::Missing("app_id"))
        );

        let config = RoomSyncConfig::new("https://api.example.org", "app").expect("valid config");
        assert_eq!(config.poll_interval.as_millis(), 800);
        assert!(matches!(
            config.clone().with_poll_interval_ms(100),
            Err(ConfigError::OutOfRange { value: 100, .. })
        ));
        let tuned = config
            .with_poll_interval_ms(250)
            .expect("lower bound is accepted");
        assert_eq!(tuned.poll_interval.as_millis(), 250);
    }

    #[test]
    fn set_room_twice_leaves_second_room_urls() {
        let transport = ScriptedTransport::new();
        let recorder = Arc::new(Recorder::default());
        let client = client(&transport, &recorder);

        client.set_room("room-a").expect("room a");
        client.set_room("room-b").expect("room b");

        assert_eq!(client.current_room().as_deref(), Some("room-b"));
        let urls = client.room_urls().expect("urls set");
        assert_eq!(
            urls.updates,
            "https://api.example.org/api/v3/app-1/chat/rooms/room-b/updates"
        );
        assert_eq!(client.cursor(), SyncCursor::default());
        assert_eq!(client.poll_state(), PollLoopState::Idle);
    }

    #[tokio::test]
    async fn poll_once_dispatches_purge_scenario() {
        let transport = ScriptedTransport::new();
        transport.push_ok(json!({
            "data": { "events": [{ "eventtype": "Purge", "kind": "chat.event", "id": "e1" }] }
        }));
        let recorder = Arc::new(Recorder::default());
        let client = client(&transport, &recorder);
        client.set_room("room-a").expect("room a");

        let report = client.poll_once().await.expect("poll should succeed");

        assert_eq!(recorder.calls(), vec!["purge:e1", "batch:1"]);
        assert_eq!(report.handler_calls, 1);
        let requests = transport.requests();
        assert_eq!(requests[0].method, HttpMethod::Get);
        assert_eq!(
            requests[0].url,
            "https://api.example.org/api/v3/app-1/chat/rooms/room-a/updates"
        );
    }

    #[tokio::test]
    async fn poll_once_skips_malformed_element() {
        let mut broken = speech("x", "room-a");
        broken
            .as_object_mut()
            .expect("fixture is an object")
            .remove("id");
        let transport = ScriptedTransport::new();
        transport.push_ok(events_doc(vec![
            speech("e1", "room-a"),
            broken,
            speech("e3", "room-a"),
        ]));
        let recorder = Arc::new(Recorder::default());
        let client = client(&transport, &recorder);
        client.set_room("room-a").expect("room a");

        let report = client.poll_once().await.expect("poll should succeed");

        assert_eq!(
            recorder.calls(),
            vec!["speech:e1@room-a", "speech:e3@room-a", "batch:2"]
        );
        assert_eq!(report.handler_calls, 2);
        assert_eq!(client.cursor().last_message_id.as_deref(), Some("e3"));
    }

    #[tokio::test]
    async fn poll_once_requires_room_and_surfaces_network_errors() {
        let transport = ScriptedTransport::new();
        transport.push_err(TransportError::Status {
            status: 503,
            body: "maintenance".to_owned(),
        });
        let recorder = Arc::new(Recorder::default());
        let client = client(&transport, &recorder);

        let err = client.poll_once().await.expect_err("no room must fail");
        assert_eq!(err.code, "room_not_set");
        assert_eq!(transport.request_count(), 0);

        client.set_room("room-a").expect("room a");
        let err = client.poll_once().await.expect_err("503 must fail");
        assert_eq!(err.category, SyncErrorCategory::Network);
        assert_eq!(err.status, Some(503));
        assert!(recorder.calls().is_empty());
    }

    #[test]
    fn maps_transport_errors_to_categories() {
        let err = map_transport_error(TransportError::Status {
            status: 404,
            body: "no such room".to_owned(),
        });
        assert_eq!(err.category, SyncErrorCategory::Api);
        assert_eq!(err.code, "http_status");

        let err = map_transport_error(TransportError::Request("reset".to_owned()));
        assert_eq!(err.category, SyncErrorCategory::Network);

        let err = map_transport_error(TransportError::InvalidBody("eof".to_owned()));
        assert_eq!(err.category, SyncErrorCategory::Decode);
    }
}
