use std::sync::{Arc, Mutex};

use roomsync_core::{
    DispatchReport, Dispatcher, PollInterval, RoomSnapshot, SyncError, decode_batch,
};
use roomsync_transport::{HttpRequest, HttpTransport, TransportError};
use serde_json::Value;
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::{SharedState, lock_shared, map_transport_error};

const FETCH_RESULT_BUFFER: usize = 4;

#[derive(Debug)]
pub(crate) struct RunningPollTask {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

impl RunningPollTask {
    pub(crate) fn new(stop: CancellationToken, task: JoinHandle<()>) -> Self {
        Self { stop, task }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub(crate) fn cancel(&self) {
        self.stop.cancel();
    }

    /// Cancel and wait for the loop task to exit.
    pub(crate) async fn shutdown(self) {
        self.stop.cancel();
        if let Err(err) = self.task.await
            && err.is_panic()
        {
            warn!(error = %err, "poll loop task panicked");
        }
    }
}

struct CompletedFetch {
    fetch_id: u64,
    snapshot: RoomSnapshot,
    result: Result<Value, TransportError>,
}

/// Holds a room's entry in `SharedState::in_flight` until the fetch settles.
///
/// Dropped by the fetch task itself, so the entry is cleared even when the
/// loop that issued the fetch has already stopped.
struct FetchGuard {
    shared: Arc<Mutex<SharedState>>,
    room_id: String,
    fetch_id: u64,
}

impl Drop for FetchGuard {
    fn drop(&mut self) {
        let mut shared = lock_shared(&self.shared);
        if shared.in_flight.get(&self.room_id) == Some(&self.fetch_id) {
            shared.in_flight.remove(&self.room_id);
        }
    }
}

/// The recurring fetch task. One instance per `start()`.
pub(crate) struct PollLoop {
    shared: Arc<Mutex<SharedState>>,
    transport: Arc<dyn HttpTransport>,
    dispatcher: Dispatcher,
    interval: PollInterval,
}

impl PollLoop {
    pub(crate) fn new(
        shared: Arc<Mutex<SharedState>>,
        transport: Arc<dyn HttpTransport>,
        dispatcher: Dispatcher,
        interval: PollInterval,
    ) -> Self {
        Self {
            shared,
            transport,
            dispatcher,
            interval,
        }
    }

    /// Tick at a fixed rate until `stop` is cancelled.
    ///
    /// Fetches run on their own tasks and report back over a channel, so a slow
    /// fetch never delays the timer. A tick that finds a fetch for the same room
    /// still outstanding is skipped rather than queued.
    pub(crate) async fn run(self, stop: CancellationToken) {
        let mut ticker = time::interval(self.interval.as_duration());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let (done_tx, mut done_rx) = mpsc::channel::<CompletedFetch>(FETCH_RESULT_BUFFER);

        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                Some(done) = done_rx.recv() => self.complete(&stop, done),
                _ = ticker.tick() => self.tick(&done_tx),
            }
        }

        debug!("poll loop exited");
    }

    fn tick(&self, done_tx: &mpsc::Sender<CompletedFetch>) {
        let (snapshot, fetch_id) = {
            let mut shared = lock_shared(&self.shared);
            let Some(snapshot) = shared.context.snapshot() else {
                trace!("no room set, skipping tick");
                return;
            };
            if let Some(outstanding) = shared.in_flight.get(&snapshot.room_id) {
                debug!(room_id = %snapshot.room_id, fetch_id = outstanding, "previous fetch outstanding, skipping tick");
                return;
            }

            let fetch_id = shared.next_fetch_id;
            shared.next_fetch_id = fetch_id.wrapping_add(1);
            shared.in_flight.insert(snapshot.room_id.clone(), fetch_id);
            (snapshot, fetch_id)
        };
        debug!(room_id = %snapshot.room_id, fetch_id, "fetching updates");

        let guard = FetchGuard {
            shared: self.shared.clone(),
            room_id: snapshot.room_id.clone(),
            fetch_id,
        };
        let transport = self.transport.clone();
        let done_tx = done_tx.clone();
        tokio::spawn(async move {
            let result = transport
                .fetch(HttpRequest::get(&snapshot.updates_url))
                .await;
            drop(guard);
            // The loop may already be gone after stop; the result is dropped then.
            let _ = done_tx
                .send(CompletedFetch {
                    fetch_id,
                    snapshot,
                    result,
                })
                .await;
        });
    }

    fn complete(&self, stop: &CancellationToken, done: CompletedFetch) {
        if stop.is_cancelled() {
            debug!(fetch_id = done.fetch_id, "discarding fetch result after stop");
            return;
        }
        if let Err(err) = lock_shared(&self.shared).poll.ensure_running("dispatch") {
            debug!(fetch_id = done.fetch_id, error = %err, "discarding fetch result");
            return;
        }

        let outcome = done
            .result
            .map_err(map_transport_error)
            .and_then(|document| deliver(&self.shared, &self.dispatcher, &done.snapshot, &document));

        match outcome {
            Ok(report) => trace!(
                room_id = %done.snapshot.room_id,
                handler_calls = report.handler_calls,
                failures = report.failures.len(),
                "batch dispatched"
            ),
            Err(err) => {
                if err.is_transient() {
                    warn!(room_id = %done.snapshot.room_id, code = %err.code, error = %err, "poll tick failed");
                } else {
                    error!(
                        room_id = %done.snapshot.room_id,
                        code = %err.code,
                        category = ?err.category,
                        status = ?err.status,
                        error = %err,
                        "poll tick rejected"
                    );
                }
                self.dispatcher.notify_network_error(&err);
            }
        }
    }
}

/// Decode a fetched document, advance the cursor for its room generation and
/// dispatch the batch.
pub(crate) fn deliver(
    shared: &Mutex<SharedState>,
    dispatcher: &Dispatcher,
    snapshot: &RoomSnapshot,
    document: &Value,
) -> Result<DispatchReport, SyncError> {
    let batch = decode_batch(document, &snapshot.room_id)?;

    let current = lock_shared(shared)
        .context
        .advance_cursor(snapshot.generation, &batch);
    if !current {
        debug!(room_id = %snapshot.room_id, "dispatching batch fetched for a previous room");
    }

    Ok(dispatcher.dispatch(&snapshot.room_id, &batch.events))
}
