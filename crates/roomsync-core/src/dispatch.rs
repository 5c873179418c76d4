//! Routing of decoded events to consumer callbacks.

use std::{
    any::Any,
    collections::HashMap,
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

use tracing::{debug, error};

use crate::{
    classify::classify,
    error::{HandlerError, HandlerResult, SyncError},
    types::{Category, CommandResponse, Event},
};

/// Consumer callbacks, one per category. Every method defaults to a no-op.
///
/// Callbacks run synchronously on the poll task; a slow callback delays the
/// rest of the batch but never overlaps with another callback of the same client.
pub trait EventHandler: Send + Sync {
    fn on_chat(&self, _event: &Event) -> HandlerResult {
        Ok(())
    }

    fn on_reaction(&self, _event: &Event) -> HandlerResult {
        Ok(())
    }

    fn on_reply(&self, _event: &Event) -> HandlerResult {
        Ok(())
    }

    fn on_speech(&self, _event: &Event) -> HandlerResult {
        Ok(())
    }

    fn on_purge(&self, _event: &Event) -> HandlerResult {
        Ok(())
    }

    /// Result of an admin (`*`-prefixed) command sent through the client.
    fn on_admin_command(&self, _response: &CommandResponse) -> HandlerResult {
        Ok(())
    }

    /// Non-chat objects, and the empty marker emitted when a poll returned nothing.
    fn on_lifecycle(&self, _event: &Event) -> HandlerResult {
        Ok(())
    }

    /// Called once after every non-empty batch with all decoded events.
    fn on_batch(&self, _events: &[Event]) -> HandlerResult {
        Ok(())
    }

    /// A poll tick failed; the loop keeps running.
    fn on_network_error(&self, _error: &SyncError) -> HandlerResult {
        Ok(())
    }
}

type EventCallback = Box<dyn Fn(&Event) -> HandlerResult + Send + Sync>;
type BatchCallback = Box<dyn Fn(&[Event]) -> HandlerResult + Send + Sync>;
type AdminCallback = Box<dyn Fn(&CommandResponse) -> HandlerResult + Send + Sync>;
type ErrorCallback = Box<dyn Fn(&SyncError) -> HandlerResult + Send + Sync>;

/// `EventHandler` built from closures keyed by category.
///
/// A `Category::Admin` callback receives the event echoed by an admin command
/// when no dedicated `on_admin_command` closure is registered.
#[derive(Default)]
pub struct HandlerTable {
    events: HashMap<Category, EventCallback>,
    batch: Option<BatchCallback>,
    admin: Option<AdminCallback>,
    network_error: Option<ErrorCallback>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the callback for one category, replacing any previous one.
    pub fn on<F>(mut self, category: Category, callback: F) -> Self
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        self.events.insert(category, Box::new(callback));
        self
    }

    pub fn on_batch<F>(mut self, callback: F) -> Self
    where
        F: Fn(&[Event]) -> HandlerResult + Send + Sync + 'static,
    {
        self.batch = Some(Box::new(callback));
        self
    }

    pub fn on_admin_command<F>(mut self, callback: F) -> Self
    where
        F: Fn(&CommandResponse) -> HandlerResult + Send + Sync + 'static,
    {
        self.admin = Some(Box::new(callback));
        self
    }

    pub fn on_network_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&SyncError) -> HandlerResult + Send + Sync + 'static,
    {
        self.network_error = Some(Box::new(callback));
        self
    }

    fn call(&self, category: Category, event: &Event) -> HandlerResult {
        match self.events.get(&category) {
            Some(callback) => callback(event),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut categories: Vec<_> = self.events.keys().collect();
        categories.sort_by_key(|c| format!("{c:?}"));
        f.debug_struct("HandlerTable")
            .field("categories", &categories)
            .field("batch", &self.batch.is_some())
            .field("admin", &self.admin.is_some())
            .field("network_error", &self.network_error.is_some())
            .finish()
    }
}

impl EventHandler for HandlerTable {
    fn on_chat(&self, event: &Event) -> HandlerResult {
        self.call(Category::Chat, event)
    }

    fn on_reaction(&self, event: &Event) -> HandlerResult {
        self.call(Category::Reaction, event)
    }

    fn on_reply(&self, event: &Event) -> HandlerResult {
        self.call(Category::Reply, event)
    }

    fn on_speech(&self, event: &Event) -> HandlerResult {
        self.call(Category::Speech, event)
    }

    fn on_purge(&self, event: &Event) -> HandlerResult {
        self.call(Category::Purge, event)
    }

    fn on_admin_command(&self, response: &CommandResponse) -> HandlerResult {
        if let Some(callback) = &self.admin {
            return callback(response);
        }
        match &response.event {
            Some(event) => self.call(Category::Admin, event),
            None => Ok(()),
        }
    }

    fn on_lifecycle(&self, event: &Event) -> HandlerResult {
        self.call(Category::Lifecycle, event)
    }

    fn on_batch(&self, events: &[Event]) -> HandlerResult {
        match &self.batch {
            Some(callback) => callback(events),
            None => Ok(()),
        }
    }

    fn on_network_error(&self, error: &SyncError) -> HandlerResult {
        match &self.network_error {
            Some(callback) => callback(error),
            None => Ok(()),
        }
    }
}

/// Outcome of dispatching one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Category handler invocations (one per event, or one lifecycle call for an empty batch).
    pub handler_calls: usize,
    /// Whether `on_batch` was invoked.
    pub batch_notified: bool,
    /// Handler failures that were contained.
    pub failures: Vec<SyncError>,
}

/// Invokes exactly one category handler per event and contains handler failures.
#[derive(Clone)]
pub struct Dispatcher {
    handler: Arc<dyn EventHandler>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(handler: Arc<dyn EventHandler>) -> Self {
        Self { handler }
    }

    /// Dispatch one polled batch for `room_id`.
    pub fn dispatch(&self, room_id: &str, batch: &[Event]) -> DispatchReport {
        let mut report = DispatchReport::default();

        if batch.is_empty() {
            let marker = Event::lifecycle_marker(room_id);
            report.handler_calls = 1;
            self.invoke(&mut report, "on_lifecycle", None, || {
                self.handler.on_lifecycle(&marker)
            });
            return report;
        }

        for event in batch {
            let category = classify(event);
            debug!(%room_id, event_id = %event.id, ?category, "dispatching event");
            report.handler_calls += 1;
            self.invoke(&mut report, "category", Some(&event.id), || {
                match category {
                    Category::Chat | Category::Admin => self.handler.on_chat(event),
                    Category::Reaction => self.handler.on_reaction(event),
                    Category::Reply => self.handler.on_reply(event),
                    Category::Speech => self.handler.on_speech(event),
                    Category::Purge => self.handler.on_purge(event),
                    Category::Lifecycle => self.handler.on_lifecycle(event),
                }
            });
        }

        report.batch_notified = true;
        self.invoke(&mut report, "on_batch", None, || self.handler.on_batch(batch));
        report
    }

    /// Deliver an admin command result.
    pub fn dispatch_admin(&self, response: &CommandResponse) -> DispatchReport {
        let mut report = DispatchReport {
            handler_calls: 1,
            ..DispatchReport::default()
        };
        self.invoke(&mut report, "on_admin_command", None, || {
            self.handler.on_admin_command(response)
        });
        report
    }

    /// Report a failed poll tick.
    pub fn notify_network_error(&self, err: &SyncError) -> DispatchReport {
        let mut report = DispatchReport::default();
        self.invoke(&mut report, "on_network_error", None, || {
            self.handler.on_network_error(err)
        });
        report
    }

    fn invoke<F>(&self, report: &mut DispatchReport, callback: &str, event_id: Option<&str>, f: F)
    where
        F: FnOnce() -> HandlerResult,
    {
        let outcome = match catch_unwind(AssertUnwindSafe(f)) {
            Ok(result) => result,
            Err(payload) => Err(HandlerError::new(format!(
                "handler panicked: {}",
                panic_message(payload.as_ref())
            ))),
        };

        if let Err(err) = outcome {
            error!(callback, event_id = event_id.unwrap_or_default(), error = %err, "event handler failed");
            report.failures.push(err.into());
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::{
        error::SyncErrorCategory,
        types::{EventKind, EventType},
    };

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
        fail_on: Option<&'static str>,
        panic_on: Option<&'static str>,
    }

    impl Recorder {
        fn record(&self, name: &str, event: &Event) -> HandlerResult {
            self.calls
                .lock()
                .expect("recorder lock")
                .push(format!("{name}:{}", event.id));
            if self.panic_on == Some(event.id.as_str()) {
                panic!("boom on {}", event.id);
            }
            if self.fail_on == Some(event.id.as_str()) {
                return Err(HandlerError::new("refused"));
            }
            Ok(())
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().expect("recorder lock").clone()
        }
    }

    impl EventHandler for Recorder {
        fn on_chat(&self, event: &Event) -> HandlerResult {
            self.record("chat", event)
        }
        fn on_reaction(&self, event: &Event) -> HandlerResult {
            self.record("reaction", event)
        }
        fn on_reply(&self, event: &Event) -> HandlerResult {
            self.record("reply", event)
        }
        fn on_speech(&self, event: &Event) -> HandlerResult {
            self.record("speech", event)
        }
        fn on_purge(&self, event: &Event) -> HandlerResult {
            self.record("purge", event)
        }
        fn on_lifecycle(&self, event: &Event) -> HandlerResult {
            self.record("lifecycle", event)
        }
        fn on_batch(&self, events: &[Event]) -> HandlerResult {
            self.calls
                .lock()
                .expect("recorder lock")
                .push(format!("batch:{}", events.len()));
            Ok(())
        }
    }

    fn event(id: &str, kind: &str, eventtype: &str) -> Event {
        Event {
            id: id.to_owned(),
            kind: EventKind::from(kind),
            event_type: EventType::from_wire(eventtype),
            ..Event::lifecycle_marker("room-1")
        }
    }

    #[test]
    fn invokes_one_handler_per_event_in_order_then_batch() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = Dispatcher::new(recorder.clone());

        let report = dispatcher.dispatch(
            "room-1",
            &[
                event("e1", "chat.event", "speech"),
                event("e2", "chat.event", "reaction"),
                event("e3", "chat.event", "goal"),
                event("e4", "app.user", "speech"),
                event("e5", "chat.event", "reply"),
            ],
        );

        assert_eq!(
            recorder.calls(),
            vec![
                "speech:e1",
                "reaction:e2",
                "chat:e3",
                "lifecycle:e4",
                "reply:e5",
                "batch:5"
            ]
        );
        assert_eq!(report.handler_calls, 5);
        assert!(report.batch_notified);
        assert!(report.failures.is_empty());
    }

    #[test]
    fn empty_batch_emits_single_lifecycle_marker() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = Dispatcher::new(recorder.clone());

        let report = dispatcher.dispatch("room-1", &[]);

        assert_eq!(recorder.calls(), vec!["lifecycle:"]);
        assert_eq!(report.handler_calls, 1);
        assert!(!report.batch_notified);
    }

    #[test]
    fn purge_scenario_hits_on_purge_once() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = Dispatcher::new(recorder.clone());

        dispatcher.dispatch("room-1", &[event("e1", "chat.event", "Purge")]);

        assert_eq!(recorder.calls(), vec!["purge:e1", "batch:1"]);
    }

    #[test]
    fn failing_and_panicking_handlers_do_not_abort_the_batch() {
        let recorder = Arc::new(Recorder {
            fail_on: Some("e1"),
            panic_on: Some("e2"),
            ..Recorder::default()
        });
        let dispatcher = Dispatcher::new(recorder.clone());

        let report = dispatcher.dispatch(
            "room-1",
            &[
                event("e1", "chat.event", "speech"),
                event("e2", "chat.event", "speech"),
                event("e3", "chat.event", "speech"),
            ],
        );

        assert_eq!(
            recorder.calls(),
            vec!["speech:e1", "speech:e2", "speech:e3", "batch:3"]
        );
        assert_eq!(report.failures.len(), 2);
        assert!(
            report
                .failures
                .iter()
                .all(|f| f.category == SyncErrorCategory::Handler)
        );
        assert!(report.failures[1].message.contains("boom on e2"));
    }

    #[test]
    fn handler_table_routes_by_category() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let purge_seen = seen.clone();
        let batch_seen = seen.clone();
        let admin_seen = seen.clone();
        let table = HandlerTable::new()
            .on(Category::Purge, move |event| {
                purge_seen
                    .lock()
                    .expect("seen lock")
                    .push(format!("purge:{}", event.id));
                Ok(())
            })
            .on(Category::Admin, move |event| {
                admin_seen
                    .lock()
                    .expect("seen lock")
                    .push(format!("admin:{}", event.id));
                Ok(())
            })
            .on_batch(move |events| {
                batch_seen
                    .lock()
                    .expect("seen lock")
                    .push(format!("batch:{}", events.len()));
                Ok(())
            });
        let dispatcher = Dispatcher::new(Arc::new(table));

        dispatcher.dispatch(
            "room-1",
            &[
                event("e1", "chat.event", "speech"),
                event("e2", "chat.event", "purge"),
            ],
        );
        dispatcher.dispatch_admin(&CommandResponse {
            op: Some("admin".to_owned()),
            event: Some(event("e9", "chat.event", "speech")),
            raw: json!({}),
        });

        assert_eq!(
            *seen.lock().expect("seen lock"),
            vec!["purge:e2", "batch:2", "admin:e9"]
        );
    }

    #[test]
    fn network_error_failures_are_contained() {
        let table = HandlerTable::new()
            .on_network_error(|_| Err(HandlerError::new("cannot show error")));
        let dispatcher = Dispatcher::new(Arc::new(table));

        let report = dispatcher.notify_network_error(&SyncError::new(
            SyncErrorCategory::Network,
            "transport_error",
            "connection reset",
        ));
        assert_eq!(report.failures.len(), 1);
    }
}
