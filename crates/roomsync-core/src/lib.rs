//! Core of the room synchronization engine.
//!
//! This crate holds everything that does not touch the network: the event
//! model, wire decoding, classification, dispatch to consumer callbacks, the
//! current-room context and the poll loop state machine.

/// Event-to-category mapping.
pub mod classify;
/// Poll interval and configuration errors.
pub mod config;
/// Current room, derived URLs and cursor.
pub mod context;
/// `/updates` and command response decoding.
pub mod decode;
/// Handler interface and batch dispatch.
pub mod dispatch;
/// Stable error types and HTTP classification helpers.
pub mod error;
/// Poll loop lifecycle state machine.
pub mod state_machine;
/// Event model and shared value types.
pub mod types;

pub use classify::classify;
pub use config::{
    ConfigError, DEFAULT_POLL_INTERVAL_MS, MAX_POLL_INTERVAL_MS, MIN_POLL_INTERVAL_MS,
    PollInterval,
};
pub use context::{CommandTarget, RoomContext, RoomSnapshot, RoomUrls, SyncCursor};
pub use decode::{DecodeError, DecodedBatch, decode_batch, decode_command_response, decode_event};
pub use dispatch::{DispatchReport, Dispatcher, EventHandler, HandlerTable};
pub use error::{
    HandlerError, HandlerResult, SyncError, SyncErrorCategory, classify_http_status,
};
pub use state_machine::PollStateMachine;
pub use types::{
    CHAT_EVENT_KIND, Category, CommandResponse, Event, EventKind, EventType, PollLoopState,
    UserRef,
};
