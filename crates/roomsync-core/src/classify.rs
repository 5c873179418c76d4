use crate::types::{Category, Event, EventKind, EventType};

/// Map an event to the handler category it is routed to.
///
/// Total: non-chat objects go to `Lifecycle`, unknown chat event types go to `Chat`.
pub fn classify(event: &Event) -> Category {
    if event.kind != EventKind::ChatEvent {
        return Category::Lifecycle;
    }

    match event.event_type {
        EventType::Purge => Category::Purge,
        EventType::Reaction => Category::Reaction,
        EventType::Reply => Category::Reply,
        EventType::Speech => Category::Speech,
        EventType::Chat
        | EventType::AdminCommand
        | EventType::ApiResult
        | EventType::Other(_) => Category::Chat,
    }
}
