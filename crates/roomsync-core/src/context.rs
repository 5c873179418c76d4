//! Current-room state and the endpoint URLs derived from it.

use serde::{Deserialize, Serialize};

use crate::{
    decode::DecodedBatch,
    error::{SyncError, SyncErrorCategory},
};

/// Derived endpoints for one room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomUrls {
    /// `{endpoint}/{appId}/chat/rooms/{roomId}`
    pub room: String,
    /// `{room}/command`
    pub command: String,
    /// `{room}/updates`
    pub updates: String,
}

impl RoomUrls {
    fn derive(chat_base: &str, room_id: &str) -> Self {
        let room = format!("{chat_base}/{room_id}");
        Self {
            command: format!("{room}/command"),
            updates: format!("{room}/updates"),
            room,
        }
    }

    /// `{room}/events/{eventId}/{action}`
    pub fn event_action(&self, event_id: &str, action: &str) -> String {
        format!("{}/events/{event_id}/{action}", self.room)
    }
}

/// Incremental-fetch narrowing state. Reset whenever the room changes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    pub last_cursor: Option<String>,
    pub last_message_id: Option<String>,
    pub first_message_id: Option<String>,
    pub first_message_time: i64,
}

/// What one poll tick needs, captured under the lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSnapshot {
    pub room_id: String,
    pub updates_url: String,
    pub generation: u64,
}

/// Room and URLs as of a one-shot call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTarget {
    pub room_id: String,
    pub urls: RoomUrls,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ActiveRoom {
    room_id: String,
    urls: RoomUrls,
}

/// The client's current room. URLs always match `current_room`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomContext {
    chat_base: String,
    active: Option<ActiveRoom>,
    cursor: SyncCursor,
    generation: u64,
}

impl RoomContext {
    /// Empty context for `{endpoint}/{app_id}`. A trailing `/` on the endpoint is ignored.
    pub fn new(endpoint: &str, app_id: &str) -> Self {
        let endpoint = endpoint.trim_end_matches('/');
        Self {
            chat_base: format!("{endpoint}/{app_id}/chat/rooms"),
            active: None,
            cursor: SyncCursor::default(),
            generation: 0,
        }
    }

    /// URLs of `room_id` without changing the current room.
    pub fn urls_for(&self, room_id: &str) -> Result<RoomUrls, SyncError> {
        validate_room_id(room_id)?;
        Ok(RoomUrls::derive(&self.chat_base, room_id))
    }

    /// Switch to `room_id`, recompute URLs and reset the cursor.
    pub fn set_room(&mut self, room_id: &str) -> Result<(), SyncError> {
        let urls = self.urls_for(room_id)?;
        self.active = Some(ActiveRoom {
            room_id: room_id.to_owned(),
            urls,
        });
        self.reset();
        Ok(())
    }

    /// Leave the current room, if any.
    pub fn clear_room(&mut self) {
        self.active = None;
        self.reset();
    }

    pub fn current_room(&self) -> Option<&str> {
        self.active.as_ref().map(|active| active.room_id.as_str())
    }

    pub fn urls(&self) -> Option<&RoomUrls> {
        self.active.as_ref().map(|active| &active.urls)
    }

    pub fn cursor(&self) -> &SyncCursor {
        &self.cursor
    }

    /// Bumped on every room change.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Tick input, or `None` when no room is joined.
    pub fn snapshot(&self) -> Option<RoomSnapshot> {
        self.active.as_ref().map(|active| RoomSnapshot {
            room_id: active.room_id.clone(),
            updates_url: active.urls.updates.clone(),
            generation: self.generation,
        })
    }

    /// Room and URLs for a one-shot call named `action`.
    pub fn command_target(&self, action: &str) -> Result<CommandTarget, SyncError> {
        self.active
            .as_ref()
            .map(|active| CommandTarget {
                room_id: active.room_id.clone(),
                urls: active.urls.clone(),
            })
            .ok_or_else(|| SyncError::room_not_set(action))
    }

    /// Record a successfully decoded batch. Returns `false` and leaves the
    /// cursor untouched when the batch belongs to an earlier room.
    pub fn advance_cursor(&mut self, generation: u64, batch: &DecodedBatch) -> bool {
        if generation != self.generation || self.active.is_none() {
            return false;
        }

        if let Some(cursor) = &batch.cursor {
            self.cursor.last_cursor = Some(cursor.clone());
        }
        if let Some(first) = batch.events.first()
            && self.cursor.first_message_id.is_none()
        {
            self.cursor.first_message_id = Some(first.id.clone());
            self.cursor.first_message_time = first.added_at_ms;
        }
        if let Some(last) = batch.events.last() {
            self.cursor.last_message_id = Some(last.id.clone());
        }
        true
    }

    fn reset(&mut self) {
        self.cursor = SyncCursor::default();
        self.generation = self.generation.wrapping_add(1);
    }
}

fn validate_room_id(room_id: &str) -> Result<(), SyncError> {
    if room_id.trim().is_empty() || room_id.contains('/') {
        return Err(SyncError::new(
            SyncErrorCategory::Config,
            "invalid_room_id",
            format!("invalid room id: {room_id:?}"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Event;

    fn context() -> RoomContext {
        RoomContext::new("https://api.example.org/v3/", "app-1")
    }

    fn batch(ids: &[(&str, i64)], cursor: Option<&str>) -> DecodedBatch {
        DecodedBatch {
            events: ids
                .iter()
                .map(|(id, added)| Event {
                    id: (*id).to_owned(),
                    added_at_ms: *added,
                    ..Event::lifecycle_marker("room-a")
                })
                .collect(),
            cursor: cursor.map(str::to_owned),
            errors: Vec::new(),
        }
    }

    #[test]
    fn derives_room_command_and_updates_urls() {
        let mut ctx = context();
        ctx.set_room("room-a").expect("room id should be valid");

        let urls = ctx.urls().expect("urls should be set");
        assert_eq!(urls.room, "https://api.example.org/v3/app-1/chat/rooms/room-a");
        assert_eq!(
            urls.command,
            "https://api.example.org/v3/app-1/chat/rooms/room-a/command"
        );
        assert_eq!(
            urls.updates,
            "https://api.example.org/v3/app-1/chat/rooms/room-a/updates"
        );
        assert_eq!(
            urls.event_action("e1", "react"),
            "https://api.example.org/v3/app-1/chat/rooms/room-a/events/e1/react"
        );
    }

    #[test]
    fn switching_rooms_resets_cursor_and_updates_urls() {
        let mut ctx = context();
        ctx.set_room("room-a").expect("room a");
        let generation = ctx.generation();
        assert!(ctx.advance_cursor(generation, &batch(&[("e1", 10), ("e2", 20)], Some("c1"))));
        assert_eq!(ctx.cursor().last_message_id.as_deref(), Some("e2"));

        ctx.set_room("room-b").expect("room b");

        assert_eq!(ctx.current_room(), Some("room-b"));
        assert_eq!(
            ctx.snapshot().map(|s| s.updates_url),
            Some("https://api.example.org/v3/app-1/chat/rooms/room-b/updates".to_owned())
        );
        assert_eq!(ctx.cursor(), &SyncCursor::default());
        assert_ne!(ctx.generation(), generation);
    }

    #[test]
    fn stale_batches_do_not_touch_new_room_cursor() {
        let mut ctx = context();
        ctx.set_room("room-a").expect("room a");
        let stale = ctx.generation();
        ctx.set_room("room-b").expect("room b");

        assert!(!ctx.advance_cursor(stale, &batch(&[("e1", 10)], Some("c1"))));
        assert_eq!(ctx.cursor(), &SyncCursor::default());
    }

    #[test]
    fn cursor_keeps_first_message_and_tracks_last() {
        let mut ctx = context();
        ctx.set_room("room-a").expect("room a");
        let generation = ctx.generation();

        ctx.advance_cursor(generation, &batch(&[("e1", 10), ("e2", 20)], Some("c1")));
        ctx.advance_cursor(generation, &batch(&[("e3", 30)], None));

        let cursor = ctx.cursor();
        assert_eq!(cursor.first_message_id.as_deref(), Some("e1"));
        assert_eq!(cursor.first_message_time, 10);
        assert_eq!(cursor.last_message_id.as_deref(), Some("e3"));
        assert_eq!(cursor.last_cursor.as_deref(), Some("c1"));
    }

    #[test]
    fn command_target_requires_room() {
        let ctx = context();
        let err = ctx
            .command_target("send_command")
            .expect_err("no room must fail");
        assert_eq!(err.code, "room_not_set");
        assert!(ctx.snapshot().is_none());
    }

    #[test]
    fn rejects_empty_or_nested_room_ids() {
        let mut ctx = context();
        assert_eq!(
            ctx.set_room("  ").expect_err("blank id must fail").code,
            "invalid_room_id"
        );
        assert!(ctx.set_room("a/b").is_err());
        assert_eq!(ctx.current_room(), None);
    }

    #[test]
    fn clear_room_drops_urls() {
        let mut ctx = context();
        ctx.set_room("room-a").expect("room a");
        ctx.clear_room();
        assert_eq!(ctx.current_room(), None);
        assert!(ctx.urls().is_none());
    }
}
