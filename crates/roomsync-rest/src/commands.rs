use roomsync_core::{
    CommandResponse, CommandTarget, SyncError, SyncErrorCategory, UserRef, decode_command_response,
};
use roomsync_transport::HttpRequest;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::{RoomSyncClient, lock_shared, log_operation_failure, map_transport_error};

/// A chat command (plain message or `*`-prefixed admin command).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatCommand {
    pub command: String,
    pub custom_type: Option<String>,
    pub custom_id: Option<String>,
    pub custom_payload: Option<String>,
}

impl ChatCommand {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            custom_type: None,
            custom_id: None,
            custom_payload: None,
        }
    }

    pub fn with_custom_type(mut self, custom_type: impl Into<String>) -> Self {
        self.custom_type = Some(custom_type.into());
        self
    }

    pub fn with_custom_id(mut self, custom_id: impl Into<String>) -> Self {
        self.custom_id = Some(custom_id.into());
        self
    }

    pub fn with_custom_payload(mut self, custom_payload: impl Into<String>) -> Self {
        self.custom_payload = Some(custom_payload.into());
        self
    }

    /// Admin commands start with `*` (for example `*purge`).
    pub fn is_admin(&self) -> bool {
        self.command.trim_start().starts_with('*')
    }

    fn body(&self, user_id: &str) -> Value {
        let mut body = Map::new();
        body.insert("command".to_owned(), json!(self.command));
        body.insert("userid".to_owned(), json!(user_id));
        insert_optional(&mut body, "customtype", self.custom_type.as_deref());
        insert_optional(&mut body, "customid", self.custom_id.as_deref());
        insert_optional(&mut body, "custompayload", self.custom_payload.as_deref());
        Value::Object(body)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    Abuse,
    Spam,
}

impl ReportKind {
    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::Abuse => "abuse",
            Self::Spam => "spam",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteDirection {
    Up,
    Down,
    /// Withdraw an earlier vote.
    None,
}

impl VoteDirection {
    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::None => "none",
        }
    }
}

impl RoomSyncClient {
    /// Join `room_id` as the current user, then make it the current room.
    pub async fn join_room(&self, room_id: &str) -> Result<CommandResponse, SyncError> {
        let (url, user) = {
            let shared = lock_shared(&self.shared);
            let user = shared
                .user
                .clone()
                .ok_or_else(|| SyncError::user_not_set("join_room"))?;
            let urls = shared.context.urls_for(room_id)?;
            (format!("{}/join", urls.room), user)
        };

        let mut body = Map::new();
        body.insert("userid".to_owned(), json!(user.user_id));
        insert_optional(&mut body, "handle", user.handle.as_deref());

        let response = self
            .post("join_room", room_id, url, Value::Object(body))
            .await?;
        self.set_room(room_id)?;
        Ok(response)
    }

    /// Leave the current room and clear it, unless it changed meanwhile.
    pub async fn exit_room(&self) -> Result<CommandResponse, SyncError> {
        let (target, user) = self.target_and_user("exit_room")?;
        let url = format!("{}/exit", target.urls.room);

        let response = self
            .post(
                "exit_room",
                &target.room_id,
                url,
                json!({ "userid": user.user_id }),
            )
            .await?;

        let mut shared = lock_shared(&self.shared);
        if shared.context.current_room() == Some(target.room_id.as_str()) {
            shared.context.clear_room();
        }
        Ok(response)
    }

    /// Send a command to the current room. Admin command results are also
    /// delivered to `EventHandler::on_admin_command`.
    pub async fn send_command(&self, command: ChatCommand) -> Result<CommandResponse, SyncError> {
        let (target, user) = self.target_and_user("send_command")?;
        if command.command.trim().is_empty() {
            return Err(SyncError::new(
                SyncErrorCategory::Config,
                "empty_command",
                "command text must not be empty",
            ));
        }

        let response = self
            .post(
                "send_command",
                &target.room_id,
                target.urls.command.clone(),
                command.body(&user.user_id),
            )
            .await?;

        if command.is_admin() {
            self.dispatcher.dispatch_admin(&response);
        }
        Ok(response)
    }

    /// Threaded reply to `event_id` in the current room.
    pub async fn send_reply(
        &self,
        event_id: &str,
        reply: ChatCommand,
    ) -> Result<CommandResponse, SyncError> {
        let (target, user) = self.target_and_user("send_reply")?;
        validate_event_id(event_id)?;

        let mut body = reply.body(&user.user_id);
        if let Some(body) = body.as_object_mut() {
            body.insert("replyto".to_owned(), json!(event_id));
        }

        self.post(
            "send_reply",
            &target.room_id,
            target.urls.event_action(event_id, "reply"),
            body,
        )
        .await
    }

    /// Add (`reacted = true`) or remove a reaction such as `like`.
    pub async fn react(
        &self,
        event_id: &str,
        reaction: &str,
        reacted: bool,
    ) -> Result<CommandResponse, SyncError> {
        let (target, user) = self.target_and_user("react")?;
        validate_event_id(event_id)?;

        self.post(
            "react",
            &target.room_id,
            target.urls.event_action(event_id, "react"),
            json!({ "userid": user.user_id, "reaction": reaction, "reacted": reacted }),
        )
        .await
    }

    pub async fn report(
        &self,
        event_id: &str,
        kind: ReportKind,
    ) -> Result<CommandResponse, SyncError> {
        let (target, user) = self.target_and_user("report")?;
        validate_event_id(event_id)?;

        self.post(
            "report",
            &target.room_id,
            target.urls.event_action(event_id, "report"),
            json!({ "userid": user.user_id, "reporttype": kind.as_wire() }),
        )
        .await
    }

    pub async fn vote(
        &self,
        event_id: &str,
        direction: VoteDirection,
    ) -> Result<CommandResponse, SyncError> {
        let (target, user) = self.target_and_user("vote")?;
        validate_event_id(event_id)?;

        self.post(
            "vote",
            &target.room_id,
            target.urls.event_action(event_id, "vote"),
            json!({ "userid": user.user_id, "vote": direction.as_wire() }),
        )
        .await
    }

    /// Room first, then user: a missing room is the more fundamental failure.
    fn target_and_user(&self, action: &str) -> Result<(CommandTarget, UserRef), SyncError> {
        let shared = lock_shared(&self.shared);
        let target = shared.context.command_target(action)?;
        let user = shared
            .user
            .clone()
            .ok_or_else(|| SyncError::user_not_set(action))?;
        Ok((target, user))
    }

    async fn post(
        &self,
        action: &str,
        room_id: &str,
        url: String,
        body: Value,
    ) -> Result<CommandResponse, SyncError> {
        debug!(action, %room_id, %url, "sending room operation");
        let document = self
            .transport
            .fetch(HttpRequest::post(url, body))
            .await
            .map_err(|err| {
                let err = map_transport_error(err);
                log_operation_failure(action, &err);
                err
            })?;
        Ok(decode_command_response(&document, room_id))
    }
}

fn insert_optional(body: &mut Map<String, Value>, key: &str, value: Option<&str>) {
    if let Some(value) = value {
        body.insert(key.to_owned(), json!(value));
    }
}

fn validate_event_id(event_id: &str) -> Result<(), SyncError> {
    if event_id.trim().is_empty() || event_id.contains('/') {
        return Err(SyncError::new(
            SyncErrorCategory::Config,
            "invalid_event_id",
            format!("invalid event id: {event_id:?}"),
        ));
    }
    Ok(())
}
