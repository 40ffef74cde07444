//! Notification Fanout Pipeline
//!
//! Runs once per newly created chat message: resolve room membership,
//! collect recipient device tokens, compose the push payload, deliver
//! one multicast, and prune tokens the provider reports as dead.
//!
//! The pipeline is safely re-runnable under at-least-once event
//! delivery: duplicate pushes are tolerated and token pruning
//! converges (removing an already-removed token is a no-op).

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::models::{MessageEvent, MessageType, Room};
use crate::services::fcm::{MulticastMessage, PushAlert, PushClient};
use crate::services::firestore::{DocumentStore, MAX_IN_FILTER_VALUES};

/// Free-text preview length in visible characters
const PREVIEW_MAX_CHARS: usize = 80;

/// How the push payload is rendered on the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadStyle {
    /// Data-only message; the app renders the notification itself
    DataOnly,
    /// Provider-rendered visible notification with a sound hint
    Alert,
}

impl PayloadStyle {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "alert" => PayloadStyle::Alert,
            _ => PayloadStyle::DataOnly,
        }
    }
}

/// Which room collection an event came from, and the room kind to
/// assume when the room document does not say
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSource {
    pub collection: String,
    pub default_kind: String,
}

/// Pipeline tuning shared across event sources
#[derive(Debug, Clone)]
pub struct FanoutOptions {
    /// Room-id prefix that marks a direct conversation
    pub dm_prefix: String,
    pub payload_style: PayloadStyle,
}

impl Default for FanoutOptions {
    fn default() -> Self {
        Self {
            dm_prefix: "dm_".to_string(),
            payload_style: PayloadStyle::DataOnly,
        }
    }
}

/// Why a fanout ended without a send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// System/log lines never page users
    SystemMessage,
    /// Room already deleted; nothing to notify
    RoomMissing,
    /// No members besides the sender
    NoRecipients,
    /// Recipients have no registered tokens
    NoTokens,
}

/// Result of one pipeline run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FanoutOutcome {
    Skipped(SkipReason),
    Sent {
        success_count: usize,
        failure_count: usize,
        dead_tokens_removed: usize,
    },
}

/// Message-fanout notification service
///
/// Collaborators are injected as trait objects so tests substitute
/// in-memory fakes; production wires the Firestore and FCM clients.
pub struct NotificationFanoutService {
    store: Arc<dyn DocumentStore>,
    push: Arc<dyn PushClient>,
    options: FanoutOptions,
}

impl NotificationFanoutService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        push: Arc<dyn PushClient>,
        options: FanoutOptions,
    ) -> Self {
        Self {
            store,
            push,
            options,
        }
    }

    /// Handle one message-created event.
    ///
    /// Per-token delivery failures never return `Err`; only store or
    /// provider transport failures do, so the event framework can
    /// redeliver the whole event.
    pub async fn handle_message_created(
        &self,
        source: &RoomSource,
        event: &MessageEvent,
    ) -> Result<FanoutOutcome> {
        if event.message_type == MessageType::System {
            debug!("skipping system message {}", event.message_id);
            return Ok(FanoutOutcome::Skipped(SkipReason::SystemMessage));
        }

        let Some(room) = self
            .store
            .fetch_room(&source.collection, &event.room_id)
            .await?
        else {
            debug!(
                "room {}/{} gone, nothing to notify",
                source.collection, event.room_id
            );
            return Ok(FanoutOutcome::Skipped(SkipReason::RoomMissing));
        };

        let recipients = recipient_ids(&room, &event.sender_app_user_id);
        if recipients.is_empty() {
            debug!("no recipients in room {}", event.room_id);
            return Ok(FanoutOutcome::Skipped(SkipReason::NoRecipients));
        }

        // Membership lookups cap out at 10 ids per query; shard and merge.
        let mut records = Vec::new();
        for chunk in recipients.chunks(MAX_IN_FILTER_VALUES) {
            records.extend(self.store.users_by_app_ids(chunk).await?);
        }

        let tokens = collect_tokens(records.iter().flat_map(|r| r.tokens.iter()));
        if tokens.is_empty() {
            debug!("recipients in room {} have no tokens", event.room_id);
            return Ok(FanoutOutcome::Skipped(SkipReason::NoTokens));
        }

        let body = notification_body(&event.message_type, event.text.as_deref());
        let kind = resolve_room_kind(&room, &event.room_id, &self.options.dm_prefix, source);
        let message = self.compose_message(event, tokens, &kind, &body);

        let outcome = self.push.send_multicast(&message).await?;

        let dead_tokens = outcome.dead_tokens();
        let dead_tokens_removed = dead_tokens.len();
        if !dead_tokens.is_empty() {
            warn!(
                "pruning {} dead token(s) after fanout for message {}",
                dead_tokens.len(),
                event.message_id
            );
            // One batched write touching every fetched record; tokens a
            // record never held are removed as a no-op.
            let doc_names: Vec<String> = records.iter().map(|r| r.doc_name.clone()).collect();
            self.store.remove_tokens(&doc_names, &dead_tokens).await?;
        }

        info!(
            "fanout for message {} in room {}: {} delivered, {} failed, {} pruned",
            event.message_id,
            event.room_id,
            outcome.success_count(),
            outcome.failure_count(),
            dead_tokens_removed
        );

        Ok(FanoutOutcome::Sent {
            success_count: outcome.success_count(),
            failure_count: outcome.failure_count(),
            dead_tokens_removed,
        })
    }

    fn compose_message(
        &self,
        event: &MessageEvent,
        tokens: Vec<String>,
        kind: &str,
        body: &str,
    ) -> MulticastMessage {
        let mut data = BTreeMap::new();
        data.insert("kind".to_string(), kind.to_string());
        data.insert("sender".to_string(), event.sender_app_user_id.clone());
        data.insert("body".to_string(), body.to_string());
        data.insert("roomId".to_string(), event.room_id.clone());
        data.insert("messageId".to_string(), event.message_id.clone());
        data.insert("type".to_string(), event.message_type.as_str().to_string());
        data.insert("senderId".to_string(), event.sender_app_user_id.clone());

        let alert = match self.options.payload_style {
            PayloadStyle::DataOnly => None,
            PayloadStyle::Alert => Some(PushAlert {
                title: if event.sender_app_user_id.is_empty() {
                    "New message".to_string()
                } else {
                    event.sender_app_user_id.clone()
                },
                body: body.to_string(),
            }),
        };

        MulticastMessage {
            tokens,
            data,
            alert,
        }
    }
}

/// Room members minus the sender, deduplicated, original order kept
fn recipient_ids(room: &Room, sender_app_user_id: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    room.member_ids
        .iter()
        .filter(|id| id.as_str() != sender_app_user_id)
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect()
}

/// Flatten recipients' tokens into one trimmed, deduplicated list
fn collect_tokens<'a>(tokens: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for token in tokens {
        let token = token.trim();
        if !token.is_empty() && seen.insert(token.to_string()) {
            out.push(token.to_string());
        }
    }
    out
}

/// Choose the push body for a message.
///
/// Free text is previewed; voice and image get fixed captions;
/// anything else falls back to a generic line.
fn notification_body(message_type: &MessageType, text: Option<&str>) -> String {
    match message_type {
        MessageType::Text => {
            let preview = preview_text(text.unwrap_or_default());
            if preview.is_empty() {
                "New message".to_string()
            } else {
                preview
            }
        }
        MessageType::Voice => "🎤 Voice message".to_string(),
        MessageType::Image => "🖼️ Image".to_string(),
        MessageType::System | MessageType::Other(_) => "New message".to_string(),
    }
}

/// Collapse whitespace runs to single spaces, trim, and truncate to 80
/// visible characters with an ellipsis marker when longer.
fn preview_text(s: &str) -> String {
    let collapsed = s.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() > PREVIEW_MAX_CHARS {
        let truncated: String = collapsed.chars().take(PREVIEW_MAX_CHARS).collect();
        format!("{}…", truncated)
    } else {
        collapsed
    }
}

/// Room kind for app-side routing: explicit field wins, else the dm
/// prefix on the room id, else the event source's default.
fn resolve_room_kind(room: &Room, room_id: &str, dm_prefix: &str, source: &RoomSource) -> String {
    if let Some(kind) = &room.kind {
        return kind.clone();
    }
    if room_id.starts_with(dm_prefix) {
        return "dm".to_string();
    }
    source.default_kind.clone()
}
