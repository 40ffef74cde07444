//! Message-created event endpoint
//!
//! Receives the document-creation event pushed by the event source
//! (one POST per new message document) and runs the fanout pipeline.
//! The document path selects which room collection the message belongs
//! to, unifying the historical group and DM triggers.

use super::ApiResponse;
use crate::config::Config;
use crate::models::MessageEvent;
use crate::services::{FanoutOutcome, NotificationFanoutService, RoomSource};
use actix_web::{web, HttpResponse, Result as ActixResult};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Document-creation event envelope
#[derive(Debug, Deserialize)]
pub struct MessageCreatedEvent {
    pub value: crate::models::Document,
}

/// Path segments of a message document:
/// `.../documents/<collection>/<roomId>/messages/<messageId>`
#[derive(Debug, PartialEq, Eq)]
pub struct MessagePath {
    pub collection: String,
    pub room_id: String,
    pub message_id: String,
}

/// Split a full document resource name into its message path parts
pub fn parse_message_path(name: &str) -> Option<MessagePath> {
    let relative = name.split("/documents/").nth(1)?;
    let segments: Vec<&str> = relative.split('/').collect();

    match segments.as_slice() {
        [collection, room_id, "messages", message_id]
            if !collection.is_empty() && !room_id.is_empty() && !message_id.is_empty() =>
        {
            Some(MessagePath {
                collection: collection.to_string(),
                room_id: room_id.to_string(),
                message_id: message_id.to_string(),
            })
        }
        _ => None,
    }
}

/// Handle a message-created event
///
/// POST /events/message-created
///
/// Replies 204 for completed fanouts and benign skips. Malformed or
/// untracked events also get 204 after a warning, since redelivering
/// them can never succeed. Store/provider transport failures reply 500
/// so the event source redelivers.
pub async fn message_created(
    service: web::Data<Arc<NotificationFanoutService>>,
    config: web::Data<Config>,
    body: web::Bytes,
) -> ActixResult<HttpResponse> {
    // Parsed by hand rather than via the Json extractor: an event body
    // that never deserializes must be acknowledged, not rejected with a
    // 4xx the pusher would redeliver forever.
    let payload: MessageCreatedEvent = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!("ignoring undecodable event body: {}", e);
            return Ok(HttpResponse::NoContent().finish());
        }
    };

    let doc = &payload.value;

    let Some(path) = parse_message_path(&doc.name) else {
        warn!("ignoring event with malformed document path: {}", doc.name);
        return Ok(HttpResponse::NoContent().finish());
    };

    let fanout = &config.fanout;
    let source = if path.collection == fanout.group_collection {
        RoomSource {
            collection: fanout.group_collection.clone(),
            default_kind: "group".to_string(),
        }
    } else if path.collection == fanout.dm_collection {
        RoomSource {
            collection: fanout.dm_collection.clone(),
            default_kind: "dm".to_string(),
        }
    } else {
        warn!(
            "ignoring event from untracked collection: {}",
            path.collection
        );
        return Ok(HttpResponse::NoContent().finish());
    };

    let event = MessageEvent::from_fields(path.room_id, path.message_id, &doc.fields);

    match service.handle_message_created(&source, &event).await {
        Ok(FanoutOutcome::Skipped(reason)) => {
            info!(
                "fanout skipped for message {}: {:?}",
                event.message_id, reason
            );
            Ok(HttpResponse::NoContent().finish())
        }
        Ok(FanoutOutcome::Sent { .. }) => Ok(HttpResponse::NoContent().finish()),
        Err(e) => {
            error!("fanout failed for message {}: {}", event.message_id, e);
            Ok(HttpResponse::InternalServerError()
                .json(ApiResponse::<String>::err(e.to_string())))
        }
    }
}

/// Liveness probe
///
/// GET /healthz
pub async fn health() -> ActixResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(ApiResponse::ok(serde_json::json!({ "status": "ok" }))))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::scope("/events").route("/message-created", web::post().to(message_created)))
        .route("/healthz", web::get().to(health));
}
