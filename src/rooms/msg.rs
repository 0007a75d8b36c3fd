use axum::{
    debug_handler,
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    config::Config,
    error::{AppError, AppResult},
    hub::{RoomHub, ServerEvent},
    store::{Message, MessageInput, MessageStore},
};

/// Persist-then-publish. A message that fails to persist is never broadcast,
/// so nothing can appear live that would be missing from history on reload.
pub async fn send_msg(store: &MessageStore, hub: &RoomHub, input: MessageInput) -> AppResult<Message> {
    let msg = store.append(input).await?;
    hub.publish(&msg.room_id, ServerEvent::New { message: msg.clone() });
    Ok(msg)
}

/// Authorize, remove, then tell the room. Subscribers filter the id out of
/// their buffers; the requester's own client removes it optimistically on the
/// success response.
pub async fn remove_msg(
    store: &MessageStore,
    hub: &RoomHub,
    id: Uuid,
    requester: &str,
) -> AppResult<Message> {
    let msg = store.get(id).await?;
    if !hub.can_delete(requester, &msg) {
        return Err(AppError::Authorization(format!(
            "{requester} may not delete messages of {}",
            msg.sender_display_name
        )));
    }

    store.remove(id).await?;
    hub.publish(&msg.room_id, ServerEvent::Removed { id });
    Ok(msg)
}

#[derive(Deserialize)]
pub(crate) struct HistoryQuery {
    before: Option<i64>,
    limit: Option<u32>,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn messages(
    Path(room): Path<String>,
    Query(HistoryQuery { before, limit }): Query<HistoryQuery>,
    State(store): State<MessageStore>,
    State(config): State<Arc<Config>>,
) -> AppResult<Json<Vec<Message>>> {
    let limit = limit.unwrap_or(config.page_size).min(100);
    Ok(Json(store.query(&room, before, limit).await?))
}

#[derive(Deserialize)]
pub(crate) struct DeleteQuery {
    requester: String,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn delete_msg(
    Path((room, id)): Path<(String, Uuid)>,
    Query(DeleteQuery { requester }): Query<DeleteQuery>,
    State(store): State<MessageStore>,
    State(hub): State<Arc<RoomHub>>,
) -> AppResult<StatusCode> {
    if store.get(id).await?.room_id != room {
        return Err(AppError::NotFound(format!("message {id}")));
    }
    remove_msg(&store, &hub, id, &requester).await?;
    tracing::info!(room = %room, message = %id, requester = %requester, "message deleted");
    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{Identity, RoomPolicy};
    use crate::store::tests::{mem_store, text_input};

    fn hub() -> RoomHub {
        RoomHub::new(RoomPolicy {
            public_subroom: "general".to_owned(),
            owner_name: "shopkeeper".to_owned(),
        })
    }

    #[tokio::test]
    async fn send_persists_before_publishing() {
        let store = mem_store().await;
        let hub = hub();
        let guest = Identity { display_name: "Guest-42".to_owned(), stable_id: None };
        let mut rx = hub.subscribe("guppy-general", &guest).unwrap();

        let sent = send_msg(&store, &hub, text_input("guppy-general", "Guest-42", "hi"))
            .await
            .unwrap();

        // broadcast carries the stored record, not the raw input
        match rx.recv().await.unwrap() {
            ServerEvent::New { message } => assert_eq!(message, sent),
            other => panic!("expected new, got {other:?}"),
        }
        assert_eq!(store.get(sent.id).await.unwrap(), sent);
    }

    #[tokio::test]
    async fn invalid_send_is_rejected_before_the_hub() {
        let store = mem_store().await;
        let hub = hub();
        let guest = Identity { display_name: "Guest-42".to_owned(), stable_id: None };
        let mut rx = hub.subscribe("guppy-general", &guest).unwrap();

        let mut input = text_input("guppy-general", "Guest-42", "hi");
        input.text = None;
        assert!(matches!(
            send_msg(&store, &hub, input).await,
            Err(AppError::Validation(_))
        ));
        assert!(rx.try_recv().is_err(), "nothing may be broadcast");
        assert!(store.query("guppy-general", None, 10).await.unwrap().is_empty());
    }
}
