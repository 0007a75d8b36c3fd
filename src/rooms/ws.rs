use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    debug_handler,
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::{IntoResponse, Response},
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::{
    config::Config,
    hub::{generate_guest_name, Identity, RoomHub, ServerEvent},
    presence::PresenceRegistry,
    rooms::{msg, session::RoomSession},
    store::{MessageInput, MessageStore, DEEP_LINK_WINDOW_MINUTES},
};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ConnectParams {
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    stable_id: Option<String>,
}

/// Everything a client sends over the socket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum ClientEvent {
    #[serde(rename_all = "camelCase")]
    Identify {
        display_name: String,
        #[serde(default)]
        stable_id: Option<String>,
    },
    SwitchRoom {
        room: String,
    },
    Send {
        #[serde(flatten)]
        input: MessageInput,
    },
    #[serde(rename_all = "camelCase")]
    Typing {
        display_name: String,
        room_id: String,
    },
    #[serde(rename_all = "camelCase")]
    FindById {
        message_id: Uuid,
    },
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn room_ws(
    Path(room): Path<String>,
    Query(params): Query<ConnectParams>,
    State(store): State<MessageStore>,
    State(hub): State<Arc<RoomHub>>,
    State(presence): State<Arc<PresenceRegistry>>,
    State(config): State<Arc<Config>>,
    ws: WebSocketUpgrade,
) -> Response {
    let display_name = params
        .display_name
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(generate_guest_name);
    let identity = Identity { display_name, stable_id: params.stable_id };

    // access is checked once, here; a rejected subscribe terminates the
    // connection before the upgrade ever happens
    let rx = match hub.subscribe(&room, &identity) {
        Ok(rx) => rx,
        Err(err) => {
            tracing::warn!(room = %room, name = %identity.display_name, "rejected: {err}");
            return err.into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, store, hub, presence, config, identity, room, rx))
}

#[allow(clippy::too_many_arguments)]
async fn handle_socket(
    socket: WebSocket,
    store: MessageStore,
    hub: Arc<RoomHub>,
    presence: Arc<PresenceRegistry>,
    config: Arc<Config>,
    identity: Identity,
    room: String,
    mut rx: broadcast::Receiver<ServerEvent>,
) {
    let mut session = RoomSession::connect(identity);
    session.join(&room);
    presence.join(&room, &session.identity().display_name);
    broadcast_presence(&hub, &presence, &room);
    tracing::info!(room = %room, name = %session.identity().display_name, "joined");

    let (mut sender, mut receiver) = socket.split();
    let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(event) => {
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(room = ?session.room(), skipped, "subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },

            frame = receiver.next() => match frame {
                Some(Ok(frame)) => {
                    last_seen = Instant::now();
                    match frame {
                        WsMessage::Close(_) => break,
                        WsMessage::Ping(_) | WsMessage::Pong(_) => {}
                        other => {
                            let Ok(event) = serde_json::from_slice::<ClientEvent>(&other.into_data()) else {
                                continue;
                            };
                            let flow = handle_event(
                                event, &mut session, &mut rx, &mut sender,
                                &store, &hub, &presence,
                            )
                            .await;
                            if flow.is_break() {
                                break;
                            }
                        }
                    }
                }
                Some(Err(_)) | None => break,
            },

            _ = heartbeat.tick() => {
                if last_seen.elapsed() > config.heartbeat_timeout {
                    tracing::info!(room = ?session.room(), "heartbeat timeout");
                    break;
                }
                if sender.send(WsMessage::Ping(Default::default())).await.is_err() {
                    break;
                }
            }
        }
    }

    if let Some((room, name)) = session.disconnect() {
        presence.leave(&room, &name);
        broadcast_presence(&hub, &presence, &room);
        tracing::info!(room = %room, name = %name, "left");
    }
}

async fn handle_event(
    event: ClientEvent,
    session: &mut RoomSession,
    rx: &mut broadcast::Receiver<ServerEvent>,
    sender: &mut SplitSink<WebSocket, WsMessage>,
    store: &MessageStore,
    hub: &RoomHub,
    presence: &PresenceRegistry,
) -> ControlFlow<()> {
    match event {
        ClientEvent::Identify { display_name, stable_id } => {
            session.identify(display_name, stable_id);
        }

        ClientEvent::SwitchRoom { room: new_room } => {
            let new_rx = match hub.subscribe(&new_room, session.identity()) {
                Ok(new_rx) => new_rx,
                Err(err) => {
                    let _ = send_event(sender, &ServerEvent::Error { reason: err.to_string() }).await;
                    return ControlFlow::Break(());
                }
            };

            if let Some((old_room, old_name)) = session.switch_room(&new_room) {
                presence.leave(&old_room, &old_name);
                broadcast_presence(hub, presence, &old_room);
            }
            *rx = new_rx;
            presence.join(&new_room, &session.identity().display_name);
            broadcast_presence(hub, presence, &new_room);
        }

        ClientEvent::Send { input } => {
            // persist-then-publish; a failed append is surfaced to the
            // sender instead of silently dropped, and never broadcast
            if let Err(err) = msg::send_msg(store, hub, input).await {
                tracing::error!(room = ?session.room(), "send failed: {err}");
                let _ = send_event(sender, &ServerEvent::Error { reason: err.to_string() }).await;
            }
        }

        ClientEvent::Typing { display_name, room_id } => {
            let event = ServerEvent::Typing { display_name, room_id: room_id.clone() };
            hub.publish(&room_id, event);
        }

        ClientEvent::FindById { message_id } => {
            match store.find_window(message_id, DEEP_LINK_WINDOW_MINUTES).await {
                Ok(messages) => {
                    if send_event(sender, &ServerEvent::LoadMessages { messages }).await.is_err() {
                        return ControlFlow::Break(());
                    }
                }
                Err(err) => {
                    let _ = send_event(sender, &ServerEvent::Error { reason: err.to_string() }).await;
                }
            }
        }
    }

    ControlFlow::Continue(())
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, WsMessage>,
    event: &ServerEvent,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(event).map_err(axum::Error::new)?;
    sender.send(WsMessage::Text(text.into())).await
}

/// Fresh member list for the room plus updated counts for every room's
/// sidebar.
fn broadcast_presence(hub: &RoomHub, presence: &PresenceRegistry, room: &str) {
    hub.publish(
        room,
        ServerEvent::PresenceUsers { room: room.to_owned(), users: presence.users(room) },
    );
    hub.publish_all(ServerEvent::PresenceCounts { counts: presence.counts() });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_events_parse_from_wire_json() {
        let event: ClientEvent = serde_json::from_str(
            r#"{"type":"send","roomId":"guppy-general","kind":"text","text":"hi","senderDisplayName":"Guest-42","isGuest":true}"#,
        )
        .unwrap();
        match event {
            ClientEvent::Send { input } => {
                assert_eq!(input.room_id, "guppy-general");
                assert_eq!(input.text.as_deref(), Some("hi"));
                assert!(input.is_guest);
            }
            other => panic!("expected send, got {other:?}"),
        }

        let event: ClientEvent =
            serde_json::from_str(r#"{"type":"switchRoom","room":"betta-general"}"#).unwrap();
        assert!(matches!(event, ClientEvent::SwitchRoom { room } if room == "betta-general"));

        let event: ClientEvent = serde_json::from_str(
            r#"{"type":"identify","displayName":"Ariel","stableId":"u-1"}"#,
        )
        .unwrap();
        assert!(matches!(event, ClientEvent::Identify { display_name, .. } if display_name == "Ariel"));

        let event: ClientEvent = serde_json::from_str(
            r#"{"type":"typing","displayName":"Ariel","roomId":"guppy-general"}"#,
        )
        .unwrap();
        assert!(matches!(event, ClientEvent::Typing { room_id, .. } if room_id == "guppy-general"));
    }

    #[test]
    fn server_events_use_the_wire_names() {
        let json = serde_json::to_value(ServerEvent::PresenceUsers {
            room: "guppy-general".to_owned(),
            users: vec!["Guest-42".to_owned()],
        })
        .unwrap();
        assert_eq!(json["type"], "presence:users");

        let json = serde_json::to_value(ServerEvent::Removed { id: Uuid::nil() }).unwrap();
        assert_eq!(json["type"], "removed");
    }
}
