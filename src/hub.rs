use std::collections::HashMap;

use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::store::Message;

const CHANNEL_CAPACITY: usize = 256;

/// Everything the server pushes down a socket. Room-scoped events go through
/// the hub; `loadMessages` and `error` are addressed to a single connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerEvent {
    New { message: Message },
    Removed { id: Uuid },
    #[serde(rename_all = "camelCase")]
    Typing { display_name: String, room_id: String },
    LoadMessages { messages: Vec<Message> },
    #[serde(rename = "presence:users")]
    PresenceUsers { room: String, users: Vec<String> },
    #[serde(rename = "presence:counts")]
    PresenceCounts { counts: HashMap<String, usize> },
    Error { reason: String },
}

/// Who a connection claims to be. The stable id comes from the external
/// authentication hand-off; guests have none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub display_name: String,
    pub stable_id: Option<String>,
}

impl Identity {
    pub fn is_guest(&self) -> bool {
        self.stable_id.is_none() || is_guest_name(&self.display_name)
    }
}

pub fn is_guest_name(name: &str) -> bool {
    name.strip_prefix("Guest-")
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}

pub fn generate_guest_name() -> String {
    format!("Guest-{}", rand::rng().random_range(1..10_000))
}

/// Room access and deletion rules.
#[derive(Debug, Clone)]
pub struct RoomPolicy {
    /// Sub-room suffix marking a topic's public variant.
    pub public_subroom: String,
    /// Superuser allowed to delete anything.
    pub owner_name: String,
}

impl RoomPolicy {
    pub fn is_public(&self, room: &str) -> bool {
        room == self.public_subroom || room.ends_with(&format!("-{}", self.public_subroom))
    }
}

/// Fan-out of room-scoped events: one broadcast channel per room, created on
/// first use. Delivery to all current subscribers of a room is in publish
/// order; nothing is guaranteed across rooms.
pub struct RoomHub {
    rooms: DashMap<String, broadcast::Sender<ServerEvent>>,
    policy: RoomPolicy,
}

impl RoomHub {
    pub fn new(policy: RoomPolicy) -> Self {
        Self { rooms: DashMap::new(), policy }
    }

    pub fn policy(&self) -> &RoomPolicy {
        &self.policy
    }

    /// Access is checked here, once. A guest identity may only enter a
    /// topic's public sub-room; the caller terminates the connection on
    /// rejection. Unsubscribing is dropping the receiver.
    pub fn subscribe(&self, room: &str, identity: &Identity) -> AppResult<broadcast::Receiver<ServerEvent>> {
        if identity.is_guest() && !self.policy.is_public(room) {
            return Err(AppError::Authorization(format!(
                "guests may not join {room}"
            )));
        }
        Ok(self.sender(room).subscribe())
    }

    fn sender(&self, room: &str) -> broadcast::Sender<ServerEvent> {
        self.rooms
            .entry(room.to_owned())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Returns how many subscribers received the event; 0 with no room or no
    /// listeners is not an error.
    pub fn publish(&self, room: &str, event: ServerEvent) -> usize {
        match self.rooms.get(room) {
            Some(tx) => tx.send(event).unwrap_or(0),
            None => 0,
        }
    }

    /// Fan an event out to every active room; used for presence counts.
    pub fn publish_all(&self, event: ServerEvent) {
        for entry in self.rooms.iter() {
            let _ = entry.value().send(event.clone());
        }
    }

    /// Deletion is allowed to the message's sender (by stable id or display
    /// name) and to the fixed owner identity.
    pub fn can_delete(&self, requester: &str, msg: &Message) -> bool {
        requester == self.policy.owner_name
            || msg.sender_stable_id.as_deref() == Some(requester)
            || msg.sender_display_name == requester
    }
}
