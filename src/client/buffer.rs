use std::collections::HashSet;

use uuid::Uuid;

use crate::store::Message;

/// The rendered window of one room's history: ordered by `(createdAt, id)`,
/// deduplicated by id. Only the sync engine mutates it.
#[derive(Debug, Default)]
pub struct MessageBuffer {
    messages: Vec<Message>,
    ids: HashSet<Uuid>,
}

impl MessageBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn oldest(&self) -> Option<&Message> {
        self.messages.first()
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.ids.contains(&id)
    }

    pub fn position(&self, id: Uuid) -> Option<usize> {
        self.messages.iter().position(|m| m.id == id)
    }

    /// Inserts in timestamp order; a duplicate id is a no-op. Returns whether
    /// anything changed.
    pub fn insert(&mut self, msg: Message) -> bool {
        if !self.ids.insert(msg.id) {
            return false;
        }
        let at = self
            .messages
            .partition_point(|m| (m.created_at, m.id) < (msg.created_at, msg.id));
        self.messages.insert(at, msg);
        true
    }

    /// Merges a fetched page or window; returns how many were new.
    pub fn merge(&mut self, batch: Vec<Message>) -> usize {
        batch.into_iter().filter(|m| self.insert(m.clone())).count()
    }

    /// Idempotent: filtering out an id that is already gone changes nothing.
    pub fn remove(&mut self, id: Uuid) -> bool {
        if !self.ids.remove(&id) {
            return false;
        }
        self.messages.retain(|m| m.id != id);
        true
    }
}
