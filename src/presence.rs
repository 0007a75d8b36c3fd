use std::collections::{HashMap, HashSet};

use dashmap::DashMap;

/// Live participants per room, keyed by display name.
///
/// Keying by name means two connections sharing one generated guest name
/// collapse into a single slot. That matches the product's presence counts
/// and is deliberate; keying by connection id would instead count every tab
/// separately.
///
/// Per-room mutations go through `DashMap` entry locking, so concurrent
/// join/leave on the same room cannot lose updates. An emptied room keeps
/// its (empty) entry; nothing garbage-collects it.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    rooms: DashMap<String, HashSet<String>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent: joining a room you are already in is a no-op.
    pub fn join(&self, room: &str, name: &str) {
        self.rooms
            .entry(room.to_owned())
            .or_default()
            .insert(name.to_owned());
    }

    /// Idempotent: leaving a room you are not in is a no-op.
    pub fn leave(&self, room: &str, name: &str) {
        if let Some(mut entry) = self.rooms.get_mut(room) {
            entry.remove(name);
        }
    }

    pub fn users(&self, room: &str) -> Vec<String> {
        let mut users: Vec<String> = self
            .rooms
            .get(room)
            .map(|entry| entry.iter().cloned().collect())
            .unwrap_or_default();
        users.sort();
        users
    }

    /// Snapshot derived from current set sizes, never separately maintained
    /// counters, so it cannot drift.
    pub fn counts(&self) -> HashMap<String, usize> {
        self.rooms
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().len()))
            .collect()
    }
}
