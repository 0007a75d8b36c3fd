use crate::hub::Identity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Joined,
    Disconnected,
}

/// Per-connection state: who the socket claims to be and which room it
/// currently occupies.
///
/// A reconnect is a brand-new session; the old connection's presence entry is
/// reaped only by its own disconnect, so a rapid reconnect can briefly show a
/// name twice. Known window, left as-is.
#[derive(Debug)]
pub struct RoomSession {
    identity: Identity,
    state: SessionState,
    room: Option<String>,
    /// Display name the current room's presence entry was registered under;
    /// `identify` may change the identity afterwards, and cleanup has to
    /// remove what was actually inserted.
    joined_as: Option<String>,
}

impl RoomSession {
    pub fn connect(identity: Identity) -> Self {
        Self { identity, state: SessionState::Connecting, room: None, joined_as: None }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn room(&self) -> Option<&str> {
        self.room.as_deref()
    }

    /// Updates the identity used for subsequent authorization checks. An
    /// already-open room membership is not re-authorized.
    pub fn identify(&mut self, display_name: String, stable_id: Option<String>) {
        self.identity = Identity { display_name, stable_id };
    }

    pub fn join(&mut self, room: &str) {
        self.state = SessionState::Joined;
        self.room = Some(room.to_owned());
        self.joined_as = Some(self.identity.display_name.clone());
    }

    /// Moves the session into `new`, returning the vacated room and the name
    /// its presence entry was held under so the caller can clean up and
    /// re-broadcast both sides.
    pub fn switch_room(&mut self, new: &str) -> Option<(String, String)> {
        let vacated = self.room.take().zip(self.joined_as.take());
        self.join(new);
        vacated
    }

    /// Idempotent; returns the room/name pair to reap on the first call only.
    pub fn disconnect(&mut self) -> Option<(String, String)> {
        self.state = SessionState::Disconnected;
        self.room.take().zip(self.joined_as.take())
    }
}
