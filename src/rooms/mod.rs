mod msg;
mod session;
mod ws;

use axum::{
    routing::{delete, get},
    Router,
};

use crate::AppState;

pub use msg::{remove_msg, send_msg};
pub use session::{RoomSession, SessionState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{room}/messages", get(msg::messages))
        .route("/{room}/messages/{id}", delete(msg::delete_msg))
        .route("/{room}/ws", get(ws::room_ws))
}
