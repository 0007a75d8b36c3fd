pub mod client;
pub mod config;
pub mod error;
pub mod hub;
pub mod presence;
pub mod rooms;
pub mod store;

use std::sync::Arc;

use axum::extract::FromRef;

use crate::{config::Config, hub::RoomHub, presence::PresenceRegistry, store::MessageStore};

pub use error::{AppError, AppResult};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub store: MessageStore,
    pub hub: Arc<RoomHub>,
    pub presence: Arc<PresenceRegistry>,
    pub config: Arc<Config>,
}
