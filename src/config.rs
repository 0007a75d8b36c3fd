use std::time::Duration;

use crate::error::AppResult;

/// Runtime settings, read once at startup from the environment (`.env`
/// supported). Everything has a default except `DATABASE_URL`.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    /// Fixed superuser identity allowed to delete any message.
    pub owner_name: String,
    /// Sub-room suffix that marks the public variant of a topic,
    /// e.g. `general` in `guppy-general`.
    pub public_subroom: String,
    pub page_size: u32,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
}

impl Config {
    pub fn from_env() -> AppResult<Self> {
        let database_url = dotenv::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL is not set"))?;

        Ok(Self {
            database_url,
            bind_addr: dotenv::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_owned()),
            owner_name: dotenv::var("OWNER_NAME").unwrap_or_else(|_| "shopkeeper".to_owned()),
            public_subroom: dotenv::var("PUBLIC_SUBROOM").unwrap_or_else(|_| "general".to_owned()),
            page_size: 30,
            // must stay above normal idle/typing pauses so a thinking user
            // is not reaped as a dead connection
            heartbeat_interval: Duration::from_secs(25),
            heartbeat_timeout: Duration::from_secs(75),
        })
    }
}
