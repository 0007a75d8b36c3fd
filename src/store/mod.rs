use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// How far either side of a deep-linked message `find_window` reaches.
pub const DEEP_LINK_WINDOW_MINUTES: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Media,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Media => "media",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(MessageKind::Text),
            "media" => Some(MessageKind::Media),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "image" => Some(MediaKind::Image),
            "video" => Some(MediaKind::Video),
            _ => None,
        }
    }
}

/// A stored chat message. Immutable once created; hard deletion is the only
/// mutation. `created_at` is unix milliseconds, strictly increasing within a
/// room so it can serve as a pagination cursor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub room_id: String,
    pub sender_stable_id: Option<String>,
    pub sender_display_name: String,
    pub sender_avatar_url: Option<String>,
    pub kind: MessageKind,
    pub text: Option<String>,
    pub media_url: Option<String>,
    pub media_kind: Option<MediaKind>,
    pub is_guest: bool,
    pub created_at: i64,
}

/// The `send` payload as it arrives on the wire; `id` and `created_at` are
/// assigned by the store on append.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageInput {
    pub room_id: String,
    #[serde(rename = "senderId", default)]
    pub sender_stable_id: Option<String>,
    pub sender_display_name: String,
    #[serde(default)]
    pub sender_avatar_url: Option<String>,
    pub kind: MessageKind,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub media_kind: Option<MediaKind>,
    #[serde(default)]
    pub is_guest: bool,
}

impl MessageInput {
    /// A text message must carry text, a media message a url. Rejected here,
    /// before anything reaches the hub.
    pub fn validate(&self) -> AppResult<()> {
        match self.kind {
            MessageKind::Text => {
                if self.text.as_deref().unwrap_or("").trim().is_empty() {
                    return Err(AppError::Validation("text message with empty text".into()));
                }
            }
            MessageKind::Media => {
                if self.media_url.as_deref().unwrap_or("").is_empty() {
                    return Err(AppError::Validation("media message without mediaUrl".into()));
                }
            }
        }
        Ok(())
    }
}

/// Durable append/query/delete over message records, keyed by room and time.
#[derive(Clone)]
pub struct MessageStore {
    pool: SqlitePool,
    // last created_at handed out per room; appends in the same millisecond
    // get bumped past it so room order is total
    clocks: Arc<DashMap<String, i64>>,
}

const COLUMNS: &str = "id,room_id,sender_stable_id,sender_display_name,sender_avatar_url,kind,text,media_url,media_kind,is_guest,created_at";

type Row = (
    String,
    String,
    Option<String>,
    String,
    Option<String>,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    bool,
    i64,
);

fn from_row(row: Row) -> AppResult<Message> {
    let (id, room_id, sender_stable_id, sender_display_name, sender_avatar_url, kind, text, media_url, media_kind, is_guest, created_at) = row;
    Ok(Message {
        id: Uuid::parse_str(&id).map_err(anyhow::Error::from)?,
        room_id,
        sender_stable_id,
        sender_display_name,
        sender_avatar_url,
        kind: MessageKind::parse(&kind)
            .ok_or_else(|| anyhow::anyhow!("unknown message kind {kind:?} in store"))?,
        text,
        media_url,
        media_kind: match media_kind {
            Some(m) => Some(
                MediaKind::parse(&m)
                    .ok_or_else(|| anyhow::anyhow!("unknown media kind {m:?} in store"))?,
            ),
            None => None,
        },
        is_guest,
        created_at,
    })
}

impl MessageStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool, clocks: Arc::new(DashMap::new()) }
    }

    pub async fn init_schema(&self) -> AppResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                room_id TEXT NOT NULL,
                sender_stable_id TEXT,
                sender_display_name TEXT NOT NULL,
                sender_avatar_url TEXT,
                kind TEXT NOT NULL,
                text TEXT,
                media_url TEXT,
                media_kind TEXT,
                is_guest INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_room_created ON messages(room_id, created_at)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn next_timestamp(&self, room: &str) -> i64 {
        let now = Utc::now().timestamp_millis();
        let mut last = self.clocks.entry(room.to_owned()).or_insert(0);
        let ts = now.max(*last + 1);
        *last = ts;
        ts
    }

    pub async fn append(&self, input: MessageInput) -> AppResult<Message> {
        input.validate()?;

        let msg = Message {
            id: Uuid::now_v7(),
            created_at: self.next_timestamp(&input.room_id),
            room_id: input.room_id,
            sender_stable_id: input.sender_stable_id,
            sender_display_name: input.sender_display_name,
            sender_avatar_url: input.sender_avatar_url,
            kind: input.kind,
            text: input.text,
            media_url: input.media_url,
            media_kind: input.media_kind,
            is_guest: input.is_guest,
        };

        sqlx::query(
            "INSERT INTO messages (id,room_id,sender_stable_id,sender_display_name,sender_avatar_url,kind,text,media_url,media_kind,is_guest,created_at)
             VALUES (?,?,?,?,?,?,?,?,?,?,?)",
        )
        .bind(msg.id.to_string())
        .bind(&msg.room_id)
        .bind(&msg.sender_stable_id)
        .bind(&msg.sender_display_name)
        .bind(&msg.sender_avatar_url)
        .bind(msg.kind.as_str())
        .bind(&msg.text)
        .bind(&msg.media_url)
        .bind(msg.media_kind.map(|m| m.as_str()))
        .bind(msg.is_guest)
        .bind(msg.created_at)
        .execute(&self.pool)
        .await?;

        Ok(msg)
    }

    /// Up to `limit` messages older than `before` (newest `limit` when no
    /// cursor is given), ascending by time.
    pub async fn query(&self, room: &str, before: Option<i64>, limit: u32) -> AppResult<Vec<Message>> {
        let rows: Vec<Row> = match before {
            Some(cursor) => {
                sqlx::query_as(&format!(
                    "SELECT {COLUMNS} FROM messages WHERE room_id=? AND created_at<? ORDER BY created_at DESC, id DESC LIMIT ?"
                ))
                .bind(room)
                .bind(cursor)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(&format!(
                    "SELECT {COLUMNS} FROM messages WHERE room_id=? ORDER BY created_at DESC, id DESC LIMIT ?"
                ))
                .bind(room)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut msgs = rows.into_iter().map(from_row).collect::<AppResult<Vec<_>>>()?;
        msgs.reverse();
        Ok(msgs)
    }

    /// Deep-link resolution: everything in the target's room within
    /// `window_minutes` either side of it, ascending. A time-bounded scan
    /// instead of a random-access pagination index.
    pub async fn find_window(&self, message_id: Uuid, window_minutes: i64) -> AppResult<Vec<Message>> {
        let target = self.get(message_id).await?;
        let span = window_minutes * 60_000;

        let rows: Vec<Row> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM messages WHERE room_id=? AND created_at BETWEEN ? AND ? ORDER BY created_at ASC, id ASC"
        ))
        .bind(&target.room_id)
        .bind(target.created_at - span)
        .bind(target.created_at + span)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(from_row).collect()
    }

    pub async fn get(&self, message_id: Uuid) -> AppResult<Message> {
        let row: Option<Row> = sqlx::query_as(&format!("SELECT {COLUMNS} FROM messages WHERE id=?"))
            .bind(message_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => from_row(row),
            None => Err(AppError::NotFound(format!("message {message_id}"))),
        }
    }

    pub async fn remove(&self, message_id: Uuid) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM messages WHERE id=?")
            .bind(message_id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("message {message_id}")));
        }
        Ok(())
    }
}
