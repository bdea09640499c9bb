//! Durable per-room checkpoint: one JSON blob per room in SQLite.

use crate::engine::error::{EngineError, Result};
use crate::engine::state::RoomState;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::{Arc, Mutex};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS yabot_rooms (
    room_id TEXT PRIMARY KEY,
    state_json TEXT NOT NULL,
    updated_at TEXT NOT NULL
)";

#[derive(Clone)]
pub struct RoomStore {
    conn: Arc<Mutex<Connection>>,
}

impl RoomStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| EngineError::Store(format!("create {}: {e}", parent.display())))?;
        }
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute(SCHEMA, [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| EngineError::Store("room store mutex poisoned".to_string()))?;
            f(&guard)
        })
        .await
        .map_err(|e| EngineError::Store(format!("room store task failed: {e}")))?
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn load(&self, room_id: &str) -> Result<Option<RoomState>> {
        let room_id = room_id.to_string();
        let raw: Option<String> = self
            .with_conn(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT state_json FROM yabot_rooms WHERE room_id = ?1",
                        params![room_id],
                        |row| row.get(0),
                    )
                    .optional()?)
            })
            .await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    #[tracing::instrument(level = "debug", skip(self, state))]
    pub async fn save(&self, room_id: &str, state: &RoomState) -> Result<()> {
        let room_id = room_id.to_string();
        let json = serde_json::to_string(state)?;
        let updated_at = chrono::Utc::now().to_rfc3339();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO yabot_rooms (room_id, state_json, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(room_id) DO UPDATE SET
                    state_json = excluded.state_json,
                    updated_at = excluded.updated_at",
                params![room_id, json, updated_at],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn room_count(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM yabot_rooms", [], |row| row.get(0))?;
            Ok(n.max(0) as usize)
        })
        .await
    }
}
