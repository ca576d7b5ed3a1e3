use std::collections::HashSet;

use rusqlite::{params, Connection, OptionalExtension, Result};
use uuid::Uuid;

pub const THEME_KEY: &str = "theme";
pub const PENDING_PASSCODE_KEY: &str = "pending_passcode";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Per-device state: "delete for me" ids and a few settings.
pub struct LocalStore {
    conn: Connection,
}

impl LocalStore {
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS hidden_messages (
                owner_id TEXT NOT NULL,
                peer_id TEXT NOT NULL,
                message_id TEXT NOT NULL,
                PRIMARY KEY (owner_id, peer_id, message_id)
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;
        Ok(LocalStore { conn })
    }

    pub fn hide(&self, owner: Uuid, peer: Uuid, message: Uuid) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO hidden_messages (owner_id, peer_id, message_id) VALUES (?1, ?2, ?3)",
            params![owner.to_string(), peer.to_string(), message.to_string()],
        )?;
        Ok(())
    }

    pub fn hidden_set(&self, owner: Uuid, peer: Uuid) -> Result<HashSet<Uuid>> {
        let mut stmt = self.conn.prepare(
            "SELECT message_id FROM hidden_messages WHERE owner_id = ?1 AND peer_id = ?2",
        )?;
        let rows = stmt.query_map(params![owner.to_string(), peer.to_string()], |row| {
            row.get::<_, String>(0)
        })?;
        let mut set = HashSet::new();
        for row in rows {
            // Rows this build did not write are skipped rather than failing the whole set.
            if let Ok(id) = Uuid::parse_str(&row?) {
                set.insert(id);
            }
        }
        Ok(set)
    }

    pub fn setting(&self, key: &str) -> Result<Option<String>> {
        self.conn
            .query_row("SELECT value FROM settings WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn remove_setting(&self, key: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM settings WHERE key = ?1", [key])?;
        Ok(())
    }
}
