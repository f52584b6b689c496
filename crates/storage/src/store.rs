//! SQLite needle store implementation.

use crate::{Error, Needle, NeedleId, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Deserialize;
use std::path::Path;

/// SQLite-backed needle store.
pub struct NeedleStore {
    conn: Connection,
}

#[derive(Deserialize)]
struct NeedleRow {
    data: String,
}

impl NeedleStore {
    /// Open or create a needle store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory needle store (useful for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS needles (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                data TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    /// Insert a needle, or replace the stored definition with the same id.
    pub fn save(&self, needle: &Needle) -> Result<()> {
        needle.validate()?;

        let owner: Option<String> = self
            .conn
            .query_row(
                "SELECT id FROM needles WHERE name = ?1",
                [&needle.name],
                |row| row.get(0),
            )
            .optional()?;
        if owner.is_some_and(|id| id != needle.id.to_string()) {
            return Err(Error::DuplicateName(needle.name.clone()));
        }

        self.conn.execute(
            "INSERT INTO needles (id, name, data, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                data = excluded.data,
                updated_at = excluded.updated_at",
            params![
                needle.id.to_string(),
                needle.name,
                serde_json::to_string(needle)?,
                needle.created_at.to_rfc3339(),
                needle.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Load a needle by id.
    pub fn get(&self, id: NeedleId) -> Result<Option<Needle>> {
        self.query_one("SELECT data FROM needles WHERE id = ?1", &id.to_string())
    }

    /// Load a needle by its (unique) name.
    pub fn find_by_name(&self, name: &str) -> Result<Option<Needle>> {
        self.query_one("SELECT data FROM needles WHERE name = ?1", name)
    }

    /// List all needles, ordered by name.
    pub fn list(&self) -> Result<Vec<Needle>> {
        let mut stmt = self.conn.prepare("SELECT data FROM needles ORDER BY name")?;
        let rows = serde_rusqlite::from_rows::<NeedleRow>(stmt.query([])?);

        let mut needles = Vec::new();
        for row in rows {
            needles.push(serde_json::from_str(&row?.data)?);
        }
        Ok(needles)
    }

    /// Delete a needle. Returns whether a row was removed.
    pub fn delete(&self, id: NeedleId) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM needles WHERE id = ?1", [id.to_string()])?;
        Ok(removed > 0)
    }

    fn query_one(&self, sql: &str, key: &str) -> Result<Option<Needle>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = serde_rusqlite::from_rows::<NeedleRow>(stmt.query([key])?);

        match rows.next() {
            Some(row) => Ok(Some(serde_json::from_str(&row?.data)?)),
            None => Ok(None),
        }
    }
}
