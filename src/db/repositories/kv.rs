use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::connection::Database;

pub(crate) fn read_value(conn: &Connection, key: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM kv_store WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
    .with_context(|| format!("failed to read key '{key}'"))
}

pub(crate) fn write_value(
    conn: &Connection,
    key: &str,
    value: &str,
    updated_at: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO kv_store (key, value, updated_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET
             value = excluded.value,
             updated_at = excluded.updated_at",
        params![key, value, updated_at.to_rfc3339()],
    )
    .with_context(|| format!("failed to write key '{key}'"))?;
    Ok(())
}

impl Database {
    pub async fn get_value(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.execute(move |conn| read_value(conn, &key)).await
    }

    /// Last writer wins; there is no cross-process coordination.
    pub async fn put_value(&self, key: &str, value: String, updated_at: DateTime<Utc>) -> Result<()> {
        let key = key.to_string();
        self.execute(move |conn| write_value(conn, &key, &value, updated_at))
            .await
    }
}
