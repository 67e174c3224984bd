use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::{db::connection::Database, models::Event};

/// What was found under the buffer key at startup.
#[derive(Debug)]
pub enum StoredBuffer {
    Missing,
    Events(Vec<Event>),
    Malformed(String),
}

impl Database {
    pub async fn load_buffer(&self, key: &str) -> Result<StoredBuffer> {
        let raw = self.get_value(key).await?;
        Ok(match raw {
            None => StoredBuffer::Missing,
            Some(raw) => match serde_json::from_str::<Vec<Event>>(&raw) {
                Ok(events) => StoredBuffer::Events(events),
                Err(err) => StoredBuffer::Malformed(err.to_string()),
            },
        })
    }

    pub async fn save_buffer(
        &self,
        key: &str,
        events: &[Event],
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let serialized =
            serde_json::to_string(events).context("failed to serialize metrics buffer")?;
        self.put_value(key, serialized, updated_at).await
    }
}
