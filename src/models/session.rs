use chrono::{serde::ts_milliseconds, DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One collector run. Mirrors a single page load of the menu.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    #[serde(with = "ts_milliseconds")]
    pub started_at: DateTime<Utc>,
    #[serde(with = "ts_milliseconds")]
    pub last_activity_at: DateTime<Utc>,
    pub events_count: u64,
}

impl Session {
    pub fn begin(now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            started_at: now,
            last_activity_at: now,
            events_count: 0,
        }
    }

    /// Count an accepted event and move the activity mark forward.
    pub fn record_event(&mut self, at: DateTime<Utc>) {
        self.events_count += 1;
        self.mark_activity(at);
    }

    pub fn mark_activity(&mut self, at: DateTime<Utc>) {
        if at > self.last_activity_at {
            self.last_activity_at = at;
        }
    }

    pub fn elapsed_ms(&self, now: DateTime<Utc>) -> i64 {
        (now - self.started_at).num_milliseconds().max(0)
    }
}
