use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::{
    db::{
        connection::Database,
        repositories::kv::{read_value, write_value},
    },
    models::{RecurrenceRecord, VisitorStatus},
};

const ENABLE_LOGS: bool = true;

use crate::log_warn;

impl Database {
    /// Read-modify-write of the tenant's recurrence record in one transaction.
    /// A corrupt record is replaced by a fresh one.
    pub async fn register_scan(
        &self,
        key: &str,
        qr_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<VisitorStatus> {
        let key = key.to_string();
        let qr_id = qr_id.map(str::to_string);
        self.execute(move |conn| {
            let tx = conn
                .transaction()
                .context("failed to open recurrence transaction")?;

            let mut record = match read_value(&tx, &key)? {
                Some(raw) => match serde_json::from_str::<RecurrenceRecord>(&raw) {
                    Ok(record) => record,
                    Err(err) => {
                        log_warn!("Discarding malformed recurrence record '{key}': {err}");
                        RecurrenceRecord::new(now)
                    }
                },
                None => RecurrenceRecord::new(now),
            };

            let status = record.register_scan(qr_id.as_deref(), now);
            let serialized = serde_json::to_string(&record)
                .context("failed to serialize recurrence record")?;
            write_value(&tx, &key, &serialized, now)?;
            tx.commit().context("failed to commit recurrence record")?;

            Ok(status)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[tokio::test]
    async fn second_scan_next_day_is_returning() {
        let db = Database::open_in_memory().unwrap();
        let day_one = Utc.with_ymd_and_hms(2024, 3, 1, 19, 30, 0).unwrap();

        let first = db
            .register_scan("buf:recurrence:t1", Some("qr-7"), day_one)
            .await
            .unwrap();
        assert!(!first.is_returning);
        assert_eq!(first.days_since_last_scan, None);

        let second = db
            .register_scan("buf:recurrence:t1", Some("qr-7"), day_one + Duration::days(1))
            .await
            .unwrap();
        assert!(second.is_returning);
        assert_eq!(second.days_since_last_scan, Some(1));
        assert_eq!(second.client_id, first.client_id);
    }

    #[tokio::test]
    async fn tenants_do_not_share_counts() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 19, 30, 0).unwrap();

        db.register_scan("buf:recurrence:t1", None, now).await.unwrap();
        let other = db
            .register_scan("buf:recurrence:t2", None, now)
            .await
            .unwrap();

        assert!(!other.is_returning);
        assert_eq!(other.total_scans, 1);
    }

    #[tokio::test]
    async fn corrupt_record_starts_over() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 19, 30, 0).unwrap();
        db.put_value("buf:recurrence:t1", "garbage".into(), now)
            .await
            .unwrap();

        let status = db.register_scan("buf:recurrence:t1", None, now).await.unwrap();

        assert_eq!(status.total_scans, 1);
        assert!(!status.is_returning);
    }
}
