use std::collections::BTreeMap;

use chrono::{serde::ts_milliseconds, DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Durable per-tenant scan history used to spot returning diners.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecurrenceRecord {
    pub client_id: String,
    #[serde(with = "ts_milliseconds")]
    pub first_scan_at: DateTime<Utc>,
    #[serde(with = "ts_milliseconds")]
    pub last_scan_at: DateTime<Utc>,
    pub total_scans: u64,
    #[serde(default)]
    pub qr_scans: BTreeMap<String, u64>,
}

/// Derived fields reported in the `visitor_status` event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VisitorStatus {
    pub client_id: String,
    pub is_returning: bool,
    pub days_since_last_scan: Option<i64>,
    pub total_scans: u64,
    pub qr_scans: u64,
}

impl RecurrenceRecord {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            client_id: Uuid::new_v4().to_string(),
            first_scan_at: now,
            last_scan_at: now,
            total_scans: 0,
            qr_scans: BTreeMap::new(),
        }
    }

    /// Count one scan at `now` and report what it means for this visitor.
    pub fn register_scan(&mut self, qr_id: Option<&str>, now: DateTime<Utc>) -> VisitorStatus {
        let previous_scan = (self.total_scans > 0).then_some(self.last_scan_at);

        self.total_scans += 1;
        self.last_scan_at = now;
        let qr_scans = match qr_id {
            Some(qr) => {
                let count = self.qr_scans.entry(qr.to_string()).or_insert(0);
                *count += 1;
                *count
            }
            None => 0,
        };

        VisitorStatus {
            client_id: self.client_id.clone(),
            is_returning: self.total_scans > 1,
            days_since_last_scan: previous_scan.map(|at| (now - at).num_days().max(0)),
            total_scans: self.total_scans,
            qr_scans,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn first_scan_is_not_returning() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 20, 0, 0).unwrap();
        let mut record = RecurrenceRecord::new(now);

        let status = record.register_scan(Some("qr-7"), now);

        assert!(!status.is_returning);
        assert_eq!(status.days_since_last_scan, None);
        assert_eq!(status.total_scans, 1);
        assert_eq!(status.qr_scans, 1);
    }

    #[test]
    fn next_day_scan_is_returning_after_one_day() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 20, 0, 0).unwrap();
        let mut record = RecurrenceRecord::new(now);
        record.register_scan(Some("qr-7"), now);

        let status = record.register_scan(Some("qr-7"), now + Duration::days(1));

        assert!(status.is_returning);
        assert_eq!(status.days_since_last_scan, Some(1));
        assert_eq!(status.total_scans, 2);
        assert_eq!(status.qr_scans, 2);
        assert_eq!(record.first_scan_at, now);
    }

    #[test]
    fn counts_each_qr_code_separately() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 20, 0, 0).unwrap();
        let mut record = RecurrenceRecord::new(now);
        record.register_scan(Some("table-1"), now);
        record.register_scan(Some("table-2"), now + Duration::hours(3));
        let status = record.register_scan(Some("table-1"), now + Duration::hours(30));

        assert_eq!(status.qr_scans, 2);
        assert_eq!(status.days_since_last_scan, Some(1));
        assert_eq!(record.qr_scans.get("table-2"), Some(&1));
    }
}
