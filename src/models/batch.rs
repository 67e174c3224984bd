use std::fmt;

use chrono::{serde::ts_milliseconds, DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Event, Session};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FlushReason {
    SizeLimit,
    Timer,
    Retry,
    PageHidden,
    PageUnload,
    Manual,
}

impl FlushReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushReason::SizeLimit => "size_limit",
            FlushReason::Timer => "timer",
            FlushReason::Retry => "retry",
            FlushReason::PageHidden => "page_hidden",
            FlushReason::PageUnload => "page_unload",
            FlushReason::Manual => "manual",
        }
    }
}

impl fmt::Display for FlushReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PageMeta {
    pub url: Option<String>,
    pub referrer: Option<String>,
    #[serde(with = "ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub sdk_version: String,
}

/// Body POSTed to the ingestion endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatchPayload {
    pub batch_id: String,
    pub session: Session,
    pub reason: FlushReason,
    pub env: String,
    pub tenant: Option<String>,
    pub meta: PageMeta,
    pub events: Vec<Event>,
}
