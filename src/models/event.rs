use chrono::{serde::ts_milliseconds, DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::settings::CollectorConfig;

/// Free-form event attributes.
pub type Payload = Map<String, Value>;

/// Event names emitted by the collector itself. Hosts may use any other name
/// through [`crate::MetricsCollector::track`].
pub mod names {
    pub const METRICS_INITIALIZED: &str = "metrics_initialized";
    pub const PAGE_OPEN: &str = "page_open";
    pub const PAGE_VISIBLE: &str = "page_visible";
    pub const PAGE_HIDDEN: &str = "page_hidden";
    pub const PAGE_UNLOAD: &str = "page_unload";
    pub const VISITOR_STATUS: &str = "visitor_status";
    pub const ACTIVITY: &str = "activity";
    pub const HEARTBEAT: &str = "heartbeat";
    pub const MENU_CLICK: &str = "menu_click";
    pub const CATEGORY_CLICK: &str = "category_click";
    pub const CATEGORY_LEAVE: &str = "category_leave";
    pub const CATEGORY_DWELL: &str = "category_dwell";
    pub const NAV_PREV: &str = "nav_prev";
    pub const NAV_NEXT: &str = "nav_next";
    pub const INFO_CLICK: &str = "info_click";
    pub const INFO_OPEN: &str = "info_open";
    pub const INFO_CLOSE: &str = "info_close";
    pub const INFO_READ: &str = "info_read";
    pub const ITEM_VIEW_START: &str = "item_view_start";
    pub const ITEM_VIEW_END: &str = "item_view_end";
    pub const ITEM_VIEW: &str = "item_view";
    pub const MODEL_LOADED: &str = "model_loaded";
    pub const MODEL_ERROR: &str = "model_error";
    pub const ADD_TO_CART: &str = "add_to_cart";
    pub const REMOVE_FROM_CART: &str = "remove_from_cart";
    pub const CHECKOUT: &str = "checkout";
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Mobile,
    Tablet,
    Desktop,
}

impl DeviceClass {
    pub fn from_user_agent(user_agent: &str) -> Self {
        let ua = user_agent.to_ascii_lowercase();
        // Android tablets omit the "mobile" token.
        if ua.contains("ipad")
            || ua.contains("tablet")
            || (ua.contains("android") && !ua.contains("mobile"))
        {
            DeviceClass::Tablet
        } else if ua.contains("mobi") || ua.contains("iphone") || ua.contains("android") {
            DeviceClass::Mobile
        } else {
            DeviceClass::Desktop
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UaInfo {
    pub user_agent: String,
    pub device: DeviceClass,
    pub language: Option<String>,
}

/// Per-collector context stamped on every event.
#[derive(Debug, Clone, PartialEq)]
pub struct EventContext {
    pub tenant: Option<String>,
    pub table: Option<String>,
    pub qr_id: Option<String>,
    pub ua: UaInfo,
}

impl EventContext {
    pub fn from_config(config: &CollectorConfig) -> Self {
        Self {
            tenant: config.tenant.clone(),
            table: config.table.clone(),
            qr_id: config.qr_id.clone(),
            ua: UaInfo {
                user_agent: config.user_agent.clone(),
                device: DeviceClass::from_user_agent(&config.user_agent),
                language: config.language.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub name: String,
    #[serde(with = "ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub tenant: Option<String>,
    pub table: Option<String>,
    pub qr_id: Option<String>,
    pub ua: UaInfo,
    #[serde(default)]
    pub payload: Payload,
}

impl Event {
    pub fn new(
        name: impl Into<String>,
        timestamp: DateTime<Utc>,
        session_id: &str,
        context: &EventContext,
        payload: Payload,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            timestamp,
            session_id: session_id.to_string(),
            tenant: context.tenant.clone(),
            table: context.table.clone(),
            qr_id: context.qr_id.clone(),
            ua: context.ua.clone(),
            payload,
        }
    }
}

/// Objects become the payload as-is; anything else is wrapped under `value`.
pub fn into_payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        Value::Null => Payload::new(),
        other => {
            let mut map = Payload::new();
            map.insert("value".into(), other);
            map
        }
    }
}
