use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::models::{names, Payload};

use super::{spans::SpanKind, MetricsCollector};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NavDirection {
    Prev,
    Next,
}

/// Subject used for the info span when no item is on screen.
const MENU_SUBJECT: &str = "menu";

impl MetricsCollector {
    /// The item now on screen. Closes the previous item's view span; an empty
    /// name just closes it.
    pub async fn set_current_item(&self, item: &str) {
        let item = item.trim();
        let mut state = self.state.lock().await;
        if item.is_empty() {
            self.close_span(&mut state, SpanKind::Item, "item_cleared")
                .await;
            return;
        }
        self.open_span(&mut state, SpanKind::Item, item).await;
    }

    pub async fn current_item(&self) -> Option<String> {
        let state = self.state.lock().await;
        state
            .spans
            .current(SpanKind::Item)
            .map(|open| open.subject.clone())
    }

    pub async fn info_opened(&self) {
        let mut state = self.state.lock().await;
        if state.spans.current(SpanKind::Info).is_some() {
            return;
        }
        let subject = state
            .spans
            .current(SpanKind::Item)
            .map(|open| open.subject.clone())
            .unwrap_or_else(|| MENU_SUBJECT.to_string());

        self.record(&mut state, names::INFO_OPEN, json!({ "item": subject }))
            .await;
        self.open_span(&mut state, SpanKind::Info, &subject).await;
    }

    pub async fn info_closed(&self) {
        let mut state = self.state.lock().await;
        self.close_span(&mut state, SpanKind::Info, "closed").await;
    }

    /// Free-form event under a caller-chosen name.
    pub async fn track(&self, name: &str, payload: Value) {
        let mut state = self.state.lock().await;
        self.record(&mut state, name, payload).await;
    }

    pub async fn track_add_to_cart(&self, item: &str, quantity: u32, unit_price: Option<f64>) {
        self.track(
            names::ADD_TO_CART,
            json!({ "item": item, "quantity": quantity, "unitPrice": unit_price }),
        )
        .await;
    }

    pub async fn track_remove_from_cart(&self, item: &str, quantity: u32) {
        self.track(
            names::REMOVE_FROM_CART,
            json!({ "item": item, "quantity": quantity }),
        )
        .await;
    }

    /// `items` is left out of the payload when the host does not know it.
    pub async fn track_checkout(&self, total: f64, items: Option<u32>) {
        let mut payload = Payload::new();
        payload.insert("total".into(), json!(total));
        if let Some(items) = items {
            payload.insert("items".into(), json!(items));
        }
        self.track(names::CHECKOUT, Value::Object(payload)).await;
    }

    pub async fn on_menu_click(&self) {
        self.track(names::MENU_CLICK, json!({})).await;
    }

    pub async fn on_category_click(&self, category: &str) {
        let mut state = self.state.lock().await;
        let previous = state
            .spans
            .current(SpanKind::Category)
            .map(|open| open.subject.clone());
        self.record(
            &mut state,
            names::CATEGORY_CLICK,
            json!({ "category": category, "fromCategory": previous }),
        )
        .await;
        self.open_span(&mut state, SpanKind::Category, category)
            .await;
    }

    /// Category switched without a click (swipe, deep link, script).
    pub async fn on_category_changed(&self, category: &str) {
        let mut state = self.state.lock().await;
        self.open_span(&mut state, SpanKind::Category, category)
            .await;
    }

    pub async fn on_nav(&self, direction: NavDirection) {
        let mut state = self.state.lock().await;
        let item = state
            .spans
            .current(SpanKind::Item)
            .map(|open| open.subject.clone());
        let name = match direction {
            NavDirection::Prev => names::NAV_PREV,
            NavDirection::Next => names::NAV_NEXT,
        };
        self.record(&mut state, name, json!({ "item": item })).await;
    }

    pub async fn on_info_click(&self) {
        let mut state = self.state.lock().await;
        let item = state
            .spans
            .current(SpanKind::Item)
            .map(|open| open.subject.clone());
        self.record(&mut state, names::INFO_CLICK, json!({ "item": item }))
            .await;
    }

    pub async fn on_info_panel_visibility_changed(&self, open: bool) {
        if open {
            self.info_opened().await;
        } else {
            self.info_closed().await;
        }
    }

    /// Fallback item signal for pages that only update the product title.
    pub async fn on_product_name_changed(&self, name: &str) {
        let name = name.trim();
        if name.is_empty() {
            return;
        }
        let mut state = self.state.lock().await;
        self.open_span(&mut state, SpanKind::Item, name).await;
    }

    pub async fn on_model_loaded(&self, src: Option<&str>) {
        let mut state = self.state.lock().await;
        let now = self.clock.now();
        let (item, since_item_start_ms) = match state.spans.current(SpanKind::Item) {
            Some(open) => (
                Some(open.subject.clone()),
                Some((now - open.started_at).num_milliseconds().max(0)),
            ),
            None => (None, None),
        };
        self.record(
            &mut state,
            names::MODEL_LOADED,
            json!({ "src": src, "item": item, "sinceItemStartMs": since_item_start_ms }),
        )
        .await;
    }

    pub async fn on_model_error(&self, src: Option<&str>, message: &str) {
        let mut state = self.state.lock().await;
        let item = state
            .spans
            .current(SpanKind::Item)
            .map(|open| open.subject.clone());
        self.record(
            &mut state,
            names::MODEL_ERROR,
            json!({ "src": src, "item": item, "error": message }),
        )
        .await;
    }

    /// Scroll, touch or key activity. Always refreshes the session's activity
    /// mark; emits `activity` at most once per `activityThrottleMs`.
    pub async fn record_activity(&self, kind: &str) {
        let mut state = self.state.lock().await;
        let now = self.clock.now();
        state.session.mark_activity(now);

        let due = state
            .last_activity_event_at
            .map_or(true, |last| now - last >= self.config.activity_throttle());
        if !due {
            return;
        }
        state.last_activity_event_at = Some(now);
        self.record(&mut state, names::ACTIVITY, json!({ "kind": kind }))
            .await;
    }
}
