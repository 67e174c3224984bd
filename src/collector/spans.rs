use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::models::{names, Payload};

use super::{state::CollectorState, MetricsCollector};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SpanKind {
    Item,
    Category,
    Info,
}

impl SpanKind {
    /// Close order used when the page hides or unloads.
    pub const ALL: [SpanKind; 3] = [SpanKind::Item, SpanKind::Category, SpanKind::Info];

    fn change_reason(self) -> &'static str {
        match self {
            SpanKind::Item => "item_change",
            SpanKind::Category => "category_change",
            SpanKind::Info => "info_change",
        }
    }

    fn legacy_event(self) -> &'static str {
        match self {
            SpanKind::Item => names::ITEM_VIEW_END,
            SpanKind::Category => names::CATEGORY_LEAVE,
            SpanKind::Info => names::INFO_CLOSE,
        }
    }

    fn canonical_event(self) -> &'static str {
        match self {
            SpanKind::Item => names::ITEM_VIEW,
            SpanKind::Category => names::CATEGORY_DWELL,
            SpanKind::Info => names::INFO_READ,
        }
    }

    fn subject_field(self) -> &'static str {
        match self {
            SpanKind::Item | SpanKind::Info => "item",
            SpanKind::Category => "category",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct OpenSpan {
    pub subject: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ClosedSpan {
    pub kind: SpanKind,
    pub subject: String,
    pub duration_ms: i64,
    pub reason: String,
}

/// At most one open span per kind.
#[derive(Debug, Default)]
pub(crate) struct SpanSet {
    item: Option<OpenSpan>,
    category: Option<OpenSpan>,
    info: Option<OpenSpan>,
}

impl SpanSet {
    fn slot_mut(&mut self, kind: SpanKind) -> &mut Option<OpenSpan> {
        match kind {
            SpanKind::Item => &mut self.item,
            SpanKind::Category => &mut self.category,
            SpanKind::Info => &mut self.info,
        }
    }

    pub fn current(&self, kind: SpanKind) -> Option<&OpenSpan> {
        match kind {
            SpanKind::Item => self.item.as_ref(),
            SpanKind::Category => self.category.as_ref(),
            SpanKind::Info => self.info.as_ref(),
        }
    }

    /// Open `subject`. Reopening the current subject is a no-op; a different
    /// subject closes the previous span first. Returns the closed span and
    /// whether a new span was opened.
    pub fn open(
        &mut self,
        kind: SpanKind,
        subject: &str,
        now: DateTime<Utc>,
    ) -> (Option<ClosedSpan>, bool) {
        if self
            .current(kind)
            .is_some_and(|open| open.subject == subject)
        {
            return (None, false);
        }

        let closed = self.close(kind, kind.change_reason(), now);
        *self.slot_mut(kind) = Some(OpenSpan {
            subject: subject.to_string(),
            started_at: now,
        });
        (closed, true)
    }

    pub fn close(&mut self, kind: SpanKind, reason: &str, now: DateTime<Utc>) -> Option<ClosedSpan> {
        self.slot_mut(kind).take().map(|open| ClosedSpan {
            kind,
            duration_ms: (now - open.started_at).num_milliseconds().max(0),
            subject: open.subject,
            reason: reason.to_string(),
        })
    }

    pub fn close_all(&mut self, reason: &str, now: DateTime<Utc>) -> Vec<ClosedSpan> {
        SpanKind::ALL
            .into_iter()
            .filter_map(|kind| self.close(kind, reason, now))
            .collect()
    }
}

impl MetricsCollector {
    pub(crate) async fn open_span(&self, state: &mut CollectorState, kind: SpanKind, subject: &str) {
        let now = self.clock.now();
        let (closed, opened) = state.spans.open(kind, subject, now);

        if let Some(closed) = closed {
            self.emit_closed_span(state, closed).await;
        }
        if opened && kind == SpanKind::Item {
            self.record(state, names::ITEM_VIEW_START, json!({ "item": subject }))
                .await;
        }
    }

    pub(crate) async fn close_span(&self, state: &mut CollectorState, kind: SpanKind, reason: &str) {
        let now = self.clock.now();
        if let Some(closed) = state.spans.close(kind, reason, now) {
            self.emit_closed_span(state, closed).await;
        }
    }

    pub(crate) async fn close_all_spans(&self, state: &mut CollectorState, reason: &str) {
        let now = self.clock.now();
        for closed in state.spans.close_all(reason, now) {
            self.emit_closed_span(state, closed).await;
        }
    }

    /// Every closed span is reported twice: once under the legacy name the
    /// dashboards already chart, once under the canonical name.
    async fn emit_closed_span(&self, state: &mut CollectorState, closed: ClosedSpan) {
        let mut payload = Payload::new();
        payload.insert(closed.kind.subject_field().into(), json!(closed.subject));
        payload.insert("durationMs".into(), json!(closed.duration_ms));
        payload.insert("reason".into(), json!(closed.reason));
        let payload = Value::Object(payload);

        self.record(state, closed.kind.legacy_event(), payload.clone())
            .await;
        self.record(state, closed.kind.canonical_event(), payload)
            .await;
    }
}
