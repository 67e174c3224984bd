use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::models::{Event, FlushReason, Session};

use super::spans::SpanSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Visibility {
    Visible,
    Hidden,
}

/// The single deferred flush allowed to be outstanding. `id` lets the timer
/// task tell whether it still owns the slot when it wakes up.
pub(crate) struct ScheduledFlush {
    pub id: u64,
    pub reason: FlushReason,
    pub handle: JoinHandle<()>,
}

pub(crate) struct CollectorState {
    pub session: Session,
    pub buffer: Vec<Event>,
    pub spans: SpanSet,
    pub visibility: Visibility,
    pub visible_since: DateTime<Utc>,
    pub scheduled_flush: Option<ScheduledFlush>,
    pub next_timer_id: u64,
    /// Length of the buffer prefix currently being transmitted.
    pub in_flight: Option<usize>,
    pub heartbeat: Option<CancellationToken>,
    pub last_activity_event_at: Option<DateTime<Utc>>,
    pub shut_down: bool,
}

impl CollectorState {
    pub fn new(session: Session) -> Self {
        let now = session.started_at;
        Self {
            session,
            buffer: Vec::new(),
            spans: SpanSet::default(),
            visibility: Visibility::Visible,
            visible_since: now,
            scheduled_flush: None,
            next_timer_id: 0,
            in_flight: None,
            heartbeat: None,
            last_activity_event_at: None,
            shut_down: false,
        }
    }
}
