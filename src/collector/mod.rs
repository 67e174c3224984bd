//! The metrics collector: buffers interaction events, persists them and ships
//! them to the ingestion endpoint in batches.
//!
//! All mutable state sits behind one async mutex, so operations apply in the
//! order the host calls them. Two timers run as tokio tasks: the single
//! deferred flush (see [`MetricsCollector::has_scheduled_flush`]) and the
//! heartbeat. Network delivery is only ever awaited inside a flush.

mod lifecycle;
mod spans;
mod state;
mod tracking;


pub use tracking::NavDirection;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde_json::Value;
use tokio::{sync::Mutex, time};
use uuid::Uuid;

use crate::{
    clock::Clock,
    db::{Database, StoredBuffer},
    models::{into_payload, BatchPayload, Event, EventContext, FlushReason, PageMeta, Session},
    settings::CollectorConfig,
    transport::Transport,
};

use state::{CollectorState, ScheduledFlush, Visibility};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was buffered.
    Empty,
    /// Another batch is in flight; a deferred flush will pick these events up.
    Deferred,
    Delivered { batch_id: String, events: usize },
    /// Delivery failed; the events stay buffered and a retry is scheduled.
    Failed,
}

#[derive(Clone)]
pub struct MetricsCollector {
    state: Arc<Mutex<CollectorState>>,
    config: Arc<CollectorConfig>,
    context: Arc<EventContext>,
    session_id: Arc<str>,
    db: Database,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
}

impl MetricsCollector {
    /// Build a collector without reading storage or starting timers.
    /// Hosts normally want [`MetricsCollector::init`].
    pub fn new(
        config: CollectorConfig,
        db: Database,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let config = config.normalized();
        let session = Session::begin(clock.now());
        let context = EventContext::from_config(&config);

        Self {
            session_id: Arc::from(session.id.as_str()),
            state: Arc::new(Mutex::new(CollectorState::new(session))),
            config: Arc::new(config),
            context: Arc::new(context),
            db,
            transport,
            clock,
        }
    }

    /// Build, restore undelivered events, open the session and announce it.
    /// Calling this twice yields two collectors that both restore the same
    /// persisted buffer.
    pub async fn init(
        config: CollectorConfig,
        db: Database,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let collector = Self::new(config, db, transport, clock);
        collector.start().await;
        collector
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// A fully formed event stamped with this session's context.
    pub fn event(&self, name: &str, payload: Value) -> Event {
        Event::new(
            name,
            self.clock.now(),
            &self.session_id,
            &self.context,
            into_payload(payload),
        )
    }

    pub async fn push_event(&self, event: Event) {
        let mut state = self.state.lock().await;
        self.push_locked(&mut state, event).await;
    }

    pub async fn flush(&self, reason: FlushReason) -> FlushOutcome {
        let batch = {
            let mut state = self.state.lock().await;
            if state.buffer.is_empty() {
                return FlushOutcome::Empty;
            }
            match self.begin_flush(&mut state, reason) {
                Some(batch) => batch,
                None => return FlushOutcome::Deferred,
            }
        };

        self.deliver(batch).await
    }

    pub async fn session(&self) -> Session {
        self.state.lock().await.session.clone()
    }

    pub async fn pending_events(&self) -> Vec<Event> {
        self.state.lock().await.buffer.clone()
    }

    pub async fn has_scheduled_flush(&self) -> bool {
        self.state.lock().await.scheduled_flush.is_some()
    }

    pub async fn scheduled_flush(&self) -> Option<FlushReason> {
        self.state
            .lock()
            .await
            .scheduled_flush
            .as_ref()
            .map(|scheduled| scheduled.reason)
    }

    pub async fn heartbeat_active(&self) -> bool {
        self.state.lock().await.heartbeat.is_some()
    }

    pub async fn visible_since(&self) -> DateTime<Utc> {
        self.state.lock().await.visible_since
    }

    pub async fn is_visible(&self) -> bool {
        self.state.lock().await.visibility == Visibility::Visible
    }

    pub(crate) async fn record(&self, state: &mut CollectorState, name: &str, payload: Value) {
        let event = self.event(name, payload);
        self.push_locked(state, event).await;
    }

    fn accepts(&self) -> bool {
        if !self.config.consent_metrics {
            return false;
        }
        if self.config.sample_rate >= 1.0 {
            return true;
        }
        let draw: f64 = rand::thread_rng().gen();
        draw < self.config.sample_rate
    }

    async fn push_locked(&self, state: &mut CollectorState, event: Event) {
        if !self.accepts() {
            log_debug!("Dropped '{}' (sampling or consent)", event.name);
            return;
        }

        let at = event.timestamp;
        state.buffer.push(event);
        state.session.record_event(at);
        self.evict_overflow(state);
        self.persist_buffer(state).await;

        if state.buffer.len() >= self.config.max_buffer_size {
            if state.shut_down {
                return;
            }
            if let Some(batch) = self.begin_flush(state, FlushReason::SizeLimit) {
                let collector = self.clone();
                tokio::spawn(async move {
                    collector.deliver(batch).await;
                });
            }
        } else {
            self.schedule_flush(state, FlushReason::Timer);
        }
    }

    /// Snapshot the buffer into a batch and mark it in flight. Returns `None`
    /// when there is nothing to send or a batch is already in flight.
    fn begin_flush(&self, state: &mut CollectorState, reason: FlushReason) -> Option<BatchPayload> {
        if state.buffer.is_empty() {
            return None;
        }
        if state.in_flight.is_some() {
            self.schedule_flush(state, FlushReason::Timer);
            return None;
        }

        self.cancel_scheduled_flush(state);

        let now = self.clock.now();
        let batch = BatchPayload {
            batch_id: Uuid::new_v4().to_string(),
            session: state.session.clone(),
            reason,
            env: self.config.env.clone(),
            tenant: self.config.tenant.clone(),
            meta: PageMeta {
                url: self.config.page_url.clone(),
                referrer: self.config.referrer.clone(),
                timestamp: now,
                sdk_version: self.config.sdk_version.clone(),
            },
            events: state.buffer.clone(),
        };
        state.in_flight = Some(batch.events.len());
        log_debug!(
            "Flushing {} events (reason {reason}, batch {})",
            batch.events.len(),
            batch.batch_id
        );

        Some(batch)
    }

    async fn deliver(&self, batch: BatchPayload) -> FlushOutcome {
        let result = self.transport.send(&batch).await;

        let mut state = self.state.lock().await;
        let sent = state.in_flight.take().unwrap_or(0);

        match result {
            Ok(()) => {
                // Events pushed while the batch was in flight sit after the
                // sent prefix and stay buffered.
                let delivered = sent.min(state.buffer.len());
                state.buffer.drain(..delivered);
                self.persist_buffer(&state).await;
                log_info!(
                    "Delivered metrics batch {} ({} events, reason {})",
                    batch.batch_id,
                    batch.events.len(),
                    batch.reason
                );

                if !state.buffer.is_empty() {
                    self.schedule_flush(&mut state, FlushReason::Timer);
                }

                FlushOutcome::Delivered {
                    batch_id: batch.batch_id,
                    events: batch.events.len(),
                }
            }
            Err(err) => {
                log_warn!(
                    "Metrics batch {} failed ({} events, reason {}): {err:#}",
                    batch.batch_id,
                    batch.events.len(),
                    batch.reason
                );
                self.schedule_flush(&mut state, FlushReason::Retry);
                FlushOutcome::Failed
            }
        }
    }

    /// Arm the deferred flush unless one is already pending. Retries reuse the
    /// same fixed interval.
    fn schedule_flush(&self, state: &mut CollectorState, reason: FlushReason) {
        if state.shut_down || state.scheduled_flush.is_some() {
            return;
        }

        let id = state.next_timer_id;
        state.next_timer_id += 1;

        let delay = self.config.flush_interval();
        let collector = self.clone();
        let handle = tokio::spawn(async move {
            time::sleep(delay).await;
            collector.run_scheduled_flush(id).await;
        });

        state.scheduled_flush = Some(ScheduledFlush { id, reason, handle });
        log_debug!("Scheduled {reason} flush in {delay:?}");
    }

    fn cancel_scheduled_flush(&self, state: &mut CollectorState) {
        if let Some(scheduled) = state.scheduled_flush.take() {
            scheduled.handle.abort();
        }
    }

    async fn run_scheduled_flush(&self, id: u64) {
        let batch = {
            let mut state = self.state.lock().await;
            let reason = match &state.scheduled_flush {
                Some(scheduled) if scheduled.id == id => scheduled.reason,
                _ => return,
            };
            // Release the slot without aborting: this task is the one running.
            state.scheduled_flush = None;
            self.begin_flush(&mut state, reason)
        };

        if let Some(batch) = batch {
            self.deliver(batch).await;
        }
    }

    /// Drop the oldest events beyond `max_retained_events`, keeping the
    /// in-flight prefix length consistent with the buffer.
    fn evict_overflow(&self, state: &mut CollectorState) {
        let limit = self.config.max_retained_events;
        if state.buffer.len() <= limit {
            return;
        }

        let excess = state.buffer.len() - limit;
        state.buffer.drain(..excess);
        if let Some(sent) = state.in_flight.as_mut() {
            *sent = sent.saturating_sub(excess);
        }
        log_warn!("Metrics buffer over {limit} events; evicted {excess} oldest");
    }

    async fn persist_buffer(&self, state: &CollectorState) {
        if let Err(err) = self
            .db
            .save_buffer(&self.config.persist_key, &state.buffer, self.clock.now())
            .await
        {
            log_warn!("Failed to persist metrics buffer: {err:#}");
        }
    }

    /// Put events left over from an earlier run in front of the buffer.
    /// Stale events are dropped and a corrupt snapshot is discarded.
    pub(crate) async fn restore_buffer(&self) -> usize {
        let restored = match self.db.load_buffer(&self.config.persist_key).await {
            Ok(StoredBuffer::Events(events)) => events,
            Ok(StoredBuffer::Missing) => Vec::new(),
            Ok(StoredBuffer::Malformed(reason)) => {
                log_warn!("Discarding malformed persisted metrics buffer: {reason}");
                Vec::new()
            }
            Err(err) => {
                log_warn!("Failed to read persisted metrics buffer: {err:#}");
                Vec::new()
            }
        };

        // An age reaching past the representable range keeps everything.
        let cutoff = self
            .clock
            .now()
            .checked_sub_signed(self.config.max_event_age());
        let found = restored.len();
        let mut restored: Vec<Event> = restored
            .into_iter()
            .filter(|event| cutoff.map_or(true, |cutoff| event.timestamp >= cutoff))
            .collect();
        if restored.len() < found {
            log_info!(
                "Dropped {} persisted events older than {:?}",
                found - restored.len(),
                self.config.max_event_age()
            );
        }
        let count = restored.len();

        let mut state = self.state.lock().await;
        restored.append(&mut state.buffer);
        state.buffer = restored;
        self.evict_overflow(&mut state);
        self.persist_buffer(&state).await;

        if !state.buffer.is_empty() {
            self.schedule_flush(&mut state, FlushReason::Timer);
        }

        count
    }
}
