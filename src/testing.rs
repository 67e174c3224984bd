//! Shared fixtures for the collector's unit tests.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::{mpsc, Semaphore};

use crate::{
    clock::ManualClock,
    collector::MetricsCollector,
    db::Database,
    models::{BatchPayload, FlushReason},
    settings::CollectorConfig,
    transport::Transport,
};

/// Keeps every batch it is handed. When `failing` is set it still records the
/// attempt but reports a delivery error. A gated transport holds each send
/// until the test releases a permit.
#[derive(Default)]
pub(crate) struct RecordingTransport {
    batches: Mutex<Vec<BatchPayload>>,
    failing: AtomicBool,
    attempts: Option<mpsc::UnboundedSender<FlushReason>>,
    gate: Option<Arc<Semaphore>>,
}

impl RecordingTransport {
    pub fn failing() -> Self {
        let transport = Self::default();
        transport.set_failing(true);
        transport
    }

    /// Transport that reports the reason of every send attempt on the
    /// returned channel.
    pub fn notifying() -> (Self, mpsc::UnboundedReceiver<FlushReason>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Self {
            attempts: Some(tx),
            ..Self::default()
        };
        (transport, rx)
    }

    pub fn gated() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let transport = Self {
            gate: Some(gate.clone()),
            ..Self::default()
        };
        (transport, gate)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn batches(&self) -> Vec<BatchPayload> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, batch: &BatchPayload) -> Result<()> {
        self.batches.lock().unwrap().push(batch.clone());
        if let Some(attempts) = &self.attempts {
            let _ = attempts.send(batch.reason);
        }
        if let Some(gate) = &self.gate {
            gate.acquire().await?.forget();
        }
        if self.failing.load(Ordering::SeqCst) {
            bail!("endpoint unavailable");
        }
        Ok(())
    }
}

pub(crate) fn fixed_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

/// No heartbeat and a flush interval long enough that the deferred flush never
/// fires during a test.
pub(crate) fn quiet_config() -> CollectorConfig {
    CollectorConfig {
        heartbeat_ms: 0,
        flush_interval_ms: 60_000,
        sample_rate: 1.0,
        consent_metrics: true,
        max_buffer_size: 50,
        tenant: Some("t1".into()),
        qr_id: Some("qr-7".into()),
        user_agent: "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) Mobile/15E148".into(),
        ..CollectorConfig::default()
    }
}

pub(crate) struct Harness {
    pub collector: MetricsCollector,
    pub transport: Arc<RecordingTransport>,
    pub clock: ManualClock,
    pub db: Database,
}

impl Harness {
    /// Collector built with `new`: nothing restored, no events, no timers.
    pub fn bare(config: CollectorConfig, transport: RecordingTransport) -> Self {
        let db = Database::open_in_memory().unwrap();
        let clock = ManualClock::new(fixed_start());
        Self::with_parts(config, transport, clock, db)
    }

    pub fn with_parts(
        config: CollectorConfig,
        transport: RecordingTransport,
        clock: ManualClock,
        db: Database,
    ) -> Self {
        let transport = Arc::new(transport);
        let collector = MetricsCollector::new(
            config,
            db.clone(),
            transport.clone(),
            Arc::new(clock.clone()),
        );
        Self {
            collector,
            transport,
            clock,
            db,
        }
    }

    /// Collector built with `init` against the given store.
    pub async fn started(
        config: CollectorConfig,
        transport: RecordingTransport,
        clock: ManualClock,
        db: Database,
    ) -> Self {
        let harness = Self::with_parts(config, transport, clock, db);
        harness.collector.start().await;
        harness
    }

    pub async fn names(&self) -> Vec<String> {
        self.collector
            .pending_events()
            .await
            .into_iter()
            .map(|event| event.name)
            .collect()
    }
}
