use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::models::{names, FlushReason};

use super::{
    state::{CollectorState, Visibility},
    FlushOutcome, MetricsCollector,
};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

const UNLOAD_POLL: Duration = Duration::from_millis(25);

impl MetricsCollector {
    pub(crate) async fn start(&self) {
        let restored = self.restore_buffer().await;
        self.start_session().await;

        let mut state = self.state.lock().await;
        self.record(
            &mut state,
            names::METRICS_INITIALIZED,
            json!({
                "sdkVersion": self.config.sdk_version,
                "env": self.config.env,
                "sampleRate": self.config.sample_rate,
                "restoredEvents": restored,
            }),
        )
        .await;

        log_info!(
            "Metrics collector ready: session {}, {} restored events",
            self.session_id,
            restored
        );
    }

    async fn start_session(&self) {
        let now = self.clock.now();
        let visitor = match self
            .db
            .register_scan(
                &self.config.recurrence_key(),
                self.config.qr_id.as_deref(),
                now,
            )
            .await
        {
            Ok(status) => Some(status),
            Err(err) => {
                log_warn!("Failed to update recurrence record: {err:#}");
                None
            }
        };

        let mut state = self.state.lock().await;
        state.visibility = Visibility::Visible;
        state.visible_since = now;

        self.record(
            &mut state,
            names::PAGE_OPEN,
            json!({
                "url": self.config.page_url,
                "referrer": self.config.referrer,
                "device": self.context.ua.device,
            }),
        )
        .await;

        if let Some(status) = visitor {
            let payload = serde_json::to_value(&status).unwrap_or(Value::Null);
            self.record(&mut state, names::VISITOR_STATUS, payload).await;
        }

        self.start_heartbeat(&mut state);
    }

    /// Page visibility transition. Hiding closes every open span, pauses the
    /// heartbeat and pushes out what is buffered; showing resets the
    /// visible-since mark and resumes the heartbeat.
    pub async fn on_visibility_changed(&self, visible: bool) {
        let mut state = self.state.lock().await;
        if state.shut_down {
            return;
        }
        let now = self.clock.now();

        if visible {
            if state.visibility == Visibility::Visible {
                return;
            }
            state.visibility = Visibility::Visible;
            state.visible_since = now;
            self.record(&mut state, names::PAGE_VISIBLE, json!({})).await;
            self.start_heartbeat(&mut state);
            return;
        }

        if state.visibility == Visibility::Hidden {
            return;
        }
        let visible_ms = (now - state.visible_since).num_milliseconds().max(0);
        state.visibility = Visibility::Hidden;
        self.stop_heartbeat(&mut state);
        self.close_all_spans(&mut state, "page_hidden").await;
        self.record(&mut state, names::PAGE_HIDDEN, json!({ "visibleMs": visible_ms }))
            .await;

        if let Some(batch) = self.begin_flush(&mut state, FlushReason::PageHidden) {
            let collector = self.clone();
            tokio::spawn(async move {
                collector.deliver(batch).await;
            });
        }
    }

    /// Page unload. Closes spans, records `page_unload`, stops both timers and
    /// makes one delivery attempt bounded by `teardownTimeoutMs`. Whatever is
    /// not delivered stays persisted for the next start.
    pub async fn shutdown(&self) -> FlushOutcome {
        {
            let mut state = self.state.lock().await;
            if state.shut_down {
                return FlushOutcome::Empty;
            }
            state.shut_down = true;
            self.stop_heartbeat(&mut state);
            self.cancel_scheduled_flush(&mut state);
            self.close_all_spans(&mut state, "page_unload").await;

            let now = self.clock.now();
            let payload = json!({
                "sessionMs": state.session.elapsed_ms(now),
                "eventsCount": state.session.events_count,
            });
            self.record(&mut state, names::PAGE_UNLOAD, payload).await;
        }

        let teardown = self.config.teardown_timeout();
        let outcome = match time::timeout(teardown, self.drain_for_unload()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                log_warn!("Final metrics flush timed out after {teardown:?}; events stay persisted");
                self.state.lock().await.in_flight = None;
                FlushOutcome::Failed
            }
        };

        log_info!("Metrics collector shut down: {outcome:?}");
        outcome
    }

    async fn drain_for_unload(&self) -> FlushOutcome {
        loop {
            match self.flush(FlushReason::PageUnload).await {
                FlushOutcome::Deferred => time::sleep(UNLOAD_POLL).await,
                outcome => return outcome,
            }
        }
    }

    pub(crate) fn start_heartbeat(&self, state: &mut CollectorState) {
        self.stop_heartbeat(state);
        if state.shut_down {
            return;
        }
        let Some(every) = self.config.heartbeat_interval() else {
            return;
        };

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let collector = self.clone();

        tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => collector.emit_heartbeat(&cancelled).await,
                    _ = cancelled.cancelled() => break,
                }
            }
        });

        state.heartbeat = Some(token);
    }

    pub(crate) fn stop_heartbeat(&self, state: &mut CollectorState) {
        if let Some(token) = state.heartbeat.take() {
            token.cancel();
        }
    }

    /// `token` is checked under the state lock: a tick that was already
    /// waiting when its loop got stopped must not emit.
    pub(crate) async fn emit_heartbeat(&self, token: &CancellationToken) {
        let mut state = self.state.lock().await;
        if token.is_cancelled() || state.shut_down || state.visibility != Visibility::Visible {
            return;
        }
        let now = self.clock.now();
        let visible_ms = (now - state.visible_since).num_milliseconds().max(0);
        self.record(&mut state, names::HEARTBEAT, json!({ "visibleMs": visible_ms }))
            .await;
    }
}
