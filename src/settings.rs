use std::{fs, path::Path, time::Duration};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const ENABLE_LOGS: bool = true;

use crate::log_warn;

const DEFAULT_PERSIST_KEY: &str = "arc_metrics_buffer";
const SEVEN_DAYS_MS: u64 = 7 * 24 * 60 * 60 * 1000;

/// Collector options. Fixed once the collector is built.
///
/// Field names follow the camelCase keys hosts already send, e.g.
/// `{"endpoint": "...", "flushIntervalMs": 5000, "tenant": "cantina"}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct CollectorConfig {
    pub endpoint: Option<String>,
    pub flush_interval_ms: u64,
    pub max_buffer_size: usize,
    pub persist_key: String,
    pub env: String,
    pub sample_rate: f64,
    pub anonymize_ip: bool,
    pub consent_metrics: bool,
    /// Zero disables the heartbeat.
    pub heartbeat_ms: u64,
    pub sdk_version: String,
    pub tenant: Option<String>,
    pub table: Option<String>,
    pub qr_id: Option<String>,

    pub auth_token: Option<String>,
    pub request_timeout_ms: u64,
    pub teardown_timeout_ms: u64,
    /// Hard cap on buffered events while the endpoint keeps failing.
    pub max_retained_events: usize,
    /// Restored events older than this are dropped.
    pub max_event_age_ms: u64,
    pub activity_throttle_ms: u64,
    pub page_url: Option<String>,
    pub referrer: Option<String>,
    pub user_agent: String,
    pub language: Option<String>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            flush_interval_ms: 5_000,
            max_buffer_size: 20,
            persist_key: DEFAULT_PERSIST_KEY.into(),
            env: "production".into(),
            sample_rate: 1.0,
            anonymize_ip: true,
            consent_metrics: true,
            heartbeat_ms: 15_000,
            sdk_version: env!("CARGO_PKG_VERSION").into(),
            tenant: None,
            table: None,
            qr_id: None,
            auth_token: None,
            request_timeout_ms: 10_000,
            teardown_timeout_ms: 2_000,
            max_retained_events: 1_000,
            max_event_age_ms: SEVEN_DAYS_MS,
            activity_throttle_ms: 15_000,
            page_url: None,
            referrer: None,
            user_agent: String::new(),
            language: None,
        }
    }
}

impl CollectorConfig {
    /// Lay `overrides` over the defaults, key by key. Unknown keys are logged
    /// and ignored; `null` overrides are allowed for optional fields.
    pub fn merged(overrides: &Value) -> Result<Self> {
        let mut base = serde_json::to_value(Self::default())
            .context("failed to serialize default collector configuration")?;
        let Value::Object(base_map) = &mut base else {
            bail!("default collector configuration is not a JSON object");
        };

        match overrides {
            Value::Null => {}
            Value::Object(entries) => {
                for (key, value) in entries {
                    if base_map.contains_key(key) {
                        base_map.insert(key.clone(), value.clone());
                    } else {
                        log_warn!("Ignoring unrecognized collector option '{key}'");
                    }
                }
            }
            other => bail!("collector configuration must be a JSON object, got {other}"),
        }

        let config: Self =
            serde_json::from_value(base).context("invalid collector configuration")?;
        Ok(config.normalized())
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let overrides: Value =
            serde_json::from_str(raw).context("collector configuration is not valid JSON")?;
        Self::merged(&overrides)
    }

    /// Read a JSON config file. A missing file yields the defaults; an
    /// unreadable or malformed one falls back to defaults with a warning.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read collector config from {}", path.display()))?;

        match Self::from_json_str(&contents) {
            Ok(config) => Ok(config),
            Err(err) => {
                log_warn!(
                    "Falling back to default collector config; {} is invalid: {err:#}",
                    path.display()
                );
                Ok(Self::default())
            }
        }
    }

    /// Clamp values that would otherwise stall or silence the collector.
    /// Applied on every construction path, struct literals included.
    pub fn normalized(mut self) -> Self {
        self.sample_rate = if self.sample_rate.is_nan() {
            1.0
        } else {
            self.sample_rate.clamp(0.0, 1.0)
        };
        self.max_buffer_size = self.max_buffer_size.max(1);
        self.flush_interval_ms = self.flush_interval_ms.max(1);
        self.max_retained_events = self.max_retained_events.max(self.max_buffer_size);
        self
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_ms > 0).then(|| Duration::from_millis(self.heartbeat_ms))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_millis(self.teardown_timeout_ms)
    }

    pub fn max_event_age(&self) -> chrono::Duration {
        millis_to_chrono(self.max_event_age_ms)
    }

    pub fn activity_throttle(&self) -> chrono::Duration {
        millis_to_chrono(self.activity_throttle_ms)
    }

    /// Storage key of the recurrence record. Scoped per tenant so unrelated
    /// restaurants never share counters.
    pub fn recurrence_key(&self) -> String {
        format!(
            "{}:recurrence:{}",
            self.persist_key,
            self.tenant.as_deref().unwrap_or("default")
        )
    }
}

fn millis_to_chrono(ms: u64) -> chrono::Duration {
    chrono::Duration::from_std(Duration::from_millis(ms))
        .unwrap_or_else(|_| chrono::Duration::days(365 * 100))
}
