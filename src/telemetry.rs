//! Latest-value store for heater telemetry.
//!
//! Staleness is derived on read, never stored: a snapshot older than twice
//! the polling interval is flagged but still returned.

use crate::protocol::HeaterReport;

/// One decoded report together with the uptime at which it arrived.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetrySnapshot {
    pub report: HeaterReport,
    pub received_at_ms: u64,
}

/// Holds the most recent [`TelemetrySnapshot`].
pub struct TelemetryStore {
    latest: Option<TelemetrySnapshot>,
    polling_interval_ms: u64,
    anomalies: u32,
    decode_errors: u32,
}

impl TelemetryStore {
    pub fn new(polling_interval_ms: u64) -> Self {
        Self {
            latest: None,
            polling_interval_ms,
            anomalies: 0,
            decode_errors: 0,
        }
    }

    /// Replace the current snapshot wholesale.
    pub fn update(&mut self, snapshot: TelemetrySnapshot) {
        self.latest = Some(snapshot);
    }

    /// Latest snapshot and whether it is stale at `now_ms`.
    pub fn current(&self, now_ms: u64) -> Option<(TelemetrySnapshot, bool)> {
        self.latest
            .map(|snap| (snap, self.is_stale_at(&snap, now_ms)))
    }

    /// Latest snapshot only if it is still fresh.
    pub fn fresh(&self, now_ms: u64) -> Option<TelemetrySnapshot> {
        self.current(now_ms)
            .and_then(|(snap, stale)| (!stale).then_some(snap))
    }

    /// True if nothing was ever received or the last frame is too old.
    pub fn is_stale(&self, now_ms: u64) -> bool {
        self.current(now_ms).is_none_or(|(_, stale)| stale)
    }

    /// Freshness window follows the cadence at which the heater is polled.
    pub fn set_polling_interval(&mut self, polling_interval_ms: u64) {
        self.polling_interval_ms = polling_interval_ms;
    }

    pub fn polling_interval_ms(&self) -> u64 {
        self.polling_interval_ms
    }

    pub fn record_anomaly(&mut self) {
        self.anomalies = self.anomalies.saturating_add(1);
    }

    pub fn record_decode_error(&mut self) {
        self.decode_errors = self.decode_errors.saturating_add(1);
    }

    pub fn anomalies(&self) -> u32 {
        self.anomalies
    }

    pub fn decode_errors(&self) -> u32 {
        self.decode_errors
    }

    fn is_stale_at(&self, snap: &TelemetrySnapshot, now_ms: u64) -> bool {
        now_ms.saturating_sub(snap.received_at_ms) > self.polling_interval_ms.saturating_mul(2)
    }
}
