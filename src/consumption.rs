//! Fuel consumption accumulator.
//!
//! Integrates dosing-pump frequency over time into millilitres and rolls
//! the result into hourly, daily and lifetime buckets.
//!
//! ## Bucket boundaries
//!
//! Buckets are aligned on a [`ClockPosition`]: local wall-clock seconds when
//! the clock is synced, uptime seconds otherwise.  When one tick spans a
//! boundary the tick's volume is split in proportion to the time on each
//! side.  Only the share after the most recent boundary stays in the
//! current bucket; the bucket that just closed is published as
//! `completed_hour_ml` / `completed_day_ml`.
//!
//! ## Persistence
//!
//! `total_ml` and the daily bucket (keyed by its day number) are written
//! through [`StoragePort`] every flush interval.  Resets are two-phase: the
//! zero is persisted first and only then applied in memory, so a failed
//! write leaves the counters untouched and the reset pending.

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::app::ports::{StorageError, StoragePort};

pub const STORAGE_NAMESPACE: &str = "vevor";
const TOTAL_KEY: &str = "fuel_total";
const DAILY_KEY: &str = "fuel_daily";

const SECS_PER_HOUR: i64 = 3600;
const SECS_PER_DAY: i64 = 86_400;

/// Owned consumption state.  Mutated only by [`ConsumptionAccumulator`].
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumptionCounters {
    /// Calibration: fuel per pump stroke (ml).
    pub injected_ml_per_pulse: f32,
    /// Pump strokes integrated during the last tick.
    pub pulses_last_tick: f64,
    pub hourly_ml: f64,
    pub daily_ml: f64,
    /// Lifetime total; only an explicit reset lowers it.
    pub total_ml: f64,
    /// Volume of the most recently closed hour.
    pub completed_hour_ml: Option<f64>,
    /// Volume of the most recently closed day.
    pub completed_day_ml: Option<f64>,
    /// Instantaneous rate from the current pump frequency.
    pub rate_ml_per_hour: f32,
}

impl ConsumptionCounters {
    pub fn new(injected_ml_per_pulse: f32) -> Self {
        Self {
            injected_ml_per_pulse,
            pulses_last_tick: 0.0,
            hourly_ml: 0.0,
            daily_ml: 0.0,
            total_ml: 0.0,
            completed_hour_ml: None,
            completed_day_ml: None,
            rate_ml_per_hour: 0.0,
        }
    }
}

/// Where "now" sits on the bucket time line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockPosition {
    /// Seconds on the chosen time line.
    pub secs: i64,
    /// `true` for local calendar time, `false` for uptime.
    pub calendar: bool,
}

impl ClockPosition {
    pub const fn calendar(secs: i64) -> Self {
        Self {
            secs,
            calendar: true,
        }
    }

    pub const fn uptime(secs: i64) -> Self {
        Self {
            secs,
            calendar: false,
        }
    }

    pub const fn day(self) -> i64 {
        self.secs.div_euclid(SECS_PER_DAY)
    }
}

/// One tick's worth of input.
#[derive(Debug, Clone, Copy)]
pub struct FuelSample {
    /// Elapsed monotonic time since the previous tick.
    pub dt_secs: f32,
    /// Pump frequency (Hz); zero when telemetry is missing or stale.
    pub pump_frequency_hz: f32,
    pub position: ClockPosition,
}

/// What happened during one [`ConsumptionAccumulator::accumulate`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TickConsumption {
    pub volume_ml: f64,
    pub hour_rolled: bool,
    pub day_rolled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct DailyRecord {
    day: i64,
    daily_ml: f64,
}

/// Integrates [`FuelSample`]s into [`ConsumptionCounters`] and manages
/// their persistence.
pub struct ConsumptionAccumulator {
    last_position: Option<ClockPosition>,
    flush_interval_ms: u64,
    last_flush_ms: u64,
    pending_total_reset: bool,
    pending_daily_reset: bool,
    /// Today's stored daily bucket still waits for a synced clock.
    daily_restore_pending: bool,
    dirty: bool,
}

impl ConsumptionAccumulator {
    pub fn new(flush_interval_ms: u64) -> Self {
        Self {
            last_position: None,
            flush_interval_ms,
            last_flush_ms: 0,
            pending_total_reset: false,
            pending_daily_reset: false,
            daily_restore_pending: false,
            dirty: false,
        }
    }

    // ── Integration ───────────────────────────────────────────

    /// Add one tick of pump activity to every bucket.
    ///
    /// Negative, NaN or infinite frequency or `dt` contribute nothing.
    /// The rate follows the frequency alone, so a bad `dt` still reports
    /// the pump's current rate.
    pub fn accumulate(
        &mut self,
        counters: &mut ConsumptionCounters,
        sample: FuelSample,
    ) -> TickConsumption {
        let hz = sanitize(sample.pump_frequency_hz);
        let dt = sanitize(sample.dt_secs);
        let pulses = f64::from(hz) * f64::from(dt);
        let volume = pulses * f64::from(counters.injected_ml_per_pulse);

        counters.pulses_last_tick = pulses;
        counters.rate_ml_per_hour = hz * counters.injected_ml_per_pulse * 3600.0;

        let span = match self.last_position {
            Some(prev) if prev.calendar == sample.position.calendar => {
                Some((prev.secs, sample.position.secs))
            }
            Some(_) => {
                info!("Consumption: time base changed, rebasing buckets");
                None
            }
            None => None,
        };
        self.last_position = Some(sample.position);

        let mut tick = TickConsumption {
            volume_ml: volume,
            ..TickConsumption::default()
        };

        match span.and_then(|(start, end)| split(start, end, SECS_PER_HOUR, volume)) {
            Some(s) => {
                counters.completed_hour_ml = Some(if s.whole_periods_skipped {
                    s.full_period_ml
                } else {
                    counters.hourly_ml + s.before_ml
                });
                counters.hourly_ml = s.after_ml;
                tick.hour_rolled = true;
            }
            None => counters.hourly_ml += volume,
        }

        match span.and_then(|(start, end)| split(start, end, SECS_PER_DAY, volume)) {
            Some(s) => {
                let completed = if s.whole_periods_skipped {
                    s.full_period_ml
                } else {
                    counters.daily_ml + s.before_ml
                };
                info!("Consumption: day closed with {:.1} ml", completed);
                counters.completed_day_ml = Some(completed);
                counters.daily_ml = s.after_ml;
                tick.day_rolled = true;
            }
            None => counters.daily_ml += volume,
        }

        counters.total_ml += volume;
        if volume > 0.0 || tick.day_rolled {
            self.dirty = true;
        }
        tick
    }

    // ── Resets ────────────────────────────────────────────────

    /// Queue a lifetime-total reset; applied by [`Self::apply_pending_resets`].
    pub fn request_total_reset(&mut self) {
        self.pending_total_reset = true;
    }

    pub fn request_daily_reset(&mut self) {
        self.pending_daily_reset = true;
    }

    pub fn has_pending_reset(&self) -> bool {
        self.pending_total_reset || self.pending_daily_reset
    }

    /// Persist then apply any queued resets.  A reset whose write fails
    /// stays queued and leaves the counters unchanged.
    pub fn apply_pending_resets(
        &mut self,
        counters: &mut ConsumptionCounters,
        storage: &mut impl StoragePort,
    ) {
        if self.pending_total_reset {
            match write_total(storage, 0.0) {
                Ok(()) => {
                    counters.total_ml = 0.0;
                    self.pending_total_reset = false;
                    info!("Consumption: total counter reset");
                }
                Err(e) => warn!("Consumption: total reset not persisted ({}), will retry", e),
            }
        }

        if self.pending_daily_reset {
            let persisted = match self.last_position {
                Some(pos) if pos.calendar => write_daily(
                    storage,
                    DailyRecord {
                        day: pos.day(),
                        daily_ml: 0.0,
                    },
                ),
                // No calendar day to key on: drop today's record instead.
                _ => match storage.delete(STORAGE_NAMESPACE, DAILY_KEY) {
                    Err(StorageError::NotFound) => Ok(()),
                    other => other,
                },
            };
            match persisted {
                Ok(()) => {
                    counters.daily_ml = 0.0;
                    self.pending_daily_reset = false;
                    self.daily_restore_pending = false;
                    info!("Consumption: daily counter reset");
                }
                Err(e) => warn!("Consumption: daily reset not persisted ({}), will retry", e),
            }
        }
    }

    // ── Persistence ───────────────────────────────────────────

    /// Restore counters saved by a previous run.
    ///
    /// The daily bucket is only resumed when it belongs to the current
    /// calendar day.  Without a synced clock that check is deferred to
    /// [`Self::restore_daily_on_sync`].
    pub fn load(
        &mut self,
        counters: &mut ConsumptionCounters,
        storage: &impl StoragePort,
        position: ClockPosition,
    ) {
        let mut buf = [0u8; 32];
        match storage.read(STORAGE_NAMESPACE, TOTAL_KEY, &mut buf) {
            Ok(n) => match postcard::from_bytes::<f64>(&buf[..n]) {
                Ok(total) if total.is_finite() && total >= 0.0 => {
                    counters.total_ml = total;
                    info!("Consumption: restored total {:.1} ml", total);
                }
                _ => warn!("Consumption: stored total is corrupt, starting from 0"),
            },
            Err(StorageError::NotFound) => info!("Consumption: no stored total, starting fresh"),
            Err(e) => warn!("Consumption: total read failed ({})", e),
        }

        if position.calendar {
            if let Some(rec) = read_daily(storage, position) {
                counters.daily_ml = rec.daily_ml;
                info!("Consumption: resumed {:.1} ml for today", rec.daily_ml);
            }
        } else {
            self.daily_restore_pending = true;
        }

        self.last_position = Some(position);
    }

    /// Resume today's stored daily bucket once the wall clock is synced.
    ///
    /// Fuel counted since boot is kept on top of the stored value.  Runs at
    /// most once per boot; returns `true` when a stored bucket was added.
    pub fn restore_daily_on_sync(
        &mut self,
        counters: &mut ConsumptionCounters,
        storage: &impl StoragePort,
        position: ClockPosition,
    ) -> bool {
        if !self.daily_restore_pending || !position.calendar {
            return false;
        }
        self.daily_restore_pending = false;
        match read_daily(storage, position) {
            Some(rec) => {
                counters.daily_ml += rec.daily_ml;
                self.dirty = true;
                info!(
                    "Consumption: clock synced, resumed {:.1} ml for today",
                    rec.daily_ml
                );
                true
            }
            None => false,
        }
    }

    /// Write total and daily bucket now.  The daily bucket is only
    /// written while it is keyed by a calendar day.
    pub fn flush(
        &mut self,
        counters: &ConsumptionCounters,
        storage: &mut impl StoragePort,
        now_ms: u64,
    ) -> Result<(), StorageError> {
        write_total(storage, counters.total_ml)?;
        if let Some(pos) = self.last_position.filter(|p| p.calendar) {
            write_daily(
                storage,
                DailyRecord {
                    day: pos.day(),
                    daily_ml: counters.daily_ml,
                },
            )?;
        }
        self.last_flush_ms = now_ms;
        self.dirty = false;
        Ok(())
    }

    /// Flush if counters changed and the flush interval has elapsed.
    /// Returns `true` when a write happened.
    pub fn flush_if_due(
        &mut self,
        counters: &ConsumptionCounters,
        storage: &mut impl StoragePort,
        now_ms: u64,
    ) -> bool {
        if !self.dirty || now_ms.saturating_sub(self.last_flush_ms) < self.flush_interval_ms {
            return false;
        }
        match self.flush(counters, storage, now_ms) {
            Ok(()) => true,
            Err(e) => {
                // Retry on the next rollup, counters keep accumulating.
                warn!("Consumption: flush failed ({})", e);
                self.last_flush_ms = now_ms;
                false
            }
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

}

// ── Helpers ───────────────────────────────────────────────────

fn sanitize(v: f32) -> f32 {
    if v.is_finite() && v > 0.0 { v } else { 0.0 }
}

struct Split {
    /// Share before the first boundary crossed.
    before_ml: f64,
    /// Share after the last boundary crossed.
    after_ml: f64,
    /// Share of one whole period (for gaps spanning several boundaries).
    full_period_ml: f64,
    /// More than one boundary was crossed.
    whole_periods_skipped: bool,
}

/// Split `volume` over `[start, end)` at multiples of `period`.
/// `None` when no boundary lies in the interval.
fn split(start: i64, end: i64, period: i64, volume: f64) -> Option<Split> {
    if end <= start {
        return None;
    }
    let first_idx = start.div_euclid(period);
    let last_idx = end.div_euclid(period);
    if first_idx == last_idx {
        return None;
    }
    let span = (end - start) as f64;
    let first_boundary = (first_idx + 1) * period;
    let last_boundary = last_idx * period;
    Some(Split {
        before_ml: volume * (first_boundary - start) as f64 / span,
        after_ml: volume * (end - last_boundary) as f64 / span,
        full_period_ml: volume * period as f64 / span,
        whole_periods_skipped: last_idx - first_idx > 1,
    })
}

/// Stored daily bucket, if it belongs to the day of `position`.
fn read_daily(storage: &impl StoragePort, position: ClockPosition) -> Option<DailyRecord> {
    let mut buf = [0u8; 32];
    let n = storage.read(STORAGE_NAMESPACE, DAILY_KEY, &mut buf).ok()?;
    match postcard::from_bytes::<DailyRecord>(&buf[..n]) {
        Ok(rec) if rec.day == position.day() && rec.daily_ml.is_finite() && rec.daily_ml >= 0.0 => {
            Some(rec)
        }
        Ok(_) => {
            info!("Consumption: stored daily bucket is from another day");
            None
        }
        Err(_) => {
            warn!("Consumption: stored daily bucket is corrupt");
            None
        }
    }
}

fn write_total(storage: &mut impl StoragePort, total_ml: f64) -> Result<(), StorageError> {
    let bytes = postcard::to_allocvec(&total_ml).map_err(|_| StorageError::IoError)?;
    storage.write(STORAGE_NAMESPACE, TOTAL_KEY, &bytes)
}

fn write_daily(storage: &mut impl StoragePort, record: DailyRecord) -> Result<(), StorageError> {
    let bytes = postcard::to_allocvec(&record).map_err(|_| StorageError::IoError)?;
    storage.write(STORAGE_NAMESPACE, DAILY_KEY, &bytes)
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn total_never_decreases(
            ticks in proptest::collection::vec((-1.0f32..5.0, -2.0f32..20.0, 0i64..7200), 1..200),
        ) {
            let mut acc = ConsumptionAccumulator::new(60_000);
            let mut c = ConsumptionCounters::new(0.022);
            let mut secs = 0i64;
            let mut prev_total = 0.0f64;
            for (dt, hz, advance) in ticks {
                secs += advance;
                acc.accumulate(&mut c, FuelSample {
                    dt_secs: dt,
                    pump_frequency_hz: hz,
                    position: ClockPosition::calendar(secs),
                });
                prop_assert!(c.total_ml >= prev_total);
                prop_assert!(c.hourly_ml >= 0.0 && c.daily_ml >= 0.0);
                prop_assert!(c.hourly_ml <= c.total_ml + 1e-9);
                prev_total = c.total_ml;
            }
        }

        #[test]
        fn split_conserves_volume_across_single_boundary(
            start in 0i64..3599, len in 1i64..3600, volume in 0.0f64..1000.0,
        ) {
            let end = start + len;
            if let Some(s) = split(start, end, SECS_PER_HOUR, volume) {
                if !s.whole_periods_skipped {
                    prop_assert!((s.before_ml + s.after_ml - volume).abs() < 1e-6);
                }
            }
        }
    }
}
