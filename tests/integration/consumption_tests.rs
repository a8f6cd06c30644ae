//! Integration tests: fuel accounting, calendar buckets and persistence.

use chrono::{NaiveDate, NaiveDateTime};
use vevor_heater::app::commands::AppCommand;
use vevor_heater::app::ports::{ClockPort, StoragePort};
use vevor_heater::app::service::AppService;
use vevor_heater::config::HeaterConfig;
use vevor_heater::consumption::STORAGE_NAMESPACE;
use vevor_heater::protocol::codec::encode_report;
use vevor_heater::protocol::{HeaterReport, HeaterState};

use crate::mock_hw::{MockClock, MockSerial, MockStorage, RecordingSink};

/// 4 Hz × 0.022 ml per tick of one second.
const ML_PER_TICK: f64 = 0.088;

fn at(day: u32, h: u32, m: u32, s: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 3, day)
        .unwrap()
        .and_hms_opt(h, m, s)
        .unwrap()
}

fn burning_frame() -> [u8; 56] {
    encode_report(&HeaterReport {
        heater_state: HeaterState::StableCombustion,
        input_voltage: 12.8,
        pump_frequency_hz: 4.0,
        ..HeaterReport::default()
    })
}

fn run_ticks(
    app: &mut AppService,
    clock: &MockClock,
    storage: &mut MockStorage,
    ticks: usize,
) {
    let mut serial = MockSerial::new();
    let mut sink = RecordingSink::new();
    for _ in 0..ticks {
        serial.inject(&burning_frame());
        clock.advance(1000);
        app.tick(&mut serial, clock, storage, &mut sink);
    }
}

fn started(clock: &MockClock, storage: &MockStorage) -> AppService {
    let mut app = AppService::new(HeaterConfig::default()).unwrap();
    app.start(clock, storage, &mut RecordingSink::new());
    app
}

#[test]
fn total_reset_waits_for_storage() {
    let mut storage = MockStorage::new();
    storage
        .write(
            STORAGE_NAMESPACE,
            "fuel_total",
            &postcard::to_allocvec(&500.0f64).unwrap(),
        )
        .unwrap();
    let clock = MockClock::new();
    let mut app = started(&clock, &storage);
    assert_eq!(app.consumption().total_ml, 500.0);

    let mut serial = MockSerial::new();
    let mut sink = RecordingSink::new();
    storage.fail_writes = true;
    app.submit(AppCommand::ResetTotalConsumption);
    clock.advance(1000);
    app.tick(&mut serial, &clock, &mut storage, &mut sink);
    assert_eq!(app.consumption().total_ml, 500.0);

    storage.fail_writes = false;
    clock.advance(1000);
    app.tick(&mut serial, &clock, &mut storage, &mut sink);
    assert_eq!(app.consumption().total_ml, 0.0);

    let mut buf = [0u8; 16];
    let n = storage
        .read(STORAGE_NAMESPACE, "fuel_total", &mut buf)
        .unwrap();
    assert_eq!(postcard::from_bytes::<f64>(&buf[..n]).unwrap(), 0.0);
}

#[test]
fn daily_reset_keeps_total() {
    let mut storage = MockStorage::new();
    let clock = MockClock::with_local_time(at(10, 12, 0, 0));
    let mut app = started(&clock, &storage);
    run_ticks(&mut app, &clock, &mut storage, 6);
    let total = app.consumption().total_ml;
    assert!(total > 0.0);

    app.submit(AppCommand::ResetDailyConsumption);
    run_ticks(&mut app, &clock, &mut storage, 1);
    let c = app.consumption();
    assert!((c.daily_ml - ML_PER_TICK).abs() < 1e-6);
    assert!((c.total_ml - (total + ML_PER_TICK)).abs() < 1e-6);
}

#[test]
fn midnight_closes_daily_bucket() {
    let mut storage = MockStorage::new();
    let clock = MockClock::with_local_time(at(10, 23, 59, 55));
    let mut app = started(&clock, &storage);
    run_ticks(&mut app, &clock, &mut storage, 10);

    let c = app.consumption();
    let closed = c.completed_day_ml.expect("day rolled over");
    assert!(closed > 0.0);
    assert!(c.daily_ml > 0.0);
    assert!(c.daily_ml < c.total_ml);
    assert!((closed + c.daily_ml - c.total_ml).abs() < 1e-6);

    let obs = app.observables(clock.uptime_ms());
    assert_eq!(obs.last_day_consumption_ml, Some(closed));
    assert_eq!(obs.last_hour_consumption_ml, c.completed_hour_ml);
    assert!((obs.total_consumption_m3 * 1_000_000.0 - c.total_ml).abs() < 1e-6);
}

#[test]
fn counters_survive_restart() {
    let mut storage = MockStorage::new();
    let clock = MockClock::with_local_time(at(10, 8, 0, 0));
    let mut app = started(&clock, &storage);
    run_ticks(&mut app, &clock, &mut storage, 10);
    app.flush_consumption(&mut storage, clock.uptime_ms())
        .unwrap();
    let total = app.consumption().total_ml;
    let daily = app.consumption().daily_ml;
    assert!(total > 0.0);

    // Restart later the same day: both counters resume.
    clock.advance(3_600_000);
    let app = started(&clock, &storage);
    assert!((app.consumption().total_ml - total).abs() < 1e-9);
    assert!((app.consumption().daily_ml - daily).abs() < 1e-9);

    // Restart on the next day: only the total survives.
    let next_day = MockClock::with_local_time(at(11, 8, 0, 0));
    let app = started(&next_day, &storage);
    assert!((app.consumption().total_ml - total).abs() < 1e-9);
    assert_eq!(app.consumption().daily_ml, 0.0);
}

#[test]
fn stale_telemetry_adds_no_fuel() {
    let mut storage = MockStorage::new();
    let clock = MockClock::new();
    let mut app = started(&clock, &storage);
    run_ticks(&mut app, &clock, &mut storage, 3);
    let total = app.consumption().total_ml;

    // No frames for well beyond the freshness window.
    let mut serial = MockSerial::new();
    let mut sink = RecordingSink::new();
    clock.advance(200_000);
    for _ in 0..3 {
        clock.advance(1000);
        app.tick(&mut serial, &clock, &mut storage, &mut sink);
    }
    assert!((app.consumption().total_ml - total).abs() < 1e-9);
}

#[test]
fn daily_bucket_resumes_when_clock_syncs_after_start() {
    // Earlier run today left 30 ml in the daily bucket.
    let mut storage = MockStorage::new();
    let first = MockClock::with_local_time(at(12, 7, 0, 0));
    let mut app = started(&first, &storage);
    run_ticks(&mut app, &first, &mut storage, 10);
    app.flush_consumption(&mut storage, first.uptime_ms())
        .unwrap();
    let stored_daily = app.consumption().daily_ml;
    assert!(stored_daily > 0.0);

    // Reboot without a synced clock: nothing to key the daily bucket on.
    let clock = MockClock::new();
    let mut app = started(&clock, &storage);
    assert_eq!(app.consumption().daily_ml, 0.0);
    run_ticks(&mut app, &clock, &mut storage, 5);
    app.flush_consumption(&mut storage, clock.uptime_ms())
        .unwrap();
    let since_boot = app.consumption().daily_ml;

    clock.sync(at(12, 9, 0, 0));
    run_ticks(&mut app, &clock, &mut storage, 1);
    let daily = app.consumption().daily_ml;
    assert!((daily - (stored_daily + since_boot + ML_PER_TICK)).abs() < 1e-6);
}
