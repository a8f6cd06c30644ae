//! Integration tests: AppService → codec / FSM / dispatcher with mock ports.

use vevor_heater::app::commands::AppCommand;
use vevor_heater::app::events::AppEvent;
use vevor_heater::app::ports::ClockPort;
use vevor_heater::app::service::AppService;
use vevor_heater::config::{ControlMode, HeaterConfig};
use vevor_heater::fsm::StateId;
use vevor_heater::protocol::codec::encode_report;
use vevor_heater::protocol::{HeaterReport, HeaterState};

use crate::mock_hw::{MockClock, MockConfigStore, MockSerial, MockStorage, RecordingSink};

struct Harness {
    app: AppService,
    serial: MockSerial,
    clock: MockClock,
    storage: MockStorage,
    sink: RecordingSink,
}

impl Harness {
    fn new(config: HeaterConfig) -> Self {
        let mut h = Self {
            app: AppService::new(config).unwrap(),
            serial: MockSerial::new(),
            clock: MockClock::new(),
            storage: MockStorage::new(),
            sink: RecordingSink::new(),
        };
        h.app.start(&h.clock, &h.storage, &mut h.sink);
        h
    }

    fn tick(&mut self) {
        self.clock.advance(1000);
        self.app
            .tick(&mut self.serial, &self.clock, &mut self.storage, &mut self.sink);
    }

    fn heater_says(&mut self, state: HeaterState, volts: f32) {
        let report = HeaterReport {
            heater_state: state,
            input_voltage: volts,
            ..HeaterReport::default()
        };
        self.serial.inject(&encode_report(&report));
    }
}

#[test]
fn start_emits_started_event() {
    let h = Harness::new(HeaterConfig::default());
    assert!(matches!(
        h.sink.events.first(),
        Some(AppEvent::Started(StateId::Off))
    ));
    assert_eq!(h.app.state(), StateId::Off);
}

#[test]
fn first_tick_polls_status() {
    let mut h = Harness::new(HeaterConfig::default());
    h.tick();
    assert_eq!(h.serial.written.len(), 1);
    let frame = &h.serial.written[0];
    assert_eq!(&frame[..4], &[0xAA, 0x66, 0x02, 0x0B]);
    assert_eq!(frame[8], 8);
    assert_eq!(frame[9], 0x02);
}

#[test]
fn power_level_intent_changes_frame() {
    let mut h = Harness::new(HeaterConfig::default());
    h.tick();
    h.app.submit(AppCommand::SetPowerLevel(47));
    h.tick();
    assert_eq!(h.serial.written.len(), 2);
    assert_eq!(h.serial.written[1][8], 5);
    assert_eq!(h.app.controller().requested_power_percent, 50);

    // Same frame again within the polling interval: suppressed.
    h.tick();
    assert_eq!(h.serial.written.len(), 2);
}

#[test]
fn failed_write_is_retried() {
    let mut h = Harness::new(HeaterConfig::default());
    h.serial.fail_writes = true;
    h.tick();
    assert!(h.serial.written.is_empty());
    assert_eq!(h.app.dispatcher().failure_count(), 1);

    h.serial.fail_writes = false;
    h.tick();
    assert_eq!(h.serial.written.len(), 1);
}

#[test]
fn telemetry_event_follows_received_frame() {
    let mut h = Harness::new(HeaterConfig::default());
    h.heater_says(HeaterState::Off, 12.5);
    h.tick();
    let obs = h
        .sink
        .events
        .iter()
        .rev()
        .find_map(|e| match e {
            AppEvent::Telemetry(obs) => Some(obs.clone()),
            _ => None,
        })
        .expect("telemetry published");
    assert!(!obs.stale);
    assert_eq!(obs.state_text, "Off");
    assert!((obs.input_voltage - 12.5).abs() < 1e-3);
}

#[test]
fn corrupt_frame_is_discarded() {
    let mut h = Harness::new(HeaterConfig::default());
    let mut frame = encode_report(&HeaterReport::default());
    frame[55] = frame[55].wrapping_add(1);
    h.serial.inject(&frame);
    h.tick();
    assert!(h
        .sink
        .events
        .iter()
        .any(|e| matches!(e, AppEvent::FrameDiscarded(_))));
    assert!(h.app.telemetry().decode_errors() >= 1);
    assert!(h.app.telemetry().is_stale(h.clock.uptime_ms()));
}

#[test]
fn read_error_drops_partial_frame() {
    // Long partial-frame timeout so only the read error can drop the head.
    let mut h = Harness::new(HeaterConfig {
        update_interval_ms: 5000,
        resend_interval_ms: 5000,
        ..HeaterConfig::default()
    });
    let frame = encode_report(&HeaterReport {
        input_voltage: 12.5,
        ..HeaterReport::default()
    });
    h.serial.inject(&frame[..20]);
    h.tick();
    h.serial.fail_next_read = true;
    h.tick();

    // The tail alone never completes a frame.
    h.serial.inject(&frame[20..]);
    h.tick();
    assert!(h.app.telemetry().is_stale(h.clock.uptime_ms()));
}

#[test]
fn unrequested_combustion_is_stopped() {
    let mut h = Harness::new(HeaterConfig::default());
    h.heater_says(HeaterState::StableCombustion, 12.8);
    h.tick();
    assert_eq!(h.app.state(), StateId::CoolingDown);
    assert_eq!(h.serial.written.last().map(|f| f[9]), Some(0x05));
}

#[test]
fn antifreeze_starts_when_cold_and_stops_when_warm() {
    let mut h = Harness::new(HeaterConfig {
        control_mode: ControlMode::Antifreeze,
        ..HeaterConfig::default()
    });
    h.app.submit(AppCommand::ExternalTemperature(Some(1.0)));
    h.heater_says(HeaterState::Off, 12.8);
    h.tick();
    assert_eq!(h.app.state(), StateId::Starting);
    let frame = h.serial.written.last().unwrap();
    assert_eq!(frame[9], 0x06);
    assert_eq!(frame[8], 8);

    h.app.submit(AppCommand::ExternalTemperature(Some(9.5)));
    h.heater_says(HeaterState::GlowPlugPreheat, 12.8);
    h.tick();
    assert_eq!(h.app.state(), StateId::CoolingDown);
    assert_eq!(h.serial.written.last().map(|f| f[9]), Some(0x05));
}

#[test]
fn automatic_mode_without_temperature_stays_off() {
    let mut h = Harness::new(HeaterConfig {
        control_mode: ControlMode::Automatic,
        ..HeaterConfig::default()
    });
    h.app.submit(AppCommand::SetPower(true));
    for _ in 0..3 {
        h.heater_says(HeaterState::Off, 12.8);
        h.tick();
    }
    assert_eq!(h.app.state(), StateId::Off);
    assert!(!h.app.controller().desired_on);
    assert!(h.serial.requested_states().iter().all(|&s| s == 0x02));
}

#[test]
fn automatic_mode_heats_below_target() {
    let mut h = Harness::new(HeaterConfig {
        control_mode: ControlMode::Automatic,
        ..HeaterConfig::default()
    });
    h.app.submit(AppCommand::ExternalTemperature(Some(15.0)));
    h.heater_says(HeaterState::Off, 12.8);
    h.tick();
    assert_eq!(h.app.state(), StateId::Starting);
    assert_eq!(
        h.app.controller().active_control_mode,
        ControlMode::Automatic
    );
}

#[test]
fn config_auto_save_after_quiet_period() {
    let mut h = Harness::new(HeaterConfig::default());
    let store = MockConfigStore::default();
    h.app.submit(AppCommand::SetControlMode(ControlMode::Antifreeze));
    for _ in 0..5 {
        h.tick();
        assert!(!h.app.auto_save_if_needed(&store));
    }
    h.tick();
    assert!(h.app.auto_save_if_needed(&store));
    assert_eq!(store.save_count.get(), 1);
    assert_eq!(
        store.saved.borrow().as_ref().map(|c| c.control_mode),
        Some(ControlMode::Antifreeze)
    );
    assert!(!h.app.is_config_dirty());
}
