//! End-to-end sessions against the simulated heater.
//!
//! The controller talks to [`SimulatedHeater`] through the host UART
//! backend, which echoes every written frame the way the shared wire does.

use vevor_heater::adapters::uart::{SimulatedHeater, UartAdapter};
use vevor_heater::app::commands::AppCommand;
use vevor_heater::app::events::AppEvent;
use vevor_heater::app::ports::ClockPort;
use vevor_heater::app::service::AppService;
use vevor_heater::config::HeaterConfig;
use vevor_heater::fsm::StateId;
use vevor_heater::protocol::HeaterState;

use crate::mock_hw::{MockClock, MockStorage, RecordingSink};

const POWER_ON: u8 = 0x06;
const POWER_OFF: u8 = 0x05;

struct Rig {
    app: AppService,
    uart: UartAdapter,
    heater: SimulatedHeater,
    clock: MockClock,
    storage: MockStorage,
    sink: RecordingSink,
    /// Requested-state byte of every frame put on the wire.
    sent: Vec<u8>,
}

impl Rig {
    fn new(config: HeaterConfig, volts: f32) -> Self {
        let uart = UartAdapter::new(config.baud_rate).unwrap();
        let mut rig = Self {
            app: AppService::new(config).unwrap(),
            uart,
            heater: SimulatedHeater::new(volts),
            clock: MockClock::new(),
            storage: MockStorage::new(),
            sink: RecordingSink::new(),
            sent: Vec::new(),
        };
        rig.app.start(&rig.clock, &rig.storage, &mut rig.sink);
        rig
    }

    fn step(&mut self) {
        self.tick_only();
        self.uart.exchange(&mut self.heater);
    }

    /// Tick without the heater answering.
    fn tick_only(&mut self) {
        self.clock.advance(1000);
        self.app
            .tick(&mut self.uart, &self.clock, &mut self.storage, &mut self.sink);
        self.sent
            .extend(self.uart.take_tx().iter().map(|frame| frame[9]));
    }

    fn run_until(&mut self, max_steps: usize, state: StateId) -> bool {
        for _ in 0..max_steps {
            self.step();
            if self.app.state() == state {
                return true;
            }
        }
        false
    }
}

fn quick_polling() -> HeaterConfig {
    HeaterConfig {
        polling_interval_ms: 5000,
        ..HeaterConfig::default()
    }
}

#[test]
fn start_run_stop_cycle() {
    let mut rig = Rig::new(HeaterConfig::default(), 12.8);
    rig.step();
    assert_eq!(rig.app.state(), StateId::Off);

    rig.app.submit(AppCommand::SetPower(true));
    assert!(rig.run_until(3, StateId::Starting));
    assert!(rig.sent.contains(&POWER_ON));
    assert!(rig.run_until(20, StateId::Running));
    assert!(rig.app.controller().desired_on);

    rig.app.submit(AppCommand::SetPower(false));
    assert!(rig.run_until(2, StateId::CoolingDown));
    assert!(rig.app.controller().cooling_down);
    assert!(rig.sent.contains(&POWER_OFF));

    assert!(rig.run_until(20, StateId::Off));
    assert_eq!(rig.heater.report().heater_state, HeaterState::Off);
    assert!(!rig.app.controller().cooling_down);

    // Echoed controller frames are skipped, never counted as errors.
    assert_eq!(rig.app.telemetry().decode_errors(), 0);
    assert!(rig.sink.count(|e| matches!(e, AppEvent::StateChanged { .. })) >= 4);
}

#[test]
fn low_voltage_shuts_down_and_recovers() {
    let mut rig = Rig::new(HeaterConfig::default(), 12.8);
    rig.step();
    rig.app.submit(AppCommand::SetPower(true));
    assert!(rig.run_until(20, StateId::Running));

    rig.heater.set_input_voltage(11.0);
    rig.sent.clear();
    assert!(rig.run_until(3, StateId::FaultLowVoltage));
    assert!(!rig.app.controller().desired_on);
    assert!(rig.app.observables(rig.clock.uptime_ms()).low_voltage_error);
    assert!(rig.sent.contains(&POWER_OFF));
    assert_eq!(
        rig.sink.count(|e| matches!(e, AppEvent::FaultDetected(0b1))),
        1
    );

    // Voltage between the two thresholds: the fault holds.
    rig.heater.set_input_voltage(12.0);
    for _ in 0..3 {
        rig.step();
    }
    assert_eq!(rig.app.state(), StateId::FaultLowVoltage);

    rig.heater.set_input_voltage(12.8);
    assert!(rig.run_until(40, StateId::Running));
    assert_eq!(rig.sink.count(|e| matches!(e, AppEvent::FaultCleared)), 1);
    assert_eq!(rig.app.fault_flags(), 0);
}

#[test]
fn start_refused_below_start_voltage() {
    let mut rig = Rig::new(HeaterConfig::default(), 12.0);
    rig.step();
    rig.app.submit(AppCommand::SetPower(true));
    for _ in 0..5 {
        rig.step();
    }
    assert_eq!(rig.app.state(), StateId::Off);
    assert!(rig.app.controller().start_inhibited);
    assert!(!rig.app.controller().desired_on);
    assert!(rig.app.observables(rig.clock.uptime_ms()).low_voltage_error);
    assert!(!rig.sent.contains(&POWER_ON));

    rig.heater.set_input_voltage(12.6);
    assert!(rig.run_until(20, StateId::Running));
    assert!(!rig.app.controller().start_inhibited);
}

#[test]
fn stale_telemetry_reports_disconnected() {
    let mut rig = Rig::new(quick_polling(), 12.8);
    for _ in 0..3 {
        rig.step();
    }
    let obs = rig.app.observables(rig.clock.uptime_ms());
    assert!(!obs.stale);
    assert_eq!(obs.state_text, "Off");

    // Heater goes silent for longer than twice the polling interval.
    for _ in 0..11 {
        rig.tick_only();
    }
    let obs = rig.app.observables(rig.clock.uptime_ms());
    assert!(obs.stale);
    assert_eq!(obs.state_text, "Disconnected");
    assert_eq!(obs.consumption_rate_ml_per_hour, 0.0);

    // Telemetry resumes.
    rig.step();
    rig.step();
    assert!(!rig.app.observables(rig.clock.uptime_ms()).stale);
}

#[test]
fn unknown_heater_state_freezes_transitions() {
    let mut rig = Rig::new(HeaterConfig::default(), 12.8);
    rig.heater.force_state(HeaterState::Unknown(0x09));
    rig.step();
    rig.app.submit(AppCommand::SetPower(true));
    for _ in 0..5 {
        rig.step();
    }
    assert_eq!(rig.app.state(), StateId::Off);
    assert!(!rig.sent.contains(&POWER_ON));
    assert!(rig.app.telemetry().anomalies() >= 1);
    assert!(
        rig.sink
            .count(|e| matches!(e, AppEvent::TelemetryAnomaly { raw_state: 0x09 }))
            >= 1
    );
    assert_eq!(rig.app.observables(rig.clock.uptime_ms()).state_text, "Unknown");
}

#[test]
fn idle_status_poll_is_rate_limited() {
    let mut rig = Rig::new(quick_polling(), 12.8);
    for _ in 0..4 {
        rig.step();
    }
    assert_eq!(rig.sent.len(), 1);

    // Resent once the polling interval has passed since the first send.
    rig.step();
    rig.step();
    assert_eq!(rig.sent.len(), 2);
}

#[test]
fn fuel_accumulates_while_burning() {
    let mut rig = Rig::new(HeaterConfig::default(), 12.8);
    rig.step();
    rig.app.submit(AppCommand::SetPower(true));
    assert!(rig.run_until(20, StateId::Running));
    for _ in 0..10 {
        rig.step();
    }
    let c = rig.app.consumption();
    assert!(c.total_ml > 0.0);
    assert!((c.daily_ml - c.total_ml).abs() < 1e-9);
    assert!((c.hourly_ml - c.total_ml).abs() < 1e-9);
    assert!(c.rate_ml_per_hour > 0.0);
}
