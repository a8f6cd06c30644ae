//! Application service — the hexagonal core.
//!
//! [`AppService`] owns the decoder, telemetry store, consumption counters,
//! control loop, safety supervisor, FSM and command dispatcher.  All I/O
//! flows through port traits passed in at call sites, making the entire
//! service testable with mock adapters.
//!
//! ```text
//!   SerialPort ──▶ ┌──────────────────────────────────┐ ──▶ EventSink
//!    ClockPort ──▶ │            AppService            │
//!  StoragePort ◀─▶ │ codec · telemetry · consumption  │ ──▶ SerialPort
//!  IntentQueue ──▶ │ control · safety · FSM · dispatch│
//!                  └──────────────────────────────────┘
//! ```
//!
//! One [`tick`](AppService::tick):
//!
//! 1. drain queued intents
//! 2. read and decode serial bytes, refresh the telemetry store
//! 3. apply pending consumption resets, then accumulate fuel
//! 4. safety supervisor
//! 5. control policy → demand
//! 6. FSM
//! 7. dispatch one command
//! 8. periodic persistence and events

use log::{debug, info, warn};

use crate::config::{ControlMode, HeaterConfig, TemperatureSource};
use crate::consumption::{
    ClockPosition, ConsumptionAccumulator, ConsumptionCounters, FuelSample,
};
use crate::control::{ControlLoop, ControlPolicy};
use crate::dispatch::{self, CommandDispatcher, DispatchOutcome};
use crate::fsm::context::{ControllerState, FsmContext, HeaterInputs};
use crate::fsm::states::build_state_table;
use crate::fsm::{Fsm, StateId};
use crate::protocol::codec::FrameDecoder;
use crate::protocol::{HeaterState, InboundFrame};
use crate::safety::SafetySupervisor;
use crate::telemetry::{TelemetrySnapshot, TelemetryStore};

use super::commands::{AppCommand, IntentQueue};
use super::events::{AppEvent, Observables};
use super::ports::{ClockPort, ConfigPort, EventSink, SerialPort, StoragePort};

/// Bytes pulled from the UART per read call.
const READ_CHUNK: usize = 64;
/// Upper bound on read calls per tick.
const MAX_READS_PER_TICK: usize = 8;
/// Quiet time after a config change before it is written back.
const CONFIG_SAVE_DELAY_SECS: f32 = 5.0;
const ML_PER_M3: f64 = 1_000_000.0;

// ───────────────────────────────────────────────────────────────
// AppService
// ───────────────────────────────────────────────────────────────

pub struct AppService {
    fsm: Fsm,
    ctx: FsmContext,
    safety: SafetySupervisor,
    control: ControlLoop,
    decoder: FrameDecoder,
    telemetry: TelemetryStore,
    counters: ConsumptionCounters,
    accumulator: ConsumptionAccumulator,
    dispatcher: CommandDispatcher,
    intents: IntentQueue,

    // -- Requested inputs (written only while draining intents) --
    power_switch: bool,
    power_override: Option<u8>,
    external_temp_c: Option<f32>,

    tick_secs: f32,
    tick_count: u64,
    last_tick_ms: Option<u64>,
    last_publish_ms: Option<u64>,
    frame_received: bool,
    config_dirty: bool,
    dirty_since_tick: u64,
}

impl AppService {
    /// Construct the service from a validated configuration.
    ///
    /// Does **not** start the FSM; call [`start`](Self::start) next.
    pub fn new(config: HeaterConfig) -> crate::error::Result<Self> {
        config.validate()?;

        let tick_secs = config.update_interval_ms as f32 / 1000.0;
        let polling_ms = u64::from(config.polling_interval_ms);
        let partial_timeout_ms = u64::from(config.update_interval_ms) * 2;

        Ok(Self {
            fsm: Fsm::new(build_state_table(), StateId::Off),
            safety: SafetySupervisor::new(&config),
            control: ControlLoop::new(),
            decoder: FrameDecoder::new(partial_timeout_ms),
            telemetry: TelemetryStore::new(polling_ms),
            counters: ConsumptionCounters::new(config.injected_ml_per_pulse),
            accumulator: ConsumptionAccumulator::new(polling_ms),
            dispatcher: CommandDispatcher::new(),
            intents: IntentQueue::new(),
            power_switch: false,
            power_override: None,
            external_temp_c: None,
            tick_secs,
            tick_count: 0,
            last_tick_ms: None,
            last_publish_ms: None,
            frame_received: false,
            config_dirty: false,
            dirty_since_tick: 0,
            ctx: FsmContext::new(config),
        })
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Restore persisted counters and enter the initial state.
    pub fn start(
        &mut self,
        clock: &impl ClockPort,
        storage: &impl StoragePort,
        sink: &mut impl EventSink,
    ) {
        let position = clock_position(clock);
        self.accumulator.load(&mut self.counters, storage, position);
        self.fsm.start(&mut self.ctx);
        sink.emit(&AppEvent::Started(self.fsm.current_state()));
        info!(
            "AppService started in {}, mode {}",
            self.fsm.state_name(),
            self.ctx.config.control_mode
        );
    }

    // ── Intents ───────────────────────────────────────────────

    /// Queue an external request; it takes effect on the next tick.
    pub fn submit(&mut self, command: AppCommand) -> bool {
        self.intents.push(command)
    }

    // ── Per-tick orchestration ────────────────────────────────

    pub fn tick(
        &mut self,
        serial: &mut impl SerialPort,
        clock: &impl ClockPort,
        storage: &mut impl StoragePort,
        sink: &mut impl EventSink,
    ) {
        let now = clock.uptime_ms();
        self.tick_count += 1;
        let prev_state = self.fsm.current_state();
        let prev_faults = self.ctx.fault_flags;

        // 1. Intents queued since the last tick
        self.apply_intents();

        // 2. Serial RX → decoder → telemetry store
        self.receive(serial, now, sink);
        let fresh = self.telemetry.fresh(now);
        self.ctx.heater = HeaterInputs {
            voltage: fresh.map(|s| s.report.input_voltage),
            heater_state: fresh.map(|s| s.report.heater_state),
        };

        // 3. Consumption (resets land before accumulation)
        self.accumulator
            .apply_pending_resets(&mut self.counters, storage);
        let position = clock_position(clock);
        self.accumulator
            .restore_daily_on_sync(&mut self.counters, &*storage, position);
        let dt_secs = self
            .last_tick_ms
            .map_or(0.0, |last| now.saturating_sub(last) as f32 / 1000.0);
        self.last_tick_ms = Some(now);
        let sample = FuelSample {
            dt_secs,
            pump_frequency_hz: fresh.map_or(0.0, |s| s.report.pump_frequency_hz),
            position,
        };
        self.accumulator.accumulate(&mut self.counters, sample);

        // 4. Safety evaluation
        let faults = self
            .safety
            .evaluate(self.ctx.heater.voltage, prev_state != StateId::Off);
        self.ctx.fault_flags = faults;
        if faults != 0 && prev_faults == 0 {
            warn!("Safety fault! flags=0b{:08b}", faults);
            sink.emit(&AppEvent::FaultDetected(faults));
        } else if faults == 0 && prev_faults != 0 {
            sink.emit(&AppEvent::FaultCleared);
        }

        // 5. Control policy
        let policy = self.policy(fresh.as_ref());
        let demand = self.control.evaluate(
            &policy,
            &self.ctx.config,
            prev_state.is_heating(),
            now,
        );
        self.ctx.set_demand(demand, policy.mode());

        // 6. FSM tick (pure state logic)
        self.fsm.tick(&mut self.ctx);

        // 7. Dispatch
        let heater = self.ctx.heater.heater_state;
        let command = dispatch::select_command(&self.ctx.controller, heater);
        let quiet = dispatch::quiet_period_ms(&self.ctx.controller, heater, &self.ctx.config);
        // The heater only answers our frames, so freshness follows the send cadence.
        self.telemetry.set_polling_interval(quiet);
        if let DispatchOutcome::Sent(cmd) = self.dispatcher.dispatch(serial, command, quiet, now) {
            debug!("Dispatched {:?}", cmd);
        }

        // 8. Persistence and events
        self.accumulator
            .flush_if_due(&self.counters, storage, now);

        let new_state = self.fsm.current_state();
        if new_state != prev_state {
            debug!("Controller now {}", self.fsm.state_name());
            sink.emit(&AppEvent::StateChanged {
                from: prev_state,
                to: new_state,
            });
        }
        if self.publish_due(now, new_state != prev_state) {
            sink.emit(&AppEvent::Telemetry(self.observables(now)));
            self.last_publish_ms = Some(now);
        }
        self.frame_received = false;
    }

    // ── Queries ───────────────────────────────────────────────

    /// Build the host-facing observables at `now_ms`.
    pub fn observables(&self, now_ms: u64) -> Observables {
        let current = self.telemetry.current(now_ms);
        let stale = current.is_none_or(|(_, stale)| stale);
        let report = current.map(|(s, _)| s.report).unwrap_or_default();
        let c = &self.ctx.controller;

        Observables {
            controller_state: self.fsm.current_state(),
            control_mode: c.active_control_mode,
            state_text: if stale {
                "Disconnected"
            } else {
                report.heater_state.as_str()
            },
            stale,
            input_voltage: report.input_voltage,
            power_level_percent: report.power_level_percent,
            fan_speed_rpm: report.fan_speed_rpm,
            pump_frequency_hz: report.pump_frequency_hz,
            glow_plug_current_amps: report.glow_plug_current_amps,
            heat_exchanger_temp_c: report.heat_exchanger_temp_c,
            state_duration_secs: report.state_duration_secs,
            cooling_down: c.cooling_down || (!stale && report.cooling_flag),
            low_voltage_error: c.low_voltage_fault || c.start_inhibited,
            hourly_consumption_ml: self.counters.hourly_ml,
            daily_consumption_ml: self.counters.daily_ml,
            total_consumption_ml: self.counters.total_ml,
            total_consumption_m3: self.counters.total_ml / ML_PER_M3,
            last_hour_consumption_ml: self.counters.completed_hour_ml,
            last_day_consumption_ml: self.counters.completed_day_ml,
            consumption_rate_ml_per_hour: if stale {
                0.0
            } else {
                self.counters.rate_ml_per_hour
            },
            fault_flags: self.ctx.fault_flags,
        }
    }

    pub fn state(&self) -> StateId {
        self.fsm.current_state()
    }

    pub fn controller(&self) -> &ControllerState {
        &self.ctx.controller
    }

    pub fn consumption(&self) -> &ConsumptionCounters {
        &self.counters
    }

    pub fn telemetry(&self) -> &TelemetryStore {
        &self.telemetry
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Current active fault bitmask (0 = no faults).
    pub fn fault_flags(&self) -> u8 {
        self.ctx.fault_flags
    }

    pub fn current_config(&self) -> &HeaterConfig {
        &self.ctx.config
    }

    pub fn pending_intents(&self) -> usize {
        self.intents.len()
    }

    // ── Internal ──────────────────────────────────────────────

    fn apply_intents(&mut self) {
        while let Some(cmd) = self.intents.pop() {
            self.apply_intent(cmd);
        }
    }

    fn apply_intent(&mut self, cmd: AppCommand) {
        match cmd {
            AppCommand::SetPower(on) => {
                if self.ctx.config.control_mode != ControlMode::Manual {
                    info!(
                        "Power switch {} noted; {} mode decides on/off",
                        if on { "on" } else { "off" },
                        self.ctx.config.control_mode
                    );
                }
                self.power_switch = on;
            }
            AppCommand::SetPowerLevel(percent) => {
                let level = snap_power(percent, self.ctx.config.power_step_percent);
                info!("Power level set to {}%", level);
                self.power_override = Some(level);
            }
            AppCommand::SetControlMode(mode) => {
                if mode != self.ctx.config.control_mode {
                    info!("Control mode: {} -> {}", self.ctx.config.control_mode, mode);
                    self.ctx.config.control_mode = mode;
                    self.mark_config_dirty();
                }
            }
            AppCommand::SetInjectedPerPulse(ml) => {
                if ml.is_finite() && (0.001..=1.0).contains(&ml) {
                    self.ctx.config.injected_ml_per_pulse = ml;
                    self.counters.injected_ml_per_pulse = ml;
                    self.mark_config_dirty();
                } else {
                    warn!("Rejected injected-per-pulse {} ml (0.001–1.0)", ml);
                }
            }
            AppCommand::ResetTotalConsumption => self.accumulator.request_total_reset(),
            AppCommand::ResetDailyConsumption => self.accumulator.request_daily_reset(),
            AppCommand::SetTargetTemperature(t) => {
                if t.is_finite() {
                    let clamped = self.ctx.config.clamp_target(t);
                    self.ctx.config.climate.target_temperature_c = clamped;
                    self.mark_config_dirty();
                } else {
                    warn!("Rejected non-finite target temperature");
                }
            }
            AppCommand::ExternalTemperature(t) => {
                self.external_temp_c = t.filter(|v| v.is_finite());
            }
        }
    }

    fn receive(&mut self, serial: &mut impl SerialPort, now: u64, sink: &mut impl EventSink) {
        let mut chunk = [0u8; READ_CHUNK];
        // Expire a stale partial frame even when nothing new arrived.
        self.decoder.feed(&[], now);
        for _ in 0..MAX_READS_PER_TICK {
            let n = match serial.read_available(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    // Bytes were lost: a buffered partial frame can't complete.
                    warn!("UART read failed: {}", e);
                    self.decoder.reset();
                    break;
                }
            };
            self.decoder.feed(&chunk[..n], now);
            self.drain_decoder(now, sink);
        }
        self.drain_decoder(now, sink);
    }

    fn drain_decoder(&mut self, now: u64, sink: &mut impl EventSink) {
        while let Some(result) = self.decoder.poll() {
            match result {
                Ok(InboundFrame::Telemetry(report)) => {
                    if let HeaterState::Unknown(raw) = report.heater_state {
                        warn!("Heater reported unknown state 0x{:02X}", raw);
                        self.telemetry.record_anomaly();
                        sink.emit(&AppEvent::TelemetryAnomaly { raw_state: raw });
                    }
                    self.telemetry.update(TelemetrySnapshot {
                        report,
                        received_at_ms: now,
                    });
                    self.frame_received = true;
                }
                Ok(InboundFrame::Echo) => {}
                Err(e) => {
                    self.telemetry.record_decode_error();
                    sink.emit(&AppEvent::FrameDiscarded(e));
                }
            }
        }
    }

    fn policy(&self, fresh: Option<&TelemetrySnapshot>) -> ControlPolicy {
        let cfg = &self.ctx.config;
        let room_temp_c = match cfg.climate.temperature_source {
            TemperatureSource::External => self.external_temp_c,
            TemperatureSource::HeatExchanger => fresh.map(|s| s.report.heat_exchanger_temp_c),
        };
        match cfg.control_mode {
            ControlMode::Manual => ControlPolicy::Manual {
                switch_on: self.power_switch,
                power_percent: self.power_override.unwrap_or(cfg.default_power_percent),
            },
            ControlMode::Automatic => ControlPolicy::Automatic {
                room_temp_c,
                target_c: cfg.climate.target_temperature_c,
            },
            ControlMode::Antifreeze => ControlPolicy::Antifreeze { room_temp_c },
        }
    }

    fn publish_due(&self, now: u64, state_changed: bool) -> bool {
        if state_changed || self.frame_received {
            return true;
        }
        self.last_publish_ms.is_none_or(|last| {
            now.saturating_sub(last) >= u64::from(self.ctx.config.polling_interval_ms)
        })
    }

    // ── Persistence ───────────────────────────────────────────

    /// Write consumption counters now (e.g. before a planned restart).
    pub fn flush_consumption(
        &mut self,
        storage: &mut impl StoragePort,
        now_ms: u64,
    ) -> crate::error::Result<()> {
        self.accumulator.flush(&self.counters, storage, now_ms)?;
        Ok(())
    }

    fn mark_config_dirty(&mut self) {
        if !self.config_dirty {
            self.config_dirty = true;
            self.dirty_since_tick = self.tick_count;
        }
    }

    /// Persist config once it has been unchanged for a few seconds.
    /// Returns `true` if the config was saved.
    pub fn auto_save_if_needed(&mut self, storage: &impl ConfigPort) -> bool {
        if !self.config_dirty {
            return false;
        }
        let ticks_since_dirty = self.tick_count.saturating_sub(self.dirty_since_tick);
        if (ticks_since_dirty as f32 * self.tick_secs) < CONFIG_SAVE_DELAY_SECS {
            return false;
        }
        match storage.save(&self.ctx.config) {
            Ok(()) => {
                self.config_dirty = false;
                info!("Config auto-saved");
                true
            }
            Err(e) => {
                warn!("Config auto-save failed: {}", e);
                false
            }
        }
    }

    pub fn is_config_dirty(&self) -> bool {
        self.config_dirty
    }
}

/// Position on the consumption time line: local calendar seconds when the
/// wall clock is synced, uptime seconds otherwise.
fn clock_position(clock: &impl ClockPort) -> ClockPosition {
    match clock.local_time() {
        Some(local) => ClockPosition::calendar(local.and_utc().timestamp()),
        None => ClockPosition::uptime((clock.uptime_ms() / 1000) as i64),
    }
}

/// Snap a power request to the configured step, within 10–100 %.
fn snap_power(percent: u8, step: u8) -> u8 {
    let step = step.max(1);
    let snapped = (f32::from(percent) / f32::from(step)).round() * f32::from(step);
    (snapped as u32).clamp(10, 100) as u8
}
