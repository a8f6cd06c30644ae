//! Outbound application events.
//!
//! The [`AppService`](super::service::AppService) emits these through the
//! [`EventSink`](super::ports::EventSink) port.  Adapters on the other
//! side decide what to do with them (serial log, host platform entities).

use serde::Serialize;

use crate::config::ControlMode;
use crate::fsm::StateId;
use crate::protocol::DecodeError;

/// Structured events emitted by the application core.
#[derive(Debug, Clone)]
pub enum AppEvent {
    /// Observable values, published once per rollup interval and on change
    /// of controller state.
    Telemetry(Observables),

    /// The state machine moved.
    StateChanged { from: StateId, to: StateId },

    /// One or more safety faults were raised.
    FaultDetected(u8),

    /// All safety faults have been cleared.
    FaultCleared,

    /// The heater reported a state byte outside the known set.
    TelemetryAnomaly { raw_state: u8 },

    /// A received frame was discarded.
    FrameDiscarded(DecodeError),

    /// The service has started (carries initial state).
    Started(StateId),
}

/// Everything the host platform displays.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observables {
    pub controller_state: StateId,
    pub control_mode: ControlMode,
    /// Heater state text, `"Disconnected"` while telemetry is stale.
    pub state_text: &'static str,
    pub stale: bool,
    pub input_voltage: f32,
    pub power_level_percent: u8,
    pub fan_speed_rpm: u16,
    pub pump_frequency_hz: f32,
    pub glow_plug_current_amps: f32,
    pub heat_exchanger_temp_c: f32,
    pub state_duration_secs: u16,
    pub cooling_down: bool,
    pub low_voltage_error: bool,
    pub hourly_consumption_ml: f64,
    pub daily_consumption_ml: f64,
    pub total_consumption_ml: f64,
    /// Lifetime total in m³, for energy dashboards that expect gas volume.
    pub total_consumption_m3: f64,
    /// Closed buckets; `None` until the first rollover since boot.
    pub last_hour_consumption_ml: Option<f64>,
    pub last_day_consumption_ml: Option<f64>,
    pub consumption_rate_ml_per_hour: f32,
    pub fault_flags: u8,
}
