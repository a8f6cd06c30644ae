//! Shared mutable context threaded through every FSM handler.
//!
//! `FsmContext` is the single struct that state handlers read from and
//! write to: this tick's heater inputs, the control-policy demand, the
//! resulting [`ControllerState`], configuration and accumulated safety
//! faults.  Think of it as the "blackboard" in a blackboard architecture.

use serde::Serialize;

use super::StateId;
use crate::config::{ControlMode, HeaterConfig};
use crate::control::Demand;
use crate::protocol::HeaterState;

// ---------------------------------------------------------------------------
// Heater inputs (read-only to state handlers; written by the service)
// ---------------------------------------------------------------------------

/// What fresh telemetry says this tick.  Both fields are `None` when no
/// frame arrived within the freshness window.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HeaterInputs {
    pub voltage: Option<f32>,
    pub heater_state: Option<HeaterState>,
}

// ---------------------------------------------------------------------------
// Controller state (written by state handlers; consumed by dispatch)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ControllerState {
    pub state: StateId,
    /// Effective on-request after safety gating.
    pub desired_on: bool,
    /// Power sent with start / keepalive commands (10–100 %).
    pub requested_power_percent: u8,
    pub low_voltage_fault: bool,
    /// A start was requested but supply voltage is below the start minimum.
    pub start_inhibited: bool,
    pub cooling_down: bool,
    pub active_control_mode: ControlMode,
}

impl ControllerState {
    fn new(config: &HeaterConfig) -> Self {
        Self {
            state: StateId::Off,
            desired_on: false,
            requested_power_percent: config.default_power_percent.clamp(10, 100),
            low_voltage_fault: false,
            start_inhibited: false,
            cooling_down: false,
            active_control_mode: config.control_mode,
        }
    }
}

// ---------------------------------------------------------------------------
// FsmContext
// ---------------------------------------------------------------------------

pub struct FsmContext {
    // -- Timing --
    /// Ticks elapsed since the current state was entered.
    pub ticks_in_state: u64,
    /// Monotonic total tick count.
    pub total_ticks: u64,
    /// Duration of one tick in seconds.
    pub tick_period_secs: f32,

    // -- Inputs --
    pub heater: HeaterInputs,
    /// Demand from the active control policy.
    pub demand: Demand,

    // -- Outputs --
    pub controller: ControllerState,

    // -- Configuration --
    pub config: HeaterConfig,

    // -- Safety --
    /// Accumulated safety fault bitmask (see `SafetyFault::mask()`).
    /// Set by the safety supervisor, read by state handlers.
    pub fault_flags: u8,
}

impl FsmContext {
    pub fn new(config: HeaterConfig) -> Self {
        Self {
            ticks_in_state: 0,
            total_ticks: 0,
            tick_period_secs: config.update_interval_ms as f32 / 1000.0,
            heater: HeaterInputs::default(),
            demand: crate::control::Demand::off(config.default_power_percent),
            controller: ControllerState::new(&config),
            config,
            fault_flags: 0,
        }
    }

    /// Install this tick's demand; power is clamped to the heater's range.
    pub fn set_demand(&mut self, demand: Demand, mode: ControlMode) {
        self.demand = demand;
        self.controller.requested_power_percent = demand.power_percent.clamp(10, 100);
        self.controller.active_control_mode = mode;
    }

    /// Seconds elapsed since the current state was entered.
    pub fn secs_in_state(&self) -> f32 {
        self.ticks_in_state as f32 * self.tick_period_secs
    }

    /// Returns `true` if **any** safety fault is active.
    pub fn has_faults(&self) -> bool {
        self.fault_flags != 0
    }

    /// Check whether a specific fault flag is set.
    pub fn has_fault(&self, fault: crate::error::SafetyFault) -> bool {
        self.fault_flags & fault.mask() != 0
    }

    /// The heater reported a state byte we do not understand.
    pub fn anomaly(&self) -> bool {
        matches!(self.heater.heater_state, Some(HeaterState::Unknown(_)))
    }

    pub fn heater_reports(&self, state: HeaterState) -> bool {
        self.heater.heater_state == Some(state)
    }

    pub fn heater_in_combustion(&self) -> bool {
        self.heater.heater_state.is_some_and(HeaterState::is_combustion)
    }

    /// Recompute `desired_on` from the demand and the safety gates.
    pub fn refresh_desired_on(&mut self) {
        self.controller.desired_on =
            self.demand.start && !self.has_faults() && !self.controller.start_inhibited;
    }
}
