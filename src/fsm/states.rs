//! Concrete state handler functions and table builder.
//!
//! ```text
//!  OFF ──[start, V ≥ start]──▶ STARTING ──[combustion]──▶ RUNNING
//!   ▲ ▲                            │                         │
//!   │ │                          [stop]                    [stop]
//!   │ │                            ▼                         │
//!   │ └──────[heater Off]──── COOLING_DOWN ◀─────────────────┘
//!   │                              ▲
//!   │                   [heater burning, no start] (from OFF)
//!   │
//!   └──[V ≥ start]── FAULT_LOW_VOLTAGE ◀──[V < operate]── any non-Off state
//! ```
//!
//! Every non-Off update handler checks the fault mask first.  An unknown
//! heater state byte freezes all other transitions for the tick.

use super::context::FsmContext;
use super::{StateDescriptor, StateId};
use crate::protocol::HeaterState;
use log::{info, warn};

// ═══════════════════════════════════════════════════════════════════════════
//  Table builder
// ═══════════════════════════════════════════════════════════════════════════

/// Build the static state table.  Called once at startup.
pub fn build_state_table() -> [StateDescriptor; StateId::COUNT] {
    [
        // Index 0 — Off
        StateDescriptor {
            id: StateId::Off,
            name: "Off",
            on_enter: Some(off_enter),
            on_exit: Some(off_exit),
            on_update: off_update,
        },
        // Index 1 — Starting
        StateDescriptor {
            id: StateId::Starting,
            name: "Starting",
            on_enter: Some(starting_enter),
            on_exit: None,
            on_update: starting_update,
        },
        // Index 2 — Running
        StateDescriptor {
            id: StateId::Running,
            name: "Running",
            on_enter: Some(running_enter),
            on_exit: Some(running_exit),
            on_update: running_update,
        },
        // Index 3 — CoolingDown
        StateDescriptor {
            id: StateId::CoolingDown,
            name: "CoolingDown",
            on_enter: Some(cooling_enter),
            on_exit: Some(cooling_exit),
            on_update: cooling_update,
        },
        // Index 4 — FaultLowVoltage
        StateDescriptor {
            id: StateId::FaultLowVoltage,
            name: "FaultLowVoltage",
            on_enter: Some(fault_enter),
            on_exit: Some(fault_exit),
            on_update: fault_update,
        },
    ]
}

// ═══════════════════════════════════════════════════════════════════════════
//  OFF
// ═══════════════════════════════════════════════════════════════════════════

fn off_enter(ctx: &mut FsmContext) {
    ctx.controller.cooling_down = false;
    info!("OFF: heater idle, polling status");
}

fn off_exit(ctx: &mut FsmContext) {
    ctx.controller.start_inhibited = false;
}

fn off_update(ctx: &mut FsmContext) -> Option<StateId> {
    // Start voltage gate.  Evaluated even during an anomaly so that the
    // inhibit flag always reflects the latest voltage.
    let inhibited = ctx.demand.start
        && ctx
            .heater
            .voltage
            .is_some_and(|v| v.is_nan() || v < ctx.config.min_voltage_start);
    if inhibited && !ctx.controller.start_inhibited {
        warn!(
            "OFF: start refused, supply {:.1} V below {:.1} V",
            ctx.heater.voltage.unwrap_or_default(),
            ctx.config.min_voltage_start
        );
    }
    ctx.controller.start_inhibited = inhibited;

    if ctx.anomaly() {
        return None;
    }
    let heater = ctx.heater.heater_state?;

    if ctx.demand.start {
        if inhibited || ctx.heater.voltage.is_none() {
            return None;
        }
        if heater == HeaterState::StoppingCooling {
            // Heater is still purging from its last run.
            return None;
        }
        return Some(StateId::Starting);
    }

    if heater.is_combustion() {
        info!("OFF: heater reports {} without a request, stopping it", heater);
        return Some(StateId::CoolingDown);
    }

    None
}

// ═══════════════════════════════════════════════════════════════════════════
//  STARTING — power-on sent, waiting for the flame
// ═══════════════════════════════════════════════════════════════════════════

fn starting_enter(ctx: &mut FsmContext) {
    info!(
        "STARTING: ignition requested at {}%",
        ctx.controller.requested_power_percent
    );
}

fn starting_update(ctx: &mut FsmContext) -> Option<StateId> {
    if ctx.has_faults() {
        return Some(StateId::FaultLowVoltage);
    }
    if ctx.anomaly() {
        return None;
    }

    if !ctx.demand.start {
        info!("STARTING: stop requested before combustion");
        return Some(StateId::CoolingDown);
    }

    if ctx.heater_in_combustion() {
        info!("STARTING: combustion after {:.0}s", ctx.secs_in_state());
        return Some(StateId::Running);
    }

    None
}

// ═══════════════════════════════════════════════════════════════════════════
//  RUNNING — stable heating, keepalive with requested power
// ═══════════════════════════════════════════════════════════════════════════

fn running_enter(ctx: &mut FsmContext) {
    info!(
        "RUNNING: holding {}%",
        ctx.controller.requested_power_percent
    );
}

fn running_exit(ctx: &mut FsmContext) {
    info!("RUNNING: leaving after {} ticks", ctx.ticks_in_state);
}

fn running_update(ctx: &mut FsmContext) -> Option<StateId> {
    if ctx.has_faults() {
        return Some(StateId::FaultLowVoltage);
    }
    if ctx.anomaly() {
        return None;
    }

    if !ctx.demand.start {
        return Some(StateId::CoolingDown);
    }

    None
}

// ═══════════════════════════════════════════════════════════════════════════
//  COOLING_DOWN — power-off sent, heater purging
// ═══════════════════════════════════════════════════════════════════════════

fn cooling_enter(ctx: &mut FsmContext) {
    ctx.controller.cooling_down = true;
    info!("COOLING_DOWN: power-off requested, waiting for purge");
}

fn cooling_exit(ctx: &mut FsmContext) {
    ctx.controller.cooling_down = false;
}

fn cooling_update(ctx: &mut FsmContext) -> Option<StateId> {
    if ctx.has_faults() {
        return Some(StateId::FaultLowVoltage);
    }
    if ctx.anomaly() {
        return None;
    }

    if ctx.heater_reports(HeaterState::Off) {
        info!("COOLING_DOWN: purge complete");
        return Some(StateId::Off);
    }

    None
}

// ═══════════════════════════════════════════════════════════════════════════
//  FAULT_LOW_VOLTAGE — heater forced off until voltage recovers
// ═══════════════════════════════════════════════════════════════════════════

fn fault_enter(ctx: &mut FsmContext) {
    ctx.controller.low_voltage_fault = true;
    ctx.controller.desired_on = false;
    warn!(
        "FAULT: heater forced off, fault_flags=0b{:08b}",
        ctx.fault_flags
    );
}

fn fault_exit(ctx: &mut FsmContext) {
    ctx.controller.low_voltage_fault = false;
    info!("FAULT: voltage recovered, resuming normal operation");
}

fn fault_update(ctx: &mut FsmContext) -> Option<StateId> {
    if ctx.anomaly() {
        return None;
    }

    // Stay until ALL faults are cleared.
    if !ctx.has_faults() {
        return Some(StateId::Off);
    }

    None
}
