//! Safety supervisor.
//!
//! The supervisor runs **every tick before the FSM** and maintains a fault
//! bitmask that is copied into `FsmContext.fault_flags`.  Every non-Off
//! state handler checks this mask first and transitions to
//! `FaultLowVoltage` when any bit is set.
//!
//! ## Fault lifecycle
//!
//! 1. Supply voltage drops below `min_voltage_operate` while the state
//!    machine is in any non-Off state.
//! 2. The supervisor latches [`SafetyFault::LowVoltage`].
//! 3. The FSM enters `FaultLowVoltage`; the heater is commanded off.
//! 4. The bit is released only once voltage reaches `min_voltage_start`.
//!    Voltage between the two thresholds keeps the latch.
//! 5. With the mask clear, `FaultLowVoltage` returns to `Off`.
//!
//! Without a fresh voltage reading the latch holds its last value.

use crate::config::HeaterConfig;
use crate::error::SafetyFault;
use log::{error, info};

pub struct SafetySupervisor {
    min_voltage_start: f32,
    min_voltage_operate: f32,
    /// Latched fault bitmask.
    faults: u8,
}

impl SafetySupervisor {
    pub fn new(config: &HeaterConfig) -> Self {
        Self {
            min_voltage_start: config.min_voltage_start,
            min_voltage_operate: config.min_voltage_operate,
            faults: 0,
        }
    }

    /// Evaluate the supply voltage.  `controller_active` is true whenever
    /// the state machine is outside `Off`.  Returns the updated bitmask.
    pub fn evaluate(&mut self, voltage: Option<f32>, controller_active: bool) -> u8 {
        let Some(v) = voltage else {
            return self.faults;
        };

        // NaN compares false everywhere: treated as "no evidence".
        self.latch_fault(
            SafetyFault::LowVoltage,
            controller_active && v < self.min_voltage_operate,
            v >= self.min_voltage_start,
            v,
        );

        self.faults
    }

    /// Current fault bitmask.
    pub fn faults(&self) -> u8 {
        self.faults
    }

    /// True if **any** fault is active.
    pub fn has_faults(&self) -> bool {
        self.faults != 0
    }

    /// Check if a specific fault is active.
    pub fn has_fault(&self, fault: SafetyFault) -> bool {
        self.faults & fault.mask() != 0
    }

    // ── Internal ──────────────────────────────────────────────────

    /// Set the bit on `set`, clear it on `clear`, otherwise hold.
    fn latch_fault(&mut self, fault: SafetyFault, set: bool, clear: bool, voltage: f32) {
        if set {
            if self.faults & fault.mask() == 0 {
                error!(
                    "SAFETY FAULT SET: {fault} ({voltage:.1} V < {:.1} V)",
                    self.min_voltage_operate
                );
            }
            self.faults |= fault.mask();
        } else if clear {
            if self.faults & fault.mask() != 0 {
                info!(
                    "SAFETY FAULT CLEARED: {fault} ({voltage:.1} V >= {:.1} V)",
                    self.min_voltage_start
                );
            }
            self.faults &= !fault.mask();
        }
    }
}
