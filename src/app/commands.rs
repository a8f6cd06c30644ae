//! Inbound intents to the application service.
//!
//! The outside world (host platform controls, an external temperature
//! sensor) never mutates controller state directly.  It pushes an
//! [`AppCommand`] into the [`IntentQueue`], and the
//! [`AppService`](super::service::AppService) drains the queue at the start
//! of the next tick.

use heapless::Deque;
use log::warn;

use crate::config::ControlMode;

/// Maximum number of intents buffered between two ticks.
pub const INTENT_QUEUE_CAPACITY: usize = 16;

/// Requested changes from external adapters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AppCommand {
    /// Power switch.
    SetPower(bool),
    /// Power-level number (10–100 %), snapped to the configured step.
    SetPowerLevel(u8),
    SetControlMode(ControlMode),
    /// Fuel calibration (ml per pump stroke, 0.001–1.0).
    SetInjectedPerPulse(f32),
    ResetTotalConsumption,
    ResetDailyConsumption,
    /// Thermostat setpoint (°C), clamped to the configured range.
    SetTargetTemperature(f32),
    /// Latest room temperature from an external sensor (`None` = lost).
    ExternalTemperature(Option<f32>),
}

/// Bounded FIFO of pending intents.
#[derive(Debug, Default)]
pub struct IntentQueue {
    queue: Deque<AppCommand, INTENT_QUEUE_CAPACITY>,
    rejected: u32,
}

impl IntentQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an intent.  When full the intent is dropped and `false` is
    /// returned.
    pub fn push(&mut self, command: AppCommand) -> bool {
        match self.queue.push_back(command) {
            Ok(()) => true,
            Err(cmd) => {
                self.rejected = self.rejected.saturating_add(1);
                warn!("Intent queue full, dropping {:?}", cmd);
                false
            }
        }
    }

    /// Oldest queued intent.
    pub fn pop(&mut self) -> Option<AppCommand> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn rejected(&self) -> u32 {
        self.rejected
    }
}
