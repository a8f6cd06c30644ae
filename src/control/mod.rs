//! Control-mode policies.
//!
//! Every mode is a variant of [`ControlPolicy`] and is turned into the same
//! [`Demand`] by [`ControlLoop::evaluate`], which the state machine then
//! consumes.  Per-mode memory (thermostat latch, antifreeze tier, slew
//! timer) lives in [`ControlLoop`] and is dropped when the mode changes.

pub mod antifreeze;
pub mod climate;

use log::{info, warn};

use crate::config::{ControlMode, HeaterConfig};
use antifreeze::AntifreezeTier;

/// What the active policy asks of the heater this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Demand {
    pub start: bool,
    /// Requested power, always within 10–100 %.
    pub power_percent: u8,
}

impl Demand {
    pub const fn off(power_percent: u8) -> Self {
        Self {
            start: false,
            power_percent,
        }
    }
}

/// Mode plus the inputs that mode needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlPolicy {
    /// Power switch and power-level number.
    Manual { switch_on: bool, power_percent: u8 },
    /// Thermostat around `target_c`.
    Automatic {
        room_temp_c: Option<f32>,
        target_c: f32,
    },
    /// Tiered frost protection.
    Antifreeze { room_temp_c: Option<f32> },
}

impl ControlPolicy {
    pub const fn mode(&self) -> ControlMode {
        match self {
            Self::Manual { .. } => ControlMode::Manual,
            Self::Automatic { .. } => ControlMode::Automatic,
            Self::Antifreeze { .. } => ControlMode::Antifreeze,
        }
    }
}

/// Stateful evaluator for [`ControlPolicy`].
#[derive(Debug, Default)]
pub struct ControlLoop {
    mode: Option<ControlMode>,
    thermostat_on: bool,
    auto_power: Option<u8>,
    last_adjust_ms: u64,
    tier: Option<AntifreezeTier>,
    missing_temp_warned: bool,
}

impl ControlLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute this tick's demand.
    ///
    /// `running` is true while the heater is under our control and burning
    /// (state machine in `Starting` or `Running`).
    pub fn evaluate(
        &mut self,
        policy: &ControlPolicy,
        config: &HeaterConfig,
        running: bool,
        now_ms: u64,
    ) -> Demand {
        let mode = policy.mode();
        if self.mode != Some(mode) {
            if self.mode.is_some() {
                info!("Control: mode changed to {}", mode);
            }
            *self = Self {
                mode: Some(mode),
                ..Self::default()
            };
        }
        if !running {
            self.auto_power = None;
        }

        match *policy {
            ControlPolicy::Manual {
                switch_on,
                power_percent,
            } => Demand {
                start: switch_on,
                power_percent: climate::clamp_power(f32::from(power_percent)),
            },

            ControlPolicy::Automatic {
                room_temp_c,
                target_c,
            } => {
                let Some(temp) = self.require_temperature(room_temp_c, mode) else {
                    self.thermostat_on = false;
                    return Demand::off(config.default_power_percent);
                };
                let c = &config.climate;
                let d = climate::compute_demand(
                    temp,
                    target_c,
                    c.hysteresis_c,
                    self.thermostat_on,
                    c.power_per_degree,
                );
                self.thermostat_on = d.start;
                let power = self.slewed_power(d.power_percent, running, now_ms, c.power_adjust_interval_secs);
                Demand {
                    start: d.start,
                    power_percent: power,
                }
            }

            ControlPolicy::Antifreeze { room_temp_c } => {
                let Some(temp) = self.require_temperature(room_temp_c, mode) else {
                    self.tier = None;
                    return Demand::off(config.default_power_percent);
                };
                let previous = if running {
                    self.tier.unwrap_or(AntifreezeTier::Off)
                } else {
                    AntifreezeTier::Off
                };
                let tier = antifreeze::select_tier(temp, &config.antifreeze, previous);
                if Some(tier) != self.tier {
                    info!("Antifreeze: {:.1} °C -> {:?}", temp, tier);
                }
                self.tier = Some(tier);
                match tier.power_percent(&config.antifreeze) {
                    Some(p) => Demand {
                        start: true,
                        power_percent: climate::clamp_power(f32::from(p)),
                    },
                    None => Demand::off(config.default_power_percent),
                }
            }
        }
    }

    /// Antifreeze tier currently in effect, if in antifreeze mode.
    pub fn antifreeze_tier(&self) -> Option<AntifreezeTier> {
        self.tier
    }

    fn require_temperature(&mut self, temp: Option<f32>, mode: ControlMode) -> Option<f32> {
        match temp.filter(|t| t.is_finite()) {
            Some(t) => {
                self.missing_temp_warned = false;
                Some(t)
            }
            None => {
                if !self.missing_temp_warned {
                    warn!("{} mode needs a room temperature, holding heater off", mode);
                    self.missing_temp_warned = true;
                }
                None
            }
        }
    }

    fn slewed_power(&mut self, desired: u8, running: bool, now_ms: u64, interval_secs: u32) -> u8 {
        let Some(current) = self.auto_power.filter(|_| running) else {
            self.auto_power = Some(desired);
            self.last_adjust_ms = now_ms;
            return desired;
        };
        let interval_ms = u64::from(interval_secs) * 1000;
        if now_ms.saturating_sub(self.last_adjust_ms) < interval_ms {
            return current;
        }
        let next = climate::slew_power(current, desired);
        if next != current {
            info!("Automatic: power {}% -> {}% (demand {}%)", current, next, desired);
            self.last_adjust_ms = now_ms;
        }
        self.auto_power = Some(next);
        next
    }
}
