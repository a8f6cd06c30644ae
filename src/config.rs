//! Heater controller configuration.
//!
//! All tunable parameters for the controller.  Values are loaded from NVS at
//! boot (falling back to [`HeaterConfig::default`]) and must pass
//! [`HeaterConfig::validate`] before they are used or persisted.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::app::ports::ConfigError;

/// Policy that decides whether the heater should run and at what power.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ControlMode {
    /// Power switch and power-level number drive the heater directly.
    #[default]
    Manual,
    /// Thermostat on a room temperature and a target setpoint.
    Automatic,
    /// Keep a space above freezing using four temperature tiers.
    Antifreeze,
}

impl ControlMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "Manual",
            Self::Automatic => "Automatic",
            Self::Antifreeze => "Antifreeze",
        }
    }
}

impl fmt::Display for ControlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where automatic / antifreeze modes read the room temperature from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TemperatureSource {
    /// External sensor reading pushed in by the host platform.
    #[default]
    External,
    /// The heater's own heat-exchanger temperature.
    HeatExchanger,
}

/// Antifreeze tier thresholds (°C) and tier powers (%).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AntifreezeConfig {
    /// Below this: high power.
    pub temp_on: f32,
    /// Below this: medium power.
    pub temp_medium: f32,
    /// Below this: low power.
    pub temp_low: f32,
    /// At or above this: off.
    pub temp_off: f32,
    pub power_high_percent: u8,
    pub power_medium_percent: u8,
    pub power_low_percent: u8,
}

impl Default for AntifreezeConfig {
    fn default() -> Self {
        Self {
            temp_on: 2.0,
            temp_medium: 6.0,
            temp_low: 8.0,
            temp_off: 9.0,
            power_high_percent: 80,
            power_medium_percent: 50,
            power_low_percent: 20,
        }
    }
}

/// Thermostat parameters for automatic mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClimateConfig {
    pub target_temperature_c: f32,
    pub min_temperature_c: f32,
    pub max_temperature_c: f32,
    /// Full width of the on/off band around the target.
    pub hysteresis_c: f32,
    /// Extra power per degree of deficit.
    pub power_per_degree: f32,
    /// Minimum spacing between power adjustments while running.
    pub power_adjust_interval_secs: u32,
    pub temperature_source: TemperatureSource,
}

impl Default for ClimateConfig {
    fn default() -> Self {
        Self {
            target_temperature_c: 20.0,
            min_temperature_c: 5.0,
            max_temperature_c: 35.0,
            hysteresis_c: 1.0,
            power_per_degree: 15.0,
            power_adjust_interval_secs: 20,
            temperature_source: TemperatureSource::External,
        }
    }
}

/// Core controller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaterConfig {
    // --- Control ---
    /// Control mode selected at boot.
    pub control_mode: ControlMode,
    /// Power used in manual mode when no level was set (10–100 %).
    pub default_power_percent: u8,
    /// Granularity of the power-level number.
    pub power_step_percent: u8,

    // --- Safety ---
    /// Minimum battery voltage to ignite; also the fault recovery level.
    pub min_voltage_start: f32,
    /// Below this while running the heater is shut down.
    pub min_voltage_operate: f32,

    // --- Modes ---
    pub antifreeze: AntifreezeConfig,
    pub climate: ClimateConfig,

    // --- Consumption ---
    /// Fuel delivered per dosing-pump stroke (ml).
    pub injected_ml_per_pulse: f32,

    // --- Timing ---
    /// Control loop period (milliseconds).
    pub update_interval_ms: u32,
    /// Idle poll cadence, freshness window base and rollup period (milliseconds).
    pub polling_interval_ms: u32,
    /// Resend period for an unchanged command while active (milliseconds).
    pub resend_interval_ms: u32,

    // --- Serial ---
    pub baud_rate: u32,
}

impl Default for HeaterConfig {
    fn default() -> Self {
        Self {
            control_mode: ControlMode::Manual,
            default_power_percent: 80,
            power_step_percent: 10,

            min_voltage_start: 12.3,
            min_voltage_operate: 11.4,

            antifreeze: AntifreezeConfig::default(),
            climate: ClimateConfig::default(),

            injected_ml_per_pulse: 0.022,

            update_interval_ms: 1000,    // 1 Hz
            polling_interval_ms: 60_000, // 1/min
            resend_interval_ms: 1000,

            baud_rate: 9600,
        }
    }
}

impl HeaterConfig {
    /// Range-check every field.  Invalid values are rejected, never clamped.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(10..=100).contains(&self.default_power_percent) {
            return Err(ConfigError::ValidationFailed(
                "default_power_percent must be 10–100",
            ));
        }
        if !(1..=50).contains(&self.power_step_percent) {
            return Err(ConfigError::ValidationFailed(
                "power_step_percent must be 1–50",
            ));
        }
        if !(10.0..=15.0).contains(&self.min_voltage_start) {
            return Err(ConfigError::ValidationFailed(
                "min_voltage_start must be 10.0–15.0",
            ));
        }
        if !(9.0..=14.0).contains(&self.min_voltage_operate) {
            return Err(ConfigError::ValidationFailed(
                "min_voltage_operate must be 9.0–14.0",
            ));
        }
        if self.min_voltage_operate > self.min_voltage_start {
            return Err(ConfigError::ValidationFailed(
                "min_voltage_operate must be <= min_voltage_start",
            ));
        }

        let af = &self.antifreeze;
        for t in [af.temp_on, af.temp_medium, af.temp_low, af.temp_off] {
            if !(-20.0..=30.0).contains(&t) {
                return Err(ConfigError::ValidationFailed(
                    "antifreeze thresholds must be -20–30 °C",
                ));
            }
        }
        if !(af.temp_on < af.temp_medium && af.temp_medium < af.temp_low && af.temp_low < af.temp_off)
        {
            return Err(ConfigError::ValidationFailed(
                "antifreeze thresholds must satisfy on < medium < low < off",
            ));
        }
        for p in [
            af.power_high_percent,
            af.power_medium_percent,
            af.power_low_percent,
        ] {
            if !(10..=100).contains(&p) {
                return Err(ConfigError::ValidationFailed(
                    "antifreeze tier power must be 10–100",
                ));
            }
        }

        let cl = &self.climate;
        if !(0.0..=30.0).contains(&cl.min_temperature_c) {
            return Err(ConfigError::ValidationFailed(
                "min_temperature_c must be 0–30",
            ));
        }
        if !(10.0..=50.0).contains(&cl.max_temperature_c) {
            return Err(ConfigError::ValidationFailed(
                "max_temperature_c must be 10–50",
            ));
        }
        if cl.min_temperature_c >= cl.max_temperature_c {
            return Err(ConfigError::ValidationFailed(
                "min_temperature_c must be < max_temperature_c",
            ));
        }
        if !(cl.min_temperature_c..=cl.max_temperature_c).contains(&cl.target_temperature_c) {
            return Err(ConfigError::ValidationFailed(
                "target_temperature_c must lie within min/max",
            ));
        }
        if !(0.1..=10.0).contains(&cl.hysteresis_c) {
            return Err(ConfigError::ValidationFailed(
                "hysteresis_c must be 0.1–10",
            ));
        }
        if !(1.0..=100.0).contains(&cl.power_per_degree) {
            return Err(ConfigError::ValidationFailed(
                "power_per_degree must be 1–100",
            ));
        }
        if !(1..=600).contains(&cl.power_adjust_interval_secs) {
            return Err(ConfigError::ValidationFailed(
                "power_adjust_interval_secs must be 1–600",
            ));
        }

        if !(0.001..=1.0).contains(&self.injected_ml_per_pulse) {
            return Err(ConfigError::ValidationFailed(
                "injected_ml_per_pulse must be 0.001–1.0",
            ));
        }

        if !(100..=10_000).contains(&self.update_interval_ms) {
            return Err(ConfigError::ValidationFailed(
                "update_interval_ms must be 100–10000",
            ));
        }
        if self.polling_interval_ms < self.update_interval_ms || self.polling_interval_ms > 3_600_000
        {
            return Err(ConfigError::ValidationFailed(
                "polling_interval_ms must be >= update_interval_ms and <= 3600000",
            ));
        }
        if self.resend_interval_ms < self.update_interval_ms
            || self.resend_interval_ms > self.polling_interval_ms
        {
            return Err(ConfigError::ValidationFailed(
                "resend_interval_ms must lie between update and polling interval",
            ));
        }
        if !(1200..=115_200).contains(&self.baud_rate) {
            return Err(ConfigError::ValidationFailed(
                "baud_rate must be 1200–115200",
            ));
        }
        Ok(())
    }

    /// Clamp a setpoint into the configured climate range.
    pub fn clamp_target(&self, target_c: f32) -> f32 {
        target_c.clamp(self.climate.min_temperature_c, self.climate.max_temperature_c)
    }
}
