//! Thermostat demand for automatic mode.
//!
//! Two-point hysteresis around the target with a power level proportional
//! to the temperature deficit.  A separate slew limiter keeps the running
//! heater from chasing every small fluctuation.

/// Smallest power the heater accepts (%).
pub const MIN_POWER_PERCENT: u8 = 10;
/// Largest power the heater accepts (%).
pub const MAX_POWER_PERCENT: u8 = 100;
/// Largest single power adjustment while running (%).
pub const MAX_POWER_STEP_PERCENT: u8 = 10;
/// Gaps at or below this are ignored by the slew limiter (%).
pub const POWER_DEADBAND_PERCENT: u8 = 5;

/// Output of [`compute_demand`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClimateDemand {
    pub start: bool,
    pub power_percent: u8,
}

/// Decide whether to heat and how hard.
///
/// Heating starts below `target − h/2` and stops at or above `target + h/2`;
/// in between the previous decision holds.
pub fn compute_demand(
    current_c: f32,
    target_c: f32,
    hysteresis_c: f32,
    previous_on: bool,
    power_per_degree: f32,
) -> ClimateDemand {
    let half = hysteresis_c / 2.0;
    let start = if current_c < target_c - half {
        true
    } else if current_c >= target_c + half {
        false
    } else {
        previous_on
    };

    let deficit = (target_c - current_c).max(0.0);
    ClimateDemand {
        start,
        power_percent: clamp_power(deficit * power_per_degree),
    }
}

/// Clamp an arbitrary power figure into the heater's accepted range.
pub fn clamp_power(percent: f32) -> u8 {
    if percent.is_nan() {
        return MIN_POWER_PERCENT;
    }
    percent
        .round()
        .clamp(f32::from(MIN_POWER_PERCENT), f32::from(MAX_POWER_PERCENT)) as u8
}

/// Move `current` toward `desired` by at most one step.
///
/// Returns `current` unchanged when the gap is within the deadband.
pub fn slew_power(current: u8, desired: u8) -> u8 {
    let gap = desired.abs_diff(current);
    if gap <= POWER_DEADBAND_PERCENT {
        return current;
    }
    let step = gap.min(MAX_POWER_STEP_PERCENT);
    let next = if desired > current {
        current.saturating_add(step)
    } else {
        current.saturating_sub(step)
    };
    next.clamp(MIN_POWER_PERCENT, MAX_POWER_PERCENT)
}
