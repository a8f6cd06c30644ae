//! Antifreeze tier selection.
//!
//! ```text
//!   temp:  ──── on ──── medium ──── low ──── off ────▶
//!   tier:  High │ Medium │   Low    │ (hold) │  Off
//! ```
//!
//! Between `temp_low` and `temp_off` a running heater stays on low power
//! but an idle heater is not started.  Moving to a higher tier while
//! running needs the temperature [`STEP_UP_MARGIN_C`] below that tier's
//! upper bound; moving to a lower tier is immediate.

use crate::config::AntifreezeConfig;

/// Extra drop required before stepping up a tier while running (°C).
pub const STEP_UP_MARGIN_C: f32 = 0.4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AntifreezeTier {
    Off,
    Low,
    Medium,
    High,
}

impl AntifreezeTier {
    /// Configured power for this tier, `None` for [`AntifreezeTier::Off`].
    pub fn power_percent(self, cfg: &AntifreezeConfig) -> Option<u8> {
        match self {
            Self::Off => None,
            Self::Low => Some(cfg.power_low_percent),
            Self::Medium => Some(cfg.power_medium_percent),
            Self::High => Some(cfg.power_high_percent),
        }
    }

    fn down(self) -> Self {
        match self {
            Self::High => Self::Medium,
            Self::Medium => Self::Low,
            Self::Low | Self::Off => Self::Off,
        }
    }

    /// Temperature below which this tier applies.
    fn upper_bound(self, cfg: &AntifreezeConfig) -> f32 {
        match self {
            Self::High => cfg.temp_on,
            Self::Medium => cfg.temp_medium,
            Self::Low => cfg.temp_low,
            Self::Off => f32::INFINITY,
        }
    }
}

/// Pick the tier for `temp_c` given the tier currently in effect
/// (`Off` when the heater is not running under antifreeze).
pub fn select_tier(temp_c: f32, cfg: &AntifreezeConfig, previous: AntifreezeTier) -> AntifreezeTier {
    if temp_c >= cfg.temp_off {
        return AntifreezeTier::Off;
    }

    let base = if temp_c < cfg.temp_on {
        AntifreezeTier::High
    } else if temp_c < cfg.temp_medium {
        AntifreezeTier::Medium
    } else if temp_c < cfg.temp_low {
        AntifreezeTier::Low
    } else if previous == AntifreezeTier::Off {
        // Hold band: no fresh start.
        AntifreezeTier::Off
    } else {
        AntifreezeTier::Low
    };

    if previous == AntifreezeTier::Off || base <= previous {
        return base;
    }

    let mut tier = base;
    while tier > previous && temp_c >= tier.upper_bound(cfg) - STEP_UP_MARGIN_C {
        tier = tier.down();
    }
    tier.max(previous)
}
