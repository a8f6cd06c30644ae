//! Vevor heater serial protocol.
//!
//! The heater and its controller share a half-duplex UART line.  Every
//! frame starts with `0xAA`, followed by a device id, a command byte, a
//! payload length and a single-byte additive checksum:
//!
//! ```text
//! ┌──────┬────────┬─────────┬────────┬──────────────┬──────────┐
//! │ 0xAA │ dev id │ command │ length │ payload (..) │ checksum │
//! └──────┴────────┴─────────┴────────┴──────────────┴──────────┘
//!   0      1        2         3        4..n-1         n-1
//! ```
//!
//! Total frame size is `length + 5`.  The controller (`0x66`) sends 16-byte
//! frames, the heater (`0x77`) answers with 56-byte telemetry frames.  Since
//! the line is shared, our own frames are echoed back and must be skipped.

pub mod codec;

use core::fmt;

use serde::{Deserialize, Serialize};

/// Start-of-frame marker.
pub const FRAME_START: u8 = 0xAA;
/// Device id used by the controller (us).
pub const CONTROLLER_ID: u8 = 0x66;
/// Device id used by the heater.
pub const HEATER_ID: u8 = 0x77;
/// Length byte of a controller frame.
pub const CONTROLLER_LENGTH: u8 = 0x0B;
/// Length byte of a heater telemetry frame.
pub const HEATER_LENGTH: u8 = 0x33;
/// Bytes on the wire for a controller frame.
pub const CONTROLLER_FRAME_SIZE: usize = CONTROLLER_LENGTH as usize + 5;
/// Bytes on the wire for a heater telemetry frame.
pub const HEATER_FRAME_SIZE: usize = HEATER_LENGTH as usize + 5;

// ---------------------------------------------------------------------------
// Heater-reported state
// ---------------------------------------------------------------------------

/// Operating state as reported by the heater in byte 5 of its frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeaterState {
    Off,
    /// Glow plug preheating / state negotiation after a start request.
    GlowPlugPreheat,
    HeatingUp,
    StableCombustion,
    /// Post-purge: fuel stopped, fan still cooling the chamber.
    StoppingCooling,
    /// A state byte this firmware does not recognise.
    Unknown(u8),
}

impl HeaterState {
    pub const fn from_raw(raw: u8) -> Self {
        match raw {
            0x00 => Self::Off,
            0x01 => Self::GlowPlugPreheat,
            0x02 => Self::HeatingUp,
            0x03 => Self::StableCombustion,
            0x04 => Self::StoppingCooling,
            other => Self::Unknown(other),
        }
    }

    pub const fn to_raw(self) -> u8 {
        match self {
            Self::Off => 0x00,
            Self::GlowPlugPreheat => 0x01,
            Self::HeatingUp => 0x02,
            Self::StableCombustion => 0x03,
            Self::StoppingCooling => 0x04,
            Self::Unknown(raw) => raw,
        }
    }

    /// Fuel is being burnt (heating up or stable flame).
    pub const fn is_combustion(self) -> bool {
        matches!(self, Self::HeatingUp | Self::StableCombustion)
    }

    /// Anything other than a quiet, cold heater.
    pub const fn is_active(self) -> bool {
        !matches!(self, Self::Off)
    }

    /// Human-readable state text exposed to the host platform.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Off => "Off",
            Self::GlowPlugPreheat => "Getting state",
            Self::HeatingUp => "Heating Up",
            Self::StableCombustion => "Stable Combustion",
            Self::StoppingCooling => "Stopping/Cooling",
            Self::Unknown(_) => "Unknown",
        }
    }
}

impl fmt::Display for HeaterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(raw) => write!(f, "Unknown(0x{raw:02X})"),
            other => f.write_str(other.as_str()),
        }
    }
}

// ---------------------------------------------------------------------------
// Decoded telemetry
// ---------------------------------------------------------------------------

/// All values carried by one heater telemetry frame, already scaled to
/// engineering units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeaterReport {
    pub heater_state: HeaterState,
    /// 10–100 in steps of 10 (0 if the heater reports no level).
    pub power_level_percent: u8,
    pub input_voltage: f32,
    pub glow_plug_current_amps: f32,
    /// Heater's own "cooling down" flag.
    pub cooling_flag: bool,
    pub heat_exchanger_temp_c: f32,
    pub state_duration_secs: u16,
    pub pump_frequency_hz: f32,
    pub fan_speed_rpm: u16,
}

impl Default for HeaterReport {
    fn default() -> Self {
        Self {
            heater_state: HeaterState::Off,
            power_level_percent: 0,
            input_voltage: 0.0,
            glow_plug_current_amps: 0.0,
            cooling_flag: false,
            heat_exchanger_temp_c: 0.0,
            state_duration_secs: 0,
            pump_frequency_hz: 0.0,
            fan_speed_rpm: 0,
        }
    }
}

/// A successfully framed inbound message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InboundFrame {
    /// Telemetry from the heater.
    Telemetry(HeaterReport),
    /// Our own controller frame reflected by the shared line.
    Echo,
}

// ---------------------------------------------------------------------------
// Outbound commands
// ---------------------------------------------------------------------------

/// Commands the controller can put on the wire.
///
/// Every controller frame carries a power level, so every variant does too.
/// Consumption reset has no opcode: it is a local counter operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaterCommand {
    /// Ignite the heater.
    PowerOn { power_percent: u8 },
    /// Stop fuel and begin the post-purge cycle.
    PowerOff { power_percent: u8 },
    /// Keep running at the given power (also a keep-alive).
    SetPower { power_percent: u8 },
    /// Idle status poll.
    Status { power_percent: u8 },
}

impl HeaterCommand {
    pub const fn power_percent(self) -> u8 {
        match self {
            Self::PowerOn { power_percent }
            | Self::PowerOff { power_percent }
            | Self::SetPower { power_percent }
            | Self::Status { power_percent } => power_percent,
        }
    }

    /// Command byte (frame offset 2).
    pub const fn opcode(self) -> u8 {
        match self {
            Self::PowerOn { .. } | Self::PowerOff { .. } => 0x06,
            Self::SetPower { .. } | Self::Status { .. } => 0x02,
        }
    }

    /// Requested-state byte (frame offset 9).
    pub const fn requested_state(self) -> u8 {
        match self {
            Self::PowerOn { .. } => 0x06,
            Self::PowerOff { .. } => 0x05,
            Self::SetPower { .. } => 0x08,
            Self::Status { .. } => 0x02,
        }
    }
}

/// Convert a 10–100 % request into the heater's 1–10 level scale.
pub fn power_level_from_percent(percent: u8) -> u8 {
    ((f32::from(percent) / 10.0).round() as u8).clamp(1, 10)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Recoverable framing / integrity errors.  Never fatal: the offending
/// bytes are skipped and decoding resumes at the next start marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Leading byte is not `0xAA`.
    NoFrameStart(u8),
    /// Device id is neither controller nor heater.
    UnknownDevice(u8),
    /// Length byte matches no known frame type.
    UnknownLength(u8),
    /// Device id and length byte disagree.
    LengthMismatch { device: u8, length: u8 },
    ChecksumMismatch { expected: u8, actual: u8 },
    /// A partial frame sat in the receive buffer for too long.
    PartialFrameTimeout,
    /// Receive buffer overflowed; buffered bytes were dropped.
    BufferOverflow,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoFrameStart(b) => write!(f, "no frame start (got 0x{b:02X})"),
            Self::UnknownDevice(b) => write!(f, "unknown device id 0x{b:02X}"),
            Self::UnknownLength(b) => write!(f, "unknown frame length 0x{b:02X}"),
            Self::LengthMismatch { device, length } => {
                write!(f, "device 0x{device:02X} with length 0x{length:02X}")
            }
            Self::ChecksumMismatch { expected, actual } => {
                write!(f, "checksum mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")
            }
            Self::PartialFrameTimeout => write!(f, "partial frame timed out"),
            Self::BufferOverflow => write!(f, "receive buffer overflow"),
        }
    }
}
