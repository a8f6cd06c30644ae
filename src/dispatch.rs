//! Command dispatcher.
//!
//! Turns the controller state into one [`HeaterCommand`] per tick and decides
//! whether it actually goes on the wire.  A command is written when its
//! encoded frame differs from the last one sent, or when the quiet period
//! has elapsed since that send.  Writes that fail are not remembered, so the
//! next tick retries.

use log::{debug, warn};

use crate::app::ports::{SerialError, SerialPort};
use crate::config::HeaterConfig;
use crate::fsm::StateId;
use crate::fsm::context::ControllerState;
use crate::protocol::codec;
use crate::protocol::{CONTROLLER_FRAME_SIZE, HeaterCommand, HeaterState};

/// Pick the command for this tick.
///
/// | controller         | heater                    | command  |
/// |--------------------|---------------------------|----------|
/// | Starting, Running  | Off                       | PowerOn  |
/// | Starting, Running  | anything else, or stale   | SetPower |
/// | CoolingDown, Fault | Off, StoppingCooling      | Status   |
/// | CoolingDown, Fault | anything else, or stale   | PowerOff |
/// | Off                |                           | Status   |
///
/// An unknown or stale heater state never restarts ignition and never
/// withholds a shutdown.
pub fn select_command(controller: &ControllerState, heater: Option<HeaterState>) -> HeaterCommand {
    let power_percent = controller.requested_power_percent;
    match controller.state {
        StateId::Starting | StateId::Running => match heater {
            Some(HeaterState::Off) => HeaterCommand::PowerOn { power_percent },
            _ => HeaterCommand::SetPower { power_percent },
        },
        StateId::CoolingDown | StateId::FaultLowVoltage => match heater {
            Some(HeaterState::Off | HeaterState::StoppingCooling) => {
                HeaterCommand::Status { power_percent }
            }
            _ => HeaterCommand::PowerOff { power_percent },
        },
        StateId::Off => HeaterCommand::Status { power_percent },
    }
}

/// Resend period for an unchanged command.
pub fn quiet_period_ms(
    controller: &ControllerState,
    heater: Option<HeaterState>,
    config: &HeaterConfig,
) -> u64 {
    let active = controller.desired_on
        || controller.state != StateId::Off
        || heater.is_some_and(HeaterState::is_active);
    if active {
        u64::from(config.resend_interval_ms)
    } else {
        u64::from(config.polling_interval_ms)
    }
}

/// Result of one [`CommandDispatcher::dispatch`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent(HeaterCommand),
    /// Same frame already sent within the quiet period.
    Suppressed,
    Failed(SerialError),
}

#[derive(Debug, Clone, Copy)]
struct SentFrame {
    command: HeaterCommand,
    frame: [u8; CONTROLLER_FRAME_SIZE],
    at_ms: u64,
}

#[derive(Debug, Default)]
pub struct CommandDispatcher {
    last: Option<SentFrame>,
    sent: u32,
    failures: u32,
}

impl CommandDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dispatch(
        &mut self,
        serial: &mut impl SerialPort,
        command: HeaterCommand,
        quiet_period_ms: u64,
        now_ms: u64,
    ) -> DispatchOutcome {
        let frame = codec::encode(command);

        if let Some(last) = &self.last {
            let unchanged = last.frame == frame;
            let quiet = now_ms.saturating_sub(last.at_ms) < quiet_period_ms;
            if unchanged && quiet {
                return DispatchOutcome::Suppressed;
            }
        }

        match serial.write_all(&frame) {
            Ok(()) => {
                debug!("TX {:?}", command);
                self.last = Some(SentFrame {
                    command,
                    frame,
                    at_ms: now_ms,
                });
                self.sent = self.sent.wrapping_add(1);
                DispatchOutcome::Sent(command)
            }
            Err(e) => {
                warn!("TX {:?} failed: {}", command, e);
                self.failures = self.failures.saturating_add(1);
                DispatchOutcome::Failed(e)
            }
        }
    }

    /// Last command that made it onto the wire and when.
    pub fn last_sent(&self) -> Option<(HeaterCommand, u64)> {
        self.last.map(|l| (l.command, l.at_ms))
    }

    pub fn sent_count(&self) -> u32 {
        self.sent
    }

    pub fn failure_count(&self) -> u32 {
        self.failures
    }
}
