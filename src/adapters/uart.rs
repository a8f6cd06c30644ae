//! Heater UART adapter.
//!
//! Implements [`SerialPort`]:
//!
//! - **`target_os = "espidf"`**: ESP-IDF UART driver on the pins from
//!   [`crate::pins`], 8N1 at the configured baud rate.  Reads never block;
//!   writes wait for the TX FIFO to drain so the echo arrives before the
//!   heater answers.
//! - **`not(target_os = "espidf")`**: in-memory line with an attached
//!   [`SimulatedHeater`] for host runs and tests.

use crate::app::ports::{SerialError, SerialPort};

#[cfg(not(target_os = "espidf"))]
use std::collections::VecDeque;

#[cfg(not(target_os = "espidf"))]
use crate::protocol::codec::{self, encode_report};
#[cfg(not(target_os = "espidf"))]
use crate::protocol::{
    CONTROLLER_FRAME_SIZE, CONTROLLER_ID, FRAME_START, HeaterReport, HeaterState,
};

// ───────────────────────────────────────────────────────────────
// ESP-IDF backend
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

/// Driver-side ring buffer size (bytes).
#[cfg(target_os = "espidf")]
const UART_RX_RING: i32 = 512;
/// Ticks to wait for a frame to leave the TX FIFO.
#[cfg(target_os = "espidf")]
const TX_DRAIN_TICKS: u32 = 20;

#[cfg(target_os = "espidf")]
pub struct UartAdapter {
    port: uart_port_t,
}

#[cfg(target_os = "espidf")]
impl UartAdapter {
    /// Install the UART driver.  Called once from `main()`.
    pub fn new(baud_rate: u32) -> Result<Self, SerialError> {
        let port = crate::pins::HEATER_UART_PORT as uart_port_t;
        let cfg = uart_config_t {
            baud_rate: baud_rate as i32,
            data_bits: uart_word_length_t_UART_DATA_8_BITS,
            parity: uart_parity_t_UART_PARITY_DISABLE,
            stop_bits: uart_stop_bits_t_UART_STOP_BITS_1,
            flow_ctrl: uart_hw_flowcontrol_t_UART_HW_FLOWCTRL_DISABLE,
            ..Default::default()
        };

        // SAFETY: single-threaded init path; the port is owned by this adapter.
        unsafe {
            if uart_param_config(port, &cfg) != ESP_OK {
                return Err(SerialError::IoError);
            }
            if uart_set_pin(
                port,
                crate::pins::HEATER_UART_TX_GPIO,
                crate::pins::HEATER_UART_RX_GPIO,
                UART_PIN_NO_CHANGE,
                UART_PIN_NO_CHANGE,
            ) != ESP_OK
            {
                return Err(SerialError::IoError);
            }
            if uart_driver_install(port, UART_RX_RING, 0, 0, core::ptr::null_mut(), 0) != ESP_OK {
                return Err(SerialError::IoError);
            }
        }
        log::info!(
            "UartAdapter: UART{} at {} baud (tx={}, rx={})",
            crate::pins::HEATER_UART_PORT,
            baud_rate,
            crate::pins::HEATER_UART_TX_GPIO,
            crate::pins::HEATER_UART_RX_GPIO
        );
        Ok(Self { port })
    }
}

#[cfg(target_os = "espidf")]
impl SerialPort for UartAdapter {
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, SerialError> {
        // SAFETY: `buf` is valid for `buf.len()` bytes; zero timeout.
        let n = unsafe {
            uart_read_bytes(self.port, buf.as_mut_ptr().cast(), buf.len() as u32, 0)
        };
        usize::try_from(n).map_err(|_| SerialError::IoError)
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), SerialError> {
        // SAFETY: `data` is valid for `data.len()` bytes.
        let n = unsafe { uart_write_bytes(self.port, data.as_ptr().cast(), data.len()) };
        let written = usize::try_from(n).map_err(|_| SerialError::IoError)?;
        if written < data.len() {
            return Err(SerialError::ShortWrite);
        }
        if unsafe { uart_wait_tx_done(self.port, TX_DRAIN_TICKS) } != ESP_OK {
            return Err(SerialError::Timeout);
        }
        Ok(())
    }
}

#[cfg(target_os = "espidf")]
impl Drop for UartAdapter {
    fn drop(&mut self) {
        // SAFETY: installed in `new`.
        unsafe {
            uart_driver_delete(self.port);
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Simulation backend
// ───────────────────────────────────────────────────────────────

/// In-memory half-duplex line.
///
/// Every written frame is echoed into the receive side, like the real
/// shared wire.  [`UartAdapter::exchange`] lets an attached heater answer.
#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Default)]
pub struct UartAdapter {
    rx: VecDeque<u8>,
    tx: Vec<Vec<u8>>,
    pending: Vec<Vec<u8>>,
    fail_writes: bool,
    echo: bool,
}

#[cfg(not(target_os = "espidf"))]
impl UartAdapter {
    pub fn new(baud_rate: u32) -> Result<Self, SerialError> {
        log::info!("UartAdapter: simulation line at {} baud", baud_rate);
        Ok(Self {
            echo: true,
            ..Self::default()
        })
    }

    /// Bytes arriving from the heater side.
    pub fn inject_rx(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes);
    }

    /// Every frame written since the last call.
    pub fn take_tx(&mut self) -> Vec<Vec<u8>> {
        core::mem::take(&mut self.tx)
    }

    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    pub fn set_echo(&mut self, echo: bool) {
        self.echo = echo;
    }

    /// Hand frames written since the last exchange to `heater`, advance
    /// it one step and queue its telemetry frame for reception.
    pub fn exchange(&mut self, heater: &mut SimulatedHeater) {
        for frame in core::mem::take(&mut self.pending) {
            heater.handle(&frame);
        }
        heater.advance();
        let report = heater.frame();
        self.inject_rx(&report);
    }
}

#[cfg(not(target_os = "espidf"))]
impl SerialPort for UartAdapter {
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, SerialError> {
        let n = buf.len().min(self.rx.len());
        for (slot, byte) in buf.iter_mut().zip(self.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), SerialError> {
        if self.fail_writes {
            return Err(SerialError::Timeout);
        }
        if self.echo {
            self.rx.extend(data);
        }
        self.tx.push(data.to_vec());
        self.pending.push(data.to_vec());
        Ok(())
    }
}

/// Steps a simulated heater spends in each transient state.
#[cfg(not(target_os = "espidf"))]
const SIM_PREHEAT_STEPS: u32 = 3;
#[cfg(not(target_os = "espidf"))]
const SIM_HEATING_UP_STEPS: u32 = 5;
#[cfg(not(target_os = "espidf"))]
const SIM_COOLING_STEPS: u32 = 6;

/// Rough stand-in for a Vevor heater: reacts to controller frames and
/// walks through preheat, heating up, stable combustion and post-purge.
#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Clone)]
pub struct SimulatedHeater {
    report: HeaterReport,
    steps_in_state: u32,
    frames_handled: u32,
}

#[cfg(not(target_os = "espidf"))]
impl SimulatedHeater {
    pub fn new(input_voltage: f32) -> Self {
        Self {
            report: HeaterReport {
                input_voltage,
                power_level_percent: 10,
                heat_exchanger_temp_c: 15.0,
                ..HeaterReport::default()
            },
            steps_in_state: 0,
            frames_handled: 0,
        }
    }

    pub fn report(&self) -> &HeaterReport {
        &self.report
    }

    pub fn set_input_voltage(&mut self, volts: f32) {
        self.report.input_voltage = volts;
    }

    /// Force a raw state byte (e.g. an undocumented one).
    pub fn force_state(&mut self, state: HeaterState) {
        self.set_state(state);
    }

    pub fn frames_handled(&self) -> u32 {
        self.frames_handled
    }

    /// React to one controller frame.  Corrupt or foreign frames are ignored.
    pub fn handle(&mut self, frame: &[u8]) {
        if frame.len() != CONTROLLER_FRAME_SIZE
            || frame[0] != FRAME_START
            || frame[1] != CONTROLLER_ID
            || codec::checksum(frame) != frame[CONTROLLER_FRAME_SIZE - 1]
        {
            return;
        }
        self.frames_handled += 1;
        self.report.power_level_percent = frame[8].clamp(1, 10) * 10;

        match (frame[9], self.report.heater_state) {
            (0x06, HeaterState::Off) => self.set_state(HeaterState::GlowPlugPreheat),
            (
                0x05,
                HeaterState::GlowPlugPreheat | HeaterState::HeatingUp | HeaterState::StableCombustion,
            ) => self.set_state(HeaterState::StoppingCooling),
            _ => {}
        }
    }

    /// Advance the internal timeline by one step.
    pub fn advance(&mut self) {
        self.steps_in_state += 1;
        self.report.state_duration_secs = self.report.state_duration_secs.saturating_add(1);
        match self.report.heater_state {
            HeaterState::GlowPlugPreheat if self.steps_in_state >= SIM_PREHEAT_STEPS => {
                self.set_state(HeaterState::HeatingUp);
            }
            HeaterState::HeatingUp if self.steps_in_state >= SIM_HEATING_UP_STEPS => {
                self.set_state(HeaterState::StableCombustion);
            }
            HeaterState::StoppingCooling if self.steps_in_state >= SIM_COOLING_STEPS => {
                self.set_state(HeaterState::Off);
            }
            _ => {}
        }

        let burning = self.report.heater_state.is_combustion();
        self.report.pump_frequency_hz = if burning {
            f32::from(self.report.power_level_percent) / 20.0
        } else {
            0.0
        };
        self.report.fan_speed_rpm = match self.report.heater_state {
            HeaterState::Off | HeaterState::Unknown(_) => 0,
            HeaterState::StoppingCooling => 2500,
            _ => 1500 + u16::from(self.report.power_level_percent) * 30,
        };
        self.report.glow_plug_current_amps =
            if self.report.heater_state == HeaterState::GlowPlugPreheat {
                9.0
            } else {
                0.0
            };
        self.report.cooling_flag = self.report.heater_state == HeaterState::StoppingCooling;
        let target = if burning { 180.0 } else { 15.0 };
        self.report.heat_exchanger_temp_c += (target - self.report.heat_exchanger_temp_c) * 0.2;
    }

    pub fn frame(&self) -> [u8; crate::protocol::HEATER_FRAME_SIZE] {
        encode_report(&self.report)
    }

    fn set_state(&mut self, state: HeaterState) {
        if self.report.heater_state != state {
            self.report.heater_state = state;
            self.report.state_duration_secs = 0;
            self.steps_in_state = 0;
        }
    }
}
