//! Frame encoder and streaming decoder.
//!
//! [`try_decode`] is a pure function over a byte slice; [`FrameDecoder`]
//! wraps it with a bounded receive buffer so that frames split across
//! several UART reads (or several control ticks) are reassembled.

use heapless::Vec;
use log::{debug, warn};

use super::{
    CONTROLLER_FRAME_SIZE, CONTROLLER_ID, CONTROLLER_LENGTH, DecodeError, FRAME_START,
    HEATER_FRAME_SIZE, HEATER_ID, HEATER_LENGTH, HeaterCommand, HeaterReport, HeaterState,
    InboundFrame, power_level_from_percent,
};

/// Receive buffer capacity.  Comfortably holds a telemetry frame plus one
/// UART read chunk.
pub const RX_BUFFER_CAPACITY: usize = 256;

/// Result of one decode attempt at the head of a buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decode {
    /// Need more bytes; nothing consumed.
    Incomplete,
    Frame { frame: InboundFrame, consumed: usize },
    /// Corrupt data; `consumed` skips to the next plausible frame start.
    Error { error: DecodeError, consumed: usize },
}

// ---------------------------------------------------------------------------
// Checksum
// ---------------------------------------------------------------------------

/// Sum of every byte between the length prefix and the checksum, mod 256.
pub fn checksum(frame: &[u8]) -> u8 {
    if frame.len() < 3 {
        return 0;
    }
    frame[2..frame.len() - 1]
        .iter()
        .fold(0u8, |acc, &b| acc.wrapping_add(b))
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encode a controller command frame.
pub fn encode(command: HeaterCommand) -> [u8; CONTROLLER_FRAME_SIZE] {
    let mut frame = [0u8; CONTROLLER_FRAME_SIZE];
    frame[0] = FRAME_START;
    frame[1] = CONTROLLER_ID;
    frame[2] = command.opcode();
    frame[3] = CONTROLLER_LENGTH;
    frame[8] = power_level_from_percent(command.power_percent());
    frame[9] = command.requested_state();
    frame[CONTROLLER_FRAME_SIZE - 1] = checksum(&frame);
    frame
}

/// Encode a heater telemetry frame.  Used by the host-side heater
/// simulator; the real heater produces these.
pub fn encode_report(report: &HeaterReport) -> [u8; HEATER_FRAME_SIZE] {
    let mut frame = [0u8; HEATER_FRAME_SIZE];
    frame[0] = FRAME_START;
    frame[1] = HEATER_ID;
    frame[2] = 0x02;
    frame[3] = HEATER_LENGTH;
    frame[5] = report.heater_state.to_raw();
    frame[6] = report.power_level_percent / 10;
    frame[11] = (report.input_voltage * 10.0).round().clamp(0.0, 255.0) as u8;
    frame[13] = report.glow_plug_current_amps.round().clamp(0.0, 255.0) as u8;
    frame[14] = u8::from(report.cooling_flag);
    let temp = (report.heat_exchanger_temp_c * 10.0)
        .round()
        .clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16;
    frame[16..18].copy_from_slice(&temp.to_be_bytes());
    frame[20..22].copy_from_slice(&report.state_duration_secs.to_be_bytes());
    frame[23] = (report.pump_frequency_hz * 10.0).round().clamp(0.0, 255.0) as u8;
    frame[28..30].copy_from_slice(&report.fan_speed_rpm.to_be_bytes());
    frame[HEATER_FRAME_SIZE - 1] = checksum(&frame);
    frame
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Try to decode one frame from the head of `buf`.
pub fn try_decode(buf: &[u8]) -> Decode {
    let Some(&start) = buf.first() else {
        return Decode::Incomplete;
    };
    if start != FRAME_START {
        return resync(buf, DecodeError::NoFrameStart(start));
    }

    let device = match buf.get(1) {
        None => return Decode::Incomplete,
        Some(&id @ (CONTROLLER_ID | HEATER_ID)) => id,
        Some(&other) => return resync(buf, DecodeError::UnknownDevice(other)),
    };

    let Some(&length) = buf.get(3) else {
        return Decode::Incomplete;
    };
    let frame_size = match (device, length) {
        (CONTROLLER_ID, CONTROLLER_LENGTH) => CONTROLLER_FRAME_SIZE,
        (HEATER_ID, HEATER_LENGTH) => HEATER_FRAME_SIZE,
        (_, CONTROLLER_LENGTH | HEATER_LENGTH) => {
            return resync(buf, DecodeError::LengthMismatch { device, length });
        }
        _ => return resync(buf, DecodeError::UnknownLength(length)),
    };

    if buf.len() < frame_size {
        return Decode::Incomplete;
    }
    let frame = &buf[..frame_size];

    let expected = checksum(frame);
    let actual = frame[frame_size - 1];
    if expected != actual {
        return resync(buf, DecodeError::ChecksumMismatch { expected, actual });
    }

    let inbound = if device == CONTROLLER_ID {
        InboundFrame::Echo
    } else {
        InboundFrame::Telemetry(parse_report(frame))
    };
    Decode::Frame {
        frame: inbound,
        consumed: frame_size,
    }
}

/// Skip past the bad start byte to the next `0xAA`, or the whole buffer.
fn resync(buf: &[u8], error: DecodeError) -> Decode {
    let consumed = buf
        .iter()
        .skip(1)
        .position(|&b| b == FRAME_START)
        .map_or(buf.len(), |p| p + 1);
    Decode::Error { error, consumed }
}

fn parse_report(frame: &[u8]) -> HeaterReport {
    let be16 = |at: usize| u16::from_be_bytes([frame[at], frame[at + 1]]);
    let level = frame[6];
    HeaterReport {
        heater_state: HeaterState::from_raw(frame[5]),
        power_level_percent: if (1..=10).contains(&level) { level * 10 } else { 0 },
        input_voltage: f32::from(frame[11]) / 10.0,
        glow_plug_current_amps: f32::from(frame[13]),
        cooling_flag: frame[14] != 0,
        heat_exchanger_temp_c: f32::from(be16(16) as i16) / 10.0,
        state_duration_secs: be16(20),
        pump_frequency_hz: f32::from(frame[23]) / 10.0,
        fan_speed_rpm: be16(28),
    }
}

// ---------------------------------------------------------------------------
// Streaming decoder
// ---------------------------------------------------------------------------

/// Counters kept by [`FrameDecoder`] for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    pub frames: u32,
    pub echoes: u32,
    pub errors: u32,
}

/// Streaming frame decoder with a bounded receive buffer.
pub struct FrameDecoder {
    buf: Vec<u8, RX_BUFFER_CAPACITY>,
    /// Uptime of the last byte received.
    last_rx_ms: u64,
    /// A partial frame older than this is dropped.
    partial_timeout_ms: u64,
    /// Error raised while buffering, reported on the next `poll`.
    pending_error: Option<DecodeError>,
    stats: DecoderStats,
}

impl FrameDecoder {
    pub fn new(partial_timeout_ms: u64) -> Self {
        Self {
            buf: Vec::new(),
            last_rx_ms: 0,
            partial_timeout_ms,
            pending_error: None,
            stats: DecoderStats::default(),
        }
    }

    /// Append received bytes.
    ///
    /// A stale partial frame is discarded before the new bytes are buffered.
    pub fn feed(&mut self, data: &[u8], now_ms: u64) {
        self.expire_partial(now_ms);
        if data.is_empty() {
            return;
        }
        if self.buf.extend_from_slice(data).is_err() {
            warn!(
                "FrameDecoder: buffer overflow, dropping {} bytes",
                self.buf.len() + data.len()
            );
            self.buf.clear();
            self.pending_error = Some(DecodeError::BufferOverflow);
            self.stats.errors = self.stats.errors.saturating_add(1);
        }
        self.last_rx_ms = now_ms;
    }

    /// Pull the next decoded frame or error out of the buffer.
    ///
    /// Returns `None` once only an incomplete frame (or nothing) remains.
    pub fn poll(&mut self) -> Option<Result<InboundFrame, DecodeError>> {
        if let Some(error) = self.pending_error.take() {
            return Some(Err(error));
        }
        match try_decode(&self.buf) {
            Decode::Incomplete => None,
            Decode::Frame { frame, consumed } => {
                self.consume(consumed);
                match frame {
                    InboundFrame::Echo => self.stats.echoes = self.stats.echoes.saturating_add(1),
                    InboundFrame::Telemetry(_) => {
                        self.stats.frames = self.stats.frames.saturating_add(1);
                    }
                }
                Some(Ok(frame))
            }
            Decode::Error { error, consumed } => {
                debug!("FrameDecoder: {} ({} bytes skipped)", error, consumed);
                self.consume(consumed);
                self.stats.errors = self.stats.errors.saturating_add(1);
                Some(Err(error))
            }
        }
    }

    /// Drop buffered bytes (e.g. after the UART was re-opened).
    pub fn reset(&mut self) {
        self.buf.clear();
        self.pending_error = None;
    }

    /// Bytes currently buffered (an incomplete frame).
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    fn expire_partial(&mut self, now_ms: u64) {
        if !self.buf.is_empty() && now_ms.saturating_sub(self.last_rx_ms) > self.partial_timeout_ms
        {
            debug!(
                "FrameDecoder: partial frame of {} bytes timed out",
                self.buf.len()
            );
            self.buf.clear();
            self.pending_error = Some(DecodeError::PartialFrameTimeout);
            self.stats.errors = self.stats.errors.saturating_add(1);
        }
    }

    fn consume(&mut self, n: usize) {
        let n = n.min(self.buf.len());
        let remaining = self.buf.len() - n;
        self.buf.copy_within(n.., 0);
        self.buf.truncate(remaining);
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn arb_report() -> impl Strategy<Value = HeaterReport> {
        (0u8..=4, 1u8..=10, 90u8..=160, -400i16..=2500, any::<u16>(), 0u8..=60, any::<u16>())
            .prop_map(|(state, level, volts, temp, duration, pump, fan)| HeaterReport {
                heater_state: HeaterState::from_raw(state),
                power_level_percent: level * 10,
                input_voltage: f32::from(volts) / 10.0,
                glow_plug_current_amps: 0.0,
                cooling_flag: false,
                heat_exchanger_temp_c: f32::from(temp) / 10.0,
                state_duration_secs: duration,
                pump_frequency_hz: f32::from(pump) / 10.0,
                fan_speed_rpm: fan,
            })
    }

    proptest! {
        #[test]
        fn corrupted_byte_never_yields_telemetry(
            report in arb_report(),
            pos in 0usize..HEATER_FRAME_SIZE,
            flip in 1u8..=255,
        ) {
            let mut frame = encode_report(&report);
            frame[pos] ^= flip;
            let decoded = try_decode(&frame);
            prop_assert!(matches!(decoded, Decode::Error { .. }), "got {:?}", decoded);
        }

        #[test]
        fn arbitrary_bytes_always_make_progress(data in proptest::collection::vec(any::<u8>(), 1..200)) {
            match try_decode(&data) {
                Decode::Incomplete => prop_assert!(data.len() < HEATER_FRAME_SIZE),
                Decode::Frame { consumed, .. } | Decode::Error { consumed, .. } => {
                    prop_assert!(consumed >= 1 && consumed <= data.len());
                }
            }
        }

        #[test]
        fn decoder_never_panics(chunks in proptest::collection::vec(
            proptest::collection::vec(any::<u8>(), 0..80), 0..20)
        ) {
            let mut dec = FrameDecoder::new(1000);
            for (i, chunk) in chunks.iter().enumerate() {
                dec.feed(chunk, i as u64 * 100);
                while dec.poll().is_some() {}
                prop_assert!(dec.buffered() < HEATER_FRAME_SIZE);
            }
        }
    }
}
