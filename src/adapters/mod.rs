//! Adapters — concrete implementations of the hexagonal port traits.
//!
//! | Adapter    | Implements  | Connects to                    |
//! |------------|-------------|--------------------------------|
//! | `log_sink` | EventSink   | Serial log output              |
//! | `nvs`      | ConfigPort  | NVS / in-memory store          |
//! |            | StoragePort |                                |
//! | `time`     | ClockPort   | ESP32 system timer + wall clock|
//! | `uart`     | SerialPort  | Heater UART / simulated heater |

pub mod log_sink;
pub mod nvs;
pub mod time;
pub mod uart;
