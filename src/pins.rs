//! GPIO / peripheral pin assignments for the heater controller board.
//!
//! Single source of truth: adapters reference this module rather than
//! hard-coding pin numbers.

// ---------------------------------------------------------------------------
// Heater serial line (single-wire, half-duplex via a diode/pull-up bridge)
// ---------------------------------------------------------------------------

/// ESP-IDF UART peripheral used for the heater bus.  UART0 stays on the
/// console.
pub const HEATER_UART_PORT: i32 = 1;
pub const HEATER_UART_TX_GPIO: i32 = 17;
pub const HEATER_UART_RX_GPIO: i32 = 18;
