//! Application core — pure domain logic, zero I/O.
//!
//! Ties together the protocol codec, telemetry store, fuel accounting,
//! control policy, safety supervisor, state machine and command dispatch.
//! All interaction with the heater and the platform happens through
//! **port traits** defined in [`ports`], keeping this layer fully testable
//! without real peripherals.

pub mod commands;
pub mod events;
pub mod ports;
pub mod service;
