//! Vevor diesel heater controller library.
//!
//! Exposes the pure-logic modules for integration testing and host-side
//! simulation. All ESP-IDF-specific code is guarded by
//! `#[cfg(target_os = "espidf")]` within each module.

#![deny(unused_must_use)]

pub mod app;
pub mod config;
pub mod consumption;
pub mod control;
pub mod dispatch;
pub mod error;
pub mod fsm;
pub mod protocol;
pub mod safety;
pub mod telemetry;

// ESP-IDF-backed adapters; each carries a host simulation backend.
pub mod adapters;
pub mod pins;
