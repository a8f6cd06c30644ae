//! Vevor Heater Controller — Main Entry Point
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                 Adapters (outer ring)                    │
//! │                                                          │
//! │  UartAdapter   LogEventSink   NvsAdapter   Esp32Time     │
//! │  (SerialPort)  (EventSink)    (Config+NVS) (ClockPort)   │
//! │                                                          │
//! │  ──────────────── Port Trait Boundary ─────────────────  │
//! │                                                          │
//! │  ┌────────────────────────────────────────────────────┐  │
//! │  │              AppService (pure logic)               │  │
//! │  │  codec · consumption · control · safety · FSM      │  │
//! │  └────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use anyhow::Result;
use embedded_hal::delay::DelayNs;
use esp_idf_hal::delay::FreeRtos;
use log::{info, warn};

use vevor_heater::adapters::log_sink::LogEventSink;
use vevor_heater::adapters::nvs::NvsAdapter;
use vevor_heater::adapters::time::Esp32TimeAdapter;
use vevor_heater::adapters::uart::UartAdapter;
use vevor_heater::app::ports::ConfigPort;
use vevor_heater::app::service::AppService;
use vevor_heater::config::HeaterConfig;
use vevor_heater::error::Error;

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("Vevor heater controller v{}", env!("CARGO_PKG_VERSION"));

    // ── 2. Load config from NVS (or defaults) ─────────────────
    let mut nvs = NvsAdapter::new().map_err(|_| Error::Init("NVS flash"))?;
    let config = match nvs.load() {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!("NVS config load failed ({}), using defaults", e);
            HeaterConfig::default()
        }
    };

    // ── 3. Construct adapters ─────────────────────────────────
    let clock = Esp32TimeAdapter::new();
    let mut uart = UartAdapter::new(config.baud_rate).map_err(Error::from)?;
    let mut log_sink = LogEventSink::new();

    // ── 4. Construct app service ──────────────────────────────
    let mut app = AppService::new(config)?;
    app.start(&clock, &nvs, &mut log_sink);

    info!("System ready. Entering control loop.");

    // ── 5. Control loop ───────────────────────────────────────
    let mut delay = FreeRtos;
    loop {
        app.tick(&mut uart, &clock, &mut nvs, &mut log_sink);

        // Config auto-save (5 s debounce after last change).
        app.auto_save_if_needed(&nvs);

        delay.delay_ms(app.current_config().update_interval_ms);
    }
}
