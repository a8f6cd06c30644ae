//! Mock adapters for integration tests.
//!
//! Record every port call so tests can assert on the full history without
//! touching a real UART or flash.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};

use chrono::{Duration, NaiveDateTime};
use vevor_heater::app::events::AppEvent;
use vevor_heater::app::ports::{
    ClockPort, ConfigError, ConfigPort, EventSink, SerialError, SerialPort, StorageError,
    StoragePort,
};
use vevor_heater::config::HeaterConfig;

// ── MockClock ─────────────────────────────────────────────────

/// Manually advanced clock; wall time is optional and moves with uptime.
pub struct MockClock {
    uptime_ms: Cell<u64>,
    local: Cell<Option<NaiveDateTime>>,
}

#[allow(dead_code)]
impl MockClock {
    pub fn new() -> Self {
        Self {
            uptime_ms: Cell::new(0),
            local: Cell::new(None),
        }
    }

    pub fn with_local_time(local: NaiveDateTime) -> Self {
        let clock = Self::new();
        clock.local.set(Some(local));
        clock
    }

    /// Wall clock becomes available (e.g. after SNTP).
    pub fn sync(&self, local: NaiveDateTime) {
        self.local.set(Some(local));
    }

    pub fn advance(&self, ms: u64) {
        self.uptime_ms.set(self.uptime_ms.get() + ms);
        if let Some(local) = self.local.get() {
            self.local
                .set(Some(local + Duration::milliseconds(ms as i64)));
        }
    }
}

impl ClockPort for MockClock {
    fn uptime_ms(&self) -> u64 {
        self.uptime_ms.get()
    }

    fn local_time(&self) -> Option<NaiveDateTime> {
        self.local.get()
    }
}

// ── MockSerial ────────────────────────────────────────────────

/// Serial line without echo: tests inject heater bytes directly.
#[derive(Default)]
pub struct MockSerial {
    pub rx: VecDeque<u8>,
    pub written: Vec<Vec<u8>>,
    pub fail_writes: bool,
    /// The next read reports a line error.
    pub fail_next_read: bool,
}

#[allow(dead_code)]
impl MockSerial {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inject(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes);
    }

    /// Requested-state byte of every written frame.
    pub fn requested_states(&self) -> Vec<u8> {
        self.written.iter().map(|f| f[9]).collect()
    }
}

impl SerialPort for MockSerial {
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, SerialError> {
        if std::mem::take(&mut self.fail_next_read) {
            return Err(SerialError::IoError);
        }
        let n = buf.len().min(self.rx.len());
        for (slot, byte) in buf.iter_mut().zip(self.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), SerialError> {
        if self.fail_writes {
            return Err(SerialError::IoError);
        }
        self.written.push(data.to_vec());
        Ok(())
    }
}

// ── MockStorage ───────────────────────────────────────────────

#[derive(Default)]
pub struct MockStorage {
    pub store: HashMap<String, Vec<u8>>,
    pub fail_writes: bool,
    pub writes: u32,
}

#[allow(dead_code)]
impl MockStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(ns: &str, key: &str) -> String {
        format!("{}::{}", ns, key)
    }
}

impl StoragePort for MockStorage {
    fn read(&self, ns: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        match self.store.get(&Self::key(ns, key)) {
            Some(v) => {
                let n = v.len().min(buf.len());
                buf[..n].copy_from_slice(&v[..n]);
                Ok(n)
            }
            None => Err(StorageError::NotFound),
        }
    }

    fn write(&mut self, ns: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        if self.fail_writes {
            return Err(StorageError::IoError);
        }
        self.writes += 1;
        self.store.insert(Self::key(ns, key), data.to_vec());
        Ok(())
    }

    fn delete(&mut self, ns: &str, key: &str) -> Result<(), StorageError> {
        self.store.remove(&Self::key(ns, key));
        Ok(())
    }

    fn exists(&self, ns: &str, key: &str) -> bool {
        self.store.contains_key(&Self::key(ns, key))
    }
}

// ── MockConfigStore ───────────────────────────────────────────

#[derive(Default)]
pub struct MockConfigStore {
    pub saved: RefCell<Option<HeaterConfig>>,
    pub save_count: Cell<u32>,
}

impl ConfigPort for MockConfigStore {
    fn load(&self) -> Result<HeaterConfig, ConfigError> {
        Ok(self.saved.borrow().clone().unwrap_or_default())
    }

    fn save(&self, config: &HeaterConfig) -> Result<(), ConfigError> {
        config.validate()?;
        *self.saved.borrow_mut() = Some(config.clone());
        self.save_count.set(self.save_count.get() + 1);
        Ok(())
    }
}

// ── RecordingSink ─────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingSink {
    pub events: Vec<AppEvent>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, pred: impl Fn(&AppEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &AppEvent) {
        self.events.push(event.clone());
    }
}
