//! ESP32 clock adapter.
//!
//! Implements [`ClockPort`]:
//!
//! - **`target_os = "espidf"`**: uptime from `esp_timer_get_time()`
//!   (microsecond, monotonic); local time from `gettimeofday` +
//!   `localtime_r`, so the TZ set by SNTP provisioning applies.
//! - **`not(target_os = "espidf")`**: uptime from `std::time::Instant`;
//!   local time only after [`Esp32TimeAdapter::set_local_time`].

use chrono::NaiveDateTime;

use crate::app::ports::ClockPort;

/// Wall clock readings before 2021-01-01 mean SNTP has not synced yet.
#[cfg(target_os = "espidf")]
const EPOCH_2021: i64 = 1_609_459_200;

pub struct Esp32TimeAdapter {
    #[cfg(not(target_os = "espidf"))]
    start: std::time::Instant,
    /// Local time at `start`.
    #[cfg(not(target_os = "espidf"))]
    wall_base: Option<(std::time::Instant, NaiveDateTime)>,
}

impl Default for Esp32TimeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl Esp32TimeAdapter {
    pub fn new() -> Self {
        Self {
            #[cfg(not(target_os = "espidf"))]
            start: std::time::Instant::now(),
            #[cfg(not(target_os = "espidf"))]
            wall_base: None,
        }
    }

    /// Pin the simulated wall clock; it advances with uptime from here.
    #[cfg(not(target_os = "espidf"))]
    pub fn set_local_time(&mut self, now: NaiveDateTime) {
        self.wall_base = Some((std::time::Instant::now(), now));
    }
}

#[cfg(target_os = "espidf")]
impl ClockPort for Esp32TimeAdapter {
    fn uptime_ms(&self) -> u64 {
        (unsafe { esp_idf_svc::sys::esp_timer_get_time() }) as u64 / 1_000
    }

    fn local_time(&self) -> Option<NaiveDateTime> {
        use chrono::{NaiveDate, NaiveTime};
        use core::ptr;

        let mut tv = esp_idf_svc::sys::timeval {
            tv_sec: 0,
            tv_usec: 0,
        };
        if unsafe { esp_idf_svc::sys::gettimeofday(&mut tv, ptr::null_mut()) } != 0 {
            return None;
        }
        if i64::from(tv.tv_sec) < EPOCH_2021 {
            return None;
        }
        let secs = tv.tv_sec as esp_idf_svc::sys::time_t;
        let mut tm: esp_idf_svc::sys::tm = unsafe { core::mem::zeroed() };
        if unsafe { esp_idf_svc::sys::localtime_r(&secs, &mut tm) }.is_null() {
            return None;
        }

        let date = NaiveDate::from_ymd_opt(
            tm.tm_year + 1900,
            u32::try_from(tm.tm_mon + 1).ok()?,
            u32::try_from(tm.tm_mday).ok()?,
        )?;
        // tm_sec can be 60 on a leap second.
        let time = NaiveTime::from_hms_opt(
            u32::try_from(tm.tm_hour).ok()?,
            u32::try_from(tm.tm_min).ok()?,
            u32::try_from(tm.tm_sec.min(59)).ok()?,
        )?;
        Some(NaiveDateTime::new(date, time))
    }
}

#[cfg(not(target_os = "espidf"))]
impl ClockPort for Esp32TimeAdapter {
    fn uptime_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    fn local_time(&self) -> Option<NaiveDateTime> {
        let (at, base) = self.wall_base?;
        let elapsed = chrono::Duration::milliseconds(at.elapsed().as_millis() as i64);
        base.checked_add_signed(elapsed)
    }
}
