//! Shared luminosity reading
//!
//! The acquisition task is the only writer; every HTTP worker reads. A reading
//! is copied in and out as a whole inside one critical section, so readers see
//! either the previous record or the new one.

use core::cell::Cell;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::Instant;

/// Most recent luminosity sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// Luminosity in lux; 0.0 also means saturated or unavailable
    pub lux: f64,
    /// Board uptime when the sample was taken
    pub captured_at: Instant,
}

impl Reading {
    /// Placeholder published before the first successful cycle
    pub const EMPTY: Reading = Reading {
        lux: 0.0,
        captured_at: Instant::from_ticks(0),
    };

    pub const fn new(lux: f64, captured_at: Instant) -> Self {
        Self { lux, captured_at }
    }
}

impl Default for Reading {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Current reading shared between the acquisition task and the HTTP workers
pub struct SharedReading {
    current: Mutex<CriticalSectionRawMutex, Cell<Reading>>,
}

impl SharedReading {
    pub const fn new() -> Self {
        Self {
            current: Mutex::new(Cell::new(Reading::EMPTY)),
        }
    }

    /// Replace the current reading
    pub fn publish(&self, reading: Reading) {
        self.current.lock(|cell| cell.set(reading));
    }

    /// Copy of the current reading
    pub fn snapshot(&self) -> Reading {
        self.current.lock(|cell| cell.get())
    }
}

impl Default for SharedReading {
    fn default() -> Self {
        Self::new()
    }
}
