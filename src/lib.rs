#![cfg_attr(not(test), no_std)]

//! ESP32-C3 Ambient Light Sensor Board Library
//!
//! This library samples a TSL2561 luminosity sensor over I2C on a fixed
//! cadence and serves the latest reading as a small HTML status page over
//! TCP, advertised on the local network through mDNS.

pub mod acquisition;
pub mod http_server;
pub mod mdns;
pub mod reading;
pub mod state_machine;
pub mod tsl2561;
#[cfg(feature = "esp32c3")]
pub mod wifi;

#[cfg(test)]
pub(crate) mod testing;

/// Project version information
pub const VERSION: &str = "0.1.0";

/// Default configuration constants
pub mod config {
    use crate::tsl2561::{self, IntegrationTime};

    /// TCP port serving the status page
    pub const HTTP_PORT: u16 = 8080;

    /// Number of concurrent HTTP accept workers
    pub const HTTP_WORKER_COUNT: usize = 4;

    /// Inactivity timeout for a single HTTP connection
    pub const HTTP_SOCKET_TIMEOUT_SECS: u64 = 10;

    /// Time a peer gets to send its request line
    pub const HTTP_REQUEST_LINE_TIMEOUT_SECS: u64 = 2;

    /// Longest request line accepted before the connection is dropped
    pub const HTTP_MAX_REQUEST_LINE: usize = 512;

    /// Sensor sampling period in milliseconds
    pub const POLL_INTERVAL_MS: u64 = 3000;

    /// Consecutive failed cycles between escalated warnings
    pub const BUS_FAILURE_WARN_THRESHOLD: u32 = 10;

    /// TSL2561 bus address (ADDR pin floating)
    pub const SENSOR_ADDRESS: u8 = tsl2561::ADDR_FLOAT;

    /// Sensor gain: false = low gain (1x), true = high gain (16x)
    pub const SENSOR_HIGH_GAIN: bool = false;

    /// Sensor integration time
    pub const SENSOR_INTEGRATION: IntegrationTime = IntegrationTime::Ms402;

    /// I2C bus frequency (fast mode)
    pub const I2C_FREQUENCY_KHZ: u32 = 400;

    /// mDNS host and instance name
    pub const MDNS_HOSTNAME: &str = "lux-board";

    /// Interval between unsolicited mDNS announcements
    pub const MDNS_ANNOUNCE_INTERVAL_SECS: u64 = 30;

    /// WiFi configuration
    /// Read from environment variables at compile time
    pub const WIFI_SSID: &str = env!("WIFI_SSID");
    pub const WIFI_PASSWORD: &str = env!("WIFI_PASSWORD");

    /// WiFi reconnection interval in milliseconds
    pub const WIFI_RECONNECT_INTERVAL_MS: u64 = 5000;
}

/// Error types for the light sensor board
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BoardError {
    /// Sensor unreachable, NACK or bus timeout
    #[error("sensor bus transaction failed: {0:?}")]
    Bus(embedded_hal::i2c::ErrorKind),
    /// Malformed, incomplete or oversized request
    #[error("malformed request")]
    Protocol,
    /// Socket I/O failure on a single connection
    #[error("network I/O failed: {0:?}")]
    Network(embedded_io_async::ErrorKind),
    /// Rendered response does not fit its buffer
    #[error("response does not fit its buffer")]
    ResponseTooLarge,
    /// mDNS packet could not be built or parsed
    #[error("mDNS packet could not be built or parsed")]
    Mdns,
    /// WiFi driver or association error
    #[error("WiFi connection error")]
    WiFi,
}

impl BoardError {
    /// Map a HAL I2C error into a bus error
    pub fn bus<E: embedded_hal::i2c::Error>(err: E) -> Self {
        BoardError::Bus(err.kind())
    }

    /// Map a socket error into a network error
    pub fn network<E: embedded_io_async::Error>(err: E) -> Self {
        BoardError::Network(err.kind())
    }
}
