//! TSL2561 luminosity sensor driver
//!
//! Register protocol, timing/gain configuration and the lux conversion for the
//! TAOS/AMS TSL2561. The driver owns its I2C bus for its whole lifetime and
//! hands it back through [`Tsl2561::release`].

use crate::BoardError;
use embedded_hal::i2c::I2c;
use num_traits::Float;

/// Bus address with the ADDR pin tied to ground
pub const ADDR_LOW: u8 = 0x29;
/// Bus address with the ADDR pin floating (default)
pub const ADDR_FLOAT: u8 = 0x39;
/// Bus address with the ADDR pin tied to VDD
pub const ADDR_HIGH: u8 = 0x49;

/// Command bit, set on every register access
const COMMAND_BIT: u8 = 0x80;

const REG_CONTROL: u8 = 0x00;
const REG_TIMING: u8 = 0x01;
const REG_ID: u8 = 0x0A;
const REG_DATA_0: u8 = 0x0C;
const REG_DATA_1: u8 = 0x0E;

const CONTROL_POWER_ON: u8 = 0x03;
const CONTROL_POWER_OFF: u8 = 0x00;

const TIMING_GAIN_BIT: u8 = 0x10;
const TIMING_INTEG_MASK: u8 = 0x03;

/// Counter value reported by a saturated channel
const SATURATED: u16 = 0xFFFF;

/// Nominal integration time the lux coefficients are calibrated for
const NOMINAL_INTEGRATION_MS: f64 = 402.0;

/// Low gain reads 16x fewer counts than high gain
const LOW_GAIN_SCALE: f64 = 16.0;

/// Integration time selected by the two low bits of the timing register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IntegrationTime {
    Ms14 = 0,
    Ms101 = 1,
    Ms402 = 2,
}

impl IntegrationTime {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(IntegrationTime::Ms14),
            1 => Some(IntegrationTime::Ms101),
            2 => Some(IntegrationTime::Ms402),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn millis(self) -> u16 {
        match self {
            IntegrationTime::Ms14 => 14,
            IntegrationTime::Ms101 => 101,
            IntegrationTime::Ms402 => 402,
        }
    }
}

/// Integration time in milliseconds for a raw timing code, 0 if the code is not timed
pub fn integration_time_ms(code: u8) -> u16 {
    IntegrationTime::from_code(code).map_or(0, IntegrationTime::millis)
}

/// Gain and integration time applied once at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorConfig {
    pub high_gain: bool,
    pub integration: IntegrationTime,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            high_gain: false,
            integration: IntegrationTime::Ms402,
        }
    }
}

/// Raw counts of one conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawChannels {
    /// Broadband (visible + infrared) photodiode
    pub channel0: u16,
    /// Infrared-only photodiode
    pub channel1: u16,
}

/// Part number encoded in the upper nibble of the ID register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartNumber {
    Tsl2560Cs,
    Tsl2561Cs,
    Tsl2560T,
    Tsl2561T,
    Unknown(u8),
}

impl PartNumber {
    pub fn from_id(id: u8) -> Self {
        match id >> 4 {
            0x0 => PartNumber::Tsl2560Cs,
            0x1 => PartNumber::Tsl2561Cs,
            0x4 => PartNumber::Tsl2560T,
            0x5 => PartNumber::Tsl2561T,
            other => PartNumber::Unknown(other),
        }
    }

    pub fn revision(id: u8) -> u8 {
        id & 0x0F
    }
}

/// TSL2561 driver over a blocking I2C bus
pub struct Tsl2561<I2C> {
    i2c: I2C,
    address: u8,
}

impl<I2C: I2c> Tsl2561<I2C> {
    /// Create a driver for the sensor at `address`. No bus traffic happens here.
    pub fn new(i2c: I2C, address: u8) -> Self {
        Self { i2c, address }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    /// Release the underlying I2C bus
    pub fn release(self) -> I2C {
        self.i2c
    }

    pub fn power_up(&mut self) -> Result<(), BoardError> {
        self.write_register(REG_CONTROL, CONTROL_POWER_ON)
    }

    pub fn power_down(&mut self) -> Result<(), BoardError> {
        self.write_register(REG_CONTROL, CONTROL_POWER_OFF)
    }

    /// Read the identification register (part number and revision)
    pub fn device_id(&mut self) -> Result<u8, BoardError> {
        self.read_register(REG_ID)
    }

    /// Set gain and integration code, keeping the other timing bits.
    ///
    /// Returns the integration time in milliseconds for `code`, or 0 when the
    /// code does not select a timed integration.
    pub fn configure_timing(&mut self, high_gain: bool, code: u8) -> Result<u16, BoardError> {
        let mut timing = self.read_register(REG_TIMING)?;

        if high_gain {
            timing |= TIMING_GAIN_BIT;
        } else {
            timing &= !TIMING_GAIN_BIT;
        }

        timing &= !TIMING_INTEG_MASK;
        timing |= code & TIMING_INTEG_MASK;

        self.write_register(REG_TIMING, timing)?;

        Ok(integration_time_ms(code))
    }

    /// Read both ADC channels
    pub fn read_channels(&mut self) -> Result<RawChannels, BoardError> {
        let channel0 = self.read_register_pair(REG_DATA_0)?;
        let channel1 = self.read_register_pair(REG_DATA_1)?;
        Ok(RawChannels { channel0, channel1 })
    }

    fn write_register(&mut self, reg: u8, value: u8) -> Result<(), BoardError> {
        self.i2c
            .write(self.address, &[COMMAND_BIT | reg, value])
            .map_err(BoardError::bus)
    }

    fn read_register(&mut self, reg: u8) -> Result<u8, BoardError> {
        let mut data = [0u8; 1];
        self.i2c
            .write_read(self.address, &[COMMAND_BIT | reg], &mut data)
            .map_err(BoardError::bus)?;
        Ok(data[0])
    }

    fn read_register_pair(&mut self, reg: u8) -> Result<u16, BoardError> {
        let mut data = [0u8; 2];
        self.i2c
            .write_read(self.address, &[COMMAND_BIT | reg], &mut data)
            .map_err(BoardError::bus)?;
        Ok(u16::from_le_bytes(data))
    }
}

/// Convert raw channel counts to lux using the datasheet's piecewise fit.
///
/// Saturated channels, a dark broadband channel and an untimed integration
/// all yield 0.0.
pub fn compute_lux(high_gain: bool, integration_ms: u16, ch0: u16, ch1: u16) -> f64 {
    if ch0 == SATURATED || ch1 == SATURATED {
        return 0.0;
    }
    // ratio would be inf/NaN and land in the last bin anyway
    if ch0 == 0 || integration_ms == 0 {
        return 0.0;
    }

    let mut d0 = f64::from(ch0);
    let mut d1 = f64::from(ch1);
    let ratio = d1 / d0;

    let scale = NOMINAL_INTEGRATION_MS / f64::from(integration_ms);
    d0 *= scale;
    d1 *= scale;

    if !high_gain {
        d0 *= LOW_GAIN_SCALE;
        d1 *= LOW_GAIN_SCALE;
    }

    if ratio < 0.50 {
        0.0304 * d0 - 0.062 * d0 * Float::powf(ratio, 1.4)
    } else if ratio < 0.61 {
        0.0224 * d0 - 0.031 * d1
    } else if ratio < 0.80 {
        0.0128 * d0 - 0.0153 * d1
    } else if ratio < 1.30 {
        0.00146 * d0 - 0.00112 * d1
    } else {
        0.0
    }
}
