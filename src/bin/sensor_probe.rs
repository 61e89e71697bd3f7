//! TSL2561 bench probe
//!
//! Identifies the sensor, then prints raw channels and lux for a few
//! integration periods in each gain. No networking.

#![no_std]
#![no_main]

use esp_hal::clock::CpuClock;
use esp_hal::delay::Delay;
use esp_hal::i2c::master::{Config as I2cConfig, I2c};
use esp_hal::time::Rate;
use esp_println::println;

use lux_board::config;
use lux_board::tsl2561::{PartNumber, Tsl2561, compute_lux};

// Add app descriptor for espflash compatibility
esp_bootloader_esp_idf::esp_app_desc!();

const SAMPLES_PER_GAIN: usize = 5;

#[panic_handler]
fn panic(_: &core::panic::PanicInfo) -> ! {
    loop {}
}

fn idle() -> ! {
    let delay = Delay::new();
    loop {
        delay.delay_millis(1000);
    }
}

#[esp_hal::main]
fn main() -> ! {
    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);
    let delay = Delay::new();

    println!("=== TSL2561 probe ===");

    let i2c = match I2c::new(
        peripherals.I2C0,
        I2cConfig::default().with_frequency(Rate::from_khz(config::I2C_FREQUENCY_KHZ)),
    ) {
        Ok(i2c) => i2c.with_sda(peripherals.GPIO5).with_scl(peripherals.GPIO6),
        Err(e) => {
            println!("[TSL2561] I2C config rejected: {:?}", e);
            idle();
        }
    };
    let mut sensor = Tsl2561::new(i2c, config::SENSOR_ADDRESS);

    match sensor.device_id() {
        Ok(id) => println!(
            "[TSL2561] id=0x{:02x} part={:?} rev={}",
            id,
            PartNumber::from_id(id),
            PartNumber::revision(id)
        ),
        Err(e) => {
            println!(
                "[TSL2561] No answer at 0x{:02x}: {}",
                config::SENSOR_ADDRESS,
                e
            );
            idle();
        }
    }

    if let Err(e) = sensor.power_up() {
        println!("[TSL2561] Power up failed: {}", e);
        idle();
    }

    for high_gain in [false, true] {
        let integration_ms =
            match sensor.configure_timing(high_gain, config::SENSOR_INTEGRATION.code()) {
                Ok(ms) => ms,
                Err(e) => {
                    println!("[TSL2561] Timing write failed: {}", e);
                    continue;
                }
            };
        println!(
            "\n-- gain {} / {}ms --",
            if high_gain { "16x" } else { "1x" },
            integration_ms
        );

        for sample in 1..=SAMPLES_PER_GAIN {
            // first conversion after a timing change is stale
            delay.delay_millis(u32::from(integration_ms) + 20);
            match sensor.read_channels() {
                Ok(raw) => println!(
                    "#{} ch0={:5} ch1={:5} lux={:.2}",
                    sample,
                    raw.channel0,
                    raw.channel1,
                    compute_lux(high_gain, integration_ms, raw.channel0, raw.channel1)
                ),
                Err(e) => println!("#{} read failed: {}", sample, e),
            }
        }
    }

    if let Err(e) = sensor.power_down() {
        println!("[TSL2561] Power down failed: {}", e);
    }
    println!("\n=== probe done ===");
    idle();
}
