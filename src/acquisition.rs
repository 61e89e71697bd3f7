//! Periodic sensor acquisition
//!
//! Owns the TSL2561 driver, polls it on a fixed cadence and publishes each
//! successful conversion to the [`SharedReading`]. A failed cycle is logged
//! and leaves the previous reading in place; the next tick retries.

use crate::reading::{Reading, SharedReading};
use crate::state_machine::{AcquisitionEvent, AcquisitionMachine, AcquisitionState};
use crate::tsl2561::{PartNumber, SensorConfig, Tsl2561, compute_lux};
use crate::{BoardError, config};
use embassy_time::{Duration, Instant, Ticker};
use embedded_hal::i2c::I2c;
use log::{debug, error, info, warn};

/// Outcome counters since startup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub completed: u32,
    pub failed: u32,
    pub consecutive_failures: u32,
}

/// Acquisition scheduler: the only user of the sensor bus
pub struct Acquisition<'a, I2C> {
    sensor: Tsl2561<I2C>,
    sensor_config: SensorConfig,
    integration_ms: u16,
    shared: &'a SharedReading,
    machine: AcquisitionMachine,
    stats: CycleStats,
}

impl<'a, I2C: I2c> Acquisition<'a, I2C> {
    /// Identify, configure and power up the sensor.
    ///
    /// Any bus failure here means the sensor is absent or broken and the
    /// acquisition task should not be started.
    pub fn start(
        mut sensor: Tsl2561<I2C>,
        sensor_config: SensorConfig,
        shared: &'a SharedReading,
    ) -> Result<Self, BoardError> {
        let id = sensor.device_id()?;
        info!(
            "[TSL2561] Found {:?} rev {} (id 0x{:02x}) at address 0x{:02x}",
            PartNumber::from_id(id),
            PartNumber::revision(id),
            id,
            sensor.address()
        );

        let integration_ms =
            sensor.configure_timing(sensor_config.high_gain, sensor_config.integration.code())?;
        sensor.power_up()?;

        info!(
            "[TSL2561] Powered up: gain={} integration={}ms",
            if sensor_config.high_gain { "16x" } else { "1x" },
            integration_ms
        );

        Ok(Self {
            sensor,
            sensor_config,
            integration_ms,
            shared,
            machine: AcquisitionMachine::new(),
            stats: CycleStats::default(),
        })
    }

    pub fn stats(&self) -> CycleStats {
        self.stats
    }

    pub fn state(&self) -> AcquisitionState {
        self.machine.current_state()
    }

    /// Run one read cycle and publish the result stamped with `now`
    pub fn poll_once(&mut self, now: Instant) -> Result<Reading, BoardError> {
        self.machine.handle_event(AcquisitionEvent::Tick);
        let result = self.read_cycle(now);
        self.machine.handle_event(AcquisitionEvent::CycleFinished);

        match &result {
            Ok(reading) => {
                self.stats.completed = self.stats.completed.wrapping_add(1);
                if self.stats.consecutive_failures > 0 {
                    info!(
                        "[POLL] Sensor recovered after {} failed cycles",
                        self.stats.consecutive_failures
                    );
                }
                self.stats.consecutive_failures = 0;
                debug!("[POLL] Luminosity: {:.2} lux", reading.lux);
            }
            Err(e) => {
                self.stats.failed = self.stats.failed.wrapping_add(1);
                self.stats.consecutive_failures = self.stats.consecutive_failures.saturating_add(1);
                if self.stats.consecutive_failures % config::BUS_FAILURE_WARN_THRESHOLD == 0 {
                    error!(
                        "[POLL] {} consecutive failed cycles, serving stale reading: {}",
                        self.stats.consecutive_failures, e
                    );
                } else {
                    warn!("[POLL] Cycle abandoned: {}", e);
                }
            }
        }

        result
    }

    fn read_cycle(&mut self, now: Instant) -> Result<Reading, BoardError> {
        let raw = self.sensor.read_channels()?;
        debug!("[POLL] ch0={} ch1={}", raw.channel0, raw.channel1);

        let lux = compute_lux(
            self.sensor_config.high_gain,
            self.integration_ms,
            raw.channel0,
            raw.channel1,
        );
        let reading = Reading::new(lux, now);
        self.shared.publish(reading);
        Ok(reading)
    }

    /// Poll forever on the configured cadence
    pub async fn run(&mut self) -> ! {
        info!("[POLL] Sampling every {}ms", config::POLL_INTERVAL_MS);
        let mut ticker = Ticker::every(Duration::from_millis(config::POLL_INTERVAL_MS));
        loop {
            ticker.next().await;
            // failures are logged by poll_once and retried on the next tick
            let _ = self.poll_once(Instant::now());
        }
    }

    /// Power the sensor down and hand the bus back.
    ///
    /// The bus comes back on failure too, so the caller can retry or reuse it.
    pub fn shutdown(mut self) -> Result<I2C, (BoardError, I2C)> {
        match self.sensor.power_down() {
            Ok(()) => {
                info!("[TSL2561] Powered down");
                Ok(self.sensor.release())
            }
            Err(e) => {
                warn!("[TSL2561] Power down failed: {}", e);
                Err((e, self.sensor.release()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, RegisterBus};
    use crate::tsl2561::{ADDR_FLOAT, IntegrationTime};
    use core::pin::pin;
    use embassy_time::MockDriver;

    const HIGH_GAIN_402: SensorConfig = SensorConfig {
        high_gain: true,
        integration: IntegrationTime::Ms402,
    };

    fn started<'a>(bus: &RegisterBus, shared: &'a SharedReading) -> Acquisition<'a, RegisterBus> {
        let sensor = Tsl2561::new(bus.clone(), ADDR_FLOAT);
        Acquisition::start(sensor, HIGH_GAIN_402, shared).unwrap()
    }

    #[test]
    fn start_configures_and_powers_up() {
        let bus = RegisterBus::new(ADDR_FLOAT);
        bus.set_register(0x0A, 0x50);
        let shared = SharedReading::new();

        let acquisition = started(&bus, &shared);

        assert_eq!(bus.register(0x00), 0x03);
        assert_eq!(bus.register(0x01), 0x12);
        assert_eq!(acquisition.state(), AcquisitionState::Idle);
        // nothing published until the first cycle
        assert_eq!(shared.snapshot(), Reading::EMPTY);
    }

    #[test]
    fn start_fails_without_sensor() {
        let bus = RegisterBus::new(ADDR_FLOAT);
        bus.set_faulted(true);
        let shared = SharedReading::new();

        let result = Acquisition::start(Tsl2561::new(bus, ADDR_FLOAT), HIGH_GAIN_402, &shared);
        assert!(matches!(result, Err(BoardError::Bus(_))));
    }

    #[test]
    fn poll_publishes_converted_reading() {
        let bus = RegisterBus::new(ADDR_FLOAT);
        let shared = SharedReading::new();
        let mut acquisition = started(&bus, &shared);

        bus.set_channels(1000, 700);
        let now = Instant::from_millis(3000);
        let reading = acquisition.poll_once(now).unwrap();

        assert_eq!(reading.lux, compute_lux(true, 402, 1000, 700));
        assert_eq!(reading.captured_at, now);
        assert_eq!(shared.snapshot(), reading);
        assert_eq!(acquisition.state(), AcquisitionState::Idle);
        assert_eq!(acquisition.stats().completed, 1);
    }

    #[test]
    fn saturated_sensor_publishes_zero() {
        let bus = RegisterBus::new(ADDR_FLOAT);
        let shared = SharedReading::new();
        let mut acquisition = started(&bus, &shared);

        bus.set_channels(0xFFFF, 0x1000);
        let reading = acquisition.poll_once(Instant::from_millis(6000)).unwrap();
        assert_eq!(reading.lux, 0.0);
        assert_eq!(shared.snapshot().captured_at, Instant::from_millis(6000));
    }

    #[test]
    fn bus_error_keeps_previous_reading() {
        let bus = RegisterBus::new(ADDR_FLOAT);
        let shared = SharedReading::new();
        let mut acquisition = started(&bus, &shared);

        bus.set_channels(1000, 300);
        let good = acquisition.poll_once(Instant::from_millis(3000)).unwrap();

        bus.set_faulted(true);
        bus.set_channels(2000, 300);
        let failed = acquisition.poll_once(Instant::from_millis(6000));

        assert!(matches!(failed, Err(BoardError::Bus(_))));
        assert_eq!(shared.snapshot(), good);
        assert_eq!(acquisition.state(), AcquisitionState::Idle);
        assert_eq!(
            acquisition.stats(),
            CycleStats {
                completed: 1,
                failed: 1,
                consecutive_failures: 1
            }
        );

        bus.set_faulted(false);
        let recovered = acquisition.poll_once(Instant::from_millis(9000)).unwrap();
        assert_eq!(shared.snapshot(), recovered);
        assert_eq!(acquisition.stats().consecutive_failures, 0);
    }

    #[test]
    fn repeated_failures_are_counted() {
        let bus = RegisterBus::new(ADDR_FLOAT);
        let shared = SharedReading::new();
        let mut acquisition = started(&bus, &shared);
        bus.set_faulted(true);

        for i in 1..=config::BUS_FAILURE_WARN_THRESHOLD {
            assert!(acquisition.poll_once(Instant::from_millis(u64::from(i))).is_err());
        }

        assert_eq!(
            acquisition.stats().consecutive_failures,
            config::BUS_FAILURE_WARN_THRESHOLD
        );
        assert_eq!(shared.snapshot(), Reading::EMPTY);
    }

    #[test]
    fn shutdown_powers_down_and_returns_bus() {
        let bus = RegisterBus::new(ADDR_FLOAT);
        let shared = SharedReading::new();
        let acquisition = started(&bus, &shared);

        let mut released = acquisition.shutdown().unwrap();
        assert_eq!(bus.register(0x00), 0x00);

        // the returned handle is the same bus
        released.write(ADDR_FLOAT, &[0x80, 0x03]).unwrap();
        assert_eq!(bus.register(0x00), 0x03);
    }

    #[test]
    fn failed_shutdown_still_returns_bus() {
        let bus = RegisterBus::new(ADDR_FLOAT);
        let shared = SharedReading::new();
        let acquisition = started(&bus, &shared);
        bus.set_faulted(true);

        let Err((error, mut released)) = acquisition.shutdown() else {
            panic!("power down on a dead bus must fail");
        };
        assert!(matches!(error, BoardError::Bus(_)));
        assert_eq!(bus.register(0x00), 0x03);

        // retry through the handed-back bus once it recovers
        bus.set_faulted(false);
        Tsl2561::new(released.clone(), ADDR_FLOAT).power_down().unwrap();
        assert_eq!(bus.register(0x00), 0x00);
        released.write(ADDR_FLOAT, &[0x80, 0x03]).unwrap();
        assert_eq!(bus.register(0x00), 0x03);
    }

    fn channel_reads(bus: &RegisterBus) -> usize {
        bus.commands().iter().filter(|&&c| c & 0x0F == 0x0C).count()
    }

    #[test]
    fn run_samples_once_per_interval() {
        let _clock = testing::clock();
        let driver = MockDriver::get();
        let bus = RegisterBus::new(ADDR_FLOAT);
        let shared = SharedReading::new();
        let mut acquisition = started(&bus, &shared);
        bus.set_channels(1000, 300);

        let start = Instant::now();
        let interval = Duration::from_millis(config::POLL_INTERVAL_MS);
        {
            let mut run = pin!(acquisition.run());

            assert!(testing::poll_step(run.as_mut()).is_pending());
            driver.advance(interval - Duration::from_millis(1));
            assert!(testing::poll_step(run.as_mut()).is_pending());
            assert_eq!(shared.snapshot(), Reading::EMPTY);
            assert_eq!(channel_reads(&bus), 0);

            driver.advance(Duration::from_millis(1));
            assert!(testing::poll_step(run.as_mut()).is_pending());
            let first = shared.snapshot();
            assert_eq!(first.captured_at, start + interval);
            assert_eq!(first.lux, compute_lux(true, 402, 1000, 300));
            assert_eq!(channel_reads(&bus), 1);

            // polling again without time passing does not sample again
            assert!(testing::poll_step(run.as_mut()).is_pending());
            assert_eq!(channel_reads(&bus), 1);

            // a failed tick keeps the old reading and does not stop the loop
            bus.set_faulted(true);
            driver.advance(interval);
            assert!(testing::poll_step(run.as_mut()).is_pending());
            assert_eq!(shared.snapshot(), first);

            bus.set_faulted(false);
            bus.set_channels(2000, 300);
            driver.advance(interval / 2);
            assert!(testing::poll_step(run.as_mut()).is_pending());
            assert_eq!(shared.snapshot(), first);

            driver.advance(interval / 2);
            assert!(testing::poll_step(run.as_mut()).is_pending());
            let second = shared.snapshot();
            assert_eq!(second.captured_at, start + interval * 3);
            assert_eq!(second.lux, compute_lux(true, 402, 2000, 300));
            assert_eq!(channel_reads(&bus), 2);
        }

        assert_eq!(
            acquisition.stats(),
            CycleStats {
                completed: 2,
                failed: 1,
                consecutive_failures: 0
            }
        );
        assert_eq!(acquisition.state(), AcquisitionState::Idle);
    }
}
