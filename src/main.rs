#![no_std]
#![no_main]

use embassy_net::{Config, Runner, Stack, StackResources};
use esp_hal::Blocking;
use esp_hal::clock::CpuClock;
use esp_hal::i2c::master::{Config as I2cConfig, I2c};
use esp_hal::rng::Rng;
use esp_hal::time::Rate;
use esp_hal::timer::timg::TimerGroup;
use esp_hal_embassy::Executor;
use esp_wifi::wifi::{self, WifiDevice};
use log::{error, info};
use static_cell::StaticCell;

use lux_board::acquisition::Acquisition;
use lux_board::reading::SharedReading;
use lux_board::tsl2561::{SensorConfig, Tsl2561};
use lux_board::wifi::WiFiManager;
use lux_board::{config, http_server, mdns};

// Add app descriptor for espflash compatibility
esp_bootloader_esp_idf::esp_app_desc!();

type SensorBus = I2c<'static, Blocking>;

/// HTTP workers, the mDNS socket and the DHCP client
const SOCKET_COUNT: usize = config::HTTP_WORKER_COUNT + 2;

static WIFI_INIT_CELL: StaticCell<esp_wifi::EspWifiController<'static>> = StaticCell::new();
static STACK_RESOURCES: StaticCell<StackResources<SOCKET_COUNT>> = StaticCell::new();
static EXECUTOR: StaticCell<Executor> = StaticCell::new();

static SHARED_READING: SharedReading = SharedReading::new();

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    error!("[MAIN] Panic: {}", info);
    loop {}
}

/// Initialization failed before the executor started; nothing can run
fn halt(subsystem: &str) -> ! {
    error!("[MAIN] {} initialization failed, halting", subsystem);
    loop {}
}

#[embassy_executor::task]
async fn net_task(mut runner: Runner<'static, WifiDevice<'static>>) -> ! {
    runner.run().await
}

#[embassy_executor::task]
async fn wifi_task(mut manager: WiFiManager<'static>) -> ! {
    manager.run().await
}

#[embassy_executor::task]
async fn acquisition_task(mut acquisition: Acquisition<'static, SensorBus>) -> ! {
    acquisition.run().await
}

#[embassy_executor::task(pool_size = config::HTTP_WORKER_COUNT)]
async fn http_worker(
    stack: Stack<'static>,
    shared: &'static SharedReading,
    worker_id: usize,
) -> ! {
    http_server::run_worker(stack, shared, worker_id).await
}

#[embassy_executor::task]
async fn mdns_task(stack: Stack<'static>) -> ! {
    mdns::run_responder(stack, config::MDNS_HOSTNAME, config::HTTP_PORT).await
}

#[esp_hal::main]
fn main() -> ! {
    esp_println::logger::init_logger(log::LevelFilter::Info);
    info!("[MAIN] lux-board v{}", lux_board::VERSION);

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    // Initialize heap allocator for WiFi (72KB)
    esp_alloc::heap_allocator!(size: 72 * 1024);

    let timer_group0 = TimerGroup::new(peripherals.TIMG0);
    esp_hal_embassy::init(timer_group0.timer0);

    let timer_group1 = TimerGroup::new(peripherals.TIMG1);
    let mut rng = Rng::new(peripherals.RNG);
    let seed = (u64::from(rng.random()) << 32) | u64::from(rng.random());

    let Ok(wifi_init) = esp_wifi::init(timer_group1.timer0, rng, peripherals.RADIO_CLK) else {
        halt("WiFi driver");
    };
    let wifi_init = WIFI_INIT_CELL.init(wifi_init);

    let Ok((wifi_controller, wifi_interfaces)) = wifi::new(wifi_init, peripherals.WIFI) else {
        halt("WiFi controller");
    };
    info!("[WIFI] Driver initialized");

    let stack_resources = STACK_RESOURCES.init(StackResources::new());
    let (stack, runner) = embassy_net::new(
        wifi_interfaces.sta,
        Config::dhcpv4(Default::default()),
        stack_resources,
        seed,
    );

    let Ok(i2c) = I2c::new(
        peripherals.I2C0,
        I2cConfig::default().with_frequency(Rate::from_khz(config::I2C_FREQUENCY_KHZ)),
    ) else {
        halt("I2C");
    };
    let i2c = i2c.with_sda(peripherals.GPIO5).with_scl(peripherals.GPIO6);
    info!(
        "[TSL2561] I2C0 at {}kHz (SDA=GPIO5, SCL=GPIO6)",
        config::I2C_FREQUENCY_KHZ
    );

    let sensor_config = SensorConfig {
        high_gain: config::SENSOR_HIGH_GAIN,
        integration: config::SENSOR_INTEGRATION,
    };
    let sensor = Tsl2561::new(i2c, config::SENSOR_ADDRESS);
    let acquisition = match Acquisition::start(sensor, sensor_config, &SHARED_READING) {
        Ok(acquisition) => Some(acquisition),
        Err(e) => {
            error!("[TSL2561] Sensor unavailable, serving placeholder reading: {}", e);
            None
        }
    };

    let executor = EXECUTOR.init(Executor::new());
    executor.run(|spawner| {
        if let Err(e) = spawner.spawn(net_task(runner)) {
            error!("[MAIN] Failed to spawn network task: {:?}", e);
        }
        if let Err(e) = spawner.spawn(wifi_task(WiFiManager::new(wifi_controller))) {
            error!("[MAIN] Failed to spawn WiFi task: {:?}", e);
        }

        if let Some(acquisition) = acquisition {
            if let Err(e) = spawner.spawn(acquisition_task(acquisition)) {
                error!("[MAIN] Failed to spawn acquisition task: {:?}", e);
            }
        }

        for worker_id in 0..config::HTTP_WORKER_COUNT {
            if let Err(e) = spawner.spawn(http_worker(stack, &SHARED_READING, worker_id)) {
                error!("[MAIN] Failed to spawn HTTP worker {}: {:?}", worker_id, e);
            }
        }

        if let Err(e) = spawner.spawn(mdns_task(stack)) {
            error!("[MAIN] Failed to spawn mDNS task: {:?}", e);
        }

        info!(
            "[MAIN] Serving status page on port {} with {} workers",
            config::HTTP_PORT,
            config::HTTP_WORKER_COUNT
        );
    });
}
