//! WiFi station supervision
//!
//! Joins the network baked in at build time and rejoins after every
//! disconnect. Addressing is left to the embassy-net DHCP client.

use crate::{BoardError, config};
use embassy_time::{Duration, Timer};
use esp_wifi::wifi::{
    AuthMethod, ClientConfiguration, Configuration, WifiController, WifiEvent,
};
use log::{error, info, warn};

/// Keeps the station associated for the lifetime of the firmware
pub struct WiFiManager<'a> {
    controller: WifiController<'a>,
    reconnects: u32,
}

impl<'a> WiFiManager<'a> {
    pub fn new(controller: WifiController<'a>) -> Self {
        Self {
            controller,
            reconnects: 0,
        }
    }

    fn client_configuration(ssid: &str, password: &str) -> Result<Configuration, BoardError> {
        if ssid.is_empty() {
            return Err(BoardError::WiFi);
        }

        let auth_method = if password.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };

        Ok(Configuration::Client(ClientConfiguration {
            ssid: ssid.try_into().map_err(|_| BoardError::WiFi)?,
            password: password.try_into().map_err(|_| BoardError::WiFi)?,
            auth_method,
            ..Default::default()
        }))
    }

    async fn ensure_started(&mut self) -> Result<(), BoardError> {
        if matches!(self.controller.is_started(), Ok(true)) {
            return Ok(());
        }

        let client_config = Self::client_configuration(config::WIFI_SSID, config::WIFI_PASSWORD)?;
        self.controller
            .set_configuration(&client_config)
            .map_err(|_| BoardError::WiFi)?;
        self.controller
            .start_async()
            .await
            .map_err(|_| BoardError::WiFi)?;
        info!("[WIFI] Radio started");
        Ok(())
    }

    /// Start the radio if needed and associate once
    pub async fn connect(&mut self) -> Result<(), BoardError> {
        self.ensure_started().await?;
        info!("[WIFI] Connecting to '{}'", config::WIFI_SSID);
        self.controller
            .connect_async()
            .await
            .map_err(|_| BoardError::WiFi)?;
        info!("[WIFI] Connected");
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.controller.is_connected().unwrap_or(false)
    }

    /// Number of successful reassociations after the first connect
    pub fn reconnects(&self) -> u32 {
        self.reconnects
    }

    /// Supervise the association forever
    pub async fn run(&mut self) -> ! {
        let retry = Duration::from_millis(config::WIFI_RECONNECT_INTERVAL_MS);
        let mut ever_connected = false;

        loop {
            if self.is_connected() {
                self.controller
                    .wait_for_event(WifiEvent::StaDisconnected)
                    .await;
                warn!("[WIFI] Connection lost, retrying in {}ms", retry.as_millis());
                Timer::after(retry).await;
            }

            match self.connect().await {
                Ok(()) => {
                    if ever_connected {
                        self.reconnects = self.reconnects.wrapping_add(1);
                        info!("[WIFI] Reconnected ({} so far)", self.reconnects);
                    }
                    ever_connected = true;
                }
                Err(e) => {
                    if config::WIFI_SSID.is_empty() {
                        error!("[WIFI] No SSID configured; set WIFI_SSID at build time");
                    } else {
                        warn!("[WIFI] {}, retrying in {}ms", e, retry.as_millis());
                    }
                    Timer::after(retry).await;
                }
            }
        }
    }
}
