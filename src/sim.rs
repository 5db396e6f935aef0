//! In-memory WiFi driver.
//!
//! Records every command it receives and lets the caller decide when scans
//! complete and whether the station is connected. With [`SimDriver::with_auto`]
//! it completes scans and connects on its own after a delay, which is what
//! `serve --simulate` uses.

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::info;

use crate::config::AccessPointConfig;
use crate::context::{Event, EventSender};
use crate::driver::{
    AccessPointRecord, AuthMode, DriverEvent, StationConfig, WifiDriver, WifiMode,
};
use crate::error::{Result, WifiPortalError};

#[derive(Debug, Clone, Copy)]
struct AutoBehaviour {
    scan_delay: Duration,
    connect_delay: Duration,
}

#[derive(Debug)]
struct SimState {
    mode: WifiMode,
    channel: u8,
    networks: Vec<AccessPointRecord>,
    station: StationConfig,
    access_point: StationConfig,
    connected: bool,
    ip: Ipv4Addr,
    scans_started: usize,
    connect_calls: Vec<StationConfig>,
    disconnects: usize,
    restarts: usize,
    fail_next_scan: bool,
    fail_next_connect: bool,
}

pub struct SimDriver {
    events: EventSender,
    state: Arc<Mutex<SimState>>,
    auto: Option<AutoBehaviour>,
}

impl SimDriver {
    pub fn new(events: EventSender) -> Self {
        let ap = AccessPointConfig::default();
        SimDriver {
            events,
            state: Arc::new(Mutex::new(SimState {
                mode: WifiMode::StationAndAccessPoint,
                channel: ap.channel,
                networks: Vec::new(),
                station: StationConfig::default(),
                access_point: StationConfig {
                    ssid: ap.ssid,
                    password: ap.password,
                },
                connected: false,
                ip: Ipv4Addr::new(192, 168, 1, 42),
                scans_started: 0,
                connect_calls: Vec::new(),
                disconnects: 0,
                restarts: 0,
                fail_next_scan: false,
                fail_next_connect: false,
            })),
            auto: None,
        }
    }

    /// Completes scans after `scan_delay` and brings the link up
    /// `connect_delay` after a connect to one of the known networks.
    pub fn with_auto(mut self, scan_delay: Duration, connect_delay: Duration) -> Self {
        self.auto = Some(AutoBehaviour {
            scan_delay,
            connect_delay,
        });
        self
    }

    pub fn with_access_point(self, ap: &AccessPointConfig) -> Self {
        {
            let mut state = self.state();
            state.access_point = StationConfig {
                ssid: ap.ssid.clone(),
                password: ap.password.clone(),
            };
            state.channel = ap.channel;
        }
        self
    }

    pub fn set_networks(&self, networks: Vec<AccessPointRecord>) {
        self.state().networks = networks;
    }

    /// Reports the configured networks as the result of the running scan.
    pub fn finish_scan(&self) {
        let networks = self.state().networks.clone();
        let _ = self.events.send(Event::Driver(DriverEvent::ScanDone(networks)));
    }

    pub fn fail_next_scan(&self) {
        self.state().fail_next_scan = true;
    }

    pub fn fail_next_connect(&self) {
        self.state().fail_next_connect = true;
    }

    pub fn set_connected(&self, connected: bool) {
        self.state().connected = connected;
    }

    pub fn scans_started(&self) -> usize {
        self.state().scans_started
    }

    pub fn connect_calls(&self) -> Vec<StationConfig> {
        self.state().connect_calls.clone()
    }

    pub fn disconnects(&self) -> usize {
        self.state().disconnects
    }

    pub fn restarts(&self) -> usize {
        self.state().restarts
    }

    pub fn channel(&self) -> u8 {
        self.state().channel
    }

    /// A handful of plausible neighbours for demos.
    pub fn demo_networks() -> Vec<AccessPointRecord> {
        vec![
            AccessPointRecord {
                ssid: "HomeNet".to_string(),
                bssid: [0x24, 0x0a, 0xc4, 0x11, 0x22, 0x33],
                rssi: 196,
                authmode: AuthMode::Wpa2Psk,
                channel: 6,
            },
            AccessPointRecord {
                ssid: "CoffeeShop".to_string(),
                bssid: [0x58, 0xef, 0x68, 0x40, 0x01, 0x9c],
                rssi: 178,
                authmode: AuthMode::Open,
                channel: 11,
            },
            AccessPointRecord {
                ssid: "Neighbour-5G".to_string(),
                bssid: [0x9c, 0x3d, 0xcf, 0x7a, 0x10, 0x02],
                rssi: 161,
                authmode: AuthMode::WpaWpa2Psk,
                channel: 1,
            },
        ]
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        lock(&self.state)
    }
}

fn lock(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

impl WifiDriver for SimDriver {
    fn start_scan(&self) -> Result<()> {
        let mut state = self.state();
        if std::mem::take(&mut state.fail_next_scan) {
            return Err(WifiPortalError::driver("scan_start", "simulated failure"));
        }
        state.scans_started += 1;

        if let Some(auto) = self.auto {
            let events = self.events.clone();
            let shared = self.state.clone();
            tokio::spawn(async move {
                tokio::time::sleep(auto.scan_delay).await;
                let networks = lock(&shared).networks.clone();
                let _ = events.send(Event::Driver(DriverEvent::ScanDone(networks)));
            });
        }
        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        let mut state = self.state();
        state.disconnects += 1;
        state.connected = false;
        Ok(())
    }

    fn set_station_config(&self, config: &StationConfig) -> Result<()> {
        self.state().station = config.clone();
        Ok(())
    }

    fn connect(&self) -> Result<()> {
        let mut state = self.state();
        if std::mem::take(&mut state.fail_next_connect) {
            return Err(WifiPortalError::driver("connect", "simulated failure"));
        }
        let station = state.station.clone();
        state.connect_calls.push(station.clone());

        if let Some(auto) = self.auto {
            let shared = self.state.clone();
            tokio::spawn(async move {
                tokio::time::sleep(auto.connect_delay).await;
                let mut state = lock(&shared);
                if state.station == station && state.networks.iter().any(|n| n.ssid == station.ssid) {
                    state.connected = true;
                }
            });
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state().connected
    }

    fn station_ip(&self) -> Option<Ipv4Addr> {
        let state = self.state();
        state.connected.then_some(state.ip)
    }

    fn mode(&self) -> Result<WifiMode> {
        Ok(self.state().mode)
    }

    fn set_mode(&self, mode: WifiMode) -> Result<()> {
        self.state().mode = mode;
        Ok(())
    }

    fn set_channel(&self, channel: u8) -> Result<()> {
        self.state().channel = channel;
        Ok(())
    }

    fn station_config(&self) -> Result<StationConfig> {
        Ok(self.state().station.clone())
    }

    fn ap_config(&self) -> Result<StationConfig> {
        Ok(self.state().access_point.clone())
    }

    fn restart(&self) -> Result<()> {
        info!("simulated restart");
        self.state().restarts += 1;
        Ok(())
    }
}
