//! WiFi driver backed by NetworkManager's `nmcli`.
//!
//! Every nmcli invocation runs on a dedicated worker thread, in the order the
//! commands were issued, so the driver methods themselves return
//! immediately. Scan results come back as [`DriverEvent`]s; connection
//! outcomes update the cached link state read by
//! [`WifiDriver::is_connected`].
//!
//! # Requirements
//!
//! - NetworkManager must be installed and running
//! - The `nmcli` command must be available in PATH
//! - User must have permission to manage network connections

use std::net::Ipv4Addr;
use std::process::{Command, Output};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use tracing::{debug, error, info, warn};

use crate::config::AccessPointConfig;
use crate::context::{Event, EventSender};
use crate::driver::{AccessPointRecord, AuthMode, DriverEvent, StationConfig, WifiDriver, WifiMode};
use crate::error::{Result, WifiPortalError};

#[derive(Debug, Clone)]
pub struct WifiInterface {
    pub name: String,
    pub state: String,
}

/// Link information for one device, from `nmcli -t device show`.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DeviceStatus {
    pub interface: String,
    /// Raw state, e.g. "100 (connected)".
    pub state: String,
    pub connection: Option<String>,
    pub ip_address: Option<Ipv4Addr>,
}

impl DeviceStatus {
    pub fn is_connected(&self) -> bool {
        self.state.starts_with("100") && self.ip_address.is_some()
    }
}

fn run(args: &[&str]) -> Result<Output> {
    let output = Command::new("nmcli")
        .args(args)
        .output()
        .map_err(|e| WifiPortalError::NmcliExecution(e.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let msg = if stderr.trim().is_empty() { stdout } else { stderr };
        return Err(WifiPortalError::NmcliExecution(msg.trim().to_string()));
    }
    Ok(output)
}

/// Splits one line of terse (`-t`) output. nmcli escapes `:` and `\` inside
/// values with a backslash.
fn split_terse(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            ':' => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

/// List all WiFi interfaces on the system
pub fn list_wifi_interfaces() -> Result<Vec<WifiInterface>> {
    let output = run(&["-t", "-f", "DEVICE,TYPE,STATE", "device"])?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(parse_interfaces(&stdout))
}

fn parse_interfaces(stdout: &str) -> Vec<WifiInterface> {
    stdout
        .lines()
        .map(split_terse)
        .filter(|parts| parts.len() >= 3 && parts[1] == "wifi")
        .map(|parts| WifiInterface {
            name: parts[0].clone(),
            state: parts[2].clone(),
        })
        .collect()
}

/// Resolve interface: use provided name or the first WiFi device
pub fn resolve_interface(interface: Option<&str>) -> Result<WifiInterface> {
    let interfaces = list_wifi_interfaces()?;
    match interface {
        Some(name) => interfaces
            .into_iter()
            .find(|i| i.name == name)
            .ok_or_else(|| WifiPortalError::InterfaceNotFound(name.to_string())),
        None => interfaces
            .into_iter()
            .next()
            .ok_or(WifiPortalError::NoWifiInterfaceFound),
    }
}

/// Rescans and returns every access point nmcli reports, in its order.
pub fn scan_blocking(interface: &str) -> Result<Vec<AccessPointRecord>> {
    // rescan is refused while a scan is already running; the list below
    // still returns the cached results then
    if let Err(e) = run(&["device", "wifi", "rescan", "ifname", interface]) {
        debug!("rescan on {interface} refused: {e}");
    }

    let output = run(&[
        "-t",
        "-f",
        "SSID,BSSID,CHAN,SIGNAL,SECURITY",
        "device",
        "wifi",
        "list",
        "ifname",
        interface,
    ])?;
    parse_scan_output(&String::from_utf8_lossy(&output.stdout))
}

fn parse_scan_output(stdout: &str) -> Result<Vec<AccessPointRecord>> {
    let mut records = Vec::new();
    for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
        let parts = split_terse(line);
        if parts.len() < 5 {
            return Err(WifiPortalError::NmcliParse(format!("short scan line: {line}")));
        }

        let bssid = parse_bssid(&parts[1])
            .ok_or_else(|| WifiPortalError::NmcliParse(format!("bad BSSID '{}'", parts[1])))?;
        let channel = parts[2].parse().unwrap_or(0);
        let signal: u8 = parts[3].parse().unwrap_or(0);

        records.push(AccessPointRecord {
            ssid: parts[0].clone(),
            bssid,
            rssi: signal_to_rssi(signal),
            authmode: parse_security(&parts[4]),
            channel,
        });
    }
    Ok(records)
}

fn parse_bssid(raw: &str) -> Option<[u8; 6]> {
    let mut bssid = [0u8; 6];
    let mut octets = raw.split(':');
    for byte in bssid.iter_mut() {
        *byte = u8::from_str_radix(octets.next()?, 16).ok()?;
    }
    octets.next().is_none().then_some(bssid)
}

/// Places nmcli's 0-100 signal on the raw RSSI scale so that
/// [`crate::scan::rssi_percent`] gives the signal back (rounded down to even).
fn signal_to_rssi(signal: u8) -> i16 {
    150 + i16::from(signal.min(100)) / 2
}

fn parse_security(raw: &str) -> AuthMode {
    let raw = raw.trim();
    if raw.is_empty() || raw == "--" {
        AuthMode::Open
    } else if raw.contains("802.1X") {
        AuthMode::Wpa2Enterprise
    } else if raw.contains("WPA3") {
        AuthMode::Wpa3Psk
    } else if raw.contains("WPA1") && raw.contains("WPA2") {
        AuthMode::WpaWpa2Psk
    } else if raw.contains("WPA2") {
        AuthMode::Wpa2Psk
    } else if raw.contains("WPA") {
        AuthMode::WpaPsk
    } else if raw.contains("WEP") {
        AuthMode::Wep
    } else {
        AuthMode::Other(u8::MAX)
    }
}

/// Retrieves link state for `interface` via `nmcli -t device show`.
pub fn device_status(interface: &str) -> Result<DeviceStatus> {
    let output = run(&["-t", "device", "show", interface])?;
    Ok(parse_device_status(
        interface,
        &String::from_utf8_lossy(&output.stdout),
    ))
}

fn parse_device_status(interface: &str, stdout: &str) -> DeviceStatus {
    let mut status = DeviceStatus {
        interface: interface.to_string(),
        state: "unknown".to_string(),
        ..Default::default()
    };

    for line in stdout.lines() {
        // values may contain colons; split on the first one only
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let present = !value.is_empty() && value != "--";

        match key {
            "GENERAL.STATE" => status.state = value.to_string(),
            "GENERAL.CONNECTION" if present => status.connection = Some(value.to_string()),
            "IP4.ADDRESS[1]" => {
                let addr = value.split('/').next().unwrap_or_default();
                status.ip_address = addr.parse().ok();
            }
            _ => {}
        }
    }

    status
}

fn connect_blocking(interface: &str, config: &StationConfig) -> Result<()> {
    let mut args = vec!["device", "wifi", "connect", config.ssid.as_str()];
    if !config.password.is_empty() {
        args.extend(["password", config.password.as_str()]);
    }
    args.extend(["ifname", interface]);

    run(&args)
        .map(|_| ())
        .map_err(|e| WifiPortalError::driver("connect", e.to_string()))
}

#[derive(Debug)]
enum Job {
    Scan,
    Disconnect,
    Connect(StationConfig),
}

#[derive(Debug)]
struct LinkState {
    mode: WifiMode,
    channel: u8,
    station: StationConfig,
    access_point: StationConfig,
    connected: bool,
    ip: Option<Ipv4Addr>,
}

pub struct NmcliDriver {
    interface: String,
    jobs: std_mpsc::Sender<Job>,
    state: Arc<Mutex<LinkState>>,
}

fn lock(state: &Mutex<LinkState>) -> MutexGuard<'_, LinkState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

impl NmcliDriver {
    pub fn new(interface: &str, ap: &AccessPointConfig, events: EventSender) -> Result<Self> {
        let status = device_status(interface)?;
        info!(
            "using {}: {} ({})",
            status.interface,
            status.state,
            status.connection.as_deref().unwrap_or("no connection")
        );

        let state = Arc::new(Mutex::new(LinkState {
            mode: WifiMode::StationAndAccessPoint,
            channel: ap.channel,
            station: StationConfig {
                ssid: status.connection.clone().unwrap_or_default(),
                password: String::new(),
            },
            access_point: StationConfig {
                ssid: ap.ssid.clone(),
                password: ap.password.clone(),
            },
            connected: status.is_connected(),
            ip: status.ip_address,
        }));

        let (jobs, queue) = std_mpsc::channel();
        let worker_state = state.clone();
        let worker_iface = interface.to_string();
        thread::Builder::new()
            .name("nmcli".to_string())
            .spawn(move || worker(worker_iface, queue, worker_state, events))
            .map_err(|e| WifiPortalError::NmcliExecution(e.to_string()))?;

        Ok(NmcliDriver {
            interface: interface.to_string(),
            jobs,
            state,
        })
    }

    fn enqueue(&self, op: &'static str, job: Job) -> Result<()> {
        self.jobs
            .send(job)
            .map_err(|_| WifiPortalError::driver(op, "nmcli worker stopped"))
    }

    fn state(&self) -> MutexGuard<'_, LinkState> {
        lock(&self.state)
    }
}

fn worker(
    interface: String,
    queue: std_mpsc::Receiver<Job>,
    state: Arc<Mutex<LinkState>>,
    events: EventSender,
) {
    for job in queue {
        match job {
            Job::Scan => {
                let event = match scan_blocking(&interface) {
                    Ok(records) => DriverEvent::ScanDone(records),
                    Err(e) => DriverEvent::ScanFailed(e.to_string()),
                };
                if events.send(Event::Driver(event)).is_err() {
                    warn!("event loop gone; stopping nmcli worker");
                    return;
                }
            }
            Job::Disconnect => {
                if let Err(e) = run(&["device", "disconnect", interface.as_str()]) {
                    debug!("disconnect {interface}: {e}");
                }
            }
            Job::Connect(config) => match connect_blocking(&interface, &config) {
                Ok(()) => {
                    let ip = device_status(&interface)
                        .map(|s| s.ip_address)
                        .unwrap_or_else(|e| {
                            warn!("cannot read address of {interface}: {e}");
                            None
                        });
                    info!("connected to {} with address {ip:?}", config.ssid);
                    let mut link = lock(&state);
                    // a newer config was set while this one was connecting
                    if link.station == config {
                        link.connected = ip.is_some();
                        link.ip = ip;
                    }
                }
                Err(e) => error!("connecting to {} failed: {e}", config.ssid),
            },
        }
    }
}

impl WifiDriver for NmcliDriver {
    fn start_scan(&self) -> Result<()> {
        self.enqueue("scan_start", Job::Scan)
    }

    fn disconnect(&self) -> Result<()> {
        {
            let mut link = self.state();
            link.connected = false;
            link.ip = None;
        }
        self.enqueue("disconnect", Job::Disconnect)
    }

    fn set_station_config(&self, config: &StationConfig) -> Result<()> {
        self.state().station = config.clone();
        Ok(())
    }

    fn connect(&self) -> Result<()> {
        let station = self.state().station.clone();
        if station.ssid.is_empty() {
            return Err(WifiPortalError::driver("connect", "no station SSID configured"));
        }
        self.enqueue("connect", Job::Connect(station))
    }

    fn is_connected(&self) -> bool {
        self.state().connected
    }

    fn station_ip(&self) -> Option<Ipv4Addr> {
        self.state().ip
    }

    fn mode(&self) -> Result<WifiMode> {
        Ok(self.state().mode)
    }

    fn set_mode(&self, mode: WifiMode) -> Result<()> {
        // NetworkManager owns the hotspot; only the requested mode is kept
        info!("{}: mode set to {mode}", self.interface);
        self.state().mode = mode;
        Ok(())
    }

    fn set_channel(&self, channel: u8) -> Result<()> {
        info!("{}: soft-AP channel set to {channel}", self.interface);
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
        Err(WifiPortalError::Unsupported("restart"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::rssi_percent;

    #[test]
    fn splits_escaped_terse_fields() {
        assert_eq!(
            split_terse(r"Cafe\: Free:AA\:BB\:CC\:DD\:EE\:FF:6:72:WPA2"),
            ["Cafe: Free", "AA:BB:CC:DD:EE:FF", "6", "72", "WPA2"]
        );
        assert_eq!(split_terse(r"back\\slash::"), ["back\\slash", "", ""]);
    }

    #[test]
    fn parses_scan_list() {
        let out = "HomeNet:24\\:0A\\:C4\\:11\\:22\\:33:6:80:WPA1 WPA2\n\
                   :58\\:EF\\:68\\:40\\:01\\:9C:11:31:\n\
                   Corp:9C\\:3D\\:CF\\:7A\\:10\\:02:36:55:WPA2 802.1X\n";
        let records = parse_scan_output(out).unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].ssid, "HomeNet");
        assert_eq!(records[0].bssid, [0x24, 0x0a, 0xc4, 0x11, 0x22, 0x33]);
        assert_eq!(records[0].channel, 6);
        assert_eq!(records[0].authmode, AuthMode::WpaWpa2Psk);
        assert_eq!(rssi_percent(records[0].rssi), 80);
        assert_eq!(records[1].ssid, "");
        assert_eq!(records[1].authmode, AuthMode::Open);
        assert_eq!(records[2].authmode, AuthMode::Wpa2Enterprise);
    }

    #[test]
    fn rejects_malformed_scan_lines() {
        assert!(parse_scan_output("HomeNet:zz:6:80:WPA2").is_err());
        assert!(parse_scan_output("HomeNet:6").is_err());
    }

    #[test]
    fn signal_mapping_round_trips_through_percent() {
        for signal in [0u8, 2, 50, 64, 100] {
            assert_eq!(rssi_percent(signal_to_rssi(signal)), signal);
        }
        assert_eq!(rssi_percent(signal_to_rssi(255)), 100);
    }

    #[test]
    fn parses_device_show_output() {
        let out = "GENERAL.DEVICE:wlan1\n\
                   GENERAL.STATE:100 (connected)\n\
                   GENERAL.CONNECTION:HomeNet\n\
                   IP4.ADDRESS[1]:192.168.4.2/24\n\
                   IP4.GATEWAY:192.168.4.1\n";
        let status = parse_device_status("wlan1", out);

        assert_eq!(status.connection.as_deref(), Some("HomeNet"));
        assert_eq!(status.ip_address, Some(Ipv4Addr::new(192, 168, 4, 2)));
        assert!(status.is_connected());

        let idle = parse_device_status(
            "wlan1",
            "GENERAL.STATE:30 (disconnected)\nGENERAL.CONNECTION:--\nIP4.GATEWAY:--\n",
        );
        assert_eq!(idle.connection, None);
        assert!(!idle.is_connected());
    }

    #[test]
    fn lists_only_wifi_devices() {
        let out = "wlan0:wifi:connected\neth0:ethernet:connected\nwlan1:wifi:disconnected\nlo:loopback:unmanaged\n";
        let names: Vec<_> = parse_interfaces(out).into_iter().map(|i| i.name).collect();
        assert_eq!(names, ["wlan0", "wlan1"]);
    }
}
