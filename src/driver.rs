//! The WiFi driver contract.
//!
//! The portal never talks to a radio directly. Everything it needs from the
//! hardware goes through [`WifiDriver`], whose commands are non-blocking:
//! long-running work (a scan) reports back by sending a [`DriverEvent`] into
//! the portal's event channel, where it is applied by the event loop rather
//! than from the driver's own thread.

use std::fmt;
use std::net::Ipv4Addr;

use crate::error::Result;

/// Maximum SSID length accepted by the station configuration, in bytes.
pub const MAX_SSID_LEN: usize = 32;

/// Maximum passphrase length accepted by the station configuration, in bytes.
pub const MAX_PASSWORD_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiMode {
    Disabled,
    Station,
    AccessPoint,
    StationAndAccessPoint,
}

impl WifiMode {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(WifiMode::Disabled),
            1 => Some(WifiMode::Station),
            2 => Some(WifiMode::AccessPoint),
            3 => Some(WifiMode::StationAndAccessPoint),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            WifiMode::Disabled => 0,
            WifiMode::Station => 1,
            WifiMode::AccessPoint => 2,
            WifiMode::StationAndAccessPoint => 3,
        }
    }

    /// Label used by the `WiFiMode` page token.
    pub fn page_label(self) -> &'static str {
        match self {
            WifiMode::Disabled => "none",
            WifiMode::Station => "Client",
            WifiMode::AccessPoint => "SoftAP",
            WifiMode::StationAndAccessPoint => "STA+AP",
        }
    }
}

impl fmt::Display for WifiMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WifiMode::Disabled => "Disabled",
            WifiMode::Station => "Client",
            WifiMode::AccessPoint => "AP only",
            WifiMode::StationAndAccessPoint => "Client+AP",
        })
    }
}

/// Authentication mode reported for an access point.
///
/// The numeric code is what the scan endpoint emits as `enc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Open,
    Wep,
    WpaPsk,
    Wpa2Psk,
    WpaWpa2Psk,
    Wpa2Enterprise,
    Wpa3Psk,
    Other(u8),
}

impl AuthMode {
    pub fn code(self) -> u8 {
        match self {
            AuthMode::Open => 0,
            AuthMode::Wep => 1,
            AuthMode::WpaPsk => 2,
            AuthMode::Wpa2Psk => 3,
            AuthMode::WpaWpa2Psk => 4,
            AuthMode::Wpa2Enterprise => 5,
            AuthMode::Wpa3Psk => 6,
            AuthMode::Other(code) => code,
        }
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AuthMode::Open => "Open",
            AuthMode::Wep => "WEP",
            AuthMode::WpaPsk => "WPA",
            AuthMode::Wpa2Psk => "WPA2",
            AuthMode::WpaWpa2Psk => "WPA/WPA2",
            _ => "Unknown",
        })
    }
}

/// One access point as captured by a completed scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPointRecord {
    pub ssid: String,
    pub bssid: [u8; 6],
    /// Raw signal strength; see [`crate::scan::rssi_percent`] for its scale.
    pub rssi: i16,
    pub authmode: AuthMode,
    pub channel: u8,
}

impl AccessPointRecord {
    /// BSSID as `AA:BB:CC:DD:EE:FF`.
    pub fn bssid_string(&self) -> String {
        let b = self.bssid;
        format!(
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

/// SSID and passphrase as stored in a station or soft-AP configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StationConfig {
    pub ssid: String,
    pub password: String,
}

/// Credentials for a connection attempt, clipped to what the radio accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub ssid: String,
    pub password: String,
}

impl Credentials {
    pub fn new(ssid: &str, password: &str) -> Self {
        Credentials {
            ssid: clip(ssid, MAX_SSID_LEN).to_string(),
            password: clip(password, MAX_PASSWORD_LEN).to_string(),
        }
    }
}

impl From<&Credentials> for StationConfig {
    fn from(creds: &Credentials) -> Self {
        StationConfig {
            ssid: creds.ssid.clone(),
            password: creds.password.clone(),
        }
    }
}

/// Truncates `s` to at most `max` bytes without splitting a character.
pub fn clip(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Completion notifications raised by a driver outside the serving context.
#[derive(Debug, Clone)]
pub enum DriverEvent {
    ScanDone(Vec<AccessPointRecord>),
    ScanFailed(String),
}

pub trait WifiDriver: Send + Sync {
    /// Starts an active scan; completion arrives as [`DriverEvent::ScanDone`].
    fn start_scan(&self) -> Result<()>;

    fn disconnect(&self) -> Result<()>;

    fn set_station_config(&self, config: &StationConfig) -> Result<()>;

    /// Starts connecting with the current station configuration. Success of
    /// the call does not mean the link is up; see [`WifiDriver::is_connected`].
    fn connect(&self) -> Result<()>;

    /// Whether the station has associated and obtained an address.
    fn is_connected(&self) -> bool;

    fn station_ip(&self) -> Option<Ipv4Addr>;

    fn mode(&self) -> Result<WifiMode>;

    fn set_mode(&self, mode: WifiMode) -> Result<()>;

    fn set_channel(&self, channel: u8) -> Result<()>;

    fn station_config(&self) -> Result<StationConfig>;

    fn ap_config(&self) -> Result<StationConfig>;

    /// Restarts the device. Does not return on real hardware.
    fn restart(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_are_clipped_on_char_boundaries() {
        let long_ssid = "é".repeat(20);
        let creds = Credentials::new(&long_ssid, &"p".repeat(100));
        assert_eq!(creds.ssid.len(), 32);
        assert_eq!(creds.password.len(), 64);

        let odd = format!("a{}", "é".repeat(20));
        assert_eq!(Credentials::new(&odd, "").ssid.len(), 31);
    }

    #[test]
    fn bssid_is_upper_hex_with_colons() {
        let rec = AccessPointRecord {
            ssid: "x".into(),
            bssid: [0xaa, 0x0b, 0xcc, 0x0d, 0xee, 0x0f],
            rssi: 180,
            authmode: AuthMode::Wpa2Psk,
            channel: 6,
        };
        assert_eq!(rec.bssid_string(), "AA:0B:CC:0D:EE:0F");
    }

    #[test]
    fn mode_codes_round_trip_and_reject_out_of_range() {
        for code in 0..=3 {
            assert_eq!(WifiMode::from_code(code).unwrap().code() as i64, code);
        }
        assert_eq!(WifiMode::from_code(4), None);
        assert_eq!(WifiMode::from_code(-1), None);
        assert_eq!(WifiMode::StationAndAccessPoint.to_string(), "Client+AP");
        assert_eq!(AuthMode::Other(9).to_string(), "Unknown");
    }
}
