//! Page templates and the WiFi tokens they can reference.
//!
//! Pages are Tera templates. They pull live WiFi state through the `wifi`
//! function, e.g. `{{ wifi(token="WiFiMode") }}`; every call takes a fresh
//! snapshot from the driver.

use std::collections::HashMap;
use std::sync::Arc;

use tera::{Tera, Value};
use tracing::{debug, warn};

use crate::driver::{StationConfig, WifiDriver, WifiMode};
use crate::error::Result;

/// WiFi state relevant to page rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WifiState {
    pub mode: WifiMode,
    /// The soft-AP config in AP mode, the station config while the station
    /// is connected, nothing otherwise.
    pub active: Option<StationConfig>,
}

impl WifiState {
    pub fn capture(driver: &dyn WifiDriver) -> Result<Self> {
        let mode = driver.mode()?;
        let active = match mode {
            WifiMode::AccessPoint => {
                let ap = driver.ap_config()?;
                debug!("AP mode, ssid {}", ap.ssid);
                Some(ap)
            }
            WifiMode::Station | WifiMode::StationAndAccessPoint => {
                if driver.is_connected() {
                    let sta = driver.station_config()?;
                    debug!("station mode, connected to {}", sta.ssid);
                    Some(sta)
                } else {
                    debug!("station mode, disconnected");
                    None
                }
            }
            WifiMode::Disabled => None,
        };
        Ok(WifiState { mode, active })
    }
}

/// Resolves one page token against `state`. Unknown tokens give `Unknown`.
pub fn resolve(token: &str, state: &WifiState) -> String {
    let active = state.active.as_ref();
    match token {
        "WiFiMode" => state.mode.page_label().to_string(),
        "currSsid" => active.map(|c| c.ssid.clone()).unwrap_or_default(),
        "WiFiPasswd" => active.map(|c| c.password.clone()).unwrap_or_default(),
        "WiFiapwarn" => {
            if state.mode == WifiMode::AccessPoint {
                "<b>Can't scan in this mode.</b> Click <a href=\"setmode.cgi?mode=3\">here</a> to go to STA+AP mode."
                    .to_string()
            } else {
                "Click <a href=\"setmode.cgi?mode=2\">here</a> to go to standalone AP mode."
                    .to_string()
            }
        }
        _ => "Unknown".to_string(),
    }
}

/// Captures the current state and resolves `token` against it. A driver
/// error renders as an empty string.
pub fn render_token(driver: &dyn WifiDriver, token: &str) -> String {
    match WifiState::capture(driver) {
        Ok(state) => resolve(token, &state),
        Err(e) => {
            warn!("cannot read WiFi state for '{token}': {e}");
            String::new()
        }
    }
}

struct WifiToken {
    driver: Arc<dyn WifiDriver>,
}

impl tera::Function for WifiToken {
    fn call(&self, args: &HashMap<String, Value>) -> tera::Result<Value> {
        let token = args
            .get("token")
            .and_then(Value::as_str)
            .ok_or_else(|| tera::Error::msg("wifi() needs a string `token` argument"))?;
        Ok(Value::String(render_token(self.driver.as_ref(), token)))
    }
}

pub struct Pages {
    tera: Tera,
}

impl Pages {
    pub fn new(driver: Arc<dyn WifiDriver>) -> tera::Result<Self> {
        let mut tera = Tera::default();
        tera.add_raw_templates(vec![
            ("wifi.html", include_str!("../templates/wifi.html")),
            ("connecting.html", include_str!("../templates/connecting.html")),
        ])?;
        tera.autoescape_on(vec![".html"]);
        tera.register_function("wifi", WifiToken { driver });
        Ok(Pages { tera })
    }

    pub fn render(&self, name: &str) -> tera::Result<String> {
        self.tera.render(name, &tera::Context::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::event_channel;
    use crate::driver::Credentials;
    use crate::sim::SimDriver;

    fn sim() -> Arc<SimDriver> {
        let (tx, _rx) = event_channel();
        Arc::new(SimDriver::new(tx))
    }

    #[test]
    fn mode_labels() {
        let cases = [
            (WifiMode::Disabled, "none"),
            (WifiMode::Station, "Client"),
            (WifiMode::AccessPoint, "SoftAP"),
            (WifiMode::StationAndAccessPoint, "STA+AP"),
        ];
        for (mode, label) in cases {
            let state = WifiState { mode, active: None };
            assert_eq!(resolve("WiFiMode", &state), label);
        }
    }

    #[test]
    fn ap_mode_shows_ap_config_and_scan_warning() {
        let driver = sim();
        driver.set_mode(WifiMode::AccessPoint).unwrap();

        assert_eq!(render_token(driver.as_ref(), "currSsid"), "wifi-portal");
        assert_eq!(render_token(driver.as_ref(), "WiFiPasswd"), "");
        assert!(render_token(driver.as_ref(), "WiFiapwarn").contains("mode=3"));
    }

    #[test]
    fn station_config_only_shown_while_connected() {
        let driver = sim();
        let creds = Credentials::new("HomeNet", "hunter22");
        driver.set_station_config(&StationConfig::from(&creds)).unwrap();

        assert_eq!(render_token(driver.as_ref(), "currSsid"), "");
        driver.set_connected(true);
        assert_eq!(render_token(driver.as_ref(), "currSsid"), "HomeNet");
        assert_eq!(render_token(driver.as_ref(), "WiFiPasswd"), "hunter22");
        assert!(render_token(driver.as_ref(), "WiFiapwarn").contains("mode=2"));
    }

    #[test]
    fn unknown_token_is_a_placeholder() {
        let driver = sim();
        assert_eq!(render_token(driver.as_ref(), "nonsense"), "Unknown");
    }

    #[test]
    fn current_ssid_stays_out_of_script_literals() {
        let driver = sim();
        let creds = Credentials::new("Net\\", "pw");
        driver.set_station_config(&StationConfig::from(&creds)).unwrap();
        driver.set_connected(true);
        let pages = Pages::new(driver.clone()).unwrap();

        let html = pages.render("wifi.html").unwrap();
        assert!(html.contains("data-curr=\"Net\\\""));
        assert!(!html.contains("\"Net\\\")"));
        assert!(html.contains("document.forms.wifiform.dataset.curr"));
    }

    #[test]
    fn page_renders_live_tokens() {
        let driver = sim();
        let pages = Pages::new(driver.clone()).unwrap();

        let html = pages.render("wifi.html").unwrap();
        assert!(html.contains("STA+AP"));
        assert!(html.contains("<a href=\"setmode.cgi?mode=2\">"));

        driver.set_mode(WifiMode::AccessPoint).unwrap();
        let html = pages.render("wifi.html").unwrap();
        assert!(html.contains("SoftAP"));
        assert!(html.contains("Can't scan in this mode."));
    }
}
