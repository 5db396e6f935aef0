use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::WifiPortalError;

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub wifi: WifiSettings,
    #[serde(default)]
    pub access_point: AccessPointConfig,
    #[serde(default)]
    pub upload: Option<UploadConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

/// What to do with credentials submitted while an attempt is still Working.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResubmitPolicy {
    /// Overwrite the pending credentials and re-arm the connect delay.
    #[default]
    Restart,
    /// Keep the running attempt and refuse the new credentials.
    Reject,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WifiSettings {
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default = "default_connect_delay_ms")]
    pub connect_delay_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_restart_delay_ms")]
    pub restart_delay_ms: u64,
    #[serde(default)]
    pub on_resubmit: ResubmitPolicy,
    /// Accept requests but never touch the radio configuration.
    #[serde(default)]
    pub demo_mode: bool,
}

impl WifiSettings {
    pub fn connect_delay(&self) -> Duration {
        Duration::from_millis(self.connect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }
}

impl Default for WifiSettings {
    fn default() -> Self {
        WifiSettings {
            interface: None,
            connect_delay_ms: default_connect_delay_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            restart_delay_ms: default_restart_delay_ms(),
            on_resubmit: ResubmitPolicy::default(),
            demo_mode: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AccessPointConfig {
    #[serde(default = "default_ap_ssid")]
    pub ssid: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_ap_channel")]
    pub channel: u8,
}

impl Default for AccessPointConfig {
    fn default() -> Self {
        AccessPointConfig {
            ssid: default_ap_ssid(),
            password: String::new(),
            channel: default_ap_channel(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UploadKind {
    Firmware,
    Espfs,
}

/// Flash layout for the firmware upload endpoint.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UploadConfig {
    pub kind: UploadKind,
    pub fw1_pos: u32,
    /// Second OTA slot; required for `firmware`, unused for `espfs`.
    #[serde(default)]
    pub fw2_pos: Option<u32>,
    pub fw_size: u32,
    #[serde(default)]
    pub tag_name: String,
}

impl UploadConfig {
    pub fn validate(&self) -> Result<(), WifiPortalError> {
        if self.fw_size == 0 {
            return Err(WifiPortalError::InvalidConfig(
                "upload.fw_size must be non-zero".to_string(),
            ));
        }

        if self.kind == UploadKind::Firmware {
            let fw2_pos = self.fw2_pos.ok_or_else(|| {
                WifiPortalError::InvalidConfig(
                    "upload.fw2_pos is required for kind = \"firmware\"".to_string(),
                )
            })?;
            let (lo, hi) = if self.fw1_pos <= fw2_pos {
                (self.fw1_pos, fw2_pos)
            } else {
                (fw2_pos, self.fw1_pos)
            };
            if u64::from(lo) + u64::from(self.fw_size) > u64::from(hi) {
                return Err(WifiPortalError::InvalidConfig(format!(
                    "firmware slots at {:#x} and {:#x} overlap for size {:#x}",
                    self.fw1_pos, fw2_pos, self.fw_size
                )));
            }
        }

        Ok(())
    }
}

impl Config {
    /// Loads the config from `path`, or from the default location when `None`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => config_path()?,
        };
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        if let Some(upload) = &config.upload {
            upload.validate()?;
        }
        Ok(config)
    }
}

pub fn config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .context("Could not determine config directory")?;
    Ok(config_dir.join("wifi-portal").join("config.toml"))
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_connect_delay_ms() -> u64 {
    200
}

fn default_connect_timeout_ms() -> u64 {
    15_000
}

fn default_restart_delay_ms() -> u64 {
    1_000
}

fn default_ap_ssid() -> String {
    "wifi-portal".to_string()
}

fn default_ap_channel() -> u8 {
    1
}
