use thiserror::Error;

#[derive(Error, Debug)]
pub enum WifiPortalError {
    #[error("No WiFi interface found")]
    NoWifiInterfaceFound,

    #[error("Interface '{0}' not found")]
    InterfaceNotFound(String),

    #[error("Failed to execute nmcli: {0}")]
    NmcliExecution(String),

    #[error("Failed to parse nmcli output: {0}")]
    NmcliParse(String),

    #[error("WiFi driver command '{op}' failed: {reason}")]
    DriverCommand { op: &'static str, reason: String },

    #[error("Operation '{0}' is not supported by this driver")]
    Unsupported(&'static str),

    #[error("A connection attempt is already in progress")]
    AttemptInProgress,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl WifiPortalError {
    pub fn driver(op: &'static str, reason: impl Into<String>) -> Self {
        WifiPortalError::DriverCommand {
            op,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, WifiPortalError>;
