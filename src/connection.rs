//! Connection attempts: credential submission, status polling and the timers
//! that drive them.
//!
//! An attempt moves `Idle -> Working` when credentials are submitted. After a
//! short delay the driver is told to disconnect, take the new station config
//! and connect; a watchdog then gives the link [`WifiSettings::connect_timeout`]
//! to come up. The transition to `Success` is lazy: it happens when a client
//! polls the status and the driver reports a connection (or when the
//! watchdog finds the link up). On success a short station check switches the
//! radio to station-only mode and restarts the device.
//!
//! There is one attempt per device and one outstanding timer per attempt.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use axum::http::StatusCode;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::cgi::{CgiConnection, CgiHandler, CgiStatus};
use crate::config::{ResubmitPolicy, WifiSettings};
use crate::context::WifiContext;
use crate::driver::{Credentials, StationConfig, WifiDriver, WifiMode};
use crate::error::WifiPortalError;
use crate::timer::{TimerFired, TimerKind, TimerService, TimerSlot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnStatus {
    Idle,
    Working,
    Success,
    Fail,
}

/// Body of `connstatus.cgi`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub status: ConnStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

impl StatusReport {
    fn new(status: ConnStatus) -> Self {
        StatusReport { status, ip: None }
    }
}

#[derive(Debug)]
struct Attempt {
    status: ConnStatus,
    pending: Option<Credentials>,
    /// Set once the driver accepted the connect command for `pending`.
    connect_issued: bool,
    timer: TimerSlot,
}

pub struct ConnectCoordinator {
    driver: Arc<dyn WifiDriver>,
    timers: TimerService,
    attempt: Mutex<Attempt>,
    connect_delay: Duration,
    connect_timeout: Duration,
    restart_delay: Duration,
    on_resubmit: ResubmitPolicy,
}

impl ConnectCoordinator {
    pub fn new(driver: Arc<dyn WifiDriver>, timers: TimerService, settings: &WifiSettings) -> Self {
        ConnectCoordinator {
            driver,
            timers,
            attempt: Mutex::new(Attempt {
                status: ConnStatus::Idle,
                pending: None,
                connect_issued: false,
                timer: TimerSlot::default(),
            }),
            connect_delay: settings.connect_delay(),
            connect_timeout: settings.connect_timeout(),
            restart_delay: settings.restart_delay(),
            on_resubmit: settings.on_resubmit,
        }
    }

    pub fn status(&self) -> ConnStatus {
        self.attempt().status
    }

    pub fn pending_credentials(&self) -> Option<Credentials> {
        self.attempt().pending.clone()
    }

    pub fn pending_timer(&self) -> Option<TimerKind> {
        self.attempt().timer.pending()
    }

    /// Stores `creds` and schedules the connect. While an attempt is already
    /// Working the outcome depends on the configured [`ResubmitPolicy`].
    pub fn submit_credentials(&self, creds: Credentials) -> Result<(), WifiPortalError> {
        let mut attempt = self.attempt();
        if attempt.status == ConnStatus::Working {
            match self.on_resubmit {
                ResubmitPolicy::Reject => {
                    warn!(ssid = %creds.ssid, "attempt already in progress; rejecting credentials");
                    return Err(WifiPortalError::AttemptInProgress);
                }
                ResubmitPolicy::Restart => {
                    info!(ssid = %creds.ssid, "replacing credentials of the running attempt");
                }
            }
        }

        info!(ssid = %creds.ssid, "connection attempt scheduled");
        attempt.status = ConnStatus::Working;
        attempt.pending = Some(creds);
        attempt.connect_issued = false;
        attempt
            .timer
            .replace(self.timers.arm(TimerKind::Connect, self.connect_delay));
        Ok(())
    }

    /// Connect delay expired: reconfigure the station and start connecting.
    pub fn on_connect_timer(&self, fired: &TimerFired) {
        let mut attempt = self.attempt();
        if !attempt.timer.take_if_current(fired) {
            debug!(generation = fired.generation, "ignoring superseded connect timer");
            return;
        }
        if attempt.status != ConnStatus::Working {
            return;
        }
        let Some(creds) = attempt.pending.clone() else {
            warn!("connect timer fired without credentials");
            attempt.status = ConnStatus::Fail;
            return;
        };

        info!(ssid = %creds.ssid, "connecting");
        if let Err(e) = self.driver.disconnect() {
            warn!("disconnect before reconnect failed: {e}");
        }
        if let Err(e) = self.driver.set_station_config(&StationConfig::from(&creds)) {
            error!("setting station config failed: {e}");
            attempt.status = ConnStatus::Fail;
            return;
        }
        if let Err(e) = self.driver.connect() {
            error!("connect error: {e}");
            attempt.status = ConnStatus::Fail;
            return;
        }

        attempt.connect_issued = true;
        attempt
            .timer
            .replace(self.timers.arm(TimerKind::StationCheck, self.connect_timeout));
    }

    /// Watchdog or post-success check: go station-only if the link is up,
    /// otherwise give up on the attempt.
    pub fn on_station_check(&self, fired: &TimerFired) {
        let mut attempt = self.attempt();
        if !attempt.timer.take_if_current(fired) {
            debug!(generation = fired.generation, "ignoring superseded station check");
            return;
        }

        if self.driver.is_connected() {
            if attempt.status == ConnStatus::Working {
                attempt.status = ConnStatus::Success;
            }
            info!("got IP; going into station-only mode");
            if let Err(e) = self.driver.set_mode(WifiMode::Station) {
                error!("switching to station mode failed: {e}");
            }
            if let Err(e) = self.driver.restart() {
                error!("restart failed: {e}");
            }
        } else {
            attempt.status = ConnStatus::Fail;
            error!("connect failed; not going into station-only mode");
        }
    }

    /// Reports the attempt's status. A Working attempt whose link has come up
    /// becomes Success here, and the switch to station mode is scheduled.
    pub fn poll_status(&self) -> StatusReport {
        let mut attempt = self.attempt();
        match attempt.status {
            ConnStatus::Idle => StatusReport::new(ConnStatus::Idle),
            ConnStatus::Fail => StatusReport::new(ConnStatus::Fail),
            ConnStatus::Working => {
                if !attempt.connect_issued || !self.driver.is_connected() {
                    return StatusReport::new(ConnStatus::Working);
                }
                attempt.status = ConnStatus::Success;
                info!("station connected; scheduling switch to station mode");
                attempt
                    .timer
                    .replace(self.timers.arm(TimerKind::StationCheck, self.restart_delay));
                self.success_report()
            }
            ConnStatus::Success => self.success_report(),
        }
    }

    fn success_report(&self) -> StatusReport {
        StatusReport {
            status: ConnStatus::Success,
            ip: self.driver.station_ip().map(|ip| ip.to_string()),
        }
    }

    fn attempt(&self) -> MutexGuard<'_, Attempt> {
        self.attempt.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// `POST /wifi/connect.cgi` with form fields `essid` and `passwd`.
pub struct ConnectCgi {
    ctx: Arc<WifiContext>,
}

impl ConnectCgi {
    pub fn new(ctx: Arc<WifiContext>) -> Self {
        ConnectCgi { ctx }
    }
}

impl CgiHandler for ConnectCgi {
    type State = ();

    fn call(&self, conn: &mut CgiConnection, _state: &mut ()) -> CgiStatus {
        if conn.is_closed() {
            return CgiStatus::Done;
        }

        let (Some(essid), Some(passwd)) = (conn.post_arg("essid"), conn.post_arg("passwd")) else {
            warn!("connect request without essid/passwd");
            conn.redirect("/wifi");
            return CgiStatus::Done;
        };
        let creds = Credentials::new(essid, passwd);

        if self.ctx.settings().demo_mode {
            info!(ssid = %creds.ssid, "demo mode: not connecting");
            conn.redirect("/wifi");
            return CgiStatus::Done;
        }

        match self.ctx.connection().submit_credentials(creds) {
            Ok(()) => conn.redirect("/wifi/connecting.html"),
            Err(e) => {
                warn!("connect request refused: {e}");
                conn.redirect("/wifi");
            }
        }
        CgiStatus::Done
    }
}

/// `GET /wifi/connstatus.cgi`
pub struct ConnStatusCgi {
    ctx: Arc<WifiContext>,
}

impl ConnStatusCgi {
    pub fn new(ctx: Arc<WifiContext>) -> Self {
        ConnStatusCgi { ctx }
    }
}

impl CgiHandler for ConnStatusCgi {
    type State = ();

    fn call(&self, conn: &mut CgiConnection, _state: &mut ()) -> CgiStatus {
        if conn.is_closed() {
            return CgiStatus::Done;
        }

        conn.start_response(StatusCode::OK);
        conn.header("Content-Type", "application/json");

        let report = self.ctx.connection().poll_status();
        match serde_json::to_string(&report) {
            Ok(body) => conn.send(&body),
            Err(e) => error!("failed to encode status: {e}"),
        }
        CgiStatus::Done
    }
}
