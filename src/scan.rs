//! WiFi scan coordination and the streamed scan endpoint.
//!
//! The [`ScanCoordinator`] owns the scan-in-progress flag and the latest
//! result set. A scan is started with [`ScanCoordinator::request_scan`]; the
//! driver later reports completion through the event loop, which swaps in a
//! new [`ScanResult`] wholesale. Readers take an `Arc` snapshot, so a stream
//! that is halfway through a result set keeps emitting the set it started
//! with even if a newer scan lands meanwhile.
//!
//! [`ScanCgi`] streams the result set as JSON, one access point per
//! invocation:
//!
//! ```text
//! {
//!  "result": {
//! "inProgress": "0",
//! "APs": [
//! {"essid":"home","bssid":"AA:BB:CC:DD:EE:FF","rssi":"180","rssi_perc":"60","enc":"3","channel":"6"},
//!    ...
//! ]
//! }
//! }
//! ```
//!
//! Once the array is closed a fresh scan is requested, so the next poll
//! reports `"inProgress": "1"` until it completes.

use std::collections::TryReserveError;
use std::sync::{Arc, Mutex, MutexGuard};

use axum::http::StatusCode;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::cgi::{CgiConnection, CgiHandler, CgiStatus};
use crate::context::WifiContext;
use crate::driver::{AccessPointRecord, WifiDriver};

const IN_PROGRESS: &str = "{\n \"result\": { \n\"inProgress\": \"1\"\n }\n}\n";
const RESULT_HEAD: &str = "{\n \"result\": { \n\"inProgress\": \"0\", \n\"APs\": [\n";
const RESULT_TAIL: &str = "]\n}\n}\n";

/// Maps a raw RSSI reading onto a 0-100 display quality.
///
/// Readings above 200 are full strength, below 100 are nothing, and the
/// range in between is linear with a slope of two.
pub fn rssi_percent(rssi: i16) -> u8 {
    let rssi = i32::from(rssi);
    let percent = if rssi > 200 {
        100
    } else if rssi < 100 {
        0
    } else {
        100 - 2 * (200 - rssi)
    };
    percent.clamp(0, 100) as u8
}

/// The access points found by one completed scan.
#[derive(Debug, Default)]
pub struct ScanResult {
    records: Vec<AccessPointRecord>,
}

impl ScanResult {
    pub fn records(&self) -> &[AccessPointRecord] {
        &self.records
    }

    pub fn count(&self) -> usize {
        self.records.len()
    }
}

#[derive(Debug, Default)]
struct ScanState {
    in_progress: bool,
    result: Arc<ScanResult>,
}

pub struct ScanCoordinator {
    driver: Arc<dyn WifiDriver>,
    state: Mutex<ScanState>,
}

impl ScanCoordinator {
    pub fn new(driver: Arc<dyn WifiDriver>) -> Self {
        ScanCoordinator {
            driver,
            state: Mutex::new(ScanState::default()),
        }
    }

    /// Starts a scan unless one is already running. Returns whether a scan
    /// command was issued.
    pub fn request_scan(&self) -> bool {
        let mut state = self.state();
        if state.in_progress {
            return false;
        }

        state.in_progress = true;
        debug!("starting scan");
        if let Err(e) = self.driver.start_scan() {
            state.in_progress = false;
            error!("scan start failed: {e}");
            return false;
        }
        true
    }

    /// Replaces the result set with a copy of `records` and clears the
    /// in-progress flag. If the copy cannot be allocated the previous set is
    /// kept.
    pub fn on_scan_complete(&self, records: &[AccessPointRecord]) {
        self.store(copy_records(records), records.len());
    }

    fn store(&self, copy: Result<Vec<AccessPointRecord>, TryReserveError>, found: usize) {
        let mut state = self.state();
        if !state.in_progress {
            debug!("scan result arrived without a pending scan");
        }
        state.in_progress = false;

        match copy {
            Ok(records) => {
                info!("scan done: found {found} APs");
                log_scan_table(&records);
                state.result = Arc::new(ScanResult { records });
            }
            Err(e) => {
                error!("out of memory copying {found} scan records: {e}");
            }
        }
    }

    pub fn on_scan_failed(&self, reason: &str) {
        warn!("scan failed: {reason}");
        self.state().in_progress = false;
    }

    pub fn is_in_progress(&self) -> bool {
        self.state().in_progress
    }

    /// The current result set, or `None` while a scan is running.
    pub fn snapshot(&self) -> Option<Arc<ScanResult>> {
        let state = self.state();
        if state.in_progress {
            None
        } else {
            Some(state.result.clone())
        }
    }

    fn state(&self) -> MutexGuard<'_, ScanState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn copy_records(records: &[AccessPointRecord]) -> Result<Vec<AccessPointRecord>, TryReserveError> {
    let mut copy = Vec::new();
    copy.try_reserve_exact(records.len())?;
    copy.extend_from_slice(records);
    Ok(copy)
}

fn log_scan_table(records: &[AccessPointRecord]) {
    debug!("{:>32} | {:>7} | {:>4} | {:>12}", "SSID", "Channel", "RSSI", "Auth Mode");
    debug!("{}", "-".repeat(64));
    for ap in records {
        debug!(
            "{:>32} | {:>7} | {:>4} | {:>12}",
            ap.ssid,
            ap.channel,
            ap.rssi,
            ap.authmode.to_string()
        );
    }
}

/// Prints scan results as a table on stdout.
pub fn display_networks(records: &[AccessPointRecord]) {
    if records.is_empty() {
        println!("No networks found.");
        return;
    }

    println!(
        "{:<32} {:<17} {:>3} {:>6} {}",
        "SSID", "BSSID", "CH", "SIGNAL", "AUTH"
    );
    println!("{}", "-".repeat(72));

    for ap in records {
        let percent = rssi_percent(ap.rssi);
        println!(
            "{:<32} {:<17} {:>3} {:>3}% {} {}",
            truncate_ssid(&ap.ssid, 32),
            ap.bssid_string(),
            ap.channel,
            percent,
            signal_to_bar(percent),
            ap.authmode
        );
    }
}

fn truncate_ssid(ssid: &str, max_len: usize) -> String {
    if ssid.chars().count() > max_len {
        let head: String = ssid.chars().take(max_len - 3).collect();
        format!("{head}...")
    } else {
        ssid.to_string()
    }
}

fn signal_to_bar(percent: u8) -> &'static str {
    match percent {
        80..=100 => "████",
        60..=79 => "███░",
        40..=59 => "██░░",
        20..=39 => "█░░░",
        _ => "░░░░",
    }
}

#[derive(Serialize)]
struct ApEntry<'a> {
    essid: &'a str,
    bssid: String,
    rssi: String,
    rssi_perc: String,
    enc: String,
    channel: String,
}

fn ap_fragment(ap: &AccessPointRecord, last: bool) -> String {
    let entry = ApEntry {
        essid: &ap.ssid,
        bssid: ap.bssid_string(),
        rssi: ap.rssi.to_string(),
        rssi_perc: rssi_percent(ap.rssi).to_string(),
        enc: ap.authmode.code().to_string(),
        channel: ap.channel.to_string(),
    };
    let json = serde_json::to_string(&entry).unwrap_or_else(|e| {
        error!("failed to encode AP '{}': {e}", ap.ssid);
        "{}".to_string()
    });
    let terminator = if last { "\r\n  " } else { ",\r\n   " };
    format!("{json}{terminator}")
}

/// Where a scan response stands.
#[derive(Debug, Default)]
pub enum ScanCursor {
    #[default]
    Start,
    /// Emitting record `next` (1-based) of `result`.
    Emitting {
        next: usize,
        result: Arc<ScanResult>,
    },
    Finished,
}

/// `GET /wifi/wifiscan.cgi`
pub struct ScanCgi {
    ctx: Arc<WifiContext>,
}

impl ScanCgi {
    pub fn new(ctx: Arc<WifiContext>) -> Self {
        ScanCgi { ctx }
    }
}

impl CgiHandler for ScanCgi {
    type State = ScanCursor;

    fn call(&self, conn: &mut CgiConnection, cursor: &mut ScanCursor) -> CgiStatus {
        if conn.is_closed() {
            return CgiStatus::Done;
        }

        match cursor {
            ScanCursor::Start => {
                conn.start_response(StatusCode::OK);
                conn.header("Content-Type", "application/json");
                match self.ctx.scan().snapshot() {
                    None => {
                        debug!("still scanning");
                        conn.send(IN_PROGRESS);
                        CgiStatus::Done
                    }
                    Some(result) => {
                        conn.send(RESULT_HEAD);
                        *cursor = ScanCursor::Emitting { next: 1, result };
                        CgiStatus::More
                    }
                }
            }
            ScanCursor::Emitting { next, result } => {
                let count = result.count();
                if *next <= count {
                    conn.send(&ap_fragment(&result.records()[*next - 1], *next == count));
                }

                if *next >= count {
                    conn.send(RESULT_TAIL);
                    *cursor = ScanCursor::Finished;
                    self.ctx.scan().request_scan();
                    CgiStatus::Done
                } else {
                    *next += 1;
                    CgiStatus::More
                }
            }
            ScanCursor::Finished => CgiStatus::Done,
        }
    }
}
