//! The portal's shared state and the loop that feeds it events.
//!
//! [`WifiContext`] is built once at startup and lives until the process
//! exits. Drivers and timers never touch it directly: they enqueue an
//! [`Event`], and a single task applies events one at a time via
//! [`WifiContext::dispatch`].

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::WifiSettings;
use crate::connection::ConnectCoordinator;
use crate::driver::{DriverEvent, WifiDriver};
use crate::scan::ScanCoordinator;
use crate::timer::{TimerFired, TimerKind, TimerService};

#[derive(Debug)]
pub enum Event {
    Driver(DriverEvent),
    Timer(TimerFired),
}

pub type EventSender = mpsc::UnboundedSender<Event>;
pub type EventReceiver = mpsc::UnboundedReceiver<Event>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

pub struct WifiContext {
    driver: Arc<dyn WifiDriver>,
    scan: ScanCoordinator,
    connection: ConnectCoordinator,
    settings: WifiSettings,
}

impl WifiContext {
    pub fn new(
        driver: Arc<dyn WifiDriver>,
        events: EventSender,
        settings: WifiSettings,
    ) -> Arc<Self> {
        let timers = TimerService::new(events);
        Arc::new(WifiContext {
            scan: ScanCoordinator::new(driver.clone()),
            connection: ConnectCoordinator::new(driver.clone(), timers, &settings),
            driver,
            settings,
        })
    }

    pub fn driver(&self) -> &dyn WifiDriver {
        self.driver.as_ref()
    }

    pub fn shared_driver(&self) -> Arc<dyn WifiDriver> {
        self.driver.clone()
    }

    pub fn scan(&self) -> &ScanCoordinator {
        &self.scan
    }

    pub fn connection(&self) -> &ConnectCoordinator {
        &self.connection
    }

    pub fn settings(&self) -> &WifiSettings {
        &self.settings
    }

    pub fn dispatch(&self, event: Event) {
        match event {
            Event::Driver(DriverEvent::ScanDone(records)) => {
                self.scan.on_scan_complete(&records);
            }
            Event::Driver(DriverEvent::ScanFailed(reason)) => {
                self.scan.on_scan_failed(&reason);
            }
            Event::Timer(fired) => match fired.kind {
                TimerKind::Connect => self.connection.on_connect_timer(&fired),
                TimerKind::StationCheck => self.connection.on_station_check(&fired),
            },
        }
    }

    /// Applies every event already queued without waiting for more.
    pub fn drain(&self, events: &mut EventReceiver) -> usize {
        let mut applied = 0;
        while let Ok(event) = events.try_recv() {
            self.dispatch(event);
            applied += 1;
        }
        applied
    }

    /// Applies events until every sender is gone.
    pub async fn run(self: Arc<Self>, mut events: EventReceiver) {
        info!("event loop started");
        while let Some(event) = events.recv().await {
            debug!(?event, "dispatching");
            self.dispatch(event);
        }
        info!("event loop stopped");
    }
}
