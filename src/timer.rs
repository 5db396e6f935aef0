//! One-shot timers that report back through the portal's event channel.
//!
//! A timer never runs coordinator code itself. When it expires it enqueues an
//! [`Event::Timer`] carrying its kind and generation; the event loop hands it
//! to the owning coordinator, which compares the generation with the handle it
//! currently holds and drops the event if the timer was superseded.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::context::{Event, EventSender};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Debounced disconnect/reconfigure/connect.
    Connect,
    /// Checks whether the station came up; used both as the connect watchdog
    /// and as the short delay before switching to station mode.
    StationCheck,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    pub kind: TimerKind,
    pub generation: u64,
}

#[derive(Debug)]
pub struct TimerHandle {
    kind: TimerKind,
    generation: u64,
    token: CancellationToken,
}

impl TimerHandle {
    pub fn kind(&self) -> TimerKind {
        self.kind
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// True if `fired` was produced by this very timer.
    pub fn matches(&self, fired: &TimerFired) -> bool {
        self.kind == fired.kind && self.generation == fired.generation
    }
}

pub struct TimerService {
    events: EventSender,
    next_generation: AtomicU64,
}

impl TimerService {
    pub fn new(events: EventSender) -> Self {
        TimerService {
            events,
            next_generation: AtomicU64::new(1),
        }
    }

    /// Arms a one-shot timer. Must be called from within a tokio runtime.
    pub fn arm(&self, kind: TimerKind, delay: Duration) -> TimerHandle {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {
                    trace!(?kind, generation, "timer cancelled");
                }
                _ = tokio::time::sleep(delay) => {
                    trace!(?kind, generation, "timer fired");
                    let _ = events.send(Event::Timer(TimerFired { kind, generation }));
                }
            }
        });

        TimerHandle {
            kind,
            generation,
            token,
        }
    }
}

/// Holder for the single outstanding timer of a coordinator.
#[derive(Debug, Default)]
pub struct TimerSlot {
    current: Option<TimerHandle>,
}

impl TimerSlot {
    /// Stores `handle`, cancelling whatever it replaces.
    pub fn replace(&mut self, handle: TimerHandle) {
        if let Some(old) = self.current.replace(handle) {
            old.cancel();
        }
    }

    /// Clears the slot if `fired` belongs to the timer it holds. Returns
    /// false for stale events from superseded timers.
    pub fn take_if_current(&mut self, fired: &TimerFired) -> bool {
        match &self.current {
            Some(handle) if handle.matches(fired) => {
                self.current = None;
                true
            }
            _ => false,
        }
    }

    pub fn pending(&self) -> Option<TimerKind> {
        self.current.as_ref().map(TimerHandle::kind)
    }
}
