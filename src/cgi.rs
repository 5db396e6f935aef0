//! Continuation driver for CGI handlers.
//!
//! A handler produces one response in as many invocations as it likes. Each
//! call emits a chunk into the [`CgiConnection`] and returns
//! [`CgiStatus::More`] to be called again once that chunk has been taken, or
//! [`CgiStatus::Done`] when the response is complete. Progress between calls
//! lives in the handler's own typed `State`, kept by the
//! [`ContinuationDriver`] in a per-connection map until the response ends.
//!
//! Calls for one connection are strictly sequential. A handler invoked on a
//! closed connection must return `Done` without emitting anything or causing
//! side effects.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use axum::http::StatusCode;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgiStatus {
    More,
    Done,
}

/// Request arguments plus the output a handler has produced so far.
#[derive(Debug, Default)]
pub struct CgiConnection {
    args: HashMap<String, String>,
    post: HashMap<String, String>,
    closed: bool,
    status: Option<StatusCode>,
    headers: Vec<(&'static str, String)>,
    output: String,
}

impl CgiConnection {
    pub fn new(args: HashMap<String, String>, post: HashMap<String, String>) -> Self {
        CgiConnection {
            args,
            post,
            ..Default::default()
        }
    }

    /// Query-string argument.
    pub fn arg(&self, name: &str) -> Option<&str> {
        self.args.get(name).map(String::as_str)
    }

    /// Form-encoded body argument.
    pub fn post_arg(&self, name: &str) -> Option<&str> {
        self.post.get(name).map(String::as_str)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn mark_closed(&mut self) {
        self.closed = true;
    }

    pub fn start_response(&mut self, status: StatusCode) {
        self.status = Some(status);
    }

    pub fn header(&mut self, name: &'static str, value: impl Into<String>) {
        self.headers.push((name, value.into()));
    }

    pub fn send(&mut self, data: &str) {
        if !self.closed {
            self.output.push_str(data);
        }
    }

    pub fn redirect(&mut self, location: &str) {
        self.start_response(StatusCode::FOUND);
        self.header("Location", location);
        self.send("Moved to ");
        self.send(location);
    }

    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::OK)
    }

    pub fn take_headers(&mut self) -> Vec<(&'static str, String)> {
        std::mem::take(&mut self.headers)
    }

    pub fn take_output(&mut self) -> String {
        std::mem::take(&mut self.output)
    }
}

pub trait CgiHandler: Send + Sync + 'static {
    /// Per-connection progress; `Default` is the "not started" state.
    type State: Default + Send + 'static;

    fn call(&self, conn: &mut CgiConnection, state: &mut Self::State) -> CgiStatus;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(u64);

/// Drives one [`CgiHandler`] for any number of concurrent connections.
pub struct ContinuationDriver<H: CgiHandler> {
    handler: H,
    slots: Mutex<HashMap<ConnId, H::State>>,
    next_id: AtomicU64,
}

impl<H: CgiHandler> ContinuationDriver<H> {
    pub fn new(handler: H) -> Self {
        ContinuationDriver {
            handler,
            slots: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Begins a response with a fresh state slot.
    pub fn open(&self) -> ConnId {
        let id = ConnId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.slots().insert(id, H::State::default());
        id
    }

    /// Invokes the handler once. The slot is discarded when it reports `Done`.
    pub fn step(&self, id: ConnId, conn: &mut CgiConnection) -> CgiStatus {
        let Some(mut state) = self.slots().remove(&id) else {
            return CgiStatus::Done;
        };

        let status = self.handler.call(conn, &mut state);
        if status == CgiStatus::More {
            self.slots().insert(id, state);
        }
        status
    }

    /// Tells the handler its connection went away and releases the slot.
    pub fn abort(&self, id: ConnId, conn: &mut CgiConnection) {
        conn.mark_closed();
        let Some(mut state) = self.slots().remove(&id) else {
            return;
        };
        debug!(?id, "connection closed mid-response");
        if self.handler.call(conn, &mut state) == CgiStatus::More {
            debug!(?id, "handler asked for more on a closed connection; dropping it");
        }
    }

    /// Number of responses still in flight.
    pub fn active(&self) -> usize {
        self.slots().len()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<ConnId, H::State>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Emits "0", "1", .. up to `count - 1`, one per call.
    struct Counter {
        count: usize,
    }

    impl CgiHandler for Counter {
        type State = usize;

        fn call(&self, conn: &mut CgiConnection, next: &mut usize) -> CgiStatus {
            if conn.is_closed() {
                return CgiStatus::Done;
            }
            conn.send(&next.to_string());
            *next += 1;
            if *next >= self.count {
                CgiStatus::Done
            } else {
                CgiStatus::More
            }
        }
    }

    #[test]
    fn drives_to_completion_and_frees_slot() {
        let driver = ContinuationDriver::new(Counter { count: 3 });
        let mut conn = CgiConnection::default();
        let id = driver.open();

        let mut chunks = Vec::new();
        loop {
            let status = driver.step(id, &mut conn);
            chunks.push(conn.take_output());
            if status == CgiStatus::Done {
                break;
            }
        }

        assert_eq!(chunks, ["0", "1", "2"]);
        assert_eq!(driver.active(), 0);
        assert_eq!(driver.step(id, &mut conn), CgiStatus::Done);
    }

    #[test]
    fn connections_keep_independent_state() {
        let driver = ContinuationDriver::new(Counter { count: 10 });
        let (mut a, mut b) = (CgiConnection::default(), CgiConnection::default());
        let (ida, idb) = (driver.open(), driver.open());

        driver.step(ida, &mut a);
        driver.step(ida, &mut a);
        driver.step(idb, &mut b);

        assert_eq!(a.take_output(), "01");
        assert_eq!(b.take_output(), "0");
        assert_eq!(driver.active(), 2);
    }

    #[test]
    fn abort_calls_handler_closed_and_emits_nothing() {
        let driver = ContinuationDriver::new(Counter { count: 10 });
        let mut conn = CgiConnection::default();
        let id = driver.open();
        driver.step(id, &mut conn);
        conn.take_output();

        driver.abort(id, &mut conn);
        assert!(conn.is_closed());
        assert_eq!(conn.take_output(), "");
        assert_eq!(driver.active(), 0);
    }

    #[test]
    fn redirect_sets_found_and_location() {
        let mut conn = CgiConnection::default();
        conn.redirect("/wifi");
        assert_eq!(conn.status(), StatusCode::FOUND);
        assert_eq!(conn.take_headers(), vec![("Location", "/wifi".to_string())]);
    }
}
