//! Radio mode and soft-AP channel endpoints. Both always redirect back to
//! `/wifi`; values that are missing or out of range are ignored.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::cgi::{CgiConnection, CgiHandler, CgiStatus};
use crate::context::WifiContext;
use crate::driver::WifiMode;

/// Valid 2.4 GHz channels.
const CHANNELS: std::ops::RangeInclusive<u8> = 1..=14;

fn parse_mode(raw: &str) -> Option<WifiMode> {
    raw.trim().parse::<i64>().ok().and_then(WifiMode::from_code)
}

fn parse_channel(raw: &str) -> Option<u8> {
    raw.trim()
        .parse::<u8>()
        .ok()
        .filter(|ch| CHANNELS.contains(ch))
}

/// `GET /wifi/setmode.cgi?mode=N`
pub struct SetModeCgi {
    ctx: Arc<WifiContext>,
}

impl SetModeCgi {
    pub fn new(ctx: Arc<WifiContext>) -> Self {
        SetModeCgi { ctx }
    }
}

impl CgiHandler for SetModeCgi {
    type State = ();

    fn call(&self, conn: &mut CgiConnection, _state: &mut ()) -> CgiStatus {
        if conn.is_closed() {
            return CgiStatus::Done;
        }

        if let Some(raw) = conn.arg("mode") {
            debug!("setmode: {raw}");
            match parse_mode(raw) {
                Some(_) if self.ctx.settings().demo_mode => {
                    info!("demo mode: not changing mode");
                }
                Some(mode) => {
                    info!("switching to {mode} mode");
                    if let Err(e) = self.ctx.driver().set_mode(mode) {
                        error!("set mode failed: {e}");
                    }
                }
                None => warn!("ignoring invalid mode '{raw}'"),
            }
        }

        conn.redirect("/wifi");
        CgiStatus::Done
    }
}

/// `GET /wifi/setchannel.cgi?ch=N`
pub struct SetChannelCgi {
    ctx: Arc<WifiContext>,
}

impl SetChannelCgi {
    pub fn new(ctx: Arc<WifiContext>) -> Self {
        SetChannelCgi { ctx }
    }
}

impl CgiHandler for SetChannelCgi {
    type State = ();

    fn call(&self, conn: &mut CgiConnection, _state: &mut ()) -> CgiStatus {
        if conn.is_closed() {
            return CgiStatus::Done;
        }

        if let Some(raw) = conn.arg("ch") {
            match parse_channel(raw) {
                Some(_) if self.ctx.settings().demo_mode => {
                    info!("demo mode: not changing channel");
                }
                Some(channel) => {
                    info!("setting channel={channel}");
                    if let Err(e) = self.ctx.driver().set_channel(channel) {
                        error!("set channel failed: {e}");
                    }
                }
                None => warn!("ignoring invalid channel '{raw}'"),
            }
        }

        conn.redirect("/wifi");
        CgiStatus::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use axum::http::StatusCode;

    use crate::cgi::ContinuationDriver;
    use crate::config::WifiSettings;
    use crate::context::event_channel;
    use crate::driver::WifiDriver;
    use crate::sim::SimDriver;

    fn setup(demo_mode: bool) -> (Arc<WifiContext>, Arc<SimDriver>) {
        let (tx, _rx) = event_channel();
        let sim = Arc::new(SimDriver::new(tx.clone()));
        let settings = WifiSettings {
            demo_mode,
            ..WifiSettings::default()
        };
        (WifiContext::new(sim.clone(), tx, settings), sim)
    }

    fn run<H: CgiHandler>(handler: H, key: &str, value: &str) -> CgiConnection {
        let args = HashMap::from([(key.to_string(), value.to_string())]);
        let mut conn = CgiConnection::new(args, HashMap::new());
        let driver = ContinuationDriver::new(handler);
        let id = driver.open();
        assert_eq!(driver.step(id, &mut conn), CgiStatus::Done);
        conn
    }

    #[test]
    fn parses_only_valid_modes_and_channels() {
        assert_eq!(parse_mode("3"), Some(WifiMode::StationAndAccessPoint));
        assert_eq!(parse_mode("4"), None);
        assert_eq!(parse_mode("ap"), None);
        assert_eq!(parse_channel("1"), Some(1));
        assert_eq!(parse_channel("14"), Some(14));
        assert_eq!(parse_channel("0"), None);
        assert_eq!(parse_channel("15"), None);
        assert_eq!(parse_channel("-3"), None);
    }

    #[test]
    fn applies_mode_and_redirects() {
        let (ctx, sim) = setup(false);
        let conn = run(SetModeCgi::new(ctx), "mode", "2");
        assert_eq!(conn.status(), StatusCode::FOUND);
        assert_eq!(sim.mode().unwrap(), WifiMode::AccessPoint);
    }

    #[test]
    fn ignores_invalid_mode() {
        let (ctx, sim) = setup(false);
        run(SetModeCgi::new(ctx), "mode", "7");
        assert_eq!(sim.mode().unwrap(), WifiMode::StationAndAccessPoint);
    }

    #[test]
    fn applies_valid_channel_only() {
        let (ctx, sim) = setup(false);
        run(SetChannelCgi::new(ctx.clone()), "ch", "11");
        assert_eq!(sim.channel(), 11);
        run(SetChannelCgi::new(ctx), "ch", "15");
        assert_eq!(sim.channel(), 11);
    }

    #[test]
    fn demo_mode_applies_nothing() {
        let (ctx, sim) = setup(true);
        let mut conn = run(SetModeCgi::new(ctx.clone()), "mode", "1");
        run(SetChannelCgi::new(ctx), "ch", "9");
        assert_eq!(sim.mode().unwrap(), WifiMode::StationAndAccessPoint);
        assert_eq!(sim.channel(), 1);
        assert_eq!(conn.take_headers(), vec![("Location", "/wifi".to_string())]);
    }
}
