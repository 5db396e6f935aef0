use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::Value;
use tower::ServiceExt;

use wifi_portal::{
    config::WifiSettings, event_channel, server, sim::SimDriver, WifiContext, WifiDriver, WifiMode,
};

fn portal(settings: WifiSettings) -> (Router, Arc<SimDriver>) {
    let (tx, rx) = event_channel();
    let sim = Arc::new(
        SimDriver::new(tx.clone()).with_auto(Duration::from_millis(10), Duration::from_millis(50)),
    );
    sim.set_networks(SimDriver::demo_networks());

    let ctx = WifiContext::new(sim.clone(), tx, settings);
    tokio::spawn(ctx.clone().run(rx));

    (server::router(ctx).unwrap(), sim)
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Option<String>, String) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let location = resp
        .headers()
        .get(header::LOCATION)
        .map(|v| v.to_str().unwrap().to_string());
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, location, String::from_utf8(bytes.to_vec()).unwrap())
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Option<String>, String) {
    send(app, Request::get(uri).body(Body::empty()).unwrap()).await
}

async fn post_form(app: &Router, uri: &str, form: &str) -> (StatusCode, Option<String>, String) {
    let req = Request::post(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(form.to_string()))
        .unwrap();
    send(app, req).await
}

async fn status_json(app: &Router) -> Value {
    let (status, _, body) = get(app, "/wifi/connstatus.cgi").await;
    assert_eq!(status, StatusCode::OK);
    serde_json::from_str(&body).unwrap()
}

#[tokio::test(start_paused = true)]
async fn index_redirects_to_the_page() {
    let (app, _sim) = portal(WifiSettings::default());

    for uri in ["/", "/wifi"] {
        let (status, location, _) = get(&app, uri).await;
        assert_eq!(status, StatusCode::FOUND);
        assert_eq!(location.as_deref(), Some("/wifi/wifi.tpl"));
    }
}

#[tokio::test(start_paused = true)]
async fn page_shows_current_mode() {
    let (app, _sim) = portal(WifiSettings::default());

    let (status, _, html) = get(&app, "/wifi/wifi.tpl").await;
    assert_eq!(status, StatusCode::OK);
    assert!(html.contains("STA+AP"));
    assert!(html.contains("setmode.cgi?mode=2"));

    let (status, _, html) = get(&app, "/wifi/connecting.html").await;
    assert_eq!(status, StatusCode::OK);
    assert!(html.contains("connstatus.cgi"));
}

#[tokio::test(start_paused = true)]
async fn scan_streams_results_after_first_scan() {
    let (app, sim) = portal(WifiSettings::default());

    // Nothing scanned yet: an empty list, and a scan gets kicked off.
    let (status, _, body) = get(&app, "/wifi/wifiscan.cgi").await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["result"]["inProgress"], "0");
    assert_eq!(json["result"]["APs"].as_array().unwrap().len(), 0);
    assert_eq!(sim.scans_started(), 1);

    let (_, _, body) = get(&app, "/wifi/wifiscan.cgi").await;
    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["result"]["inProgress"], "1");

    tokio::time::sleep(Duration::from_millis(100)).await;

    let (_, _, body) = get(&app, "/wifi/wifiscan.cgi").await;
    let json: Value = serde_json::from_str(&body).unwrap();
    let aps = json["result"]["APs"].as_array().unwrap();
    assert_eq!(aps.len(), 3);
    assert_eq!(aps[0]["essid"], "HomeNet");
    assert_eq!(aps[0]["bssid"], "24:0A:C4:11:22:33");
    assert_eq!(aps[0]["rssi"], "196");
    assert_eq!(aps[0]["rssi_perc"], "92");
    assert_eq!(aps[0]["enc"], "3");
    assert_eq!(aps[0]["channel"], "6");
    assert_eq!(sim.scans_started(), 2);
}

#[tokio::test(start_paused = true)]
async fn connect_succeeds_then_restarts_in_station_mode() {
    let (app, sim) = portal(WifiSettings::default());

    assert_eq!(status_json(&app).await["status"], "idle");

    let (status, location, _) =
        post_form(&app, "/wifi/connect.cgi", "essid=HomeNet&passwd=secret123").await;
    assert_eq!(status, StatusCode::FOUND);
    assert_eq!(location.as_deref(), Some("/wifi/connecting.html"));
    assert_eq!(status_json(&app).await["status"], "working");

    tokio::time::sleep(Duration::from_millis(400)).await;

    let calls = sim.connect_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].ssid, "HomeNet");
    assert_eq!(calls[0].password, "secret123");

    let report = status_json(&app).await;
    assert_eq!(report["status"], "success");
    assert_eq!(report["ip"], "192.168.1.42");

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(sim.restarts(), 1);
    assert_eq!(sim.mode().unwrap(), WifiMode::Station);
}

#[tokio::test(start_paused = true)]
async fn unreachable_network_times_out() {
    let (app, sim) = portal(WifiSettings::default());

    post_form(&app, "/wifi/connect.cgi", "essid=Nowhere&passwd=whatever").await;
    tokio::time::sleep(Duration::from_secs(16)).await;

    let report = status_json(&app).await;
    assert_eq!(report["status"], "fail");
    assert!(report.get("ip").is_none());
    assert_eq!(sim.restarts(), 0);
}

#[tokio::test(start_paused = true)]
async fn incomplete_form_goes_back_to_the_page() {
    let (app, sim) = portal(WifiSettings::default());

    let (status, location, _) = post_form(&app, "/wifi/connect.cgi", "essid=HomeNet").await;
    assert_eq!(status, StatusCode::FOUND);
    assert_eq!(location.as_deref(), Some("/wifi"));

    let req = Request::post("/wifi/connect.cgi").body(Body::empty()).unwrap();
    let (status, location, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::FOUND);
    assert_eq!(location.as_deref(), Some("/wifi"));

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(sim.connect_calls().is_empty());
    assert_eq!(status_json(&app).await["status"], "idle");
}

#[tokio::test(start_paused = true)]
async fn demo_mode_never_touches_the_radio() {
    let settings = WifiSettings {
        demo_mode: true,
        ..WifiSettings::default()
    };
    let (app, sim) = portal(settings);

    let (_, location, _) =
        post_form(&app, "/wifi/connect.cgi", "essid=HomeNet&passwd=secret123").await;
    assert_eq!(location.as_deref(), Some("/wifi"));
    get(&app, "/wifi/setmode.cgi?mode=1").await;
    get(&app, "/wifi/setchannel.cgi?ch=6").await;

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(sim.connect_calls().is_empty());
    assert_eq!(sim.mode().unwrap(), WifiMode::StationAndAccessPoint);
    assert_eq!(sim.channel(), 1);
}

#[tokio::test(start_paused = true)]
async fn mode_and_channel_changes_redirect() {
    let (app, sim) = portal(WifiSettings::default());

    let (status, location, _) = get(&app, "/wifi/setmode.cgi?mode=2").await;
    assert_eq!(status, StatusCode::FOUND);
    assert_eq!(location.as_deref(), Some("/wifi"));
    assert_eq!(sim.mode().unwrap(), WifiMode::AccessPoint);

    let (_, _, html) = get(&app, "/wifi/wifi.tpl").await;
    assert!(html.contains("SoftAP"));
    assert!(html.contains("Can't scan in this mode."));

    let (_, location, _) = get(&app, "/wifi/setchannel.cgi?ch=11").await;
    assert_eq!(location.as_deref(), Some("/wifi"));
    assert_eq!(sim.channel(), 11);

    get(&app, "/wifi/setchannel.cgi?ch=42").await;
    assert_eq!(sim.channel(), 11);
}
