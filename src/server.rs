use anyhow::Context;
use axum::{
    body::Body,
    extract::{Form, Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Router,
};
use futures::{stream, Stream};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::cgi::{CgiConnection, CgiHandler, CgiStatus, ConnId, ContinuationDriver};
use crate::config::ServerConfig;
use crate::connection::{ConnStatusCgi, ConnectCgi};
use crate::context::WifiContext;
use crate::mode::{SetChannelCgi, SetModeCgi};
use crate::scan::ScanCgi;
use crate::template::Pages;

type Args = HashMap<String, String>;

struct AppState {
    scan: Arc<ContinuationDriver<ScanCgi>>,
    connect: Arc<ContinuationDriver<ConnectCgi>>,
    conn_status: Arc<ContinuationDriver<ConnStatusCgi>>,
    set_mode: Arc<ContinuationDriver<SetModeCgi>>,
    set_channel: Arc<ContinuationDriver<SetChannelCgi>>,
    pages: Pages,
}

pub fn router(ctx: Arc<WifiContext>) -> anyhow::Result<Router> {
    let pages = Pages::new(ctx.shared_driver()).context("Failed to load page templates")?;
    let state = Arc::new(AppState {
        scan: Arc::new(ContinuationDriver::new(ScanCgi::new(ctx.clone()))),
        connect: Arc::new(ContinuationDriver::new(ConnectCgi::new(ctx.clone()))),
        conn_status: Arc::new(ContinuationDriver::new(ConnStatusCgi::new(ctx.clone()))),
        set_mode: Arc::new(ContinuationDriver::new(SetModeCgi::new(ctx.clone()))),
        set_channel: Arc::new(ContinuationDriver::new(SetChannelCgi::new(ctx))),
        pages,
    });

    Ok(Router::new()
        .route("/", get(wifi_index))
        .route("/wifi", get(wifi_index))
        .route("/wifi/", get(wifi_index))
        .route("/wifi/wifi.tpl", get(wifi_page))
        .route("/wifi/connecting.html", get(connecting_page))
        .route("/wifi/wifiscan.cgi", get(wifi_scan))
        .route("/wifi/connect.cgi", post(wifi_connect))
        .route("/wifi/connstatus.cgi", get(conn_status))
        .route("/wifi/setmode.cgi", get(set_mode))
        .route("/wifi/setchannel.cgi", get(set_channel))
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}

pub async fn run_server(ctx: Arc<WifiContext>, config: &ServerConfig) -> anyhow::Result<()> {
    let app = router(ctx)?;

    let addr = format!("{}:{}", config.bind, config.port);
    info!("Starting server at http://{addr}/wifi");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn wifi_index() -> Response {
    (StatusCode::FOUND, [(header::LOCATION, "/wifi/wifi.tpl")]).into_response()
}

async fn wifi_page(State(app): State<Arc<AppState>>) -> Response {
    render_page(&app.pages, "wifi.html")
}

async fn connecting_page(State(app): State<Arc<AppState>>) -> Response {
    render_page(&app.pages, "connecting.html")
}

fn render_page(pages: &Pages, name: &str) -> Response {
    match pages.render(name) {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            error!("Template render error: {e:?}");
            (StatusCode::INTERNAL_SERVER_ERROR, "Template error").into_response()
        }
    }
}

async fn wifi_scan(State(app): State<Arc<AppState>>, Query(args): Query<Args>) -> Response {
    serve_cgi(app.scan.clone(), CgiConnection::new(args, Args::new()))
}

async fn wifi_connect(State(app): State<Arc<AppState>>, form: Option<Form<Args>>) -> Response {
    let post = form.map(|Form(post)| post).unwrap_or_default();
    serve_cgi(app.connect.clone(), CgiConnection::new(Args::new(), post))
}

async fn conn_status(State(app): State<Arc<AppState>>) -> Response {
    serve_cgi(app.conn_status.clone(), CgiConnection::default())
}

async fn set_mode(State(app): State<Arc<AppState>>, Query(args): Query<Args>) -> Response {
    serve_cgi(app.set_mode.clone(), CgiConnection::new(args, Args::new()))
}

async fn set_channel(State(app): State<Arc<AppState>>, Query(args): Query<Args>) -> Response {
    serve_cgi(app.set_channel.clone(), CgiConnection::new(args, Args::new()))
}

/// Runs the first handler invocation for status and headers, then streams
/// the rest of the response as the body is polled.
fn serve_cgi<H: CgiHandler>(driver: Arc<ContinuationDriver<H>>, conn: CgiConnection) -> Response {
    let mut pump = ResponsePump::start(driver, conn);

    let mut builder = Response::builder().status(pump.conn.status());
    for (name, value) in pump.conn.take_headers() {
        builder = builder.header(name, value);
    }

    let body = if pump.finished {
        Body::from(pump.pending.take().unwrap_or_default())
    } else {
        Body::from_stream(pump.into_stream())
    };

    match builder.body(body) {
        Ok(response) => response,
        Err(e) => {
            error!("Failed to build CGI response: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Feeds one connection's handler output into a response body. The handler
/// is invoked again only when the body asks for the next chunk; dropping the
/// body early aborts the handler.
struct ResponsePump<H: CgiHandler> {
    driver: Arc<ContinuationDriver<H>>,
    id: ConnId,
    conn: CgiConnection,
    pending: Option<String>,
    finished: bool,
}

impl<H: CgiHandler> ResponsePump<H> {
    fn start(driver: Arc<ContinuationDriver<H>>, mut conn: CgiConnection) -> Self {
        let id = driver.open();
        let status = driver.step(id, &mut conn);
        let pending = Some(conn.take_output());
        ResponsePump {
            driver,
            id,
            conn,
            pending,
            finished: status == CgiStatus::Done,
        }
    }

    fn next_chunk(&mut self) -> Option<String> {
        if let Some(chunk) = self.pending.take().filter(|c| !c.is_empty()) {
            return Some(chunk);
        }
        while !self.finished {
            self.finished = self.driver.step(self.id, &mut self.conn) == CgiStatus::Done;
            let chunk = self.conn.take_output();
            if !chunk.is_empty() {
                return Some(chunk);
            }
        }
        None
    }

    fn into_stream(self) -> impl Stream<Item = Result<String, Infallible>> + Send + 'static {
        stream::unfold(self, |mut pump| async move {
            pump.next_chunk().map(|chunk| (Ok(chunk), pump))
        })
    }
}

impl<H: CgiHandler> Drop for ResponsePump<H> {
    fn drop(&mut self) {
        if !self.finished {
            debug!("response body dropped before completion");
            self.driver.abort(self.id, &mut self.conn);
        }
    }
}
