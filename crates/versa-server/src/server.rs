//! Development preview server.
//!
//! Serves the output tree on one port and the live reload channel on another.
//! The preview side emulates the edge rewrites of a production deployment:
//! the latest version's own path redirects to the alias directory, and
//! unknown paths redirect to the not-found page.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Request, State,
    },
    handler::HandlerWithoutStateExt,
    http::{StatusCode, Uri},
    middleware::{self, Next},
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use versa_releases::ALIAS_DIR;
use versa_static::{BuildConfig, SiteRenderer};

use crate::livereload::{live_reload_script, ReloadHub, ReloadMessage};
use crate::watcher::{watch_output, SourceWatcher};

/// Page unknown paths are redirected to.
pub const NOT_FOUND_PAGE: &str = "/404.html";

/// Quiet period on the output tree before clients are told to reload.
const OUTPUT_DEBOUNCE: Duration = Duration::from_millis(100);

/// Configuration for the development server.
#[derive(Debug, Clone)]
pub struct DevServerConfig {
    /// Directory served to the browser
    pub output_dir: PathBuf,

    /// Version redirected to the alias directory
    pub latest: String,

    /// Port for the preview server
    pub port: u16,

    /// Port for the live reload channel
    pub live_reload_port: u16,

    /// Host to bind to
    pub host: String,

    /// Quiet period before a source change triggers a rebuild
    pub debounce: Duration,

    /// Open browser on start
    pub open: bool,
}

impl DevServerConfig {
    /// Derive the server settings from the build configuration.
    pub fn from_build(config: &BuildConfig, latest: &str) -> Self {
        Self {
            output_dir: config.output_dir.clone(),
            latest: latest.to_string(),
            port: config.port,
            live_reload_port: config.live_reload_port,
            debounce: config.debounce,
            ..Default::default()
        }
    }
}

impl Default for DevServerConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("dist"),
            latest: String::new(),
            port: 8080,
            live_reload_port: 35729,
            host: "127.0.0.1".to_string(),
            debounce: Duration::from_millis(300),
            open: true,
        }
    }
}

/// Errors that can occur with the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Invalid address {0}")]
    InvalidAddress(String),

    #[error("Failed to bind to {0}: {1}")]
    BindError(SocketAddr, String),

    #[error("Server on {0} stopped: {1}")]
    ServeError(SocketAddr, String),

    #[error("File watch error: {0}")]
    WatchError(String),
}

/// Development server: preview, live reload, and the rebuild loop.
pub struct DevServer {
    config: DevServerConfig,
    renderer: SiteRenderer,
}

impl DevServer {
    /// Create a new development server around a renderer.
    pub fn new(config: DevServerConfig, renderer: SiteRenderer) -> Self {
        Self { config, renderer }
    }

    /// Start serving and watching until Ctrl-C.
    pub async fn start(self) -> Result<(), ServerError> {
        let preview_addr = socket_addr(&self.config.host, self.config.port)?;
        let reload_addr = socket_addr(&self.config.host, self.config.live_reload_port)?;

        let hub = ReloadHub::new();
        let ws_url = format!("ws://{}/livereload", reload_addr);

        let preview_app = preview_router(&self.config.output_dir, &self.config.latest);
        let reload_app = live_reload_router(hub.clone(), ws_url);

        let preview_listener = bind(preview_addr).await?;
        let reload_listener = bind(reload_addr).await?;

        let preview = async move {
            axum::serve(preview_listener, preview_app)
                .with_graceful_shutdown(shutdown_signal())
                .await
                .map_err(|e| ServerError::ServeError(preview_addr, e.to_string()))
        };
        let reload = async move {
            axum::serve(reload_listener, reload_app)
                .with_graceful_shutdown(shutdown_signal())
                .await
                .map_err(|e| ServerError::ServeError(reload_addr, e.to_string()))
        };

        let sources = SourceWatcher::new(self.renderer, self.config.debounce).run();
        let output = watch_output(self.config.output_dir.clone(), OUTPUT_DEBOUNCE, hub);

        tracing::info!("Previewing at http://{}", preview_addr);
        tracing::info!("Live reload on ws://{}/livereload", reload_addr);

        if self.config.open {
            let url = format!("http://{}", preview_addr);
            let _ = open::that(&url);
        }

        tokio::select! {
            result = preview => result?,
            result = reload => result?,
            result = sources => result?,
            result = output => result?,
        }

        tracing::info!("Dev server stopped");
        Ok(())
    }
}

/// Router serving the output tree with the production redirects.
pub fn preview_router(output_dir: &Path, latest: &str) -> Router {
    let latest: Arc<str> = Arc::from(latest);
    let files = ServeDir::new(output_dir).fallback(not_found.into_service());

    Router::new()
        .fallback_service(files)
        .layer(middleware::from_fn_with_state(latest, redirect_latest))
}

/// Router for the live reload side channel.
pub fn live_reload_router(hub: ReloadHub, ws_url: String) -> Router {
    let state = Arc::new(LiveReloadState { hub, ws_url });

    Router::new()
        .route("/livereload", get(ws_handler))
        .route("/livereload.js", get(script_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Redirect target for a request path whose first segment is the latest version.
pub fn latest_redirect(path: &str, latest: &str) -> Option<String> {
    let first = path.trim_start_matches('/').split('/').next()?;

    (!latest.is_empty() && first == latest).then(|| format!("/{}/", ALIAS_DIR))
}

async fn redirect_latest(State(latest): State<Arc<str>>, request: Request, next: Next) -> Response {
    if let Some(target) = latest_redirect(request.uri().path(), &latest) {
        return Redirect::temporary(&target).into_response();
    }

    next.run(request).await
}

async fn not_found(uri: Uri) -> Response {
    if uri.path() == NOT_FOUND_PAGE {
        return (StatusCode::NOT_FOUND, "404 Not Found").into_response();
    }

    Redirect::temporary(NOT_FOUND_PAGE).into_response()
}

struct LiveReloadState {
    hub: ReloadHub,
    ws_url: String,
}

/// Handler for the live reload WebSocket endpoint.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<LiveReloadState>>,
) -> impl IntoResponse {
    let rx = state.hub.subscribe();
    ws.on_upgrade(move |socket| handle_ws(socket, rx))
}

/// Forward reload messages to one client until it disconnects.
async fn handle_ws(
    mut socket: WebSocket,
    mut rx: tokio::sync::broadcast::Receiver<ReloadMessage>,
) {
    if send_message(&mut socket, &ReloadMessage::Connected).await.is_err() {
        return;
    }

    loop {
        match rx.recv().await {
            Ok(msg) => {
                if send_message(&mut socket, &msg).await.is_err() {
                    break;
                }
            }
            // A lagging client only needs to reload once
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                if send_message(&mut socket, &ReloadMessage::Reload).await.is_err() {
                    break;
                }
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn send_message(socket: &mut WebSocket, msg: &ReloadMessage) -> Result<(), axum::Error> {
    let json = serde_json::to_string(msg).map_err(axum::Error::new)?;
    socket.send(Message::Text(json.into())).await
}

/// Handler for the live reload client script.
async fn script_handler(State(state): State<Arc<LiveReloadState>>) -> impl IntoResponse {
    (
        [("content-type", "application/javascript")],
        live_reload_script(&state.ws_url),
    )
}

fn socket_addr(host: &str, port: u16) -> Result<SocketAddr, ServerError> {
    let addr = format!("{}:{}", host, port);
    addr.parse().map_err(|_| ServerError::InvalidAddress(addr))
}

async fn bind(addr: SocketAddr) -> Result<tokio::net::TcpListener, ServerError> {
    tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::BindError(addr, e.to_string()))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
