// File: src/server.rs
// Purpose: axum wiring: route dispatch, sockets, static files, dev endpoints

use crate::config::Config;
use crate::error::{error_response, Error, Result};
use crate::hot_reload::{Coordinator, Notification};
use crate::page_template::render_page;
use crate::registry::{Registry, RouteEntry};
use crate::request::RequestContext;
use crate::script::{ScriptHandler, ScriptRequest, RESPONSE_MARKER};
use axum::{
    body::Body,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Request, State,
    },
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use routekit_router::{Method, RouteKind};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, mpsc};
use tower::ServiceExt;
use tower_http::services::ServeDir;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Largest request body handed to a script
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Path of the development socket
pub const DEV_SOCKET_PATH: &str = "/.well-known/dev";

/// Path of the liveness probe
pub const PING_PATH: &str = "/.well-known/ping";

/// Broadcast channels of socket routes, one per pattern
///
/// Messages carry the sender's connection id so a broadcast skips its author.
#[derive(Clone, Default)]
pub struct SocketHub {
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<(Uuid, String)>>>>,
}

impl SocketHub {
    pub fn channel(&self, pattern: &str) -> broadcast::Sender<(Uuid, String)> {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(pattern.to_string())
            .or_insert_with(|| broadcast::channel(64).0)
            .clone()
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub coordinator: Arc<Coordinator>,
    pub config: Arc<Config>,
    pub sockets: SocketHub,
    static_dir: PathBuf,
}

impl AppState {
    pub fn new(coordinator: Arc<Coordinator>, config: Arc<Config>) -> Self {
        let registry = coordinator.registry().clone();
        let static_dir = registry.base().join(&config.routing.static_dir);
        Self {
            registry,
            coordinator,
            config,
            sockets: SocketHub::default(),
            static_dir,
        }
    }

    fn fail(&self, error: Error, wants_json: bool) -> Response {
        match &error {
            Error::RouteNotReady { .. } => debug!("{}", error),
            Error::Io(_) => error!("{}", error),
            _ => warn!("{}", error),
        }
        error.into_page(self.config.production, wants_json).into_response()
    }
}

/// Builds the application router
///
/// Every path not claimed by a well-known endpoint goes through the route
/// registry, then the static directory.
pub fn router(state: AppState) -> Router {
    let mut app = Router::new().route(PING_PATH, get(ping));
    if state.config.hot_reload_enabled() {
        app = app.route(DEV_SOCKET_PATH, get(dev_socket));
    }
    app.fallback(dispatch).with_state(state)
}

async fn ping() -> StatusCode {
    StatusCode::OK
}

async fn dev_socket(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let notifications = state.coordinator.subscribe();
    ws.on_upgrade(move |socket| handle_dev_socket(socket, notifications))
}

async fn handle_dev_socket(socket: WebSocket, mut notifications: broadcast::Receiver<Notification>) {
    let (mut sender, mut receiver) = socket.split();

    // Browsers never send anything meaningful; drain until they leave
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    });

    let mut send_task = tokio::spawn(async move {
        loop {
            let notification = match notifications.recv().await {
                Ok(notification) => notification,
                // Missed updates cannot be replayed
                Err(broadcast::error::RecvError::Lagged(_)) => Notification::Reload,
                Err(broadcast::error::RecvError::Closed) => break,
            };

            let Ok(json) = serde_json::to_string(&notification) else {
                continue;
            };
            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut recv_task => send_task.abort(),
        _ = &mut send_task => recv_task.abort(),
    }

    tracing::debug!("WebSocket connection closed");
}

/// Route dispatch for every non-well-known path
async fn dispatch(State(state): State<AppState>, upgrade: Option<WebSocketUpgrade>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let path = parts.uri.path().to_string();
    let wants_json = parts
        .headers
        .get(header::ACCEPT)
        .and_then(|accept| accept.to_str().ok())
        .is_some_and(|accept| accept.contains("json"));

    if let Some(upgrade) = upgrade {
        if let Some((entry, params)) = state.registry.match_socket(&path) {
            let ctx = RequestContext::from_parts(&parts, &[]);
            return socket_route(&state, entry, ctx.to_script_request(&params), upgrade)
                .await
                .unwrap_or_else(|error| state.fail(error, wants_json));
        }
    }

    let matched = Method::from_wire(parts.method.as_str()).and_then(|method| state.registry.match_request(&path, method));
    let Some((entry, params)) = matched else {
        if state.registry.match_socket(&path).is_some() {
            return error_response(StatusCode::UPGRADE_REQUIRED, "This route only accepts WebSocket connections.");
        }
        return static_file(&state, Request::from_parts(parts, body)).await;
    };

    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(e) => {
            debug!("Rejected request body: {}", e);
            return error_response(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large.");
        }
    };
    let ctx = RequestContext::from_parts(&parts, &body);
    debug!("{} {} -> {}", ctx.method, ctx.path, entry.route().pattern);

    let result = match entry.route().kind {
        RouteKind::Page => page_route(&state, &entry, ctx.to_script_request(&params)).await,
        RouteKind::Http(_) => http_route(&state, &entry, ctx.to_script_request(&params)).await,
        RouteKind::Socket => Ok(error_response(StatusCode::UPGRADE_REQUIRED, "This route only accepts WebSocket connections.")),
    };
    result.unwrap_or_else(|error| state.fail(error, ctx.accepts_json()))
}

async fn page_route(state: &AppState, entry: &RouteEntry, request: ScriptRequest) -> Result<Response> {
    let compiled = state.registry.compiled(entry).await?;

    let data = if compiled.data_script_source.is_some() {
        let handler = state.registry.handler(entry, Some(compiled.as_ref())).await?;
        call_script(handler, request).await?
    } else {
        Value::Object(Default::default())
    };

    if is_marked_response(&data) {
        return Ok(response_from_value(data));
    }

    let body = compiled.server_module.render(&data);
    let dev = state.config.hot_reload_enabled();
    Ok(Html(render_page(&compiled, &body, &data, dev)).into_response())
}

async fn http_route(state: &AppState, entry: &RouteEntry, request: ScriptRequest) -> Result<Response> {
    let handler = state.registry.handler(entry, None).await?;
    let value = call_script(handler, request).await?;
    Ok(response_from_value(value))
}

/// Runs a script on the blocking pool
async fn call_script(handler: Arc<ScriptHandler>, request: ScriptRequest) -> Result<Value> {
    tokio::task::spawn_blocking(move || handler.call(request))
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))?
        .map_err(Error::from)
}

async fn socket_route(
    state: &AppState,
    entry: Arc<RouteEntry>,
    request: ScriptRequest,
    upgrade: WebSocketUpgrade,
) -> Result<Response> {
    // Build before upgrading so script errors surface as HTTP responses
    let handler = state.registry.handler(&entry, None).await?;
    let hub = state.sockets.channel(&entry.route().pattern);
    Ok(upgrade.on_upgrade(move |socket| handle_route_socket(socket, handler, request, hub)))
}

async fn handle_route_socket(
    socket: WebSocket,
    handler: Arc<ScriptHandler>,
    request: ScriptRequest,
    hub: broadcast::Sender<(Uuid, String)>,
) {
    let id = Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<String>();
    let mut broadcast_rx = hub.subscribe();

    // Run the socket script for each incoming message
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            let text = match msg {
                Message::Text(t) => t,
                Message::Close(_) => break,
                _ => continue,
            };

            let handler = handler.clone();
            let request = request.clone();
            let outcome = tokio::task::spawn_blocking(move || handler.on_message(request, &text)).await;
            match outcome {
                Ok(Ok(reply)) => {
                    if let Some(text) = reply.broadcast {
                        // No other connections is fine
                        let _ = hub.send((id, text));
                    }
                    if let Some(text) = reply.reply {
                        if reply_tx.send(text).is_err() {
                            break;
                        }
                    }
                }
                Ok(Err(e)) => tracing::warn!("Socket script failed: {}", e),
                Err(e) => {
                    tracing::error!("Socket script panicked: {}", e);
                    break;
                }
            }
        }
    });

    // Forward replies and other connections' broadcasts
    let mut send_task = tokio::spawn(async move {
        loop {
            let text = tokio::select! {
                Some(text) = reply_rx.recv() => text,
                received = broadcast_rx.recv() => match received {
                    Ok((from, text)) if from != id => text,
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Socket connection skipped {} broadcasts", skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            };

            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut recv_task => send_task.abort(),
        _ = &mut send_task => recv_task.abort(),
    }

    tracing::debug!("WebSocket connection closed");
}

async fn static_file(state: &AppState, request: Request<Body>) -> Response {
    match ServeDir::new(&state.static_dir).oneshot(request).await {
        Ok(response) if response.status() != StatusCode::NOT_FOUND => response.into_response(),
        _ => error_response(StatusCode::NOT_FOUND, "The page you asked for does not exist."),
    }
}

fn is_marked_response(value: &Value) -> bool {
    value
        .get(RESPONSE_MARKER)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Converts a script result into a response
///
/// `respond(...)` / `redirect(...)` maps set status and headers; otherwise a
/// string is plain text, `()` is 204 and anything else is JSON.
pub fn response_from_value(value: Value) -> Response {
    if !is_marked_response(&value) {
        return match value {
            Value::Null => StatusCode::NO_CONTENT.into_response(),
            other => body_response(StatusCode::OK, other),
        };
    }

    let status = value
        .get("status")
        .and_then(Value::as_u64)
        .and_then(|status| u16::try_from(status).ok())
        .and_then(|status| StatusCode::from_u16(status).ok())
        .unwrap_or(StatusCode::OK);

    let mut response = body_response(status, value.get("body").cloned().unwrap_or(Value::Null));
    if let Some(headers) = value.get("headers").and_then(Value::as_object) {
        for (name, value) in headers {
            let text = match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(&text)) {
                (Ok(name), Ok(value)) => {
                    response.headers_mut().insert(name, value);
                }
                _ => warn!("Ignoring invalid response header {:?}", name),
            }
        }
    }
    response
}

fn body_response(status: StatusCode, body: Value) -> Response {
    match body {
        Value::Null => status.into_response(),
        Value::String(text) => (status, [(header::CONTENT_TYPE, "text/plain; charset=utf-8")], text).into_response(),
        other => (status, Json(other)).into_response(),
    }
}
