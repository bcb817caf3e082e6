//! HTTP listener for webhook deliveries.
//!
//! - `GET` any path: drain and log the body, reply 200, dispatch nothing
//! - `POST` any path: ingress check, parse JSON, launch an isolated unit,
//!   reply 200 as soon as the unit is launched

pub mod error;
pub mod ingress;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::{ConnectInfo, DefaultBodyLimit, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    routing::get,
};
use tokio::net::TcpListener;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::actions::ActionRegistry;
use crate::config::{DEFAULT_MAX_BODY_BYTES, HandlerConfig};
use crate::dispatch::{Dispatcher, Isolation, Pipeline};
use crate::event::WebhookEvent;
use crate::notify::{Notifier, SmtpMailer};

pub use error::WebhookError;
pub use ingress::IngressFilter;

/// Value of the `Server` response header.
pub const SERVER_NAME: &str = concat!("hook-dispatch/", env!("CARGO_PKG_VERSION"));

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub ingress: Arc<IngressFilter>,
    pub pipeline: Pipeline,
    pub isolation: Isolation,
    /// Largest accepted request body, in bytes.
    pub max_body_bytes: usize,
}

impl AppState {
    pub fn new(ingress: IngressFilter, pipeline: Pipeline) -> Self {
        Self {
            ingress: Arc::new(ingress),
            pipeline,
            isolation: Isolation::new(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    /// Wire the frozen registry, the SMTP notifier and the allow-list from
    /// configuration.
    pub fn from_config(config: &HandlerConfig, registry: Arc<ActionRegistry>) -> Self {
        let dispatcher = Dispatcher::new(registry).with_action_timeout(config.action_timeout);
        let notifier = if config.notify.enabled {
            Notifier::new(
                Arc::new(SmtpMailer::new(config.notify.clone())),
                config.notify.from_address.clone(),
            )
        } else {
            Notifier::disabled()
        };
        Self::new(
            IngressFilter::new(config.ingress.allowed_prefixes.clone()),
            Pipeline::new(dispatcher, notifier),
        )
        .with_max_body_bytes(config.max_body_bytes)
    }
}

/// Build the Axum router. Every path answers GET and POST.
///
/// Axum's 2 MB default body limit is replaced with `state.max_body_bytes`;
/// push deliveries for large commits exceed it.
pub fn webhook_routes(state: AppState) -> Router {
    let body_limit = state.max_body_bytes;
    Router::new()
        .route("/", get(handle_get).post(handle_post))
        .route("/{*path}", get(handle_get).post(handle_post))
        .layer(SetResponseHeaderLayer::overriding(
            header::SERVER,
            HeaderValue::from_static(SERVER_NAME),
        ))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = webhook_routes(state).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

// ── GET ─────────────────────────────────────────────────────────────────

async fn handle_get(headers: HeaderMap, body: Bytes) -> StatusCode {
    info!(?headers, "Received GET request");
    info!(body = %String::from_utf8_lossy(&body), "GET request body");
    warn!("Ignoring GET request");
    StatusCode::OK
}

// ── POST ────────────────────────────────────────────────────────────────

async fn handle_post(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, WebhookError> {
    // Rejected sources never get their body parsed or dispatched.
    if !state.ingress.accept(peer.ip()) {
        warn!(peer = %peer, "Received POST request from disallowed source");
        return Err(WebhookError::Forbidden(peer.ip().to_string()));
    }

    info!(peer = %peer, ?headers, "Received POST request");

    let payload: serde_json::Value = serde_json::from_slice(&body).map_err(|e| {
        warn!(peer = %peer, "Unparsable JSON body: {e}");
        WebhookError::InvalidPayload(e.to_string())
    })?;
    let event = WebhookEvent::from_request(&headers, payload).ok_or_else(|| {
        warn!(peer = %peer, "POST request without event type header");
        WebhookError::MissingEventType
    })?;
    let event = Arc::new(event);

    info!(
        delivery = %event.delivery_id,
        event = %event.event_type,
        "Launching isolated unit to route and execute actions"
    );

    let pipeline = state.pipeline.clone();
    let unit_event = Arc::clone(&event);
    let unit = state
        .isolation
        .isolate(&event, async move {
            pipeline.run(unit_event).await;
        })
        .map_err(|e| {
            tracing::error!(delivery = %event.delivery_id, "Failed to launch unit: {e}");
            WebhookError::Internal(e.to_string())
        })?;

    info!(delivery = %event.delivery_id, unit = %unit.id, "Routing handled by unit");
    Ok(StatusCode::OK)
}
