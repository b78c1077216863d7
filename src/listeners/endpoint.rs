//! Check-in HTTP endpoint served by each running listener.
//!
//! One router per listener. An inbound check-in is filtered by source
//! address, decoded through the packet codec, registered against the
//! shared session registry, and answered with the session's drained task
//! list. Result fragments carried by the check-in are recorded before the
//! response is encoded. A staging fetch serves the listener's
//! communication profile line.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use tracing::{debug, warn};

use crate::codec::PacketCodec;
use crate::models::filter::GlobalFilter;
use crate::models::listener::Listener;
use crate::registry::SessionRegistry;
use crate::tasking::dispatcher::Dispatcher;
use crate::AppError;

/// Shared state handed to every listener router.
pub struct CheckinState {
    /// Listener definition this endpoint serves.
    pub listener: Listener,
    /// Process-wide session registry.
    pub registry: Arc<SessionRegistry>,
    /// Process-wide tasking dispatcher.
    pub dispatcher: Arc<Dispatcher>,
    /// Process-wide IP allow/deny filter.
    pub filter: Arc<GlobalFilter>,
    /// Packet codec collaborator.
    pub codec: Arc<dyn PacketCodec>,
}

/// Build the router for one listener endpoint.
#[must_use]
pub fn router(state: Arc<CheckinState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/staging", get(staging))
        .route("/checkin", post(checkin))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

/// Serve the listener's communication profile line to a staging agent.
async fn staging(
    State(state): State<Arc<CheckinState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    if !state.filter.is_allowed(addr.ip()).await {
        debug!(listener = %state.listener.name, %addr, "staging request rejected by ip filter");
        return StatusCode::FORBIDDEN.into_response();
    }
    match state.listener.options.profile.as_deref() {
        Some(profile) => (StatusCode::OK, profile.to_owned()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

fn status_for(err: &AppError) -> StatusCode {
    match err {
        AppError::Validation(_) | AppError::Codec(_) => StatusCode::BAD_REQUEST,
        AppError::NotFound(_) => StatusCode::NOT_FOUND,
        AppError::Conflict(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn checkin(
    State(state): State<Arc<CheckinState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    body: Bytes,
) -> Response {
    if !state.filter.is_allowed(addr.ip()).await {
        debug!(listener = %state.listener.name, %addr, "check-in rejected by ip filter");
        return StatusCode::FORBIDDEN.into_response();
    }

    match handle_checkin(&state, addr, &body).await {
        Ok(response_body) => (StatusCode::OK, response_body).into_response(),
        Err(err) => {
            warn!(listener = %state.listener.name, %addr, %err, "check-in failed");
            status_for(&err).into_response()
        }
    }
}

async fn handle_checkin(
    state: &Arc<CheckinState>,
    addr: SocketAddr,
    body: &[u8],
) -> crate::Result<Vec<u8>> {
    // The codec needs the session key before the session is known: agents
    // carry their key in the transport envelope, mirrored in the metadata.
    let envelope = state.codec.decode("", body)?;
    let guard_key = envelope
        .metadata
        .session_id
        .clone()
        .unwrap_or_else(|| "staging".to_owned());

    // Serialize the whole read-modify-write sequence for this session so a
    // racing check-in on another listener cannot interleave.
    let guard = state.registry.session_guard(&guard_key).await;
    let _held = guard.lock().await;

    let (session, is_new) = state
        .registry
        .register(
            &state.listener,
            &envelope.metadata,
            Some(addr.ip().to_string()),
            Utc::now(),
        )
        .await?;

    for fragment in envelope.results {
        state.dispatcher.record_result(&session.id, fragment).await?;
    }

    if is_new {
        state.dispatcher.apply_autorun(&session.id).await;
    }

    let tasks = state.dispatcher.drain_for(&session.id).await;
    state.codec.encode(&session.session_key, &tasks)
}
