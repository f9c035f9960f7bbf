//! HTTP delivery of mounts
//!
//! Each mount is served at `GET /{endpoint_path}` as a raw H.264 elementary
//! stream (Annex-B). The response never ends while the stream is live.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::sync::{mpsc, RwLock, Semaphore};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use super::config::ServerConfig;
use super::mount::Mount;
use super::session::{self, SessionInfo, SessionTable};
use crate::catalog::StreamId;
use crate::stats::ServerStats;

/// Content type of a served mount
pub const CONTENT_TYPE_H264: &str = "video/h264";

/// Response header naming the media profile of the mount
pub const MEDIA_PROFILE_HEADER: &str = "x-media-profile";

/// Body chunks buffered per client before the pump waits
const CLIENT_BUFFER: usize = 32;

/// State shared by the HTTP handlers and the server
#[derive(Clone)]
pub(crate) struct AppState {
    pub mounts: Arc<RwLock<HashMap<StreamId, Arc<Mount>>>>,
    pub sessions: Arc<SessionTable>,
    pub stats: Arc<ServerStats>,
    pub limiter: Option<Arc<Semaphore>>,
    pub config: Arc<ServerConfig>,
    pub cancel: CancellationToken,
}

impl AppState {
    async fn find(&self, endpoint: &str) -> Option<Arc<Mount>> {
        self.mounts
            .read()
            .await
            .values()
            .find(|mount| mount.identity().endpoint_path == endpoint)
            .cloned()
    }
}

/// Build the router serving every mount
pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route("/{endpoint}", get(serve_mount))
        .with_state(state)
}

async fn serve_mount(
    Path(endpoint): Path<String>,
    State(state): State<AppState>,
) -> Result<Response, StatusCode> {
    let Some(mount) = state.find(&endpoint).await else {
        tracing::debug!(endpoint = %endpoint, "Request for unknown mount");
        return Err(StatusCode::NOT_FOUND);
    };
    let stream = mount.identity().id;

    let permit = match &state.limiter {
        Some(limiter) => match Arc::clone(limiter).try_acquire_owned() {
            Ok(permit) => Some(permit),
            Err(_) => {
                state.stats.record_reject();
                tracing::warn!(stream = %stream, "Client rejected: limit reached");
                return Err(StatusCode::SERVICE_UNAVAILABLE);
            }
        },
        None => None,
    };

    let subscription =
        match tokio::time::timeout(state.config.connection_timeout, mount.subscribe()).await {
            Ok(Ok(subscription)) => subscription,
            Ok(Err(e)) => {
                tracing::warn!(stream = %stream, kind = %e.kind(), error = %e, "Failed to start egress");
                return Err(StatusCode::SERVICE_UNAVAILABLE);
            }
            Err(_) => {
                tracing::warn!(stream = %stream, "Timed out starting egress");
                return Err(StatusCode::SERVICE_UNAVAILABLE);
            }
        };

    let id = state.sessions.next_id();
    let (tx, rx) = mpsc::channel(CLIENT_BUFFER);

    state.stats.record_accept();
    state.stats.session_opened();
    let handle = tokio::spawn(session::pump(
        id,
        stream,
        subscription,
        tx,
        Arc::clone(&state.stats),
        state.cancel.child_token(),
        permit,
    ));
    state.sessions.insert(
        SessionInfo {
            id,
            stream,
            started_at: std::time::Instant::now(),
        },
        handle,
    );

    tracing::info!(
        session_id = id,
        stream = %stream,
        subscribers = mount.subscribers(),
        "Client attached"
    );

    let profile = HeaderValue::from_static(mount.profile().as_str());
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, CONTENT_TYPE_H264)
        .header(header::CACHE_CONTROL, "no-cache, no-store")
        .header(header::CONNECTION, "close")
        .header(MEDIA_PROFILE_HEADER, profile)
        .body(Body::from_stream(ReceiverStream::new(rx)))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .into_response())
}
