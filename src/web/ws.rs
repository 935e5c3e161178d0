use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, header},
    response::Response,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};

use super::api::{ApiError, SharedState};
use super::session::{ChannelLease, Outbound, Progress};

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

pub const SESSION_HEADER: &str = "x-session-id";
pub const SESSION_COOKIE: &str = "session_id";

// ── Handlers ─────────────────────────────────────────────────────────

/// `GET /ws/{session_id}`
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
) -> Result<Response, ApiError> {
    upgrade(ws, &state, &session_id)
}

/// `GET /ws`, with the session taken from the header or cookie.
pub async fn ws_from_session(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let session_id = session_id_from_headers(&headers)
        .ok_or_else(|| ApiError::BadRequest("missing session id".into()))?;
    upgrade(ws, &state, &session_id)
}

fn upgrade(ws: WebSocketUpgrade, state: &SharedState, session_id: &str) -> Result<Response, ApiError> {
    let progress = state.registry.get(session_id)?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, progress)))
}

/// Session id from `X-Session-Id`, else from the `session_id` cookie.
pub fn session_id_from_headers(headers: &HeaderMap) -> Option<String> {
    let from_header = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(id) = from_header {
        return Some(id.to_string());
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

async fn handle_socket(socket: WebSocket, progress: Arc<Progress>) {
    let (sender, receiver) = socket.split();
    let lease = progress.attach();
    info!(session_id = %progress.session_id(), channel = lease.id, "viewer attached");

    let channel = lease.id;
    run_socket_loop(sender, receiver, &progress, lease).await;

    let detached = progress.detach(channel);
    info!(session_id = %progress.session_id(), channel, detached, "viewer detached");
}

async fn wait_done(mut done: watch::Receiver<bool>) {
    // Err means the session was dropped, which also ends the channel.
    let _ = done.wait_for(|finished| *finished).await;
}

/// Core WebSocket loop with ping/pong keepalive.
///
/// Forwards the session's queued frames (history replay first, then live
/// messages), watches client frames only for pong and close, and pings on a
/// fixed interval. Once the session is done, whatever is still queued is
/// flushed before the loop ends.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    progress: &Progress,
    mut lease: ChannelLease,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // The first tick completes immediately.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    let done = wait_done(progress.subscribe_done());
    tokio::pin!(done);

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    debug!(session_id = %progress.session_id(), "pong timeout");
                    break;
                }
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            outbound = lease.outbound.recv() => {
                match outbound {
                    Some(Outbound::Frame(json)) => {
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Outbound::Close) | None => break,
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    // no inbound protocol
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }

            _ = &mut done => {
                while let Ok(Outbound::Frame(json)) = lease.outbound.try_recv() {
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                break;
            }
        }
    }

    // Best-effort close frame
    let _ = sender.send(Message::Close(None)).await;
}
