use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    Router,
    extract::Path,
    http::{HeaderName, StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use super::api::{self, AppState, SharedState};
use super::embedded::Assets;
use super::ws::{self, SESSION_HEADER};
use crate::client::TextGenerator;
use crate::config::{GenerationConfig, ServerSettings};

/// Listener options for `questforge serve`.
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub dev_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            dev_mode: false,
        }
    }
}

/// Build the full application router: API, WebSocket, outputs and the embedded client.
pub fn build_router(state: SharedState, dev_mode: bool) -> Router {
    let cors = if dev_mode {
        CorsLayer::permissive()
    } else {
        CorsLayer::new().expose_headers([HeaderName::from_static(SESSION_HEADER)])
    };
    let outputs = ServeDir::new(&state.outputs_dir);

    api::api_router()
        .route("/", get(index_handler))
        .route("/static/{*path}", get(static_handler))
        .route("/ws", get(ws::ws_from_session))
        .route("/ws/{session_id}", get(ws::ws_handler))
        .nest_service("/outputs", outputs)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn index_handler() -> Response {
    match Assets::get("index.html") {
        Some(content) => Html(String::from_utf8_lossy(&content.data).to_string()).into_response(),
        None => (StatusCode::NOT_FOUND, "Frontend not found").into_response(),
    }
}

async fn static_handler(Path(path): Path<String>) -> Response {
    match Assets::get(&path) {
        Some(content) => {
            let mime = mime_guess::from_path(&path).first_or_octet_stream();
            (
                [(header::CONTENT_TYPE, mime.as_ref().to_string())],
                content.data.into_owned(),
            )
                .into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Periodic reaping and persistence until `cancel` fires.
pub async fn run_maintenance(
    state: SharedState,
    reap_every: Duration,
    persist_every: Duration,
    cancel: CancellationToken,
) {
    let mut reap = tokio::time::interval(reap_every);
    let mut persist = tokio::time::interval(persist_every);
    // The first tick completes immediately.
    reap.tick().await;
    persist.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = reap.tick() => {
                let reaped = state.registry.reap_stale().await;
                let pruned = state.limiter.prune();
                debug!(reaped, pruned_clients = pruned, "maintenance pass");
            }
            _ = persist.tick() => {
                if let Err(e) = state.registry.persist().await {
                    warn!(error = %e, "periodic history persist failed");
                }
            }
        }
    }
    debug!("maintenance stopped");
}

/// Start the web service and block until Ctrl+C.
pub async fn start_server(
    config: ServerConfig,
    settings: ServerSettings,
    generation: GenerationConfig,
    generator: Arc<dyn TextGenerator>,
) -> Result<()> {
    std::fs::create_dir_all(&settings.outputs_dir).with_context(|| {
        format!("Failed to create outputs directory {}", settings.outputs_dir.display())
    })?;

    let state = Arc::new(AppState::new(&settings, generation, generator));
    if let Err(e) = state.registry.restore().await {
        warn!(error = %e, "starting with empty session history");
    }

    let app = build_router(state.clone(), config.dev_mode);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    let local_addr = listener.local_addr()?;
    info!(%local_addr, dev_mode = config.dev_mode, "server listening");
    println!("questforge running at http://{}", local_addr);

    let cancel = CancellationToken::new();
    let maintenance = tokio::spawn(run_maintenance(
        state.clone(),
        settings.reap_interval(),
        settings.persist_interval(),
        cancel.clone(),
    ));

    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    cancel.cancel();
    if let Err(e) = maintenance.await {
        warn!(error = %e, "maintenance task ended abnormally");
    }
    state
        .registry
        .persist()
        .await
        .context("Failed to persist session history on shutdown")?;
    served.context("Server error")?;

    println!("Server shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for Ctrl+C, serving until killed");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tempfile::tempdir;
    use tower::ServiceExt;

    use crate::client::testing::ScriptedGenerator;
    use crate::web::api::tests::test_state;

    fn test_router(dir: &std::path::Path) -> Router {
        build_router(test_state(dir, Arc::new(ScriptedGenerator::default())), false)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn health_via_full_router() {
        let dir = tempdir().unwrap();
        let resp = test_router(dir.path()).oneshot(get("/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn index_and_assets_are_embedded() {
        let dir = tempdir().unwrap();
        let app = test_router(dir.path());

        let resp = app.clone().oneshot(get("/")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app.clone().oneshot(get("/static/app.js")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp.headers()[header::CONTENT_TYPE].to_str().unwrap();
        assert!(content_type.contains("javascript"), "{content_type}");

        let resp = app.oneshot(get("/static/missing.css")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn outputs_are_served_from_disk() {
        let dir = tempdir().unwrap();
        let outputs = dir.path().join("outputs");
        std::fs::create_dir_all(&outputs).unwrap();
        std::fs::write(outputs.join("example.tar.gz"), b"archive").unwrap();

        let resp = test_router(dir.path())
            .oneshot(get("/outputs/example.tar.gz"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"archive");
    }

    #[tokio::test]
    async fn maintenance_stops_on_cancel() {
        let dir = tempdir().unwrap();
        let state = test_state(dir.path(), Arc::new(ScriptedGenerator::default()));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_maintenance(
            state,
            Duration::from_millis(20),
            Duration::from_millis(20),
            cancel.clone(),
        ));
        tokio::time::sleep(Duration::from_millis(70)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert!(dir.path().join("history.json").exists());
    }

    #[test]
    fn server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 3000);
        assert!(!config.dev_mode);
    }
}
