// HTTP API Server module

use anyhow::Result;
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, State},
    http::{Method, Request},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod error;
mod handlers;
pub mod upstream;

pub use error::ApiError;
pub use upstream::{RelayError, RelayStream, UpstreamClient};

use crate::auth::Authenticator;
use crate::config::AppConfig;
use crate::proxy::ModelRegistry;

/// Chat bodies may carry inline images, so allow more than axum's 2 MiB.
const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Everything a request handler needs, built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ModelRegistry>,
    pub authenticator: Arc<Authenticator>,
    pub upstream: UpstreamClient,
}

impl AppState {
    pub fn new(
        registry: ModelRegistry,
        authenticator: Authenticator,
        upstream: UpstreamClient,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            authenticator: Arc::new(authenticator),
            upstream,
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let registry = ModelRegistry::from_config(config)?;
        let authenticator = Authenticator::new(config.proxy_api_key.clone())?;
        let upstream = UpstreamClient::from_config(config)?;
        Ok(Self::new(registry, authenticator, upstream))
    }
}

/// Bearer token gate; runs before the body is read.
async fn auth_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    match state.authenticator.authenticate(request.headers()) {
        Ok(()) => next.run(request).await,
        Err(e) => {
            tracing::warn!("Rejected {} {}: {}", request.method(), request.uri().path(), e);
            ApiError::from(e).into_response()
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    // Routes that require API key authentication
    let protected_routes = Router::new()
        .route("/v1/models", get(handlers::list_models))
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // Routes that don't require authentication
    let public_routes = Router::new().route("/", get(handlers::root));

    Router::new()
        .merge(protected_routes)
        .merge(public_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve until `shutdown` resolves. The upstream pool is dropped on return.
pub async fn serve<F>(listener: tokio::net::TcpListener, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tracing::info!(
        "Proxy server listening on http://{}/v1/chat/completions",
        listener.local_addr()?
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("Proxy server stopped");
    Ok(())
}

/// Bind the configured address and serve until Ctrl-C or SIGTERM.
pub async fn start_server(config: AppConfig) -> Result<()> {
    let state = AppState::from_config(&config)?;
    let listener = tokio::net::TcpListener::bind(config.listen_addr()).await?;
    serve(listener, state, shutdown_signal()).await
}

/// A server running on a background task, stopped through a oneshot.
pub struct ServerHandle {
    pub addr: SocketAddr,
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<Result<()>>,
}

impl ServerHandle {
    pub async fn stop(self) -> Result<()> {
        let _ = self.stop_tx.send(());
        self.task.await?
    }
}

/// Bind `addr` (port 0 picks a free port) and serve in the background.
pub async fn spawn_server(addr: &str, state: AppState) -> Result<ServerHandle> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let addr = listener.local_addr()?;
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let task = tokio::spawn(serve(listener, state, async move {
        stop_rx.await.ok();
    }));

    Ok(ServerHandle {
        addr,
        stop_tx,
        task,
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
