//! ferry-api — HTTP ingestion endpoints of the cloud service.

pub mod handlers;

use std::future::Future;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

pub use handlers::ApiState;

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(handlers::handle_root))
        .route("/message", post(handlers::handle_message))
        .route("/batchmessage", post(handlers::handle_batch_message))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Bind `addr` and serve until `shutdown` resolves.
pub async fn serve<F>(state: ApiState, addr: &str, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    serve_on(listener, state, shutdown).await
}

/// Serve on an already-bound listener. In-flight requests finish before
/// this returns.
pub async fn serve_on<F>(listener: TcpListener, state: ApiState, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "ingest API listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("ingest API stopped");
    Ok(())
}
