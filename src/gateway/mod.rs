//! HTTP Gateway
//!
//! REST surface over the transfer engine. Domain failures map to 4xx,
//! infrastructure failures to 5xx.

pub mod handlers;
pub mod state;
pub mod types;

use std::future::Future;
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;

pub use state::AppState;

/// Build the application router
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route(
            "/transfers",
            post(handlers::create_transfer).get(handlers::list_transfers),
        )
        .route("/transfers/{id}", get(handlers::get_transfer))
        .route("/accounts", get(handlers::list_accounts))
        .route("/accounts/{id}", get(handlers::get_account));

    Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/api", api)
        .with_state(state)
}

/// Serve HTTP on `listener` until `shutdown` resolves.
///
/// In-flight requests are allowed to finish after `shutdown` fires.
pub async fn run_server<S>(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: S,
) -> std::io::Result<()>
where
    S: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "HTTP gateway listening");
    }

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
