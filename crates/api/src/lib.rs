pub mod envelope;
pub mod event;
pub mod handlers;
pub mod mount;
pub mod routes;
pub mod state;

pub use envelope::{parse_envelope, EnvelopeError};
pub use event::{build_proxy_event, IncomingRequest, RouteContext};
pub use handlers::*;
pub use mount::{mount_functions, MountSummary};
pub use routes::{MountedRoute, PathPattern, RouteMatch, RouteTable};
pub use state::*;

use axum::Router;
use lambda_models::LocalError;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .fallback(proxy_request)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

pub async fn bind(bind: &str, port: u16) -> Result<TcpListener, LocalError> {
    let address = format!("{}:{}", bind, port);
    TcpListener::bind(&address)
        .await
        .map_err(|e| LocalError::ServerBind {
            address,
            reason: e.to_string(),
        })
}

/// Serves `app` until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    shutdown: CancellationToken,
) -> Result<(), LocalError> {
    let address = listener
        .local_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_default();
    info!("Local API listening on http://{}", address);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await
    .map_err(|e| LocalError::ServerBind {
        address,
        reason: e.to_string(),
    })
}

pub async fn start_server(
    bind_address: &str,
    port: u16,
    app: Router,
    shutdown: CancellationToken,
) -> Result<(), LocalError> {
    let listener = bind(bind_address, port).await?;
    serve(listener, app, shutdown).await
}
