//! Router and server for the long-polling endpoint.

use std::future::Future;
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, Method, Uri};
use axum::response::Response;
use axum::routing::get;
use tether_longpoll::LongpollServer;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::LongpollServerConfig;
use crate::error::{ServeError, ServeResult};
use crate::exchange::AxumExchange;

#[derive(Clone)]
struct LongpollState {
    server: LongpollServer,
    poll_timeout: Option<Duration>,
}

/// Builds a router serving `GET` and `POST` on the configured endpoint path.
///
/// Request bodies are limited to the configured maximum message size.
pub fn longpoll_router(server: LongpollServer, config: &LongpollServerConfig) -> Router {
    let state = LongpollState {
        server,
        poll_timeout: config.poll_timeout,
    };

    let router = Router::new()
        .route(
            &config.endpoint_path,
            get(longpoll_handler).post(longpoll_handler),
        )
        .layer(DefaultBodyLimit::max(config.longpoll.max_body_size))
        .with_state(state);

    apply_middleware(router, config)
}

/// Tracing outermost, then optional compression.
fn apply_middleware(router: Router, config: &LongpollServerConfig) -> Router {
    let router = if config.enable_compression {
        router.layer(CompressionLayer::new())
    } else {
        router
    };
    router.layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

async fn longpoll_handler(
    State(state): State<LongpollState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let (exchange, pending) = AxumExchange::new(method, &uri, headers, body);
    state.server.handle(Box::new(exchange));
    pending.wait(state.poll_timeout).await
}

/// Serves the long-polling endpoint until the process is stopped.
///
/// # Errors
///
/// Returns [`ServeError::Bind`] if the address cannot be bound and
/// [`ServeError::Serve`] if the server fails.
pub async fn run_server(server: LongpollServer, config: LongpollServerConfig) -> ServeResult<()> {
    run_server_with_shutdown(server, config, std::future::pending()).await
}

/// Serves the long-polling endpoint until `shutdown` resolves, then closes
/// every session so held requests are answered before the server stops.
///
/// # Errors
///
/// See [`run_server`].
pub async fn run_server_with_shutdown<F>(
    server: LongpollServer,
    config: LongpollServerConfig,
    shutdown: F,
) -> ServeResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = longpoll_router(server.clone(), &config);
    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .map_err(|source| ServeError::Bind {
            addr: config.bind_addr.clone(),
            source,
        })?;

    info!(
        bind_addr = %config.bind_addr,
        endpoint = %config.endpoint_path,
        idle_timeout_ms = config.longpoll.idle_timeout_ms,
        poll_timeout = ?config.poll_timeout,
        compression = config.enable_compression,
        "long-polling server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            info!(sessions = server.session_count(), "shutting down");
            server.close_all();
        })
        .await?;

    info!("long-polling server stopped");
    Ok(())
}
