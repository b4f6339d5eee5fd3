//! API server setup: shared state, middleware stack and listeners.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::Request;
use axum::response::Response;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::{DefaultMakeSpan, MakeSpan, TraceLayer};
use tracing::{Level, Span, info};
use vid_codec::IdCodec;

use thumbs_engine::QualityRaceResolver;

use crate::api::middleware::{RequestStats, with_fault_boundary};
use crate::api::routes;
use crate::config::ListenConfig;
use crate::error::{Error, Result};

/// Shared application state, built once at startup.
#[derive(Clone)]
pub struct AppState {
    /// Server start time for uptime calculation
    pub start_time: Instant,
    pub codec: Arc<IdCodec>,
    pub resolver: Arc<QualityRaceResolver>,
    pub stats: Arc<RequestStats>,
    /// Emit `X-LiteSpeed-Cache-Control` on image responses
    pub litespeed_cache: bool,
}

impl AppState {
    pub fn new(codec: IdCodec, resolver: QualityRaceResolver, litespeed_cache: bool) -> Self {
        Self {
            start_time: Instant::now(),
            codec: Arc::new(codec),
            resolver: Arc::new(resolver),
            stats: Arc::new(RequestStats::default()),
            litespeed_cache,
        }
    }
}

pub struct ApiServer {
    listen: ListenConfig,
    state: AppState,
    cancel_token: CancellationToken,
}

impl ApiServer {
    pub fn new(listen: ListenConfig, state: AppState, cancel_token: CancellationToken) -> Self {
        Self {
            listen,
            state,
            cancel_token,
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    fn build_router(&self) -> Router {
        let router = with_fault_boundary(
            routes::create_router(self.state.clone()),
            Arc::clone(&self.state.stats),
        );

        // Health checks get no span, and so no response event either.
        router.layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &Request| {
                    if is_health_check(req) {
                        Span::none()
                    } else {
                        DefaultMakeSpan::new().level(Level::INFO).make_span(req)
                    }
                })
                .on_response(|res: &Response, latency: Duration, span: &Span| {
                    if !span.is_disabled() {
                        info!(status = %res.status(), ?latency, "Request finished");
                    }
                }),
        )
    }

    /// Serves on every configured listener until the cancel token fires.
    pub async fn run(&self) -> Result<()> {
        let router = self.build_router();

        let tcp = async {
            match &self.listen.tcp {
                Some((host, port)) => {
                    serve_tcp(host, *port, router.clone(), self.cancel_token.clone()).await
                }
                None => Ok(()),
            }
        };
        let uds = async {
            match &self.listen.uds {
                Some(path) => serve_uds(path, router.clone(), self.cancel_token.clone()).await,
                None => Ok(()),
            }
        };

        let result = tokio::try_join!(tcp, uds).map(|_| ());
        if result.is_err() {
            // One listener failing takes the other down with it.
            self.cancel_token.cancel();
        }
        result
    }

    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}

fn is_health_check(req: &Request) -> bool {
    req.uri().path() == "/health"
}

async fn serve_tcp(
    host: &str,
    port: u16,
    router: Router,
    cancel_token: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind((host, port)).await?;
    info!("HTTP server listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            cancel_token.cancelled().await;
            info!("HTTP server shutting down...");
        })
        .await
        .map_err(|e| Error::server(format!("HTTP server error: {e}")))
}

#[cfg(unix)]
async fn serve_uds(
    path: &std::path::Path,
    router: Router,
    cancel_token: CancellationToken,
) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    remove_stale_socket(path)?;
    let listener = tokio::net::UnixListener::bind(path)?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o777))?;
    info!(path = %path.display(), "Unix socket server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            cancel_token.cancelled().await;
            info!("Unix socket server shutting down...");
        })
        .await
        .map_err(|e| Error::server(format!("Unix socket server error: {e}")))?;

    remove_stale_socket(path)?;
    Ok(())
}

#[cfg(not(unix))]
async fn serve_uds(
    _path: &std::path::Path,
    _router: Router,
    _cancel_token: CancellationToken,
) -> Result<()> {
    Err(Error::config(
        "Unix domain sockets are not supported on this platform",
    ))
}

#[cfg(unix)]
fn remove_stale_socket(path: &std::path::Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
