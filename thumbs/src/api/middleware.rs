//! Cross-cutting request handling: the panic boundary, request counters
//! and the proxy headers of the image endpoint.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Router;
use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tower_http::catch_panic::CatchPanicLayer;
use tracing::error;

use crate::api::error::ApiError;
use crate::api::headers::apply_proxy_headers;
use crate::panic_hook::payload_to_string;

/// Process-wide request counters.
#[derive(Debug, Default)]
pub struct RequestStats {
    total: AtomicU64,
    in_flight: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub requests_total: u64,
    pub requests_in_flight: u64,
}

impl RequestStats {
    fn begin(self: &Arc<Self>) -> InFlightGuard {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard(Arc::clone(self))
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests_total: self.total.load(Ordering::Relaxed),
            requests_in_flight: self.in_flight.load(Ordering::Relaxed),
        }
    }
}

/// Decrements the in-flight count however the request ends, unwinding
/// included.
struct InFlightGuard(Arc<RequestStats>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

async fn track_requests(
    State(stats): State<Arc<RequestStats>>,
    request: Request,
    next: Next,
) -> Response {
    let _guard = stats.begin();
    next.run(request).await
}

/// Turns a handler panic into a generic 500.
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = payload_to_string(&*panic).unwrap_or_else(|| "<non-string payload>".to_string());
    error!(panic = %detail, "Request handler panicked");
    ApiError::internal().into_response()
}

/// Wraps every route of `router` in the panic boundary and the request
/// counters.
pub fn with_fault_boundary(router: Router, stats: Arc<RequestStats>) -> Router {
    router
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(middleware::from_fn_with_state(stats, track_requests))
}

/// Adds the proxy headers to every response of `router`, including the
/// 500 produced when one of its handlers panics.
pub fn with_proxy_headers<S>(router: Router<S>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(middleware::map_response(add_proxy_headers))
}

async fn add_proxy_headers(mut response: Response) -> Response {
    apply_proxy_headers(response.headers_mut());
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::StatusCode;
    use axum::routing::get;
    use tower::ServiceExt;

    async fn explode() -> &'static str {
        panic!("handler exploded")
    }

    fn router(stats: &Arc<RequestStats>) -> Router {
        with_fault_boundary(
            Router::new()
                .route("/boom", get(explode))
                .route("/fine", get(|| async { "fine" })),
            Arc::clone(stats),
        )
    }

    #[tokio::test]
    async fn panics_become_500_and_the_router_survives() {
        let stats = Arc::new(RequestStats::default());
        let app = router(&stats);

        let response = app
            .clone()
            .oneshot(axum::http::Request::get("/boom").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"Internal Server Error");

        let response = app
            .oneshot(axum::http::Request::get("/fine").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        assert_eq!(
            stats.snapshot(),
            StatsSnapshot {
                requests_total: 2,
                requests_in_flight: 0
            }
        );
    }

    #[tokio::test]
    async fn proxy_headers_are_added() {
        let app = with_proxy_headers(Router::new().route("/x", get(|| async { "x" })));
        let response = app
            .oneshot(axum::http::Request::get("/x").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
        assert_eq!(response.headers()["strict-transport-security"], "max-age=86400");
    }

    #[tokio::test]
    async fn proxy_headers_survive_a_panic() {
        let stats = Arc::new(RequestStats::default());
        let app = with_fault_boundary(
            with_proxy_headers(Router::new().route("/vi/{*rest}", get(explode))),
            Arc::clone(&stats),
        );
        let response = app
            .oneshot(
                axum::http::Request::get("/vi/9oet8sULTQfD")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let headers = response.headers();
        assert_eq!(headers["access-control-allow-origin"], "*");
        assert_eq!(headers["access-control-allow-methods"], "GET, HEAD, OPTIONS");
        assert_eq!(headers["strict-transport-security"], "max-age=86400");
        assert!(headers.contains_key("x-powered-by"));
        assert_eq!(stats.snapshot().requests_in_flight, 0);
    }
}
