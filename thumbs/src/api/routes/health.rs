use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::routing::get;
use serde::Serialize;

use crate::api::headers::powered_by;
use crate::api::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(banner))
        .route("/health", get(health))
        .route("/stats", get(stats))
}

async fn banner() -> String {
    format!("{}\n\nThumbnails live under /vi/{{id}}.\n", powered_by())
}

async fn health() -> &'static str {
    "OK"
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub requests_total: u64,
    pub requests_in_flight: u64,
    pub uptime_secs: u64,
}

async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let snapshot = state.stats.snapshot();
    Json(StatsResponse {
        requests_total: snapshot.requests_total,
        requests_in_flight: snapshot.requests_in_flight,
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use axum::http::StatusCode;
    use thumbs_engine::QualityRaceResolver;
    use thumbs_engine::resolver::{CandidateList, RandomSource};
    use thumbs_engine::transport::{HttpVersion, IpFamily, build_profile};
    use tower::ServiceExt;
    use vid_codec::{IdCodec, SecretKey};

    use crate::api::middleware::with_fault_boundary;

    fn state() -> AppState {
        let profile = build_profile(HttpVersion::Http1, None, IpFamily::V4).unwrap();
        let resolver = QualityRaceResolver::with_profile(
            profile,
            CandidateList::default(),
            Arc::new(RandomSource::seeded(1)),
        );
        let key = SecretKey::new("ABCDEFGHIJKLMNOP").unwrap();
        AppState::new(IdCodec::new(&key), resolver, false)
    }

    async fn get_text(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn health_and_banner() {
        let app = router().with_state(state());
        assert_eq!(
            get_text(app.clone(), "/health").await,
            (StatusCode::OK, "OK".to_owned())
        );
        let (status, banner) = get_text(app, "/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(banner.starts_with("thumbs "));
    }

    #[tokio::test]
    async fn stats_count_requests() {
        let state = state();
        let app = with_fault_boundary(
            router().with_state(state.clone()),
            Arc::clone(&state.stats),
        );

        get_text(app.clone(), "/health").await;
        let (status, body) = get_text(app, "/stats").await;
        assert_eq!(status, StatusCode::OK);

        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["requests_total"], 2);
        // The stats request itself is still in flight.
        assert_eq!(json["requests_in_flight"], 1);
        assert!(json["uptime_secs"].is_u64());
    }
}
