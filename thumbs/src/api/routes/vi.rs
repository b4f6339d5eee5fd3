//! `/vi/{opaqueId}`: decode the id, race the candidates, answer with the
//! winner (optionally transcoded).

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use chrono::Utc;
use thumbs_engine::ImageTransform;
use thumbs_engine::resolver::Resolution;
use thumbs_engine::transcode::transcode_blocking;
use tracing::{debug, error};
use vid_codec::{CodecError, OPAQUE_ID_LEN};

use crate::api::error::{ApiError, ApiResult};
use crate::api::headers::{ImageHeaders, copy_passthrough};
use crate::api::middleware::with_proxy_headers;
use crate::api::server::AppState;

pub fn router() -> Router<AppState> {
    with_proxy_headers(
        Router::new()
            .route("/vi/", any(thumbnail))
            .route("/vi/{*rest}", any(thumbnail)),
    )
}

async fn thumbnail(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
) -> ApiResult<Response> {
    if method == Method::OPTIONS {
        return Ok(StatusCode::OK.into_response());
    }
    if method != Method::GET && method != Method::HEAD {
        return Err(ApiError::method_not_allowed());
    }

    let video_id = decode_id(&state, opaque_id(uri.path()))?;
    let transform = ImageTransform::from_query(uri.query());
    // A transform needs the image bytes even for HEAD.
    let upstream_method = if transform.is_identity() {
        method.clone()
    } else {
        Method::GET
    };

    let Resolution {
        candidate,
        response: upstream,
    } = state.resolver.resolve(&video_id, upstream_method).await?;
    debug!(video_id, suffix = %candidate.suffix, "Serving thumbnail");

    let request_id = state.resolver.random().request_id();
    let mut headers = HeaderMap::new();
    ImageHeaders {
        video_id: &video_id,
        request_id: &request_id,
        litespeed_cache: state.litespeed_cache,
        now: Utc::now(),
    }
    .apply(&mut headers);
    copy_passthrough(&upstream.headers, &mut headers);

    if transform.is_identity() {
        return Ok((StatusCode::OK, headers, Body::from_stream(upstream.body)).into_response());
    }

    let input = upstream.into_bytes().await.map_err(|e| {
        error!(video_id, error = %e, "Failed to read upstream body");
        ApiError::internal()
    })?;
    let output = transcode_blocking(input, transform).await.map_err(|e| {
        error!(video_id, error = %e, "Failed to transcode thumbnail");
        ApiError::internal()
    })?;

    headers.insert(CONTENT_TYPE, HeaderValue::from_static(output.content_type));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(output.bytes.len()));
    let body = if method == Method::HEAD {
        Body::empty()
    } else {
        Body::from(output.bytes)
    };
    Ok((StatusCode::OK, headers, body).into_response())
}

/// First path segment after `/vi/`.
fn opaque_id(path: &str) -> &str {
    path.strip_prefix("/vi/")
        .and_then(|rest| rest.split('/').next())
        .unwrap_or_default()
}

fn decode_id(state: &AppState, opaque_id: &str) -> ApiResult<String> {
    let length = opaque_id.len();
    if length != OPAQUE_ID_LEN {
        return Err(length_error(length));
    }
    state.codec.decode(opaque_id).map_err(|e| match e {
        CodecError::Length { actual, .. } => length_error(actual),
        other => ApiError::bad_request(format!("Invalid encoded ID: {other}")),
    })
}

fn length_error(length: usize) -> ApiError {
    ApiError::bad_request(format!(
        "Invalid ID length: got {length}, expected {OPAQUE_ID_LEN} for encoded ID"
    ))
}
