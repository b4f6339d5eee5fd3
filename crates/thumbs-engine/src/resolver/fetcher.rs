use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use thiserror::Error;

use crate::transport::TransportProfile;

pub type BodyStream = BoxStream<'static, Result<Bytes, std::io::Error>>;

/// One outbound attempt.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
}

/// Status, headers and a lazily consumed body. Dropping it releases the
/// underlying connection.
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: BodyStream,
}

impl UpstreamResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: BodyStream) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Collects the whole body into memory.
    pub async fn into_bytes(self) -> Result<Bytes, std::io::Error> {
        let chunks: Vec<Bytes> = self.body.try_collect().await?;
        Ok(chunks.concat().into())
    }
}

impl std::fmt::Debug for UpstreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("no response headers within {0:?}")]
    HeaderTimeout(Duration),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Performs single upstream requests for the resolver.
#[async_trait]
pub trait UpstreamFetcher: Send + Sync + 'static {
    async fn fetch(&self, request: FetchRequest) -> Result<UpstreamResponse, FetchError>;
}

/// Fetcher backed by a [`TransportProfile`]'s client.
#[derive(Debug, Clone)]
pub struct ProfileFetcher {
    profile: TransportProfile,
}

impl ProfileFetcher {
    pub fn new(profile: TransportProfile) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> &TransportProfile {
        &self.profile
    }
}

#[async_trait]
impl UpstreamFetcher for ProfileFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<UpstreamResponse, FetchError> {
        let header_timeout = self.profile.timeouts().response_header;
        let send = self
            .profile
            .client()
            .request(request.method, request.url)
            .headers(request.headers)
            .send();

        // `send` completes once the response headers are in.
        let response = tokio::time::timeout(header_timeout, send)
            .await
            .map_err(|_| FetchError::HeaderTimeout(header_timeout))??;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes_stream()
            .map_err(std::io::Error::other)
            .boxed();
        Ok(UpstreamResponse::new(status, headers, body))
    }
}
