use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemediationError {
    #[error("controller request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// Asks something outside the process to move egress to a new IP.
#[async_trait]
pub trait Remediator: Send + Sync + 'static {
    /// Returns the controller's response status.
    async fn request_ip_change(&self) -> Result<StatusCode, RemediationError>;
}

/// Stops the gluetun OpenVPN tunnel; gluetun then reconnects through a
/// different server.
#[derive(Debug, Clone)]
pub struct GluetunRemediator {
    client: Client,
    endpoint: String,
}

impl GluetunRemediator {
    /// `controller` is `host:port` of the gluetun control server.
    pub fn new(client: Client, controller: &str) -> Self {
        Self {
            client,
            endpoint: format!("http://{controller}/v1/openvpn/status"),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Remediator for GluetunRemediator {
    async fn request_ip_change(&self) -> Result<StatusCode, RemediationError> {
        let response = self
            .client
            .put(&self.endpoint)
            .json(&serde_json::json!({ "status": "stopped" }))
            .send()
            .await?;
        Ok(response.status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::put;
    use axum::{Json, Router};
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[tokio::test]
    async fn puts_stopped_status_to_the_controller() {
        let seen: Arc<Mutex<Vec<serde_json::Value>>> = Arc::default();
        let recorder = Arc::clone(&seen);
        let app = Router::new().route(
            "/v1/openvpn/status",
            put(move |Json(body): Json<serde_json::Value>| async move {
                recorder.lock().push(body);
                "{\"outcome\":\"stopping\"}"
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let client = crate::transport::build_control_client().unwrap();
        let remediator = GluetunRemediator::new(client, &addr.to_string());
        assert_eq!(
            remediator.endpoint(),
            format!("http://{addr}/v1/openvpn/status")
        );

        let status = remediator.request_ip_change().await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            seen.lock().as_slice(),
            &[serde_json::json!({ "status": "stopped" })]
        );
    }

    #[tokio::test]
    async fn unreachable_controller_is_an_error() {
        // Bind then drop to get a port with nothing listening.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = crate::transport::build_control_client().unwrap();
        let remediator = GluetunRemediator::new(client, &addr.to_string());
        assert!(remediator.request_ip_change().await.is_err());
    }
}
