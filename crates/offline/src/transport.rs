//! Delivery seam between the engine and the remote API.
//!
//! The engine only sees binary success/failure per entry; the HTTP status and
//! error taxonomy stays behind this trait so tests can script outcomes
//! without a network.

use async_trait::async_trait;

use crate::types::QueuedAction;

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("network error: {0}")]
    Network(String),
    #[error("API error ({0}): {1}")]
    Api(u16, String),
    #[error("malformed request: {0}")]
    Request(String),
}

/// Replays recorded actions against the server.
#[async_trait]
pub trait ActionTransport: Send + Sync {
    /// Deliver one recorded action. `Ok(())` means the server confirmed the
    /// write and the entry may be removed from the queue.
    async fn deliver(&self, action: &QueuedAction) -> Result<(), DeliveryError>;
}

/// Production transport: replays `{endpoint, method, body}` against the API
/// with the session's bearer token.
pub struct HttpApiTransport {
    api_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpApiTransport {
    pub fn new(api_url: String) -> Self {
        Self {
            api_url,
            token: None,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_token(api_url: String, token: String) -> Self {
        Self {
            api_url,
            token: Some(token),
            client: reqwest::Client::new(),
        }
    }

    /// Check connectivity by hitting the health endpoint.
    pub async fn check_connectivity(&self) -> bool {
        let url = format!("{}/health", self.api_url);
        self.client.get(&url).send().await.is_ok()
    }
}

#[async_trait]
impl ActionTransport for HttpApiTransport {
    async fn deliver(&self, action: &QueuedAction) -> Result<(), DeliveryError> {
        let method = reqwest::Method::from_bytes(action.method.as_bytes())
            .map_err(|_| DeliveryError::Request(format!("invalid method: {}", action.method)))?;
        let url = format!("{}{}", self.api_url, action.endpoint);

        let mut req = self.client.request(method, &url).json(&action.body);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| DeliveryError::Network(e.to_string()))?;

        if resp.status().is_success() {
            tracing::debug!("replayed action {} against {}", action.id, action.endpoint);
            Ok(())
        } else {
            let status = resp.status().as_u16();
            Err(DeliveryError::Api(
                status,
                resp.text().await.unwrap_or_default(),
            ))
        }
    }
}
