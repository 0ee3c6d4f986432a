use async_trait::async_trait;

use crate::models::{NotificationPayload, PushSubscription};

#[derive(Debug, thiserror::Error)]
pub enum PushError {
    /// The endpoint no longer exists (HTTP 404/410); its registration
    /// should be removed.
    #[error("push endpoint gone")]
    Gone,

    #[error("push transport error: {0}")]
    Transport(#[from] anyhow::Error),
}

#[async_trait]
pub trait PushProvider: Send + Sync {
    async fn send_push(
        &self,
        subscription: &PushSubscription,
        payload: &NotificationPayload,
    ) -> Result<(), PushError>;
}

/// Posts the payload to the subscription's registered endpoint.
pub struct HttpPushProvider {
    client: reqwest::Client,
}

impl HttpPushProvider {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpPushProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PushProvider for HttpPushProvider {
    async fn send_push(
        &self,
        subscription: &PushSubscription,
        payload: &NotificationPayload,
    ) -> Result<(), PushError> {
        let res = self
            .client
            .post(&subscription.endpoint)
            .bearer_auth(&subscription.auth_key)
            .json(payload)
            .send()
            .await
            .map_err(|e| PushError::Transport(e.into()))?;

        match res.status() {
            s if s.is_success() => Ok(()),
            reqwest::StatusCode::NOT_FOUND | reqwest::StatusCode::GONE => Err(PushError::Gone),
            s => Err(PushError::Transport(anyhow::anyhow!(
                "push endpoint returned {s}"
            ))),
        }
    }
}
