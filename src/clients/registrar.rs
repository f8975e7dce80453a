//! Client for the downstream registration service that picks up newly
//! discovered videos.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;

use crate::domain::VideoKey;
use crate::notifications::NotificationBatch;

/// Hands a batch of new video keys to the downstream consumer. The consumer
/// deduplicates, so resending a key is harmless.
#[async_trait]
pub trait VideoRegistrar: Send + Sync {
    async fn register_videos(&self, keys: &[VideoKey]) -> Result<()>;
}

#[derive(Clone)]
pub struct RegistrarClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl RegistrarClient {
    #[must_use]
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self::with_shared_client(Client::new(), base_url, token)
    }

    #[must_use]
    pub fn with_shared_client(
        client: Client,
        base_url: impl Into<String>,
        token: Option<String>,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            base_url,
            token,
        }
    }
}

#[async_trait]
impl VideoRegistrar for RegistrarClient {
    async fn register_videos(&self, keys: &[VideoKey]) -> Result<()> {
        let url = format!("{}/videos/register", self.base_url);
        let batch = NotificationBatch::from_keys(keys.iter().cloned());

        let mut request = self.client.post(&url).json(&batch);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "registrar API error: {} - {}",
                status,
                body
            ));
        }

        Ok(())
    }
}
