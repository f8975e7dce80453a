//! Client for the upstream video catalog, the service that actually hosts
//! episode files and answers "which episodes exist for this title+dub".

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;

use crate::domain::MalId;

/// Episode-list lookup against the upstream catalog. May return an empty
/// list for titles the catalog has not ingested yet.
#[async_trait]
pub trait VideoCatalog: Send + Sync {
    async fn list_episodes(&self, mal_id: MalId, dub: &str) -> Result<Vec<u32>>;
}

#[derive(Clone)]
pub struct CatalogClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl CatalogClient {
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
impl VideoCatalog for CatalogClient {
    async fn list_episodes(&self, mal_id: MalId, dub: &str) -> Result<Vec<u32>> {
        let url = format!("{}/titles/{}/episodes", self.base_url, mal_id);
        let mut request = self.client.get(&url).query(&[("dub", dub)]);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("catalog API error: {} - {}", status, body));
        }

        let episodes: Vec<u32> = response.json().await?;
        Ok(episodes)
    }
}
