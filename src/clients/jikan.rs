//! Jikan (MyAnimeList) metadata client, used for completion info.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::domain::MalId;

const JIKAN_API: &str = "https://api.jikan.moe/v4";

#[derive(Debug, Deserialize)]
struct JikanResponse<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
pub struct MalAnime {
    pub mal_id: i32,
    pub title: String,
    /// Total episode count; `null` while a run is ongoing and for entries
    /// MAL does not number (some movies and specials).
    pub episodes: Option<u32>,
    pub status: Option<String>,
    #[serde(rename = "type")]
    pub anime_type: Option<String>,
}

/// Last-episode lookup against a series metadata source.
///
/// `None` means the source does not know the final episode count, whether
/// because the title is unknown, the run is ongoing, or the entry is
/// unnumbered.
#[async_trait]
pub trait SeriesInfoSource: Send + Sync {
    async fn expected_last_episode(&self, mal_id: MalId) -> Result<Option<u32>>;
}

#[derive(Clone)]
pub struct JikanClient {
    client: Client,
    base_url: String,
}

impl Default for JikanClient {
    fn default() -> Self {
        Self::new()
    }
}

impl JikanClient {
    #[must_use]
    pub fn new() -> Self {
        Self::with_shared_client(Client::new())
    }

    #[must_use]
    pub fn with_shared_client(client: Client) -> Self {
        Self {
            client,
            base_url: JIKAN_API.to_string(),
        }
    }

    #[must_use]
    pub fn with_base_url(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    pub async fn get_anime(&self, mal_id: MalId) -> Result<Option<MalAnime>> {
        let url = format!("{}/anime/{}", self.base_url, mal_id);
        let response = self.client.get(&url).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Jikan API error: {} - {}", status, body));
        }

        let response: JikanResponse<MalAnime> = response.json().await?;

        Ok(Some(response.data))
    }
}

#[async_trait]
impl SeriesInfoSource for JikanClient {
    async fn expected_last_episode(&self, mal_id: MalId) -> Result<Option<u32>> {
        let anime = self.get_anime(mal_id).await?;
        Ok(anime.and_then(|a| a.episodes))
    }
}
