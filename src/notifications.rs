//! Wire types for video notifications.
//!
//! The same JSON shape flows in both directions: the transport delivers
//! `{ "items": [{ "videoKey": { ... } }] }` batches describing videos that
//! were just registered, and the reconciler sends the identical shape to the
//! registrar for videos it wants registered. Delivery is at-least-once, so a
//! batch may arrive duplicated, reordered, or interleaved across titles.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::VideoKey;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("invalid notification payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed notification: {0}")]
    Malformed(String),
}

/// One entry of a notification batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationItem {
    pub video_key: VideoKey,
}

/// An ordered, possibly empty, not necessarily deduplicated batch of
/// observed videos.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationBatch {
    #[serde(default)]
    pub items: Vec<NotificationItem>,
}

impl NotificationBatch {
    /// Builds an outbound batch from a list of video keys.
    #[must_use]
    pub fn from_keys(keys: impl IntoIterator<Item = VideoKey>) -> Self {
        Self {
            items: keys
                .into_iter()
                .map(|video_key| NotificationItem { video_key })
                .collect(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Rejects batches with entries the engine cannot key on.
    ///
    /// Type-level constraints (integer ids, non-negative episodes) are
    /// already enforced by deserialization; this catches the value-level
    /// cases: a zero title id and an empty dub label.
    pub fn validate(&self) -> Result<(), NotificationError> {
        for item in &self.items {
            let key = &item.video_key;
            if key.my_anime_list_id.value() == 0 {
                return Err(NotificationError::Malformed(
                    "video key has a zero title id".to_string(),
                ));
            }
            if key.dub.is_empty() {
                return Err(NotificationError::Malformed(format!(
                    "video key for title {} has an empty dub",
                    key.my_anime_list_id
                )));
            }
        }
        Ok(())
    }
}

/// Parses and validates an inbound notification payload.
///
/// An empty or missing `items` array is a valid, empty batch. Missing fields,
/// non-integer ids or episodes, and empty dub labels reject the whole batch;
/// there is no partial acceptance.
pub fn parse_batch(payload: &str) -> Result<NotificationBatch, NotificationError> {
    let batch: NotificationBatch = serde_json::from_str(payload)?;
    batch.validate()?;
    Ok(batch)
}
