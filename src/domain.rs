//! Domain types for tracked ongoing titles.
//!
//! This module provides the type-safe identities the engine is keyed on. It
//! follows the Newtype pattern so a catalog id can never be confused with an
//! episode number or a database row id.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};

/// MyAnimeList catalog identifier of a series.
///
/// # Examples
///
/// ```rust
/// use ongoarr::domain::MalId;
///
/// let id = MalId::new(5114);
/// assert_eq!(id.value(), 5114);
/// assert_eq!(id.to_string(), "5114");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct MalId(i32);

impl MalId {
    /// Creates a new `MalId` from a raw i32 value.
    ///
    /// # Panics
    ///
    /// Panics in debug mode if `id` is negative. Untrusted input goes through
    /// the deserializer, which rejects negatives instead.
    #[must_use]
    pub const fn new(id: i32) -> Self {
        debug_assert!(id >= 0, "MalId should be non-negative");
        Self(id)
    }

    /// Returns the underlying i32 value.
    #[must_use]
    pub const fn value(&self) -> i32 {
        self.0
    }
}

impl fmt::Display for MalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<MalId> for i32 {
    fn from(id: MalId) -> Self {
        id.0
    }
}

impl From<i32> for MalId {
    fn from(id: i32) -> Self {
        Self::new(id)
    }
}

impl Serialize for MalId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_i32(self.0)
    }
}

impl<'de> Deserialize<'de> for MalId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let id = i32::deserialize(deserializer)?;
        if id < 0 {
            return Err(serde::de::Error::custom("title id must be non-negative"));
        }
        Ok(Self(id))
    }
}

/// Identity of a tracked series: the catalog id plus the dub/variant label.
///
/// Two dubs of the same series are tracked independently.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TitleKey {
    pub mal_id: MalId,
    pub dub: String,
}

impl TitleKey {
    #[must_use]
    pub fn new(mal_id: impl Into<MalId>, dub: impl Into<String>) -> Self {
        Self {
            mal_id: mal_id.into(),
            dub: dub.into(),
        }
    }

    /// The store partition key, `"{titleId}#{dub}"`.
    #[must_use]
    pub fn storage_key(&self) -> String {
        format!("{}#{}", self.mal_id, self.dub)
    }
}

impl fmt::Display for TitleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.mal_id, self.dub)
    }
}

/// A single observed unit of content: one episode of one title in one dub.
///
/// This is the wire shape shared by inbound notifications and outbound
/// registration requests.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoKey {
    pub my_anime_list_id: MalId,
    pub dub: String,
    pub episode: u32,
}

impl VideoKey {
    #[must_use]
    pub fn new(mal_id: impl Into<MalId>, dub: impl Into<String>, episode: u32) -> Self {
        Self {
            my_anime_list_id: mal_id.into(),
            dub: dub.into(),
            episode,
        }
    }

    #[must_use]
    pub fn title_key(&self) -> TitleKey {
        TitleKey::new(self.my_anime_list_id, self.dub.clone())
    }
}

/// The persisted record of a title's known episodes and timestamps.
///
/// `episodes` is non-empty once the record exists, and
/// `updated_at >= created_at` always holds. Episode numbers need not start at
/// 1 (specials sometimes number from 0) and gaps are normal while
/// notifications arrive out of order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedTitle {
    pub key: TitleKey,
    pub episodes: BTreeSet<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TrackedTitle {
    /// Highest episode number observed so far, if any.
    #[must_use]
    pub fn last_episode(&self) -> Option<u32> {
        self.episodes.last().copied()
    }

    /// First (lowest) episode number observed so far, if any.
    #[must_use]
    pub fn first_episode(&self) -> Option<u32> {
        self.episodes.first().copied()
    }
}
