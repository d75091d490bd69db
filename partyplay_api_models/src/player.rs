use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize, Default, Validate)]
#[serde(default)]
pub struct Song {
    #[validate(length(min = 1))]
    pub id: String,

    #[validate(length(min = 1))]
    pub title: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,

    /// Milliseconds.
    #[validate(range(min = 1))]
    pub duration: u64,

    /// Name of the backend the song was found on.
    #[serde(rename = "service")]
    pub backend: String,

    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub tags: HashMap<String, String>,
}

impl Song {
    #[must_use]
    pub fn info_string(&self) -> String {
        let mut result = String::new();
        if let Some(artist) = self.artist.as_ref() {
            result.push_str(artist.as_str());
            result.push_str(" - ");
        }
        result.push_str(self.title.as_str());
        result
    }

    #[must_use]
    pub fn all_text(&self) -> String {
        let mut result = String::new();
        result.push_str(self.title.as_str());
        if let Some(t) = self.artist.as_ref() {
            result.push(' ');
            result.push_str(t.as_str());
        }
        if let Some(t) = self.album.as_ref() {
            result.push(' ');
            result.push_str(t.as_str());
        }
        result
    }
}

/// Vote sets go over the wire as `{userID: true}` objects so clients can look up their own vote.
mod vote_set {
    use std::collections::{BTreeMap, BTreeSet};

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(votes: &BTreeSet<String>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(votes.iter().map(|user_id| (user_id, true)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BTreeSet<String>, D::Error> {
        let votes = BTreeMap::<String, bool>::deserialize(deserializer)?;
        Ok(votes
            .into_iter()
            .filter_map(|(user_id, voted)| voted.then_some(user_id))
            .collect())
    }
}

/// Wire view of a queued (or now playing) song together with its crowd state.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    pub duration: u64,
    #[serde(rename = "service")]
    pub backend: String,
    #[serde(with = "vote_set", default)]
    pub up_votes: BTreeSet<String>,
    #[serde(with = "vote_set", default)]
    pub down_votes: BTreeSet<String>,
    pub oldness: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playback_start: Option<DateTime<Utc>>,
}

impl QueueItem {
    #[must_use]
    pub fn score(&self) -> i64 {
        i64::from(self.oldness) + self.up_votes.len() as i64 - self.down_votes.len() as i64
    }
}
