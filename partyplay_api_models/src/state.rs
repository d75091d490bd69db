use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::player::QueueItem;

/// Now playing plus the waiting queue in rank order.
///
/// Serialized as a two element array `[nowPlaying, queue]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(from = "(Option<QueueItem>, Vec<QueueItem>)", into = "(Option<QueueItem>, Vec<QueueItem>)")]
pub struct QueueState {
    pub now_playing: Option<QueueItem>,
    pub queue: Vec<QueueItem>,
}

impl From<(Option<QueueItem>, Vec<QueueItem>)> for QueueState {
    fn from((now_playing, queue): (Option<QueueItem>, Vec<QueueItem>)) -> Self {
        Self { now_playing, queue }
    }
}

impl From<QueueState> for (Option<QueueItem>, Vec<QueueItem>) {
    fn from(state: QueueState) -> Self {
        (state.now_playing, state.queue)
    }
}

impl QueueState {
    /// Flat `[nowPlaying?, ...queue]` list as returned by `GET /queue`.
    #[must_use]
    pub fn flatten(self) -> Vec<QueueItem> {
        self.now_playing.into_iter().chain(self.queue).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackEvent {
    #[serde(rename = "songID")]
    pub song_id: String,
    #[serde(rename = "service")]
    pub backend: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Milliseconds since playback started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum StateChangeEvent {
    Queue(QueueState),
    Playback(PlaybackEvent),
    NotificationSuccess(String),
    NotificationError(String),
}
