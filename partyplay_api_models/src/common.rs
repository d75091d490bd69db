use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::player::Song;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub enum UserCommand {
    Enqueue {
        song: Song,
        #[serde(rename = "userID")]
        user_id: String,
    },
    Vote {
        #[serde(rename = "songID")]
        song_id: String,
        #[serde(rename = "userID")]
        user_id: String,
        vote: i64,
    },
    Remove(String),
    Skip,
    QueryQueue,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default, Validate)]
pub struct EnqueueRequest {
    #[serde(default)]
    #[validate]
    pub song: Song,
    #[serde(rename = "userID", default)]
    #[validate(length(min = 1))]
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default, Validate)]
pub struct VoteRequest {
    #[serde(rename = "userID", default)]
    #[validate(length(min = 1))]
    pub user_id: String,
    #[validate(required)]
    pub vote: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayAction {
    Skip,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PlayControlRequest {
    pub action: PlayAction,
}

pub fn dur_to_string(duration: &Duration) -> String {
    let mut result = "00:00:00".to_string();
    let secs = duration.as_secs();
    if secs > 0 {
        let seconds = secs % 60;
        let minutes = (secs / 60) % 60;
        let hours = (secs / 60) / 60;
        result = format!("{hours:0>2}:{minutes:0>2}:{seconds:0>2}");
    }
    result
}
