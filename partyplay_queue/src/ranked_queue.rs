use std::collections::BTreeSet;

use api_models::player::{QueueItem, Song};
use chrono::{DateTime, Utc};
use log::{debug, info};

/// A song waiting in (or promoted out of) the queue, with its crowd state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub song: Song,
    up_votes: BTreeSet<String>,
    down_votes: BTreeSet<String>,
    oldness: u32,
    playback_start: Option<DateTime<Utc>>,
    seq: u64,
}

impl QueueEntry {
    fn new(song: Song, seq: u64) -> Self {
        Self {
            song,
            up_votes: BTreeSet::new(),
            down_votes: BTreeSet::new(),
            oldness: 0,
            playback_start: None,
            seq,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.song.id
    }

    /// Applies one user's vote. `delta` is reduced to its sign; zero withdraws the user's vote.
    pub fn vote(&mut self, user_id: &str, delta: i64) {
        match delta.signum() {
            1 => {
                self.down_votes.remove(user_id);
                self.up_votes.insert(user_id.to_owned());
            }
            -1 => {
                self.up_votes.remove(user_id);
                self.down_votes.insert(user_id.to_owned());
            }
            _ => {
                self.up_votes.remove(user_id);
                self.down_votes.remove(user_id);
            }
        }
    }

    #[must_use]
    pub fn score(&self) -> i64 {
        i64::from(self.oldness) + self.up_votes.len() as i64 - self.down_votes.len() as i64
    }

    #[must_use]
    pub fn is_downvoted(&self) -> bool {
        self.down_votes.len() > self.up_votes.len()
    }

    #[must_use]
    pub const fn up_votes(&self) -> &BTreeSet<String> {
        &self.up_votes
    }

    #[must_use]
    pub const fn down_votes(&self) -> &BTreeSet<String> {
        &self.down_votes
    }

    #[must_use]
    pub const fn oldness(&self) -> u32 {
        self.oldness
    }

    #[must_use]
    pub const fn playback_start(&self) -> Option<DateTime<Utc>> {
        self.playback_start
    }

    pub fn set_playback_start(&mut self, start: DateTime<Utc>) {
        self.playback_start = Some(start);
    }

    #[must_use]
    pub fn to_item(&self) -> QueueItem {
        QueueItem {
            id: self.song.id.clone(),
            title: self.song.title.clone(),
            artist: self.song.artist.clone(),
            album: self.song.album.clone(),
            duration: self.song.duration,
            backend: self.song.backend.clone(),
            up_votes: self.up_votes.clone(),
            down_votes: self.down_votes.clone(),
            oldness: self.oldness,
            playback_start: self.playback_start,
        }
    }
}

pub enum VoteTarget<'a> {
    /// Vote on an entry that must already be queued.
    Existing(&'a str),
    /// Vote on a song, queueing it first if its id is unseen.
    Song(&'a Song),
}

/// Waiting songs kept in rank order: `oldness + ups - downs` descending, then insertion order.
#[derive(Debug, Default)]
pub struct RankedQueue {
    entries: Vec<QueueEntry>,
    next_seq: u64,
}

impl RankedQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `user_id`'s vote and re-ranks. Returns `None` when an `Existing` target is not queued.
    pub fn submit_vote(&mut self, target: VoteTarget<'_>, user_id: &str, delta: i64) -> Option<&QueueEntry> {
        let id = match target {
            VoteTarget::Existing(id) => {
                if !self.contains(id) {
                    return None;
                }
                id.to_owned()
            }
            VoteTarget::Song(song) => {
                if !self.contains(&song.id) {
                    debug!("New queue entry {}", song.id);
                    let seq = self.next_seq;
                    self.next_seq += 1;
                    self.entries.push(QueueEntry::new(song.clone(), seq));
                }
                song.id.clone()
            }
        };
        if let Some(entry) = self.entries.iter_mut().find(|e| e.song.id == id) {
            entry.vote(user_id, delta);
        }
        self.rank();
        self.get(&id)
    }

    pub fn rank(&mut self) {
        self.entries
            .sort_by(|a, b| b.score().cmp(&a.score()).then_with(|| a.seq.cmp(&b.seq)));
    }

    /// Removes the best ranked entry that is not net-downvoted; every entry left behind ages by one.
    pub fn promote_head(&mut self) -> Option<QueueEntry> {
        let position = self.entries.iter().position(|e| !e.is_downvoted())?;
        let promoted = self.entries.remove(position);
        for entry in &mut self.entries {
            entry.oldness += 1;
        }
        self.rank();
        Some(promoted)
    }

    /// Drops entries with more downvotes than upvotes and returns them.
    pub fn prune_downvoted(&mut self) -> Vec<QueueEntry> {
        let (removed, kept): (Vec<_>, Vec<_>) = self.entries.drain(..).partition(QueueEntry::is_downvoted);
        self.entries = kept;
        for entry in &removed {
            info!("Song {} removed due to downvotes", entry.id());
        }
        removed
    }

    pub fn remove_by_id(&mut self, id: &str) -> Option<QueueEntry> {
        let position = self.entries.iter().position(|e| e.song.id == id)?;
        Some(self.entries.remove(position))
    }

    #[must_use]
    pub fn peek_head(&self) -> Option<&QueueEntry> {
        self.entries.first()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&QueueEntry> {
        self.entries.iter().find(|e| e.song.id == id)
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueueEntry> {
        self.entries.iter()
    }

    #[must_use]
    pub fn items(&self) -> Vec<QueueItem> {
        self.entries.iter().map(QueueEntry::to_item).collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
