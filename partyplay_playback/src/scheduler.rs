use std::time::Duration;

use api_models::{
    common::dur_to_string,
    player::Song,
    settings::PlaybackSettings,
    state::{PlaybackEvent, QueueState, StateChangeEvent},
};
use chrono::Utc;
use log::{debug, error, info, warn};
use partyplay_queue::{QueueEntry, RankedQueue, VoteTarget};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::cache::{CacheError, CachePipeline};
use crate::probe::probe_duration;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("song {0} not found")]
    SongNotFound(String),
    #[error("scheduler is not running")]
    SchedulerGone,
}

type Reply<T> = oneshot::Sender<T>;

enum Command {
    Enqueue {
        song: Song,
        user_id: String,
        reply: Reply<Result<(), QueueError>>,
    },
    Vote {
        song_id: String,
        user_id: String,
        vote: i64,
        reply: Reply<Result<(), QueueError>>,
    },
    Remove {
        song_id: String,
        reply: Reply<Result<(), QueueError>>,
    },
    Skip,
    QueryQueue(Reply<QueueState>),
    QueryPlayback(Reply<Option<PlaybackEvent>>),
    CacheReady {
        token: u64,
        duration: Duration,
    },
    CacheFailed {
        token: u64,
        reason: CacheError,
    },
    PrefetchFailed {
        song_id: String,
        reason: CacheError,
    },
    SongEnded {
        token: u64,
    },
}

enum PlaybackState {
    Idle,
    /// Promoted, waiting for the cache. `token` identifies this promotion.
    Precaching { entry: QueueEntry, token: u64 },
    Playing {
        entry: QueueEntry,
        token: u64,
        timer: JoinHandle<()>,
    },
}

impl PlaybackState {
    fn entry(&self) -> Option<&QueueEntry> {
        match self {
            Self::Idle => None,
            Self::Precaching { entry, .. } | Self::Playing { entry, .. } => Some(entry),
        }
    }

    fn entry_mut(&mut self) -> Option<&mut QueueEntry> {
        match self {
            Self::Idle => None,
            Self::Precaching { entry, .. } | Self::Playing { entry, .. } => Some(entry),
        }
    }
}

/// Owns the queue and the now-playing slot and drives the playback clock.
///
/// Runs as a single task; everything else talks to it through a [`SchedulerHandle`].
pub struct PlaybackScheduler {
    queue: RankedQueue,
    state: PlaybackState,
    cache: CachePipeline,
    settings: PlaybackSettings,
    next_token: u64,
    prefetched: Option<String>,
    commands_tx: mpsc::WeakSender<Command>,
    changes_tx: broadcast::Sender<StateChangeEvent>,
}

impl PlaybackScheduler {
    /// Starts the scheduler task. It stops once every handle is dropped.
    #[must_use]
    pub fn spawn(
        cache: CachePipeline,
        settings: PlaybackSettings,
        changes_tx: broadcast::Sender<StateChangeEvent>,
    ) -> SchedulerHandle {
        let (commands_tx, commands_rx) = mpsc::channel(64);
        let scheduler = Self {
            queue: RankedQueue::new(),
            state: PlaybackState::Idle,
            cache,
            settings,
            next_token: 0,
            prefetched: None,
            commands_tx: commands_tx.downgrade(),
            changes_tx,
        };
        tokio::spawn(scheduler.run(commands_rx));
        SchedulerHandle { commands_tx }
    }

    async fn run(mut self, mut commands_rx: mpsc::Receiver<Command>) {
        while let Some(command) = commands_rx.recv().await {
            self.handle(command);
        }
        if let PlaybackState::Playing { timer, .. } = &self.state {
            timer.abort();
        }
        info!("Playback scheduler stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Enqueue { song, user_id, reply } => {
                if let Some(current) = self.state.entry_mut().filter(|e| e.id() == song.id) {
                    current.vote(&user_id, 1);
                } else {
                    debug!("User {user_id} enqueued {}", song.info_string());
                    self.queue.submit_vote(VoteTarget::Song(&song), &user_id, 1);
                    self.reevaluate();
                }
                self.publish_queue();
                reply.send(Ok(())).ok();
            }
            Command::Vote {
                song_id,
                user_id,
                vote,
                reply,
            } => {
                let result = if let Some(current) = self.state.entry_mut().filter(|e| e.id() == song_id) {
                    current.vote(&user_id, vote);
                    Ok(())
                } else if self
                    .queue
                    .submit_vote(VoteTarget::Existing(&song_id), &user_id, vote)
                    .is_some()
                {
                    self.reevaluate();
                    Ok(())
                } else {
                    Err(QueueError::SongNotFound(song_id))
                };
                if result.is_ok() {
                    self.publish_queue();
                }
                reply.send(result).ok();
            }
            Command::Remove { song_id, reply } => {
                let result = if self.state.entry().is_some_and(|e| e.id() == song_id) {
                    self.skip();
                    Ok(())
                } else if self.queue.remove_by_id(&song_id).is_some() {
                    info!("Song {song_id} removed from queue");
                    Ok(())
                } else {
                    Err(QueueError::SongNotFound(song_id))
                };
                if result.is_ok() {
                    self.reevaluate();
                    self.publish_queue();
                }
                reply.send(result).ok();
            }
            Command::Skip => {
                self.skip();
                self.reevaluate();
                self.publish_queue();
            }
            Command::QueryQueue(reply) => {
                reply.send(self.queue_state()).ok();
            }
            Command::QueryPlayback(reply) => {
                reply.send(self.playback_event()).ok();
            }
            Command::CacheReady { token, duration } => self.start_playing(token, duration),
            Command::CacheFailed { token, reason } => {
                if !matches!(self.state, PlaybackState::Precaching { token: current, .. } if current == token) {
                    debug!("Ignoring stale cache failure: {reason}");
                    return;
                }
                if let Some(entry) = self.state.entry() {
                    error!("Dropping {}: {reason}", entry.song.info_string());
                    self.notify(StateChangeEvent::NotificationError(format!(
                        "Failed to load {}: {reason}",
                        entry.song.title
                    )));
                }
                self.state = PlaybackState::Idle;
                self.reevaluate();
                self.publish_queue();
            }
            Command::PrefetchFailed { song_id, reason } => {
                if self.prefetched.as_deref() == Some(song_id.as_str()) {
                    self.prefetched = None;
                }
                if self.queue.remove_by_id(&song_id).is_some() {
                    warn!("Song {song_id} removed from queue, prefetch failed: {reason}");
                    self.reevaluate();
                    self.publish_queue();
                }
            }
            Command::SongEnded { token } => {
                if !matches!(self.state, PlaybackState::Playing { token: current, .. } if current == token) {
                    debug!("Ignoring stale song end");
                    return;
                }
                if let Some(entry) = self.state.entry() {
                    info!("Finished playing {}", entry.song.info_string());
                }
                self.state = PlaybackState::Idle;
                self.reevaluate();
                self.publish_queue();
            }
        }
    }

    /// Promotes the next song when nothing is playing and keeps the new head prefetched.
    fn reevaluate(&mut self) {
        if matches!(self.state, PlaybackState::Idle) {
            self.queue.prune_downvoted();
            if let Some(entry) = self.queue.promote_head() {
                self.queue.prune_downvoted();
                self.next_token += 1;
                let token = self.next_token;
                info!("Promoted {}", entry.song.info_string());
                self.request_cache(&entry, token);
                self.state = PlaybackState::Precaching { entry, token };
            } else {
                debug!("Queue is empty, nothing to play");
            }
        }
        self.prefetch_head();
    }

    fn request_cache(&self, entry: &QueueEntry, token: u64) {
        let Some(commands_tx) = self.commands_tx.upgrade() else {
            return;
        };
        let cache = self.cache.clone();
        let backend = entry.song.backend.clone();
        let song_id = entry.id().to_owned();
        let declared = Duration::from_millis(entry.song.duration);
        tokio::spawn(async move {
            let command = match cache.ensure_cached(&backend, &song_id).await {
                Ok(artifact) => Command::CacheReady {
                    token,
                    duration: probe_duration(artifact, declared).await,
                },
                Err(reason) => Command::CacheFailed { token, reason },
            };
            commands_tx.send(command).await.ok();
        });
    }

    fn prefetch_head(&mut self) {
        if !self.settings.prefetch_enabled {
            return;
        }
        let Some(head) = self.queue.peek_head() else {
            return;
        };
        if self.prefetched.as_deref() == Some(head.id()) {
            return;
        }
        let Some(commands_tx) = self.commands_tx.upgrade() else {
            return;
        };
        let cache = self.cache.clone();
        let backend = head.song.backend.clone();
        let song_id = head.id().to_owned();
        self.prefetched = Some(song_id.clone());
        debug!("Prefetching {backend}/{song_id}");
        tokio::spawn(async move {
            if let Err(reason) = cache.ensure_cached(&backend, &song_id).await {
                commands_tx.send(Command::PrefetchFailed { song_id, reason }).await.ok();
            }
        });
    }

    fn start_playing(&mut self, token: u64, duration: Duration) {
        let entry = match std::mem::replace(&mut self.state, PlaybackState::Idle) {
            PlaybackState::Precaching { entry, token: current } if current == token => entry,
            other => {
                debug!("Ignoring stale cache completion");
                self.state = other;
                return;
            }
        };
        let Some(commands_tx) = self.commands_tx.upgrade() else {
            return;
        };
        let mut entry = entry;
        entry.set_playback_start(Utc::now());
        let window = duration + Duration::from_millis(self.settings.end_padding_ms);
        info!("Playing {} for {}", entry.song.info_string(), dur_to_string(&window));
        let timer = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            commands_tx.send(Command::SongEnded { token }).await.ok();
        });
        self.state = PlaybackState::Playing { entry, token, timer };
        if let Some(event) = self.playback_event() {
            self.notify(StateChangeEvent::Playback(event));
        }
        self.publish_queue();
    }

    fn skip(&mut self) {
        match std::mem::replace(&mut self.state, PlaybackState::Idle) {
            PlaybackState::Playing { entry, timer, .. } => {
                timer.abort();
                info!("Skipped {}", entry.song.info_string());
            }
            PlaybackState::Precaching { entry, .. } => info!("Skipped {} before it started", entry.song.info_string()),
            PlaybackState::Idle => debug!("Nothing to skip"),
        }
    }

    fn queue_state(&self) -> QueueState {
        QueueState {
            now_playing: self.state.entry().map(QueueEntry::to_item),
            queue: self.queue.items(),
        }
    }

    fn playback_event(&self) -> Option<PlaybackEvent> {
        let PlaybackState::Playing { entry, .. } = &self.state else {
            return None;
        };
        let started_at = entry.playback_start();
        Some(PlaybackEvent {
            song_id: entry.id().to_owned(),
            backend: entry.song.backend.clone(),
            started_at,
            position: started_at.map(|start| (Utc::now() - start).num_milliseconds()),
        })
    }

    fn publish_queue(&self) {
        self.notify(StateChangeEvent::Queue(self.queue_state()));
    }

    fn notify(&self, event: StateChangeEvent) {
        // no subscribers is fine
        self.changes_tx.send(event).ok();
    }
}

/// Cloneable entry point to a running [`PlaybackScheduler`].
#[derive(Clone)]
pub struct SchedulerHandle {
    commands_tx: mpsc::Sender<Command>,
}

impl SchedulerHandle {
    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T, QueueError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands_tx
            .send(command(reply_tx))
            .await
            .map_err(|_| QueueError::SchedulerGone)?;
        reply_rx.await.map_err(|_| QueueError::SchedulerGone)
    }

    /// Queues `song` with an upvote from `user_id`, or upvotes it when already queued or playing.
    pub async fn enqueue(&self, song: Song, user_id: &str) -> Result<(), QueueError> {
        let user_id = user_id.to_owned();
        self.request(|reply| Command::Enqueue { song, user_id, reply }).await?
    }

    pub async fn vote(&self, song_id: &str, user_id: &str, vote: i64) -> Result<(), QueueError> {
        let song_id = song_id.to_owned();
        let user_id = user_id.to_owned();
        self.request(|reply| Command::Vote {
            song_id,
            user_id,
            vote,
            reply,
        })
        .await?
    }

    /// Removes a queued song, or skips it when it is the current one.
    pub async fn remove(&self, song_id: &str) -> Result<(), QueueError> {
        let song_id = song_id.to_owned();
        self.request(|reply| Command::Remove { song_id, reply }).await?
    }

    pub async fn skip(&self) -> Result<(), QueueError> {
        self.commands_tx
            .send(Command::Skip)
            .await
            .map_err(|_| QueueError::SchedulerGone)
    }

    pub async fn queue_state(&self) -> Result<QueueState, QueueError> {
        self.request(Command::QueryQueue).await
    }

    /// The current song with its playback position, `None` when nothing is playing.
    pub async fn playback_position(&self) -> Result<Option<PlaybackEvent>, QueueError> {
        self.request(Command::QueryPlayback).await
    }
}
