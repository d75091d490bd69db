use log::{debug, error, info, warn};
use tokio::sync::broadcast::Sender;

use api_models::common::UserCommand;
use api_models::state::StateChangeEvent;
use api_models::validator::Validate;
use partyplay_playback::{QueueError, SchedulerHandle};
use partyplay_sources::BackendRegistry;

/// Forwards commands received over the websocket to the scheduler until the command channel closes.
pub async fn handle_user_commands(
    scheduler: SchedulerHandle,
    registry: BackendRegistry,
    mut input_commands_rx: tokio::sync::mpsc::Receiver<UserCommand>,
    state_changes_sender: Sender<StateChangeEvent>,
) {
    while let Some(cmd) = input_commands_rx.recv().await {
        debug!("Received command {:?}", cmd);
        let result = match cmd {
            UserCommand::Enqueue { mut song, user_id } => {
                if song.backend.is_empty() {
                    if let Some(backend) = registry.sole_backend() {
                        song.backend = backend.to_owned();
                    }
                }
                if song.validate().is_err() || registry.get(&song.backend).is_none() {
                    warn!("Rejected song from user {user_id}: {song:?}");
                    state_changes_sender
                        .send(StateChangeEvent::NotificationError("invalid song object".to_string()))
                        .ok();
                    continue;
                }
                let title = song.title.clone();
                scheduler
                    .enqueue(song, &user_id)
                    .await
                    .map(|()| Some(format!("{title} added to queue")))
            }
            UserCommand::Vote {
                song_id,
                user_id,
                vote,
            } => scheduler.vote(&song_id, &user_id, vote).await.map(|()| None),
            UserCommand::Remove(song_id) => scheduler
                .remove(&song_id)
                .await
                .map(|()| Some("Song removed from queue".to_string())),
            UserCommand::Skip => scheduler.skip().await.map(|()| None),
            UserCommand::QueryQueue => scheduler.queue_state().await.map(|state| {
                state_changes_sender.send(StateChangeEvent::Queue(state)).ok();
                None
            }),
        };
        match result {
            Ok(Some(message)) => {
                state_changes_sender
                    .send(StateChangeEvent::NotificationSuccess(message))
                    .ok();
            }
            Ok(None) => {}
            Err(QueueError::SchedulerGone) => {
                error!("Scheduler stopped, exit from command handler");
                break;
            }
            Err(e) => {
                state_changes_sender
                    .send(StateChangeEvent::NotificationError(e.to_string()))
                    .ok();
            }
        }
    }
    info!("Command handler stopped");
}
