mod common;

use std::time::Duration;

use api_models::common::UserCommand;
use api_models::state::StateChangeEvent;
use partyplay::command_handler::handle_user_commands;
use tokio::sync::broadcast::Receiver;

use common::{create_song, setup};

async fn next_notification(changes_rx: &mut Receiver<StateChangeEvent>) -> StateChangeEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match changes_rx.recv().await.unwrap() {
                event @ (StateChangeEvent::NotificationSuccess(_) | StateChangeEvent::NotificationError(_)) => {
                    return event
                }
                _ => {}
            }
        }
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn should_forward_commands_to_scheduler() {
    let fixture = setup(&[("fixture", false)]);
    let mut changes_rx = fixture.changes_tx.subscribe();
    let scheduler = fixture.context.scheduler.clone();
    let handler_task = tokio::spawn(handle_user_commands(
        scheduler.clone(),
        fixture.context.registry.clone(),
        fixture.commands_rx,
        fixture.changes_tx.clone(),
    ));

    let mut song = create_song("s1");
    song.backend = String::new();
    fixture
        .commands_tx
        .send(UserCommand::Enqueue {
            song,
            user_id: "u1".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(
        next_notification(&mut changes_rx).await,
        StateChangeEvent::NotificationSuccess("Song s1 added to queue".to_string())
    );
    let state = scheduler.queue_state().await.unwrap();
    assert_eq!(state.now_playing.unwrap().backend, "fixture");

    fixture
        .commands_tx
        .send(UserCommand::Vote {
            song_id: "missing".to_string(),
            user_id: "u1".to_string(),
            vote: 1,
        })
        .await
        .unwrap();
    assert_eq!(
        next_notification(&mut changes_rx).await,
        StateChangeEvent::NotificationError("song missing not found".to_string())
    );

    fixture
        .commands_tx
        .send(UserCommand::Enqueue {
            song: Default::default(),
            user_id: "u1".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(
        next_notification(&mut changes_rx).await,
        StateChangeEvent::NotificationError("invalid song object".to_string())
    );

    // closing the channel stops the handler
    drop(fixture.commands_tx);
    handler_task.await.unwrap();
}
