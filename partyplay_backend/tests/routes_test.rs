mod common;

use api_models::common::UserCommand;
use api_models::serde_json::{self, json, Value};
use api_models::settings::Settings;
use api_models::state::StateChangeEvent;
use partyplay::server_warp::{routes, Users};
use warp::http::StatusCode;

use common::{create_song, setup, Fixture};

fn api(
    fixture: &Fixture,
) -> impl warp::Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    routes(fixture.context.clone(), Users::default(), fixture.commands_tx.clone())
}

fn enqueue_body(song: &api_models::player::Song, user_id: &str) -> Value {
    json!({ "song": song, "userID": user_id })
}

fn body_json(body: &[u8]) -> Value {
    serde_json::from_slice(body).unwrap()
}

#[tokio::test]
async fn should_enqueue_and_list_queue() {
    let fixture = setup(&[("fixture", false)]);
    let api = api(&fixture);

    let resp = warp::test::request()
        .method("POST")
        .path("/queue")
        .json(&enqueue_body(&create_song("s1"), "u1"))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.body(), "success");

    let resp = warp::test::request().method("GET").path("/queue").reply(&api).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let queue = body_json(resp.body());
    assert_eq!(queue.as_array().unwrap().len(), 1);
    assert_eq!(queue[0]["id"], "s1");
    assert_eq!(queue[0]["service"], "fixture");
    assert_eq!(queue[0]["upVotes"], json!({ "u1": true }));
}

#[tokio::test]
async fn should_reject_invalid_enqueue() {
    let fixture = setup(&[("fixture", false), ("other", false)]);
    let api = api(&fixture);

    let resp = warp::test::request()
        .method("POST")
        .path("/queue")
        .json(&json!({ "song": create_song("s1") }))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(resp.body(), "invalid userID");

    let resp = warp::test::request()
        .method("POST")
        .path("/queue")
        .json(&json!({ "song": { "id": "s1", "title": "no duration", "service": "fixture" }, "userID": "u1" }))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(resp.body(), "invalid song object");

    let mut song = create_song("s1");
    song.backend = "nope".to_string();
    let resp = warp::test::request()
        .method("POST")
        .path("/queue")
        .json(&enqueue_body(&song, "u1"))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(resp.body(), "unknown backend");

    // no service and several backends to pick from
    song.backend = String::new();
    let resp = warp::test::request()
        .method("POST")
        .path("/queue")
        .json(&enqueue_body(&song, "u1"))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = warp::test::request().method("GET").path("/queue").reply(&api).await;
    assert_eq!(body_json(resp.body()), json!([]));
}

#[tokio::test]
async fn should_assign_sole_backend() {
    let fixture = setup(&[("fixture", false)]);
    let api = api(&fixture);
    let mut song = create_song("s1");
    song.backend = String::new();

    let resp = warp::test::request()
        .method("POST")
        .path("/queue")
        .json(&enqueue_body(&song, "u1"))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = warp::test::request().method("GET").path("/queue").reply(&api).await;
    assert_eq!(body_json(resp.body())[0]["service"], "fixture");
}

#[tokio::test]
async fn should_vote() {
    let fixture = setup(&[("fixture", false)]);
    let api = api(&fixture);
    for id in ["s1", "s2"] {
        let resp = warp::test::request()
            .method("POST")
            .path("/queue")
            .json(&enqueue_body(&create_song(id), "u1"))
            .reply(&api)
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    let resp = warp::test::request()
        .method("POST")
        .path("/vote/missing")
        .json(&json!({ "userID": "u2", "vote": 1 }))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = warp::test::request()
        .method("POST")
        .path("/vote/s2")
        .json(&json!({ "userID": "u2" }))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(resp.body(), "invalid vote");

    let resp = warp::test::request()
        .method("POST")
        .path("/vote/s2")
        .json(&json!({ "vote": 1 }))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(resp.body(), "invalid userID");

    let resp = warp::test::request()
        .method("POST")
        .path("/vote/s2")
        .json(&json!({ "userID": "u2", "vote": 5 }))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.body(), "success");

    let resp = warp::test::request().method("GET").path("/queue").reply(&api).await;
    let queue = body_json(resp.body());
    assert_eq!(queue[1]["id"], "s2");
    assert_eq!(queue[1]["upVotes"], json!({ "u1": true, "u2": true }));
}

#[tokio::test]
async fn should_search_all_backends() {
    let fixture = setup(&[("catalog", false), ("broken", true)]);
    let api = api(&fixture);

    let resp = warp::test::request()
        .method("GET")
        .path("/search/hello%20world")
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let songs = body_json(resp.body());
    assert_eq!(songs.as_array().unwrap().len(), 1);
    assert_eq!(songs[0]["title"], "hello world");
    assert_eq!(songs[0]["service"], "catalog");
}

#[tokio::test]
async fn should_fail_search_when_every_backend_fails() {
    let fixture = setup(&[("broken", true)]);
    let api = api(&fixture);

    let resp = warp::test::request().method("GET").path("/search/anything").reply(&api).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(resp.body(), "broken: catalog offline");
}

#[tokio::test]
async fn should_remove_and_skip() {
    let fixture = setup(&[("fixture", false)]);
    let api = api(&fixture);
    for id in ["s1", "s2"] {
        warp::test::request()
            .method("POST")
            .path("/queue")
            .json(&enqueue_body(&create_song(id), "u1"))
            .reply(&api)
            .await;
    }

    let resp = warp::test::request().method("DELETE").path("/queue/s2").reply(&api).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let resp = warp::test::request().method("DELETE").path("/queue/s2").reply(&api).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = warp::test::request()
        .method("POST")
        .path("/playctl")
        .json(&json!({ "action": "skip" }))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = warp::test::request().method("GET").path("/queue").reply(&api).await;
    assert_eq!(body_json(resp.body()), json!([]));
}

#[tokio::test]
async fn should_read_and_save_settings() {
    let fixture = setup(&[("fixture", false)]);
    let api = api(&fixture);

    let resp = warp::test::request().method("GET").path("/api/settings").reply(&api).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let mut settings: Settings = serde_json::from_slice(resp.body()).unwrap();
    settings.search_settings.result_count = 5;

    let resp = warp::test::request()
        .method("POST")
        .path("/api/settings")
        .json(&settings)
        .reply(&api)
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert_eq!(fixture.context.config.get_settings().search_settings.result_count, 5);
}

#[tokio::test]
async fn should_send_state_and_accept_commands_over_websocket() {
    let mut fixture = setup(&[("fixture", false)]);
    let api = api(&fixture);

    let mut client = warp::test::ws().path("/api/ws").handshake(api).await.unwrap();
    let first = client.recv().await.unwrap();
    let event: StateChangeEvent = serde_json::from_str(first.to_str().unwrap()).unwrap();
    assert!(matches!(event, StateChangeEvent::Queue(state) if state.now_playing.is_none()));

    client.send_text(r#""QueryQueue""#).await;
    assert_eq!(fixture.commands_rx.recv().await, Some(UserCommand::QueryQueue));
}
