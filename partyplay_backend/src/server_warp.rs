use std::env;
use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::{format_err, Result};
use futures::{Future, FutureExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::{
    sync::{broadcast::error::RecvError, broadcast::Receiver, mpsc, RwLock},
    time::sleep,
};
use tokio_stream::wrappers::UnboundedReceiverStream;
use warp::{
    filters::BoxedFilter,
    http::Method,
    ws::{Message, WebSocket},
    Filter, Reply,
};

use api_models::common::UserCommand;
use api_models::serde_json;
use api_models::settings::HttpSettings;
use api_models::state::StateChangeEvent;
use partyplay_config::ArcConfiguration;
use partyplay_playback::SchedulerHandle;
use partyplay_sources::BackendRegistry;

/// Our global unique user id counter.
static NEXT_USER_ID: AtomicUsize = AtomicUsize::new(1);

/// Currently connected websocket clients.
///
/// - Key is their id
/// - Value is a sender of `warp::ws::Message`
pub type Users = Arc<RwLock<HashMap<usize, mpsc::UnboundedSender<Result<Message, warp::Error>>>>>;

type UserCommandSender = mpsc::Sender<UserCommand>;

/// Everything the http handlers need.
#[derive(Clone)]
pub struct ServerContext {
    pub scheduler: SchedulerHandle,
    pub registry: BackendRegistry,
    pub config: ArcConfiguration,
}

pub fn start(
    mut state_changes_rx: Receiver<StateChangeEvent>,
    user_commands_tx: UserCommandSender,
    context: ServerContext,
) -> Result<(impl Future<Output = ()>, impl Future<Output = ()>)> {
    let settings = context.config.get_settings();
    let port = get_port(&settings.http_settings)?;
    let users = Users::default();
    let users_notify = users.clone();

    let cors = warp::cors()
        .allow_methods(&[Method::GET, Method::POST, Method::DELETE])
        .allow_any_origin()
        .allow_header("content-type");
    let routes = routes(context, users, user_commands_tx)
        .or(static_content(settings.http_settings.static_dir))
        .with(cors);

    let ws_handle = async move {
        loop {
            match state_changes_rx.recv().await {
                Err(RecvError::Closed) => break,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Websocket notifier lagged by {skipped} events");
                    sleep(Duration::from_millis(100)).await;
                }
                Ok(ev) => {
                    debug!("Received state changed event {:?}", ev);
                    notify_users(&users_notify, &ev).await;
                }
            }
        }
    };
    info!("Listening on port {port}");
    let http_handle = warp::serve(routes).run(([0, 0, 0, 0], port));
    Ok((http_handle, ws_handle))
}

/// All api routes, without cors and static content.
pub fn routes(
    context: ServerContext,
    users: Users,
    user_commands_tx: UserCommandSender,
) -> impl Filter<Extract = impl Reply, Error = warp::Rejection> + Clone {
    let cache_dir = context.config.get_settings().cache_settings.cache_dir;
    let scheduler = context.scheduler.clone();
    let users_f = warp::any().map(move || users.clone());
    let user_commands_tx = warp::any().map(move || user_commands_tx.clone());
    let scheduler_f = warp::any().map(move || scheduler.clone());

    let player_ws_path = warp::path!("api" / "ws")
        .and(warp::ws())
        .and(users_f)
        .and(user_commands_tx)
        .and(scheduler_f)
        .map(|ws: warp::ws::Ws, users, user_commands, scheduler| {
            ws.on_upgrade(|websocket| user_connected(websocket, users, user_commands, scheduler))
        });

    let cached_songs = warp::get().and(warp::path("song")).and(warp::fs::dir(cache_dir));

    player_ws_path
        .or(filters::vote(context.clone()))
        .or(filters::get_queue(context.clone()))
        .or(filters::enqueue(context.clone()))
        .or(filters::remove(context.clone()))
        .or(filters::search(context.clone()))
        .or(filters::play_control(context.clone()))
        .or(filters::settings_save(context.clone()))
        .or(filters::get_settings(context))
        .or(cached_songs)
}

fn static_content(static_dir: Option<String>) -> BoxedFilter<(Box<dyn Reply>,)> {
    match static_dir {
        Some(dir) => {
            info!("Serving static content from {dir}");
            warp::get()
                .and(warp::fs::dir(dir))
                .map(|file: warp::fs::File| Box::new(file) as Box<dyn Reply>)
                .boxed()
        }
        None => warp::any()
            .and_then(|| async { Err::<Box<dyn Reply>, _>(warp::reject::not_found()) })
            .boxed(),
    }
}

mod filters {
    use warp::Filter;

    use api_models::common::{EnqueueRequest, PlayControlRequest, VoteRequest};
    use api_models::serde::de::DeserializeOwned;
    use api_models::settings::Settings;

    use super::{handlers, ServerContext};

    const MAX_BODY_BYTES: u64 = 64 * 1024;

    pub fn vote(context: ServerContext) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
        warp::post()
            .and(warp::path!("vote" / String))
            .and(json_body::<VoteRequest>())
            .and(with_context(context))
            .and_then(handlers::vote)
    }

    pub fn get_queue(
        context: ServerContext,
    ) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
        warp::get()
            .and(warp::path!("queue"))
            .and(with_context(context))
            .and_then(handlers::get_queue)
    }

    pub fn enqueue(context: ServerContext) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
        warp::post()
            .and(warp::path!("queue"))
            .and(json_body::<EnqueueRequest>())
            .and(with_context(context))
            .and_then(handlers::enqueue)
    }

    pub fn remove(context: ServerContext) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
        warp::delete()
            .and(warp::path!("queue" / String))
            .and(with_context(context))
            .and_then(handlers::remove)
    }

    pub fn search(context: ServerContext) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
        warp::get()
            .and(warp::path!("search" / String))
            .and(with_context(context))
            .and_then(handlers::search)
    }

    pub fn play_control(
        context: ServerContext,
    ) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
        warp::post()
            .and(warp::path!("playctl"))
            .and(json_body::<PlayControlRequest>())
            .and(with_context(context))
            .and_then(handlers::play_control)
    }

    pub fn settings_save(
        context: ServerContext,
    ) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
        warp::post()
            .and(warp::path!("api" / "settings"))
            .and(json_body::<Settings>())
            .and(with_context(context))
            .and_then(handlers::save_settings)
    }

    pub fn get_settings(
        context: ServerContext,
    ) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
        warp::get()
            .and(warp::path!("api" / "settings"))
            .and(with_context(context))
            .and_then(handlers::get_settings)
    }

    fn with_context(
        context: ServerContext,
    ) -> impl Filter<Extract = (ServerContext,), Error = std::convert::Infallible> + Clone {
        warp::any().map(move || context.clone())
    }

    fn json_body<T: DeserializeOwned + Send>() -> impl Filter<Extract = (T,), Error = warp::Rejection> + Clone
    {
        warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
    }
}

#[allow(clippy::unused_async)]
mod handlers {
    use std::convert::Infallible;

    use api_models::common::{EnqueueRequest, PlayAction, PlayControlRequest, VoteRequest};
    use api_models::settings::Settings;
    use api_models::validator::Validate;
    use log::{debug, error, warn};
    use partyplay_playback::QueueError;
    use percent_encoding::percent_decode_str;
    use warp::http::StatusCode;
    use warp::reply::{self, Reply, WithStatus};

    use super::ServerContext;

    fn status(message: &str, code: StatusCode) -> WithStatus<String> {
        reply::with_status(message.to_owned(), code)
    }

    fn success() -> WithStatus<String> {
        status("success", StatusCode::OK)
    }

    fn not_found(message: &str) -> WithStatus<String> {
        status(message, StatusCode::NOT_FOUND)
    }

    fn queue_error(e: &QueueError) -> WithStatus<String> {
        match e {
            QueueError::SongNotFound(_) => not_found(&e.to_string()),
            QueueError::SchedulerGone => {
                error!("Request failed: {e}");
                status(&e.to_string(), StatusCode::SERVICE_UNAVAILABLE)
            }
        }
    }

    pub async fn vote(song_id: String, request: VoteRequest, context: ServerContext) -> Result<impl Reply, Infallible> {
        if let Err(errors) = request.validate() {
            let message = if errors.field_errors().contains_key("user_id") {
                "invalid userID"
            } else {
                "invalid vote"
            };
            return Ok(not_found(message));
        }
        let vote = request.vote.unwrap_or_default();
        debug!("User {} votes {vote} on {song_id}", request.user_id);
        Ok(match context.scheduler.vote(&song_id, &request.user_id, vote).await {
            Ok(()) => success(),
            Err(e) => queue_error(&e),
        })
    }

    pub async fn get_queue(context: ServerContext) -> Result<Box<dyn Reply>, Infallible> {
        Ok(match context.scheduler.queue_state().await {
            Ok(state) => Box::new(reply::json(&state.flatten())),
            Err(e) => Box::new(queue_error(&e)),
        })
    }

    pub async fn enqueue(mut request: EnqueueRequest, context: ServerContext) -> Result<impl Reply, Infallible> {
        if request.song.backend.is_empty() {
            if let Some(backend) = context.registry.sole_backend() {
                request.song.backend = backend.to_owned();
            }
        }
        if let Err(errors) = request.validate() {
            let message = if errors.errors().contains_key("song") {
                "invalid song object"
            } else {
                "invalid userID"
            };
            return Ok(not_found(message));
        }
        if context.registry.get(&request.song.backend).is_none() {
            return Ok(not_found("unknown backend"));
        }
        Ok(match context.scheduler.enqueue(request.song, &request.user_id).await {
            Ok(()) => success(),
            Err(e) => queue_error(&e),
        })
    }

    pub async fn remove(song_id: String, context: ServerContext) -> Result<impl Reply, Infallible> {
        Ok(match context.scheduler.remove(&song_id).await {
            Ok(()) => success(),
            Err(e) => queue_error(&e),
        })
    }

    pub async fn search(terms: String, context: ServerContext) -> Result<Box<dyn Reply>, Infallible> {
        let terms = percent_decode_str(&terms).decode_utf8_lossy().to_string();
        let limit = context.config.get_settings().search_settings.result_count;
        let results = context.registry.search(&terms, limit).await;
        if !results.errors.is_empty() && results.errors.len() == context.registry.len() {
            let message = results
                .errors
                .iter()
                .map(|(backend, e)| format!("{backend}: {e}"))
                .collect::<Vec<_>>()
                .join("\n");
            return Ok(Box::new(not_found(&message)));
        }
        Ok(Box::new(reply::json(&results.songs)))
    }

    pub async fn play_control(request: PlayControlRequest, context: ServerContext) -> Result<impl Reply, Infallible> {
        match request.action {
            PlayAction::Skip => Ok(match context.scheduler.skip().await {
                Ok(()) => success(),
                Err(e) => queue_error(&e),
            }),
        }
    }

    pub async fn save_settings(settings: Settings, context: ServerContext) -> Result<impl Reply, Infallible> {
        debug!("Settings to save {:?}", settings);
        if let Err(e) = settings.cache_settings.validate() {
            return Ok(status(&e.to_string(), StatusCode::BAD_REQUEST));
        }
        Ok(match context.config.save_settings(&settings) {
            Ok(()) => {
                warn!("Settings saved, restart to apply them");
                status("saved", StatusCode::CREATED)
            }
            Err(e) => {
                error!("Saving settings failed: {e:#}");
                status(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
            }
        })
    }

    pub async fn get_settings(context: ServerContext) -> Result<impl Reply, Infallible> {
        Ok(reply::json(&context.config.get_settings()))
    }
}

async fn notify_users(users_to_notify: &Users, status_change_event: &StateChangeEvent) {
    let users = users_to_notify.read().await;
    if users.is_empty() {
        return;
    }
    match serde_json::to_string(status_change_event) {
        Ok(json_msg) => users.iter().for_each(|(user_id, tx)| {
            let send_result = tx.send(Ok(Message::text(json_msg.clone())));
            debug!("Sent message to user: {user_id} with result: {send_result:?}");
        }),
        Err(e) => error!("Failed to serialize {status_change_event:?}: {e}"),
    }
}

/// Sends the current playback position and queue to a newly connected client.
async fn send_current_state(
    tx: &mpsc::UnboundedSender<Result<Message, warp::Error>>,
    scheduler: &SchedulerHandle,
) -> Result<()> {
    let mut events = vec![];
    if let Some(playback) = scheduler.playback_position().await? {
        events.push(StateChangeEvent::Playback(playback));
    }
    events.push(StateChangeEvent::Queue(scheduler.queue_state().await?));
    for event in events {
        tx.send(Ok(Message::text(serde_json::to_string(&event)?)))?;
    }
    Ok(())
}

async fn user_connected(ws: WebSocket, users: Users, user_commands_tx: UserCommandSender, scheduler: SchedulerHandle) {
    // Use a counter to assign a new unique ID for this user.
    let user_id = NEXT_USER_ID.fetch_add(1, Ordering::Relaxed);

    debug!("new websocket client: {}", user_id);

    let (to_user_ws, mut from_user_ws) = ws.split();

    // Use an unbounded channel to handle buffering and flushing of messages
    // to the websocket...
    let (tx, rx) = mpsc::unbounded_channel();
    let rx = UnboundedReceiverStream::new(rx);
    tokio::spawn(rx.forward(to_user_ws).map(|result| {
        if let Err(e) = result {
            debug!("websocket send error: {}", e);
        }
    }));

    if let Err(e) = send_current_state(&tx, &scheduler).await {
        warn!("Failed to send current state to user {user_id}: {e:#}");
    }
    users.write().await.insert(user_id, tx);

    // input socket loop
    while let Some(result) = from_user_ws.next().await {
        let msg = match result {
            Ok(msg) => msg,
            Err(e) => {
                debug!("websocket error(uid={}): {}", user_id, e);
                break;
            }
        };
        let Ok(cmd) = msg.to_str() else {
            continue;
        };
        debug!("Got command from user {user_id}: {cmd}");
        match serde_json::from_str::<UserCommand>(cmd) {
            Ok(user_command) => {
                _ = user_commands_tx.send(user_command).await;
            }
            Err(e) => warn!("Unknown command received: [{cmd}]: {e}"),
        }
    }

    user_disconnected(user_id, &users).await;
}

async fn user_disconnected(my_id: usize, users: &Users) {
    info!("good bye user: {}", my_id);
    users.write().await.remove(&my_id);
    info!("Number of active websockets is: {}", users.read().await.len());
}

fn get_port(settings: &HttpSettings) -> Result<u16> {
    let fallback_port = settings.fallback_port;
    let port = match env::var("PARTYPLAY_HTTP_PORT") {
        Ok(value) => value
            .parse::<u16>()
            .map_err(|e| format_err!("Invalid PARTYPLAY_HTTP_PORT [{value}]: {e}"))?,
        Err(_) => settings.port,
    };
    if is_local_port_free(port) {
        return Ok(port);
    }
    warn!("Desired port {port} is unavailable, will try fallback port {fallback_port}");
    if is_local_port_free(fallback_port) {
        return Ok(fallback_port);
    }
    Err(format_err!(
        "Desired port [{port}] and fallback port [{fallback_port}] are unavailable! \
         Set PARTYPLAY_HTTP_PORT to another value"
    ))
}

fn is_local_port_free(port: u16) -> bool {
    let ipv4 = SocketAddrV4::new(Ipv4Addr::LOCALHOST, port);
    TcpListener::bind(ipv4).is_ok()
}
