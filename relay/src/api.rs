use crate::{config::Config, directory::Directory, hub::Hub, messages::MessageLog, presence::Presence};
use anyhow::Result;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chat_api::{
    ActivitySnapshot, ApiError, ClientEvent, NewMessage, PeerId, ServerEvent, USER_HEADER,
};
use futures::{SinkExt, StreamExt};
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct AppState {
    /// Frames for every connected socket.
    pub event_tx: broadcast::Sender<String>,
    pub config: Config,
    pub presence: Arc<Presence>,
    pub hub: Arc<Hub>,
    pub log: Arc<MessageLog>,
    pub directory: Arc<Directory>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let (tx, _rx) = broadcast::channel(100);
        Self {
            event_tx: tx,
            presence: Arc::new(Presence::new(config.presence_debounce)),
            hub: Arc::new(Hub::new()),
            log: Arc::new(MessageLog::new()),
            directory: Arc::new(Directory::new(config.users.clone())),
            config,
        }
    }

    fn broadcast(&self, event: &ServerEvent) {
        if let Some(text) = encode(event) {
            // no receivers is fine
            let _ = self.event_tx.send(text);
        }
    }
}

fn encode(event: &ServerEvent) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!(error = %e, "failed to encode event");
            None
        }
    }
}

/// Build the HTTP application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/users", get(list_users))
        .route("/api/users/messages/send", post(send_message))
        .route("/api/users/messages/:peer", get(conversation))
        .route("/ws/chat", get(ws_handler))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

fn err(status: StatusCode, msg: &str) -> (StatusCode, Json<ApiError>) {
    (
        status,
        Json(ApiError {
            message: msg.into(),
        }),
    )
}

fn caller(headers: &HeaderMap) -> Result<PeerId, (StatusCode, Json<ApiError>)> {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(PeerId::from)
        .ok_or_else(|| err(StatusCode::UNAUTHORIZED, "missing user id"))
}

async fn send_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<NewMessage>,
) -> Result<impl IntoResponse, (StatusCode, Json<ApiError>)> {
    let me = caller(&headers)?;
    if me != req.sender_id {
        return Err(err(StatusCode::FORBIDDEN, "sender does not match caller"));
    }
    let stored = state.log.create(&req).map_err(|e| {
        debug!(error = %e, "rejected message");
        err(StatusCode::BAD_REQUEST, &e.to_string())
    })?;
    info!(id = %stored.id, from = %stored.sender_id, to = %stored.receiver_id, "message stored");
    Ok((StatusCode::CREATED, Json(stored)))
}

async fn conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(peer): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, Json<ApiError>)> {
    let me = caller(&headers)?;
    Ok(Json(state.log.between(&me, &PeerId::from(peer))))
}

async fn list_users(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, (StatusCode, Json<ApiError>)> {
    let me = caller(&headers)?;
    Ok(Json(state.directory.others(&me)))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Identity of an announced connection.
struct Announced {
    peer: PeerId,
    conn: u64,
}

async fn handle_socket(stream: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = stream.split();
    let mut rx = BroadcastStream::new(state.event_tx.subscribe());
    let (direct_tx, mut direct_rx) = mpsc::unbounded_channel::<String>();
    let mut announced: Option<Announced> = None;
    loop {
        let outgoing = tokio::select! {
            Some(Ok(text)) = rx.next() => text,
            Some(text) = direct_rx.recv() => text,
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    handle_frame(&state, &text, &direct_tx, &mut announced);
                    continue;
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => continue,
            },
        };
        if sender.send(Message::Text(outgoing)).await.is_err() {
            break;
        }
    }
    if let Some(Announced { peer, conn }) = announced {
        state.hub.unregister(&peer, conn);
        tokio::spawn(async move {
            if state.presence.disconnect(&peer).await {
                info!(peer = %peer, "peer offline");
                state.broadcast(&ServerEvent::UserDisconnected { user_id: peer });
            }
        });
    }
}

fn handle_frame(
    state: &AppState,
    text: &str,
    direct: &mpsc::UnboundedSender<String>,
    announced: &mut Option<Announced>,
) {
    let event: ClientEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "skipping client frame");
            return;
        }
    };
    match event {
        ClientEvent::UserConnected { user_id } => {
            if announced.is_some() {
                debug!(peer = %user_id, "duplicate announce");
                return;
            }
            let conn = state.hub.register(&user_id, direct.clone());
            state.directory.ensure(&user_id);
            if state.presence.connect(&user_id) {
                info!(peer = %user_id, "peer online");
                state.broadcast(&ServerEvent::UserConnected {
                    user_id: user_id.clone(),
                });
            }
            let sync = [
                ServerEvent::UsersOnline {
                    users: state.presence.online(),
                },
                ServerEvent::Activities {
                    activities: ActivitySnapshot::Map(state.presence.activities()),
                },
            ];
            for event in &sync {
                if let Some(text) = encode(event) {
                    let _ = direct.send(text);
                }
            }
            *announced = Some(Announced {
                peer: user_id,
                conn,
            });
        }
        ClientEvent::SendMessage {
            receiver_id,
            message,
            ..
        } => {
            let Some(me) = announced.as_ref() else {
                warn!("send_message before announce");
                return;
            };
            if message.sender_id != me.peer {
                warn!(peer = %me.peer, sender = %message.sender_id, "relay for another sender");
                return;
            }
            if let Some(text) = encode(&ServerEvent::ReceiveMessage {
                message: message.clone(),
            }) {
                let delivered = state.hub.send_to(&receiver_id, &text);
                debug!(id = %message.id, to = %receiver_id, delivered, "message relayed");
            }
            if let Some(text) = encode(&ServerEvent::MessageSent { message }) {
                let _ = direct.send(text);
            }
        }
        ClientEvent::UpdateActivity { user_id, activity } => {
            if announced.as_ref().map(|a| &a.peer) != Some(&user_id) {
                warn!(peer = %user_id, "activity for unannounced peer");
                return;
            }
            if state.presence.set_activity(&user_id, &activity) {
                state.broadcast(&ServerEvent::ActivityUpdated { user_id, activity });
            }
        }
    }
}

/// Run the HTTP server with the provided configuration.
pub async fn run_http_server(config: Config) -> Result<()> {
    let addr: SocketAddr = config.bind.parse()?;
    let state = AppState::new(config);
    info!(%addr, "chat relay listening");
    axum::Server::bind(&addr)
        .serve(build_router(state).into_make_service())
        .await?;
    Ok(())
}
