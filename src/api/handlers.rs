//! API request handlers.

use std::convert::Infallible;

use axum::{
    Json,
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message as WsMessage, WebSocket},
    },
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, instrument, warn};

use crate::agent::StreamEvent;
use crate::auth::CurrentUser;
use crate::history::{HistoryPage, Message};
use crate::relay::{ChatRelay, TurnAccumulator, UsageSummary};

use super::error::ApiResult;
use super::state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// One chat turn from the client.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

/// Buffered response for one chat turn: the persisted assistant message
/// plus the usage the host reported for it.
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub message: Message,
    pub usage: UsageSummary,
}

/// Send a message and wait for the full response.
///
/// POST /chat/message
#[instrument(skip(state, request), fields(user_id = %user.id()))]
pub async fn chat_message(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<ChatRequest>,
) -> ApiResult<Json<ChatResponse>> {
    let outcome = state
        .relay
        .run_buffered(&user.profile, &request.message)
        .await?;

    Ok(Json(ChatResponse {
        message: outcome.message,
        usage: outcome.usage,
    }))
}

/// Send a message and stream the response as server-sent events.
///
/// POST /chat/stream
///
/// Each relayed event is one `data:` frame; the stream closes after the
/// terminal `done` (or `error`) frame. If the client goes away mid-turn
/// the upstream stream is cancelled and only what was relayed so far is
/// persisted, best-effort.
#[instrument(skip(state, request), fields(user_id = %user.id()))]
pub async fn chat_stream(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<ChatRequest>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let upstream = state.relay.start_turn(&user.profile, &request.message).await?;
    let user_id = user.id().to_string();

    let (tx, rx) = tokio::sync::mpsc::channel::<Event>(32);
    tokio::spawn(async move {
        relay_turn_sse(state.relay.clone(), user_id, upstream, tx).await;
    });

    let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Flatten a stream event into the `{type, content?, data?}` record the
/// chat transports emit.
fn wire_frame(event: &StreamEvent) -> serde_json::Value {
    use serde_json::json;

    match event {
        StreamEvent::Message { content } => json!({
            "type": "message",
            "content": content,
        }),
        StreamEvent::Reasoning { content } => json!({
            "type": "reasoning",
            "content": content,
        }),
        StreamEvent::ToolCall { name, arguments } => json!({
            "type": "tool_call",
            "content": format!("Tool: {name}"),
            "data": { "name": name, "arguments": arguments },
        }),
        StreamEvent::ToolReturn { name, result } => json!({
            "type": "tool_return",
            "data": { "name": name, "result": result },
        }),
        StreamEvent::Usage { stats } => json!({
            "type": "usage",
            "data": stats,
        }),
        StreamEvent::Error { content } => json!({
            "type": "error",
            "content": content,
            "data": { "error": content },
        }),
        StreamEvent::Done { content, usage } => json!({
            "type": "done",
            "content": content,
            "data": { "usage_stats": usage },
        }),
    }
}

/// Drive one turn for the SSE transport: relay each event until the
/// client goes away, then persist what has accumulated so far.
///
/// A failed send means the client dropped the response body. Returning
/// drops the upstream receiver, which cancels the agent stream, so the
/// turn is persisted with only the data seen up to that point.
async fn relay_turn_sse(
    relay: ChatRelay,
    user_id: String,
    mut upstream: ReceiverStream<StreamEvent>,
    tx: tokio::sync::mpsc::Sender<Event>,
) {
    let mut accumulator = TurnAccumulator::new();

    while let Some(event) = upstream.next().await {
        accumulator.observe(&event);

        match Event::default().json_data(wire_frame(&event)) {
            Ok(frame) => {
                if tx.send(frame).await.is_err() {
                    debug!("SSE client for {} disconnected mid-turn", user_id);
                    break;
                }
            }
            Err(e) => warn!("Failed to serialize stream event: {}", e),
        }

        if accumulator.is_terminal() {
            break;
        }
    }
    drop(upstream);

    if let Err(e) = relay.complete_turn(&user_id, accumulator).await {
        debug!("Turn for {} not persisted: {}", user_id, e);
    }
}

/// Inbound WebSocket frame.
#[derive(Debug, Deserialize)]
struct WsChatFrame {
    #[serde(default)]
    message: String,
}

/// WebSocket chat transport.
///
/// GET /chat/stream (upgrade)
pub async fn chat_ws(
    State(state): State<AppState>,
    user: CurrentUser,
    ws: WebSocketUpgrade,
) -> Response {
    info!("WebSocket chat session for user {}", user.id());
    ws.on_upgrade(move |socket| handle_chat_socket(socket, state, user))
}

/// Serve chat turns over one WebSocket connection until the client leaves.
async fn handle_chat_socket(socket: WebSocket, state: AppState, user: CurrentUser) {
    let (mut sender, mut receiver) = socket.split();

    while let Some(frame) = receiver.next().await {
        let text = match frame {
            Ok(WsMessage::Text(text)) => text,
            Ok(WsMessage::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };

        let request: WsChatFrame = match serde_json::from_str(&text) {
            Ok(frame) => frame,
            Err(_) => {
                if send_ws_error(&mut sender, "Invalid message frame").await.is_err() {
                    break;
                }
                continue;
            }
        };

        let upstream = match state.relay.start_turn(&user.profile, &request.message).await {
            Ok(stream) => stream,
            Err(e) => {
                if send_ws_error(&mut sender, &e.to_string()).await.is_err() {
                    break;
                }
                continue;
            }
        };

        let mut upstream = upstream;
        let mut accumulator = TurnAccumulator::new();
        let mut client_connected = true;

        while let Some(event) = upstream.next().await {
            accumulator.observe(&event);

            let json = match serde_json::to_string(&wire_frame(&event)) {
                Ok(json) => json,
                Err(e) => {
                    warn!("Failed to serialize stream event: {}", e);
                    continue;
                }
            };
            if sender.send(WsMessage::Text(json.into())).await.is_err() {
                debug!("WebSocket client for {} disconnected mid-turn", user.id());
                client_connected = false;
                break;
            }

            if accumulator.is_terminal() {
                break;
            }
        }
        drop(upstream);

        if let Err(e) = state.relay.complete_turn(user.id(), accumulator).await {
            debug!("Turn for {} not persisted: {}", user.id(), e);
        }

        if !client_connected {
            break;
        }
    }

    debug!("WebSocket chat session for {} closed", user.id());
}

async fn send_ws_error(
    sender: &mut (impl Sink<WsMessage, Error = axum::Error> + Unpin),
    content: &str,
) -> Result<(), axum::Error> {
    let frame = serde_json::to_string(&wire_frame(&StreamEvent::Error {
        content: content.to_string(),
    }))
    .unwrap_or_default();
    sender.send(WsMessage::Text(frame.into())).await
}

/// History pagination parameters.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

fn default_page() -> i64 {
    1
}

fn default_page_size() -> i64 {
    50
}

/// Fetch the caller's chat history, newest first.
///
/// GET /chat/history
#[instrument(skip(state), fields(user_id = %user.id()))]
pub async fn chat_history(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<HistoryPage>> {
    let page = state
        .relay
        .history()
        .list_page(user.id(), query.page, query.page_size)
        .await?;

    Ok(Json(page))
}
