use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, Stream, StreamExt};
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;
use crate::config::Config;
use crate::tools::{ToolCall, Tools};

///
/// The duplex RPC transport: a long-lived SSE stream per session carries responses
/// downstream, while the client POSTs its tool calls to /messages. The first event
/// on a fresh stream names the /messages endpoint for that session.
///
struct AppState {
    tools: Arc<Tools>,
    sessions: RwLock<HashMap<Uuid, mpsc::Sender<Event>>>,
}

pub async fn serve(config: &Config, tools: Arc<Tools>) -> anyhow::Result<()> {
    let state = Arc::new(AppState {
        tools,
        sessions: RwLock::new(HashMap::new()),
    });

    let app = Router::new()
        .route("/health", get(health))
        .route("/events", get(events))
        .route("/messages", post(messages))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("{}:{}", config.listen_host(), config.listen_port());
    log::info!("Starting foreman server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "opentally-foreman",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

///
/// Open an event stream. The session lives as long as the stream; the client is
/// told where to POST via the initial `endpoint` event.
///
async fn events(State(state): State<Arc<AppState>>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let session = Uuid::new_v4();
    let (sender, receiver) = mpsc::channel::<Event>(32);

    state.sessions.write().insert(session, sender);
    log::info!("Event stream session {} opened", session);

    let endpoint = Event::default()
        .event("endpoint")
        .data(format!("/messages?session={}", session));

    let responses = ReceiverStream::new(receiver).map(Ok);
    let stream = stream::once(async move { Ok(endpoint) }).chain(responses);

    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Deserialize)]
struct SessionQuery {
    session: Uuid,
}

///
/// The client's half of the duplex: accept one tool call, dispatch it off the async
/// runtime, and push the response onto the session's event stream.
///
async fn messages(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SessionQuery>,
    Json(call): Json<ToolCall>,
) -> Result<StatusCode, (StatusCode, String)> {

    let sender = state.sessions.read().get(&query.session).cloned()
        .ok_or((StatusCode::NOT_FOUND, format!("unknown session {}", query.session)))?;

    // Tool handlers touch locks and the filesystem - keep them off the async runtime.
    let tools = state.tools.clone();
    let response = tokio::task::spawn_blocking(move || tools.dispatch(call))
        .await
        .map_err(|err| (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?;

    let event = Event::default()
        .event("message")
        .json_data(&response)
        .map_err(|err| (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?;

    if sender.send(event).await.is_err() {
        // The stream is gone - drop the dead session.
        state.sessions.write().remove(&query.session);
        return Err((StatusCode::GONE, format!("session {} closed", query.session)))
    }

    Ok(StatusCode::ACCEPTED)
}
