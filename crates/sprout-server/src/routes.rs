//! HTTP and WebSocket routes for the Sprout server.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        Path, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::{Html, IntoResponse, Json},
    routing::get,
};
use futures::future::BoxFuture;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use sprout_core::{SessionConfig, SessionEvent, SessionId, SessionRegistry};
use tokio::sync::Mutex as TokioMutex;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::error::ServerResult;
use crate::owners::{ConnectionId, SessionOwners};
use crate::progress::{ProgressBackend, ProgressRecord, ProgressUpdate};
use crate::protocol::{ClientMessage, ExampleInfo, ServerMessage};

/// Application state shared across handlers.
pub struct AppState {
    /// Sessions of every connected page, sharing one runtime.
    pub registry: Arc<SessionRegistry>,
    /// Which connection owns which session.
    pub owners: SessionOwners,
    /// Lesson progress store.
    pub progress: Arc<dyn ProgressBackend>,
}

type WsSender = Arc<TokioMutex<SplitSink<WebSocket, Message>>>;

/// Create the router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .route("/api/runtime", get(runtime_handler))
        .route("/api/sessions", get(sessions_handler))
        .route("/api/examples", get(examples_handler))
        .route(
            "/api/progress/{user_id}",
            get(get_progress_handler).post(save_progress_handler),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Minimal runner page for trying the server by hand.
async fn index_handler() -> Html<&'static str> {
    Html(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>Sprout Runner</title>
    <style>
        body { font-family: system-ui, sans-serif; margin: 2rem; }
        h1 { color: #15803d; }
        textarea { width: 100%; height: 10rem; font-family: monospace; }
        pre { background: #f3f4f6; padding: 1rem; border-radius: 0.5rem; min-height: 3rem; }
    </style>
</head>
<body>
    <h1>Sprout Runner</h1>
    <textarea id="code"></textarea>
    <p><button id="run">Run</button> <span id="status">Connecting...</span></p>
    <pre id="output"></pre>
    <script>
        const ws = new WebSocket(`ws://${location.host}/ws`);
        const id = 'page-runner';
        const $ = (x) => document.getElementById(x);
        ws.onopen = () => ws.send(JSON.stringify({ type: 'create_session', session_id: id }));
        ws.onmessage = (e) => {
            const msg = JSON.parse(e.data);
            if (msg.type === 'session_state') { $('code').value = msg.session.snippet; $('status').textContent = msg.session.status_message; }
            if (msg.type === 'snippet_changed') $('code').value = msg.snippet;
            if (msg.type === 'output') $('output').textContent += msg.chunk;
            if (msg.type === 'output_cleared') $('output').textContent = '';
            if (msg.type === 'status') $('status').textContent = msg.message;
            if (msg.type === 'error') $('status').textContent = msg.message;
        };
        $('run').onclick = () => {
            ws.send(JSON.stringify({ type: 'edit', session_id: id, snippet: $('code').value }));
            ws.send(JSON.stringify({ type: 'run', session_id: id }));
        };
    </script>
</body>
</html>"#,
    )
}

/// Health check handler.
async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Shared runtime load state.
async fn runtime_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let provisioner = state.registry.provisioner();
    Json(serde_json::json!({
        "state": provisioner.state(),
        "load_attempts": provisioner.load_attempts(),
        "engine": provisioner.handle().map(|h| h.describe()),
        "last_error": provisioner.last_error(),
    }))
}

/// Snapshots of every live session.
async fn sessions_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.registry.snapshots())
}

async fn examples_handler(State(state): State<Arc<AppState>>) -> Json<Vec<ExampleInfo>> {
    Json(example_list(&state.registry))
}

async fn get_progress_handler(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> ServerResult<Json<Vec<ProgressRecord>>> {
    Ok(Json(state.progress.query_progress(&user_id).await?))
}

async fn save_progress_handler(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Json(update): Json<ProgressUpdate>,
) -> ServerResult<Json<ProgressRecord>> {
    Ok(Json(state.progress.upsert_progress(&user_id, update).await?))
}

fn example_list(registry: &SessionRegistry) -> Vec<ExampleInfo> {
    let examples = registry.examples();
    examples
        .names()
        .filter_map(|name| {
            examples.get(name).map(|code| ExampleInfo {
                name: name.to_string(),
                code: code.to_string(),
            })
        })
        .collect()
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_websocket(socket, state))
}

/// Handle WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let (sender, mut receiver) = socket.split();
    let sender: WsSender = Arc::new(TokioMutex::new(sender));
    let conn: ConnectionId = Uuid::new_v4();
    tracing::debug!(connection = %conn, "WebSocket connected");

    // Subscribe before any session exists so no event is missed.
    let mut rx = state.registry.subscribe();

    let forward_task = {
        let sender = sender.clone();
        let state = state.clone();
        tokio::spawn(async move {
            loop {
                let messages: Vec<ServerMessage> = match rx.recv().await {
                    Ok(event) => relay(&state, conn, event).into_iter().collect(),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            "WebSocket client lagging, {} events dropped; resyncing",
                            skipped
                        );
                        resync(&state, conn)
                    }
                    Err(RecvError::Closed) => break,
                };
                for msg in &messages {
                    if !send_message(&sender, msg).await {
                        return;
                    }
                }
            }
        })
    };

    // Handle incoming client messages
    while let Some(result) = receiver.next().await {
        match result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(msg) => handle_client_message(msg, &state, conn, &sender).await,
                Err(e) => {
                    tracing::warn!("Failed to parse client message: {} (input: {})", e, text);
                    send_message(
                        &sender,
                        &ServerMessage::error(None, format!("Invalid message format: {}", e)),
                    )
                    .await;
                }
            },
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::warn!("WebSocket error: {}", e);
                break;
            }
            _ => {}
        }
    }

    forward_task.abort();

    // The page is gone; so are its widgets.
    let destroyed = state.owners.release(&state.registry, conn);
    tracing::debug!(connection = %conn, "WebSocket closed, {} sessions destroyed", destroyed);
}

/// The message for `event`, if the connection owns its session.
fn relay(state: &AppState, conn: ConnectionId, event: SessionEvent) -> Option<ServerMessage> {
    state
        .owners
        .owns(conn, event.session_id())
        .then(|| ServerMessage::from(event))
}

/// Full state of every session the connection owns. Sent after the
/// connection missed events, so widgets can redraw from scratch.
fn resync(state: &AppState, conn: ConnectionId) -> Vec<ServerMessage> {
    state
        .owners
        .owned_by(conn)
        .iter()
        .filter_map(|id| state.registry.get(id))
        .map(|session| ServerMessage::SessionState {
            session: session.snapshot(),
        })
        .collect()
}

/// Send a server message through the WebSocket. Returns false once the
/// connection is gone.
async fn send_message(sender: &WsSender, msg: &ServerMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => {
            let mut sender = sender.lock().await;
            sender.send(Message::Text(json.into())).await.is_ok()
        }
        Err(e) => {
            tracing::error!("Failed to serialize server message: {}", e);
            true
        }
    }
}

/// Direct answer to a client message.
enum Reply {
    /// Sent right away.
    Now(ServerMessage),
    /// Sent once the future resolves; the socket keeps reading meanwhile.
    Later(BoxFuture<'static, ServerMessage>),
}

/// Handle a client message, reporting failures back to the client.
async fn handle_client_message(
    msg: ClientMessage,
    state: &Arc<AppState>,
    conn: ConnectionId,
    sender: &WsSender,
) {
    let session_id = msg.session_id().cloned();
    match process_message(msg, state, conn) {
        Ok(Some(Reply::Now(reply))) => {
            send_message(sender, &reply).await;
        }
        Ok(Some(Reply::Later(reply))) => {
            let sender = sender.clone();
            tokio::spawn(async move {
                send_message(&sender, &reply.await).await;
            });
        }
        Ok(None) => {}
        Err(e) => {
            tracing::debug!("Client request failed: {}", e);
            send_message(sender, &ServerMessage::error(session_id, e.to_string())).await;
        }
    }
}

/// Apply a client message. Session events are delivered by the forward task;
/// the returned reply is the direct answer, if any.
fn process_message(
    msg: ClientMessage,
    state: &AppState,
    conn: ConnectionId,
) -> ServerResult<Option<Reply>> {
    let registry = &state.registry;
    let owners = &state.owners;
    let session = |id: &SessionId| owners.session(registry, conn, id);

    let reply = match msg {
        ClientMessage::CreateSession {
            session_id,
            initial_snippet,
            read_only,
        } => {
            let id = session_id
                .unwrap_or_else(|| SessionId::new(format!("runner-{}", Uuid::new_v4())));
            let created = owners.create(
                registry,
                conn,
                id,
                SessionConfig {
                    initial_snippet,
                    read_only,
                },
            )?;
            Some(Reply::Now(ServerMessage::SessionState {
                session: created.snapshot(),
            }))
        }

        ClientMessage::Edit {
            session_id,
            snippet,
        } => {
            session(&session_id)?.set_snippet(snippet)?;
            None
        }

        ClientMessage::Run { session_id } => {
            let target = session(&session_id)?;
            // Runs can take seconds; keep reading client messages meanwhile.
            Some(Reply::Later(Box::pin(async move {
                match target.run().await {
                    Ok(report) => ServerMessage::run_completed(session_id, &report),
                    Err(e) => ServerMessage::error(Some(session_id), e.to_string()),
                }
            })))
        }

        ClientMessage::Reset {
            session_id,
            confirmed,
        } => {
            session(&session_id)?.reset(confirmed)?;
            None
        }

        ClientMessage::ClearOutput { session_id } => {
            session(&session_id)?.clear_output();
            None
        }

        ClientMessage::LoadExample { session_id, name } => {
            if session(&session_id)?.load_example(&name) {
                None
            } else {
                Some(Reply::Now(ServerMessage::error(
                    Some(session_id),
                    format!("Unknown example: {}", name),
                )))
            }
        }

        ClientMessage::Format { session_id } => {
            session(&session_id)?.format()?;
            None
        }

        ClientMessage::DestroySession { session_id } => {
            owners.destroy(registry, conn, &session_id)?;
            Some(Reply::Now(ServerMessage::SessionDestroyed { session_id }))
        }

        ClientMessage::GetSession { session_id } => Some(Reply::Now(ServerMessage::SessionState {
            session: session(&session_id)?.snapshot(),
        })),

        ClientMessage::ListExamples => Some(Reply::Now(ServerMessage::Examples {
            examples: example_list(registry),
        })),

        ClientMessage::CheckSnippet { snippet } => {
            let verdict = registry.config().safety_filter().check(&snippet);
            Some(Reply::Now(ServerMessage::from(verdict)))
        }
    };

    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use sprout_core::{
        Interpreter, OutputSink, PythonLoader, RunnerConfig, RuntimeLoader, SessionStatus,
    };
    use tower::ServiceExt;

    use crate::error::ServerError;
    use crate::progress::InMemoryProgress;

    /// Prints the snippet back.
    struct Echo;

    #[async_trait]
    impl Interpreter for Echo {
        async fn execute(&self, source: &str, output: &OutputSink) -> sprout_core::Result<()> {
            output.write(source);
            Ok(())
        }
    }

    struct EchoLoader;

    #[async_trait]
    impl RuntimeLoader for EchoLoader {
        fn name(&self) -> &str {
            "echo"
        }

        async fn initialize(&self) -> sprout_core::Result<Arc<dyn Interpreter>> {
            Ok(Arc::new(Echo))
        }
    }

    fn state_with(loader: impl RuntimeLoader) -> Arc<AppState> {
        let mut config = RunnerConfig::default();
        config.preload.enabled = false;
        Arc::new(AppState {
            registry: Arc::new(SessionRegistry::with_loader(config, loader)),
            owners: SessionOwners::new(),
            progress: Arc::new(InMemoryProgress::new()),
        })
    }

    fn app() -> Router {
        create_router(state_with(PythonLoader::default()))
    }

    fn create(id: &str) -> ClientMessage {
        ClientMessage::CreateSession {
            session_id: Some(SessionId::from(id)),
            initial_snippet: Some(format!("print('{id}')")),
            read_only: false,
        }
    }

    fn now(reply: Option<Reply>) -> ServerMessage {
        match reply {
            Some(Reply::Now(msg)) => msg,
            Some(Reply::Later(_)) => panic!("expected an immediate reply"),
            None => panic!("expected a reply"),
        }
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = app()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_runtime_not_loaded_without_sessions() {
        let response = app()
            .oneshot(Request::get("/api/runtime").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["state"], "not_loaded");
        assert_eq!(json["load_attempts"], 0);
    }

    #[tokio::test]
    async fn test_examples() {
        let response = app()
            .oneshot(Request::get("/api/examples").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json = body_json(response).await;
        let names: Vec<_> = json
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["calculator", "fibonacci", "hello"]);
    }

    #[tokio::test]
    async fn test_progress_roundtrip() {
        let app = app();
        let response = app
            .clone()
            .oneshot(
                Request::post("/api/progress/u1")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"chapter_id":"ch1","lesson_id":"l1"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::get("/api/progress/u1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json[0]["lesson_id"], "l1");
        assert_eq!(json[0]["completed"], true);
    }

    #[tokio::test]
    async fn test_progress_validation() {
        let response = app()
            .oneshot(
                Request::post("/api/progress/u1")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"chapter_id":"","lesson_id":"l1"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    // =========================================================================
    // WebSocket messages
    // =========================================================================

    #[test]
    fn test_create_session_replies_with_state() {
        let state = state_with(EchoLoader);
        let conn = Uuid::new_v4();

        match now(process_message(create("w"), &state, conn).unwrap()) {
            ServerMessage::SessionState { session } => {
                assert_eq!(session.id, SessionId::from("w"));
                assert_eq!(session.snippet, "print('w')");
            }
            other => panic!("unexpected reply {other:?}"),
        }

        let generated = ClientMessage::CreateSession {
            session_id: None,
            initial_snippet: None,
            read_only: false,
        };
        match now(process_message(generated, &state, conn).unwrap()) {
            ServerMessage::SessionState { session } => {
                assert!(session.id.as_str().starts_with("runner-"));
            }
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[test]
    fn test_session_of_other_connection_is_hidden() {
        let state = state_with(EchoLoader);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        process_message(create("w"), &state, a).unwrap();

        assert!(matches!(
            process_message(create("w"), &state, b),
            Err(ServerError::SessionInUse(_))
        ));
        let edit = ClientMessage::Edit {
            session_id: SessionId::from("w"),
            snippet: "print('hijack')".to_string(),
        };
        assert!(matches!(
            process_message(edit, &state, b),
            Err(ServerError::Core(sprout_core::Error::SessionNotFound(_)))
        ));
        let destroy = ClientMessage::DestroySession {
            session_id: SessionId::from("w"),
        };
        assert!(process_message(destroy, &state, b).is_err());
        assert_eq!(
            state.registry.require(&SessionId::from("w")).unwrap().snippet(),
            "print('w')"
        );
    }

    #[test]
    fn test_concurrent_create_from_two_connections() {
        let state = state_with(EchoLoader);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let (ra, rb) = std::thread::scope(|scope| {
            let ha = scope.spawn(|| process_message(create("w"), &state, a).is_ok());
            let hb = scope.spawn(|| process_message(create("w"), &state, b).is_ok());
            (ha.join().unwrap(), hb.join().unwrap())
        });

        assert!(ra ^ rb);
        let id = SessionId::from("w");
        assert!(state.owners.owns(a, &id) ^ state.owners.owns(b, &id));
    }

    #[test]
    fn test_events_relayed_to_owner_only() {
        let state = state_with(EchoLoader);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        process_message(create("a"), &state, a).unwrap();
        process_message(create("b"), &state, b).unwrap();

        let event = SessionEvent::Output {
            session_id: SessionId::from("a"),
            chunk: "hi\n".to_string(),
        };
        assert!(matches!(
            relay(&state, a, event.clone()),
            Some(ServerMessage::Output { .. })
        ));
        assert!(relay(&state, b, event).is_none());
    }

    #[test]
    fn test_resync_covers_owned_sessions() {
        let state = state_with(EchoLoader);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        process_message(create("x"), &state, a).unwrap();
        process_message(create("y"), &state, a).unwrap();
        process_message(create("z"), &state, b).unwrap();

        let ids: Vec<_> = resync(&state, a)
            .into_iter()
            .map(|msg| match msg {
                ServerMessage::SessionState { session } => session.id.to_string(),
                other => panic!("unexpected message {other:?}"),
            })
            .collect();
        assert_eq!(ids, vec!["x", "y"]);
    }

    #[test]
    fn test_disconnect_releases_sessions() {
        let state = state_with(EchoLoader);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        process_message(create("x"), &state, a).unwrap();
        process_message(create("y"), &state, b).unwrap();

        assert_eq!(state.owners.release(&state.registry, a), 1);
        assert_eq!(state.registry.ids(), vec![SessionId::from("y")]);

        // The id is free again, e.g. for the reloaded page.
        process_message(create("x"), &state, b).unwrap();
        assert!(state.owners.owns(b, &SessionId::from("x")));
    }

    #[tokio::test]
    async fn test_run_replies_when_finished() {
        let state = state_with(EchoLoader);
        let conn = Uuid::new_v4();
        process_message(create("w"), &state, conn).unwrap();

        let run = ClientMessage::Run {
            session_id: SessionId::from("w"),
        };
        let Some(Reply::Later(reply)) = process_message(run, &state, conn).unwrap() else {
            panic!("expected a deferred reply");
        };
        match reply.await {
            ServerMessage::RunCompleted {
                session_id, status, ..
            } => {
                assert_eq!(session_id, SessionId::from("w"));
                assert_eq!(status, SessionStatus::Succeeded);
            }
            other => panic!("unexpected reply {other:?}"),
        }
        let session = state.registry.require(&SessionId::from("w")).unwrap();
        assert_eq!(session.output(), "print('w')");
    }
}
