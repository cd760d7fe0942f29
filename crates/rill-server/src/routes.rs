//! HTTP and WebSocket routes.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, patch, post, put};
use axum::Router;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::Mutex as TokioMutex;
use tower_http::cors::CorsLayer;

use rill_core::auth::AuthBroker;
use rill_core::error::Error as CoreError;
use rill_core::model::{CellId, CellType, NotebookId, PrincipalId};

use crate::broadcast::Broadcaster;
use crate::coordinator::NotebookCoordinator;
use crate::error::{ServerError, ServerResult};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::scheduler::ExecutionScheduler;
use crate::service::{NotebookHandle, NotebookService};

/// Application state shared across handlers.
pub struct AppState {
    pub service: Arc<NotebookService>,
    pub broadcaster: Arc<Broadcaster>,
    pub scheduler: Arc<ExecutionScheduler>,
    pub auth: Arc<dyn AuthBroker>,
    /// One coordinator per notebook with a live kernel.
    pub coordinators: TokioMutex<HashMap<NotebookId, Arc<NotebookCoordinator>>>,
}

impl AppState {
    pub fn new(
        service: Arc<NotebookService>,
        auth: Arc<dyn AuthBroker>,
    ) -> Arc<Self> {
        Arc::new(Self {
            service,
            broadcaster: Arc::new(Broadcaster::new()),
            scheduler: Arc::new(ExecutionScheduler::new()),
            auth,
            coordinators: TokioMutex::new(HashMap::new()),
        })
    }

    /// The coordinator for a notebook, spawning its kernel if needed.
    async fn coordinator(
        self: &Arc<Self>,
        handle: &Arc<NotebookHandle>,
    ) -> ServerResult<Arc<NotebookCoordinator>> {
        let mut coordinators = self.coordinators.lock().await;
        if let Some(coordinator) = coordinators.get(&handle.id) {
            return Ok(coordinator.clone());
        }
        let coordinator = NotebookCoordinator::open(
            handle.clone(),
            self.service.clone(),
            self.broadcaster.clone(),
            self.scheduler.clone(),
        )
        .await?;
        coordinators.insert(handle.id.clone(), coordinator.clone());
        Ok(coordinator)
    }

    /// The coordinator if one is already running.
    async fn coordinator_if_open(&self, id: &NotebookId) -> Option<Arc<NotebookCoordinator>> {
        self.coordinators.lock().await.get(id).cloned()
    }
}

/// Create the router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/notebooks", post(create_notebook).get(list_notebooks))
        .route(
            "/api/notebooks/{id}",
            get(get_notebook).patch(rename_notebook).delete(delete_notebook),
        )
        .route("/api/notebooks/{id}/db", put(set_db_connection))
        .route("/api/notebooks/{id}/cells", post(create_cell))
        .route(
            "/api/notebooks/{id}/cells/{cell_id}",
            patch(update_cell).delete(delete_cell),
        )
        .route("/ws/{id}", get(ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Resolve the principal from a `Bearer` token.
async fn authenticate(state: &AppState, headers: &HeaderMap) -> ServerResult<PrincipalId> {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ServerError::Unauthenticated)?;
    Ok(state.auth.verify(token).await?)
}

#[derive(Deserialize)]
struct CreateNotebookBody {
    #[serde(default)]
    name: Option<String>,
}

async fn create_notebook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateNotebookBody>,
) -> ServerResult<impl IntoResponse> {
    let principal = authenticate(&state, &headers).await?;
    let handle = state.service.create(principal, body.name).await?;
    let snapshot = state.service.locked_snapshot(&handle).await;
    Ok(Json(snapshot))
}

async fn list_notebooks(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ServerResult<impl IntoResponse> {
    let principal = authenticate(&state, &headers).await?;
    let notebooks = state.service.list(&principal).await?;
    Ok(Json(serde_json::json!({ "notebooks": notebooks })))
}

async fn get_notebook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<NotebookId>,
) -> ServerResult<impl IntoResponse> {
    let principal = authenticate(&state, &headers).await?;
    let handle = state.service.open(&principal, &id).await?;
    let snapshot = state.service.locked_snapshot(&handle).await;
    Ok(Json(snapshot))
}

#[derive(Deserialize)]
struct RenameBody {
    name: Option<String>,
}

async fn rename_notebook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<NotebookId>,
    Json(body): Json<RenameBody>,
) -> ServerResult<impl IntoResponse> {
    let principal = authenticate(&state, &headers).await?;
    let handle = state.service.open(&principal, &id).await?;
    let revision = state.service.rename(&handle, body.name).await?;
    Ok(Json(serde_json::json!({ "revision": revision })))
}

async fn delete_notebook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<NotebookId>,
) -> ServerResult<impl IntoResponse> {
    let principal = authenticate(&state, &headers).await?;
    if let Some(coordinator) = state.coordinators.lock().await.remove(&id) {
        coordinator.shutdown().await;
    }
    state.service.delete(&principal, &id).await?;
    Ok(Json(serde_json::json!({ "deleted": id })))
}

#[derive(Deserialize)]
struct SetDbBody {
    connection_string: String,
}

async fn set_db_connection(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<NotebookId>,
    Json(body): Json<SetDbBody>,
) -> ServerResult<impl IntoResponse> {
    let principal = authenticate(&state, &headers).await?;
    let handle = state.service.open(&principal, &id).await?;
    let revision = match state.coordinator_if_open(&id).await {
        Some(coordinator) => coordinator.set_db_connection(body.connection_string).await?,
        None => {
            state
                .service
                .set_db_connection(&handle, body.connection_string)
                .await?
        }
    };
    Ok(Json(serde_json::json!({ "revision": revision })))
}

#[derive(Deserialize)]
struct CreateCellBody {
    #[serde(rename = "type")]
    cell_type: CellType,
    #[serde(default)]
    code: String,
    #[serde(default)]
    index: Option<usize>,
}

async fn create_cell(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<NotebookId>,
    Json(body): Json<CreateCellBody>,
) -> ServerResult<impl IntoResponse> {
    let principal = authenticate(&state, &headers).await?;
    let handle = state.service.open(&principal, &id).await?;

    let (cell, index, revision) = match state.coordinator_if_open(&id).await {
        Some(coordinator) => {
            coordinator
                .create_cell(body.cell_type, body.code, body.index)
                .await?
        }
        None => {
            state
                .service
                .locked_create_cell(&handle, body.cell_type, body.code, body.index)
                .await?
        }
    };
    Ok(Json(serde_json::json!({
        "cell": cell,
        "index": index,
        "revision": revision
    })))
}

#[derive(Deserialize)]
struct UpdateCellBody {
    code: String,
    #[serde(default)]
    expected_revision: Option<u64>,
}

async fn update_cell(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((id, cell_id)): Path<(NotebookId, CellId)>,
    Json(body): Json<UpdateCellBody>,
) -> ServerResult<impl IntoResponse> {
    let principal = authenticate(&state, &headers).await?;
    let handle = state.service.open(&principal, &id).await?;

    let (cell, revision) = match state.coordinator_if_open(&id).await {
        Some(coordinator) => {
            coordinator
                .update_cell(&cell_id, body.code, body.expected_revision)
                .await?
        }
        None => {
            state
                .service
                .locked_update_cell(&handle, &cell_id, body.code, body.expected_revision)
                .await?
        }
    };
    Ok(Json(serde_json::json!({
        "cell": cell,
        "revision": revision
    })))
}

async fn delete_cell(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((id, cell_id)): Path<(NotebookId, CellId)>,
) -> ServerResult<impl IntoResponse> {
    let principal = authenticate(&state, &headers).await?;
    let handle = state.service.open(&principal, &id).await?;

    let revision = match state.coordinator_if_open(&id).await {
        Some(coordinator) => coordinator.delete_cell(&cell_id).await?,
        None => {
            state
                .service
                .locked_delete_cell(&handle, &cell_id)
                .await?
                .1
        }
    };
    Ok(Json(serde_json::json!({ "revision": revision })))
}

/// WebSocket upgrade for the live channel.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(id): Path<NotebookId>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_live_channel(socket, state, id))
}

type WsSender = Arc<TokioMutex<SplitSink<WebSocket, Message>>>;

async fn send_message(sender: &WsSender, message: &ServerMessage) {
    if let Ok(json) = serde_json::to_string(message) {
        let mut sender = sender.lock().await;
        let _ = sender.send(Message::Text(json.into())).await;
    }
}

/// Live-channel lifecycle: authenticate, attach, then serve run requests
/// until the client goes away.
async fn handle_live_channel(socket: WebSocket, state: Arc<AppState>, notebook_id: NotebookId) {
    let (sender, mut receiver) = socket.split();
    let sender: WsSender = Arc::new(TokioMutex::new(sender));

    // The first message must authenticate the observer.
    let mut principal = loop {
        let Some(Ok(message)) = receiver.next().await else {
            return;
        };
        let Message::Text(text) = message else {
            continue;
        };
        match serde_json::from_str::<ClientMessage>(&text) {
            Ok(ClientMessage::Authenticate { token }) => {
                match state.auth.verify(&token).await {
                    Ok(principal) => break principal,
                    Err(_) => {
                        send_message(
                            &sender,
                            &ServerMessage::Error {
                                message: "authentication failed".to_string(),
                            },
                        )
                        .await;
                        return;
                    }
                }
            }
            _ => {
                send_message(
                    &sender,
                    &ServerMessage::Error {
                        message: "authentication required".to_string(),
                    },
                )
                .await;
                return;
            }
        }
    };

    // The principal must own the notebook; an attach on someone else's
    // notebook is forbidden rather than not-found.
    let handle = match state.service.open_by_id(&principal, &notebook_id).await {
        Ok(handle) => handle,
        Err(e) => {
            send_message(
                &sender,
                &ServerMessage::Error {
                    message: e.to_string(),
                },
            )
            .await;
            return;
        }
    };

    // First observer attach spawns the kernel.
    let coordinator = match state.coordinator(&handle).await {
        Ok(coordinator) => coordinator,
        Err(e) => {
            send_message(
                &sender,
                &ServerMessage::Error {
                    message: e.to_string(),
                },
            )
            .await;
            return;
        }
    };

    let (observer_id, mut messages) = state.broadcaster.attach(&notebook_id);
    send_message(
        &sender,
        &ServerMessage::Authenticated {
            principal: principal.clone(),
        },
    )
    .await;

    // Forward broadcast messages to this observer.
    let forward_sender = sender.clone();
    let forward_task = tokio::spawn(async move {
        while let Some(message) = messages.recv().await {
            if let Ok(json) = serde_json::to_string(&message) {
                let mut sender = forward_sender.lock().await;
                if sender.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
        }
    });

    while let Some(result) = receiver.next().await {
        match result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::RunCell { cell_id }) => {
                    if let Err(e) = coordinator.run_cell(cell_id).await {
                        send_message(
                            &sender,
                            &ServerMessage::Error {
                                message: e.to_string(),
                            },
                        )
                        .await;
                    }
                }
                Ok(ClientMessage::RefreshAuth { token }) => {
                    match state.auth.verify(&token).await {
                        Ok(refreshed) if refreshed == principal || refreshed == handle.owner => {
                            principal = refreshed;
                            send_message(
                                &sender,
                                &ServerMessage::Authenticated {
                                    principal: principal.clone(),
                                },
                            )
                            .await;
                        }
                        _ => {
                            send_message(
                                &sender,
                                &ServerMessage::Error {
                                    message: CoreError::Forbidden.to_string(),
                                },
                            )
                            .await;
                            break;
                        }
                    }
                }
                Ok(ClientMessage::Authenticate { .. }) => {
                    send_message(
                        &sender,
                        &ServerMessage::Error {
                            message: "already authenticated".to_string(),
                        },
                    )
                    .await;
                }
                Err(e) => {
                    tracing::warn!("failed to parse client message: {e}");
                    send_message(
                        &sender,
                        &ServerMessage::Error {
                            message: format!("invalid message format: {e}"),
                        },
                    )
                    .await;
                }
            },
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::warn!("WebSocket error: {e}");
                break;
            }
            _ => {}
        }
    }

    state.broadcaster.detach(&notebook_id, observer_id);
    forward_task.abort();
    let _ = forward_task.await;
}
