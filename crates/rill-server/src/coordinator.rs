//! Per-notebook coordination between the service, the kernel, and the
//! observers.
//!
//! A coordinator is created on first observer attach. It owns the kernel
//! process for its notebook and one reader task that translates kernel
//! notifications into live-channel messages, mirroring runtime cell state
//! (status, stdout, outputs, error, dependency metadata) into the notebook
//! so snapshots stay current. Command handlers return as soon as the work
//! is enqueued; observable progress arrives through the notification
//! stream.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use rill_core::error::{Error, Result};
use rill_core::ipc::{KernelEvent, KernelManager, KernelNotification, KernelRequest};
use rill_core::model::{Cell, CellId, CellStatus, CellType};

use crate::broadcast::Broadcaster;
use crate::protocol::{CellPatch, ServerMessage};
use crate::scheduler::{ExecutionScheduler, RunContext};
use crate::service::{NotebookHandle, NotebookService};

/// Coordinates one notebook's kernel, structure mutations, and fan-out.
pub struct NotebookCoordinator {
    notebook: Arc<NotebookHandle>,
    service: Arc<NotebookService>,
    broadcaster: Arc<Broadcaster>,
    scheduler: Arc<ExecutionScheduler>,
    kernel_requests: mpsc::UnboundedSender<KernelRequest>,
    kernel: Mutex<Option<KernelManager>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl NotebookCoordinator {
    /// Spawn a kernel for the notebook, register every cell with it, and
    /// start the notification reader.
    pub async fn open(
        notebook: Arc<NotebookHandle>,
        service: Arc<NotebookService>,
        broadcaster: Arc<Broadcaster>,
        scheduler: Arc<ExecutionScheduler>,
    ) -> Result<Arc<Self>> {
        let mut manager = KernelManager::spawn().await?;
        let events = manager
            .take_events()
            .ok_or_else(|| Error::Ipc("kernel event stream already taken".to_string()))?;
        let kernel_requests = manager.sender();

        let coordinator = Arc::new(Self {
            notebook: notebook.clone(),
            service,
            broadcaster: broadcaster.clone(),
            scheduler,
            kernel_requests,
            kernel: Mutex::new(Some(manager)),
            reader: Mutex::new(None),
        });

        coordinator.register_all_cells().await?;

        let reader = tokio::spawn(reader_loop(
            notebook.clone(),
            broadcaster,
            events,
        ));
        *coordinator.reader.lock().await = Some(reader);

        Ok(coordinator)
    }

    /// The notebook this coordinator serves.
    pub fn notebook(&self) -> &Arc<NotebookHandle> {
        &self.notebook
    }

    /// Push the whole notebook into the kernel: every cell, the notebook
    /// order, and the backend configuration.
    async fn register_all_cells(&self) -> Result<()> {
        let notebook = self.notebook.lock().await;
        for cell in &notebook.cells {
            self.send(KernelRequest::RegisterCell {
                cell_id: cell.id.clone(),
                code: cell.code.clone(),
                cell_type: cell.cell_type,
            })?;
        }
        self.send(KernelRequest::SyncOrder {
            cells: notebook.cell_order(),
        })?;
        if let Some(connection_string) = &notebook.db_connection_string {
            self.send(KernelRequest::SetDbConfig {
                connection_string: connection_string.clone(),
            })?;
        }
        Ok(())
    }

    fn send(&self, request: KernelRequest) -> Result<()> {
        self.kernel_requests
            .send(request)
            .map_err(|_| Error::KernelDied("kernel request channel closed".to_string()))
    }

    /// Enqueue a cell run. Returns once the request is queued; progress is
    /// streamed to observers.
    pub async fn run_cell(&self, cell_id: CellId) -> Result<()> {
        {
            let notebook = self.notebook.lock().await;
            if notebook.cell(&cell_id).is_none() {
                return Err(Error::CellNotFound(cell_id));
            }
        }
        let ctx = RunContext {
            notebook: self.notebook.clone(),
            kernel: self.kernel_requests.clone(),
            broadcaster: self.broadcaster.clone(),
        };
        self.scheduler.enqueue_run(ctx, cell_id);
        Ok(())
    }

    /// Create a cell, register it with the kernel, and announce it.
    pub async fn create_cell(
        &self,
        cell_type: CellType,
        code: String,
        index: Option<usize>,
    ) -> Result<(Cell, usize, u64)> {
        let (cell, index, revision) = self
            .service
            .locked_create_cell(&self.notebook, cell_type, code, index)
            .await?;

        self.send(KernelRequest::RegisterCell {
            cell_id: cell.id.clone(),
            code: cell.code.clone(),
            cell_type: cell.cell_type,
        })?;
        self.sync_order().await?;

        self.broadcaster.broadcast(
            &self.notebook.id,
            ServerMessage::CellCreated {
                cell_id: cell.id.clone(),
                cell: cell.clone(),
                index,
            },
        );
        Ok((cell, index, revision))
    }

    /// Update a cell's code, re-register it, and announce the change.
    pub async fn update_cell(
        &self,
        cell_id: &CellId,
        code: String,
        expected_revision: Option<u64>,
    ) -> Result<(Cell, u64)> {
        let (cell, revision) = self
            .service
            .locked_update_cell(&self.notebook, cell_id, code, expected_revision)
            .await?;

        self.send(KernelRequest::RegisterCell {
            cell_id: cell.id.clone(),
            code: cell.code.clone(),
            cell_type: cell.cell_type,
        })?;

        self.broadcaster.broadcast(
            &self.notebook.id,
            ServerMessage::CellUpdated {
                cell_id: cell.id.clone(),
                cell: CellPatch {
                    code: Some(cell.code.clone()),
                    reads: cell.reads.iter().cloned().collect(),
                    writes: cell.writes.iter().cloned().collect(),
                    status: Some(cell.status),
                    error: cell.error.clone(),
                },
            },
        );
        Ok((cell, revision))
    }

    /// Delete a cell, evict its writes from the kernel globals, and
    /// announce the removal.
    pub async fn delete_cell(&self, cell_id: &CellId) -> Result<u64> {
        let (evicted_writes, revision) = self
            .service
            .locked_delete_cell(&self.notebook, cell_id)
            .await?;

        if !evicted_writes.is_empty() {
            self.send(KernelRequest::EvictVariables {
                names: evicted_writes,
            })?;
        }
        self.sync_order().await?;

        self.broadcaster.broadcast(
            &self.notebook.id,
            ServerMessage::CellDeleted {
                cell_id: cell_id.clone(),
            },
        );
        Ok(revision)
    }

    /// Persist the connection string and forward it to the kernel; the
    /// `db_connection_updated` event follows from the kernel's
    /// acknowledgement.
    pub async fn set_db_connection(&self, connection_string: String) -> Result<u64> {
        let revision = self
            .service
            .set_db_connection(&self.notebook, connection_string.clone())
            .await?;
        self.send(KernelRequest::SetDbConfig { connection_string })?;
        Ok(revision)
    }

    async fn sync_order(&self) -> Result<()> {
        let cells = {
            let notebook = self.notebook.lock().await;
            notebook.cell_order()
        };
        self.send(KernelRequest::SyncOrder { cells })
    }

    /// Shut the kernel down and stop the reader.
    pub async fn shutdown(&self) {
        if let Some(manager) = self.kernel.lock().await.take() {
            manager.shutdown().await;
        }
        if let Some(reader) = self.reader.lock().await.take() {
            reader.abort();
            let _ = reader.await;
        }
    }
}

/// Translate kernel notifications into live-channel messages, mirroring
/// runtime state into the notebook on the way through.
async fn reader_loop(
    notebook: Arc<NotebookHandle>,
    broadcaster: Arc<Broadcaster>,
    mut events: mpsc::UnboundedReceiver<KernelEvent>,
) {
    let notebook_id = notebook.id.clone();
    while let Some(event) = events.recv().await {
        match event {
            KernelEvent::Notification(notification) => {
                dispatch_notification(&notebook, &broadcaster, notification).await;
            }
            KernelEvent::Died { reason } => {
                tracing::error!(notebook = %notebook_id, "kernel died: {reason}");
                broadcaster.broadcast(
                    &notebook_id,
                    ServerMessage::KernelError {
                        error: format!("kernel process died: {reason}"),
                    },
                );
                break;
            }
        }
    }
}

async fn dispatch_notification(
    notebook: &Arc<NotebookHandle>,
    broadcaster: &Broadcaster,
    notification: KernelNotification,
) {
    let notebook_id = notebook.id.clone();
    match notification {
        KernelNotification::Status { cell_id, status } => {
            {
                let mut nb = notebook.lock().await;
                if let Some(cell) = nb.cell_mut(&cell_id) {
                    // A fresh run clears the previous streams.
                    if status == CellStatus::Running {
                        cell.stdout.clear();
                        cell.outputs.clear();
                        cell.error = None;
                    }
                    cell.status = status;
                }
            }
            broadcaster.broadcast(&notebook_id, ServerMessage::CellStatus { cell_id, status });
        }
        KernelNotification::Stdout { cell_id, data } => {
            {
                let mut nb = notebook.lock().await;
                if let Some(cell) = nb.cell_mut(&cell_id) {
                    cell.stdout.push_str(&data);
                }
            }
            broadcaster.broadcast(&notebook_id, ServerMessage::CellStdout { cell_id, data });
        }
        KernelNotification::Output { cell_id, output } => {
            {
                let mut nb = notebook.lock().await;
                if let Some(cell) = nb.cell_mut(&cell_id) {
                    cell.outputs.push(output.clone());
                }
            }
            broadcaster.broadcast(&notebook_id, ServerMessage::CellOutput { cell_id, output });
        }
        KernelNotification::CellError {
            cell_id,
            kind: _,
            message,
        } => {
            {
                let mut nb = notebook.lock().await;
                if let Some(cell) = nb.cell_mut(&cell_id) {
                    cell.error = Some(message.clone());
                }
            }
            broadcaster.broadcast(
                &notebook_id,
                ServerMessage::CellError {
                    cell_id,
                    error: message,
                },
            );
        }
        KernelNotification::Metadata {
            cell_id,
            reads,
            writes,
        } => {
            {
                let mut nb = notebook.lock().await;
                if let Some(cell) = nb.cell_mut(&cell_id) {
                    cell.reads = reads.iter().cloned().collect();
                    cell.writes = writes.iter().cloned().collect();
                }
            }
            broadcaster.broadcast(
                &notebook_id,
                ServerMessage::CellUpdated {
                    cell_id,
                    cell: CellPatch {
                        code: None,
                        reads,
                        writes,
                        status: None,
                        error: None,
                    },
                },
            );
        }
        KernelNotification::DbConfigured { ok, error } => {
            let connection_string = {
                let nb = notebook.lock().await;
                nb.db_connection_string.clone().unwrap_or_default()
            };
            broadcaster.broadcast(
                &notebook_id,
                ServerMessage::DbConnectionUpdated {
                    connection_string,
                    status: if ok { "success" } else { "error" }.to_string(),
                    error,
                },
            );
        }
        KernelNotification::Pong | KernelNotification::ShuttingDown => {}
    }
}
