//! Per-notebook execution scheduling.
//!
//! At most one drain task runs per notebook. `enqueue_run` adds the cell to
//! the notebook's pending set and starts a drain if none is active; repeated
//! requests for the same cell coalesce into one dispatch per drain pass.
//! The kernel owns has-run tracking and covers stale ancestors and
//! descendants itself, so a drain dispatches `Execute` only for the cells
//! that were actually requested, in dependency order, masking cells whose
//! direct predecessor sits in `Error`.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use rill_core::ipc::KernelRequest;
use rill_core::model::{CellId, CellStatus, NotebookId};

use crate::broadcast::Broadcaster;
use crate::protocol::ServerMessage;
use crate::service::NotebookHandle;

/// Everything a drain pass needs.
#[derive(Clone)]
pub struct RunContext {
    pub notebook: Arc<NotebookHandle>,
    pub kernel: mpsc::UnboundedSender<KernelRequest>,
    pub broadcaster: Arc<Broadcaster>,
}

#[derive(Default)]
struct QueueState {
    pending: BTreeSet<CellId>,
    draining: bool,
}

/// Serializes cell execution per notebook.
#[derive(Default)]
pub struct ExecutionScheduler {
    queues: Mutex<HashMap<NotebookId, QueueState>>,
}

impl ExecutionScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a cell run; starts a drain task if none is active for the
    /// notebook.
    pub fn enqueue_run(self: &Arc<Self>, ctx: RunContext, cell_id: CellId) {
        let notebook_id = ctx.notebook.id.clone();
        let start_drain = {
            let mut queues = self.queues.lock().expect("scheduler table poisoned");
            let state = queues.entry(notebook_id).or_default();
            state.pending.insert(cell_id);
            if state.draining {
                false
            } else {
                state.draining = true;
                true
            }
        };
        if start_drain {
            let scheduler = self.clone();
            tokio::spawn(async move {
                scheduler.drain(ctx).await;
            });
        }
    }

    /// Dispatch all pending runs, looping until the pending set stays empty.
    async fn drain(self: Arc<Self>, ctx: RunContext) {
        loop {
            let batch = {
                let mut queues = self.queues.lock().expect("scheduler table poisoned");
                let Some(state) = queues.get_mut(&ctx.notebook.id) else {
                    return;
                };
                if state.pending.is_empty() {
                    state.draining = false;
                    return;
                }
                std::mem::take(&mut state.pending)
            };
            self.dispatch_batch(&ctx, batch).await;
        }
    }

    async fn dispatch_batch(&self, ctx: &RunContext, batch: BTreeSet<CellId>) {
        let mut notebook = ctx.notebook.lock().await;

        // Order the requested cells against the whole affected region so
        // that, when several cells are queued, upstream ones dispatch first.
        let mut affected: BTreeSet<CellId> = BTreeSet::new();
        for cell_id in &batch {
            match notebook.graph.affected_on_change(cell_id) {
                Ok(cells) => affected.extend(cells),
                Err(_) => {
                    affected.insert(cell_id.clone());
                }
            }
        }
        let ordered = match notebook.graph.order_cells(&affected) {
            Ok(ordered) => ordered,
            Err(e) => {
                // The graph rejects cyclic upserts, so this is unreachable in
                // practice; surface it on every requested cell regardless.
                let message = e.to_string();
                for cell_id in batch {
                    if let Some(cell) = notebook.cell_mut(&cell_id) {
                        cell.status = CellStatus::Error;
                        cell.error = Some(message.clone());
                    }
                    ctx.broadcaster.broadcast(
                        &ctx.notebook.id,
                        ServerMessage::CellStatus {
                            cell_id: cell_id.clone(),
                            status: CellStatus::Error,
                        },
                    );
                    ctx.broadcaster.broadcast(
                        &ctx.notebook.id,
                        ServerMessage::CellError {
                            cell_id,
                            error: message.clone(),
                        },
                    );
                }
                return;
            }
        };

        for cell_id in ordered {
            if !batch.contains(&cell_id) {
                continue;
            }

            let failed_upstream = notebook
                .graph
                .predecessors(&cell_id)
                .iter()
                .any(|p| {
                    notebook
                        .cell(p)
                        .is_some_and(|c| c.status == CellStatus::Error)
                });
            if failed_upstream {
                if let Some(cell) = notebook.cell_mut(&cell_id) {
                    cell.status = CellStatus::Blocked;
                    cell.error = Some("an upstream dependency failed".to_string());
                }
                ctx.broadcaster.broadcast(
                    &ctx.notebook.id,
                    ServerMessage::CellStatus {
                        cell_id: cell_id.clone(),
                        status: CellStatus::Blocked,
                    },
                );
                ctx.broadcaster.broadcast(
                    &ctx.notebook.id,
                    ServerMessage::CellError {
                        cell_id,
                        error: "an upstream dependency failed".to_string(),
                    },
                );
                continue;
            }

            if ctx
                .kernel
                .send(KernelRequest::Execute {
                    cell_id: cell_id.clone(),
                })
                .is_err()
            {
                tracing::warn!(notebook = %ctx.notebook.id, "kernel gone, dropping run of {cell_id}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use rill_core::model::{CellType, PrincipalId};
    use rill_core::store::MemoryStore;

    use crate::service::NotebookService;

    /// A three-cell chain (x -> y -> z) behind a real service.
    async fn chain_context() -> (RunContext, mpsc::UnboundedReceiver<KernelRequest>, Vec<CellId>) {
        let service = NotebookService::new(Arc::new(MemoryStore::new()));
        let handle = service
            .create(PrincipalId::new("alice"), None)
            .await
            .unwrap();

        let mut ids = Vec::new();
        for code in ["let x = 10;", "let y = x * 2;", "let z = y + 5;"] {
            let (cell, _, _) = service
                .locked_create_cell(&handle, CellType::Imperative, code.to_string(), None)
                .await
                .unwrap();
            ids.push(cell.id);
        }

        let (kernel_tx, kernel_rx) = mpsc::unbounded_channel();
        let broadcaster = Arc::new(Broadcaster::new());
        let ctx = RunContext {
            notebook: handle,
            kernel: kernel_tx,
            broadcaster,
        };
        (ctx, kernel_rx, ids)
    }

    fn executed(request: Option<KernelRequest>) -> CellId {
        match request {
            Some(KernelRequest::Execute { cell_id }) => cell_id,
            other => panic!("expected an execute request, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dispatch_sends_requested_cell_only() {
        let (ctx, mut kernel_rx, ids) = chain_context().await;
        let scheduler = ExecutionScheduler::new();

        scheduler
            .dispatch_batch(&ctx, BTreeSet::from([ids[0].clone()]))
            .await;

        assert_eq!(executed(kernel_rx.recv().await), ids[0]);
        // Descendants are the kernel's job; nothing else is dispatched.
        assert!(kernel_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_batch_dispatches_in_dependency_order() {
        let (ctx, mut kernel_rx, ids) = chain_context().await;
        let scheduler = ExecutionScheduler::new();

        // Request tail first; the drain still dispatches upstream first.
        scheduler
            .dispatch_batch(&ctx, BTreeSet::from([ids[2].clone(), ids[0].clone()]))
            .await;

        assert_eq!(executed(kernel_rx.recv().await), ids[0]);
        assert_eq!(executed(kernel_rx.recv().await), ids[2]);
        assert!(kernel_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failed_predecessor_masks_cell_as_blocked() {
        let (ctx, mut kernel_rx, ids) = chain_context().await;
        let scheduler = ExecutionScheduler::new();

        {
            let mut notebook = ctx.notebook.lock().await;
            let head = notebook.cell_mut(&ids[0]).unwrap();
            head.status = CellStatus::Error;
            head.error = Some("boom".to_string());
        }
        let (_, mut observer) = ctx.broadcaster.attach(&ctx.notebook.id);

        scheduler
            .dispatch_batch(&ctx, BTreeSet::from([ids[1].clone()]))
            .await;

        assert!(kernel_rx.try_recv().is_err(), "blocked cell must not run");
        match observer.recv().await {
            Some(ServerMessage::CellStatus { cell_id, status }) => {
                assert_eq!(cell_id, ids[1]);
                assert_eq!(status, CellStatus::Blocked);
            }
            other => panic!("unexpected message: {other:?}"),
        }
        let notebook = ctx.notebook.lock().await;
        assert_eq!(notebook.cell(&ids[1]).unwrap().status, CellStatus::Blocked);
    }

    #[tokio::test]
    async fn test_enqueue_run_drains_asynchronously() {
        let (ctx, mut kernel_rx, ids) = chain_context().await;
        let scheduler = Arc::new(ExecutionScheduler::new());

        scheduler.enqueue_run(ctx.clone(), ids[0].clone());

        let request = tokio::time::timeout(Duration::from_secs(5), kernel_rx.recv())
            .await
            .expect("drain never dispatched");
        assert_eq!(executed(request), ids[0]);
    }

    #[tokio::test]
    async fn test_pending_set_coalesces_duplicates() {
        let (ctx, _kernel_rx, ids) = chain_context().await;
        let scheduler = Arc::new(ExecutionScheduler::new());

        // Seed the queue as if a drain were already active, then enqueue the
        // same cell twice: one pending entry results.
        {
            let mut queues = scheduler.queues.lock().unwrap();
            queues
                .entry(ctx.notebook.id.clone())
                .or_default()
                .draining = true;
        }
        scheduler.enqueue_run(ctx.clone(), ids[0].clone());
        scheduler.enqueue_run(ctx.clone(), ids[0].clone());

        let queues = scheduler.queues.lock().unwrap();
        let state = queues.get(&ctx.notebook.id).unwrap();
        assert_eq!(state.pending.len(), 1);
    }
}
