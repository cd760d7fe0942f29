//! The kernel session: all interpreter state for one notebook.
//!
//! The binary drives this from a stdin/stdout frame loop; tests drive it
//! in-process with a collecting sink. One request is handled at a time, so
//! at most one cell executes at any instant.

use rustc_hash::{FxHashMap, FxHashSet};

use rill_core::deps;
use rill_core::error::Error;
use rill_core::graph::DepGraph;
use rill_core::ipc::{KernelErrorKind, KernelNotification, KernelRequest};
use rill_core::model::{CellId, CellStatus, CellType, Output};

use crate::convert::ConverterRegistry;
use crate::imperative::ScriptExecutor;
use crate::query::{QueryExecutor, bind_value};

/// A sink for kernel notifications.
pub type Sink<'a> = &'a mut dyn FnMut(KernelNotification);

struct RegisteredCell {
    code: String,
    cell_type: CellType,
}

/// Per-notebook kernel state: cell registry, dependency graph, has-run
/// tracking, and the two executors.
pub struct KernelSession {
    graph: DepGraph,
    registry: FxHashMap<CellId, RegisteredCell>,
    has_run: FxHashMap<CellId, bool>,
    script: ScriptExecutor,
    query: QueryExecutor,
    converters: ConverterRegistry,
}

impl KernelSession {
    pub fn new() -> Result<Self, Error> {
        Ok(Self {
            graph: DepGraph::new(),
            registry: FxHashMap::default(),
            has_run: FxHashMap::default(),
            script: ScriptExecutor::new(),
            query: QueryExecutor::new()?,
            converters: ConverterRegistry::with_builtin_probes(),
        })
    }

    /// Handle one request, emitting notifications through `sink`.
    ///
    /// Returns `false` when the session should shut down.
    pub fn handle(&mut self, request: KernelRequest, sink: Sink<'_>) -> bool {
        match request {
            KernelRequest::Ping => {
                sink(KernelNotification::Pong);
            }
            KernelRequest::RegisterCell {
                cell_id,
                code,
                cell_type,
            } => self.register_cell(cell_id, code, cell_type, sink),
            KernelRequest::SyncOrder { cells } => {
                self.graph.set_order(&cells);
            }
            KernelRequest::Execute { cell_id } => self.execute(&cell_id, sink),
            KernelRequest::SetDbConfig { connection_string } => {
                self.query.set_connection_string(connection_string);
                sink(KernelNotification::DbConfigured {
                    ok: true,
                    error: None,
                });
            }
            KernelRequest::EvictVariables { names } => {
                self.script.evict(&names);
            }
            KernelRequest::Shutdown => {
                sink(KernelNotification::ShuttingDown);
                return false;
            }
        }
        true
    }

    /// Record a cell and apply its dependencies to the graph.
    ///
    /// Execution is not triggered. On success the cell and all its
    /// descendants are marked not-run; on a cycle the graph and registry
    /// keep their prior state and the cell is reported blocked.
    fn register_cell(
        &mut self,
        cell_id: CellId,
        code: String,
        cell_type: CellType,
        sink: Sink<'_>,
    ) {
        let sets = deps::extract(&code, cell_type);
        match self.graph.upsert(&cell_id, &sets.reads, &sets.writes) {
            Ok(()) => {
                self.registry
                    .insert(cell_id.clone(), RegisteredCell { code, cell_type });

                // The cell and everything downstream must run again.
                let affected = self
                    .graph
                    .affected_on_change(&cell_id)
                    .unwrap_or_else(|_| vec![cell_id.clone()]);
                for stale in affected {
                    self.has_run.insert(stale, false);
                }

                sink(KernelNotification::Metadata {
                    cell_id: cell_id.clone(),
                    reads: sets.reads.iter().cloned().collect(),
                    writes: sets.writes.iter().cloned().collect(),
                });
                sink(KernelNotification::Status {
                    cell_id,
                    status: CellStatus::Idle,
                });
            }
            Err(e) => {
                sink(KernelNotification::CellError {
                    cell_id: cell_id.clone(),
                    kind: KernelErrorKind::CycleDetected,
                    message: e.to_string(),
                });
                sink(KernelNotification::Status {
                    cell_id,
                    status: CellStatus::Blocked,
                });
            }
        }
    }

    /// Run a cell and everything it affects: stale ancestors first, then the
    /// cell, then its descendants, in topological order.
    fn execute(&mut self, cell_id: &CellId, sink: Sink<'_>) {
        if !self.registry.contains_key(cell_id) {
            // A cell present in the graph but missing from the registry
            // failed registration; the error was already reported then.
            if self.graph.contains(cell_id) {
                return;
            }
            sink(KernelNotification::CellError {
                cell_id: cell_id.clone(),
                kind: KernelErrorKind::CellNotRegistered,
                message: format!(
                    "cell {cell_id} is not registered; cells must be registered before execution"
                ),
            });
            return;
        }

        let to_run = self
            .graph
            .affected_on_run(cell_id, |c| self.has_run.get(c).copied().unwrap_or(false))
            .unwrap_or_else(|_| vec![cell_id.clone()]);

        let mut failed: FxHashSet<CellId> = FxHashSet::default();
        for current in to_run {
            let Some(registered) = self.registry.get(&current) else {
                continue;
            };
            let code = registered.code.clone();
            let cell_type = registered.cell_type;

            // A failed or blocked direct predecessor masks this cell.
            if self
                .graph
                .predecessors(&current)
                .iter()
                .any(|p| failed.contains(p))
            {
                sink(KernelNotification::Status {
                    cell_id: current.clone(),
                    status: CellStatus::Blocked,
                });
                sink(KernelNotification::CellError {
                    cell_id: current.clone(),
                    kind: KernelErrorKind::UpstreamFailed,
                    message: "an upstream dependency failed".to_string(),
                });
                failed.insert(current);
                continue;
            }

            sink(KernelNotification::Status {
                cell_id: current.clone(),
                status: CellStatus::Running,
            });

            let (stdout, outputs, error) = match cell_type {
                CellType::Imperative => self.run_imperative(&code),
                CellType::Query => self.run_query(&code),
            };

            if !stdout.is_empty() {
                sink(KernelNotification::Stdout {
                    cell_id: current.clone(),
                    data: stdout,
                });
            }
            for output in outputs {
                sink(KernelNotification::Output {
                    cell_id: current.clone(),
                    output,
                });
            }

            let succeeded = error.is_none();
            if let Some((kind, message)) = error {
                sink(KernelNotification::CellError {
                    cell_id: current.clone(),
                    kind,
                    message,
                });
            }

            sink(KernelNotification::Metadata {
                cell_id: current.clone(),
                reads: self
                    .graph
                    .reads_of(&current)
                    .map(|s| s.iter().cloned().collect())
                    .unwrap_or_default(),
                writes: self
                    .graph
                    .writes_of(&current)
                    .map(|s| s.iter().cloned().collect())
                    .unwrap_or_default(),
            });
            sink(KernelNotification::Status {
                cell_id: current.clone(),
                status: if succeeded {
                    CellStatus::Success
                } else {
                    CellStatus::Error
                },
            });

            if succeeded {
                self.has_run.insert(current, true);
            } else {
                self.has_run.insert(current.clone(), false);
                failed.insert(current);
            }
        }
    }

    fn run_imperative(
        &mut self,
        code: &str,
    ) -> (String, Vec<Output>, Option<(KernelErrorKind, String)>) {
        let outcome = self.script.execute(code);
        let outputs = outcome
            .value
            .as_ref()
            .and_then(|value| self.converters.convert(value))
            .into_iter()
            .collect();
        (outcome.stdout, outputs, outcome.error)
    }

    fn run_query(
        &mut self,
        code: &str,
    ) -> (String, Vec<Output>, Option<(KernelErrorKind, String)>) {
        if !self.query.is_configured() {
            return (
                String::new(),
                Vec::new(),
                Some((
                    KernelErrorKind::BackendNotConfigured,
                    Error::BackendNotConfigured.to_string(),
                )),
            );
        }

        let (sql, params) = deps::rewrite_placeholders(code);
        let mut binds = Vec::with_capacity(params.len());
        for name in &params {
            match self.script.get_json(name) {
                Some(value) => binds.push(bind_value(value)),
                None => {
                    return (
                        String::new(),
                        Vec::new(),
                        Some((
                            KernelErrorKind::TemplateVariableMissing,
                            Error::TemplateVariableMissing(name.clone()).to_string(),
                        )),
                    );
                }
            }
        }

        match self.query.execute(&sql, binds) {
            Ok(outcome) => (outcome.stdout, outcome.outputs, None),
            Err(error) => (String::new(), Vec::new(), Some(error)),
        }
    }

    /// Whether the cell has run successfully since its last change.
    /// Exposed for tests.
    pub fn cell_has_run(&self, cell_id: &CellId) -> bool {
        self.has_run.get(cell_id).copied().unwrap_or(false)
    }

    /// A notebook variable as JSON. Exposed for tests.
    pub fn global_json(&self, name: &str) -> Option<serde_json::Value> {
        self.script.get_json(name)
    }
}
