//! Error types for rill-core.

use thiserror::Error;

use crate::model::CellId;

/// Result type for rill-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in rill-core.
#[derive(Debug, Error)]
pub enum Error {
    /// Failed to parse cell source.
    #[error("parse error: {0}")]
    Parse(String),

    /// Cyclic dependency detected in the cell graph.
    #[error("cyclic dependency detected: {0}")]
    CycleDetected(String),

    /// Cell not found in the notebook.
    #[error("cell not found: {0}")]
    CellNotFound(CellId),

    /// Notebook not found in the store.
    #[error("notebook not found: {0}")]
    NotebookNotFound(String),

    /// Principal is not allowed to access the notebook.
    #[error("forbidden")]
    Forbidden,

    /// Optimistic concurrency check failed.
    #[error("revision conflict: expected {expected}, got {actual}")]
    RevisionConflict { expected: u64, actual: u64 },

    /// Cell was never registered with the kernel.
    #[error("cell not registered: {0}")]
    CellNotRegistered(CellId),

    /// Query backend has no connection string configured.
    #[error("database connection string not configured")]
    BackendNotConfigured,

    /// Query placeholder has no matching variable in the namespace.
    #[error("template variable '{0}' not found in namespace")]
    TemplateVariableMissing(String),

    /// Cell raised an error at runtime.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// Kernel process exited or its channel closed.
    #[error("kernel died: {0}")]
    KernelDied(String),

    /// Wall-clock timeout imposed by a caller.
    #[error("execution timed out")]
    Timeout,

    /// Persistence backend failure.
    #[error("storage failure: {0}")]
    Storage(String),

    /// IPC communication error with the kernel process.
    #[error("IPC error: {0}")]
    Ipc(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
