//! Cell types and identifier newtypes.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::model::Output;

/// Unique identifier for a cell within a notebook.
///
/// Opaque and stable across edits; generated ids are UUID v4 strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellId(String);

impl CellId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CellId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CellId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Unique identifier for a notebook.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotebookId(String);

impl NotebookId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NotebookId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NotebookId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Opaque owner identity resolved externally by the auth broker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(String);

impl PrincipalId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Type of cell in the notebook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellType {
    /// Script cell evaluated against the notebook's shared globals.
    Imperative,
    /// Parametric SQL cell executed against the configured backend.
    Query,
}

/// Cell execution status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellStatus {
    /// Cell has not been executed since its last change.
    #[default]
    Idle,
    /// Cell is currently executing.
    Running,
    /// Cell completed successfully.
    Success,
    /// Cell failed with an error.
    Error,
    /// Cell cannot run: a dependency failed or its registration was rejected.
    Blocked,
}

/// A single cell of a notebook.
///
/// `status`, `stdout`, `outputs`, and `error` are runtime state mirrored from
/// the kernel's notification stream; the durable truth is `code` (with
/// `reads`/`writes` recomputed on load).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cell {
    pub id: CellId,
    #[serde(rename = "type")]
    pub cell_type: CellType,
    pub code: String,
    #[serde(default)]
    pub status: CellStatus,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub outputs: Vec<Output>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub reads: BTreeSet<String>,
    #[serde(default)]
    pub writes: BTreeSet<String>,
}

impl Cell {
    /// Create an empty idle cell of the given type.
    pub fn empty(cell_type: CellType) -> Self {
        Self::with_code(cell_type, String::new())
    }

    /// Create an idle cell with the given source.
    pub fn with_code(cell_type: CellType, code: String) -> Self {
        Self {
            id: CellId::random(),
            cell_type,
            code,
            status: CellStatus::Idle,
            stdout: String::new(),
            outputs: Vec::new(),
            error: None,
            reads: BTreeSet::new(),
            writes: BTreeSet::new(),
        }
    }

    /// Drop runtime output state, returning the cell to a pristine idle view.
    pub fn clear_runtime_state(&mut self) {
        self.status = CellStatus::Idle;
        self.stdout.clear();
        self.outputs.clear();
        self.error = None;
    }
}
