//! Notebook structure and the storage-neutral persisted record.

use serde::{Deserialize, Serialize};

use crate::deps;
use crate::graph::DepGraph;
use crate::model::{Cell, CellId, CellStatus, CellType, NotebookId, Output, PrincipalId};

/// An ordered cell sequence with its own globals, dependency graph, and owner.
///
/// The server wraps this in a per-notebook mutex; everything here is plain
/// data plus the graph index derived from it.
#[derive(Debug, Clone)]
pub struct Notebook {
    pub id: NotebookId,
    pub owner: PrincipalId,
    pub name: Option<String>,
    pub db_connection_string: Option<String>,
    /// Monotonic counter incremented on every cell mutation.
    pub revision: u64,
    /// Position in this sequence is significant and user-visible.
    pub cells: Vec<Cell>,
    pub graph: DepGraph,
}

impl Notebook {
    /// Create a notebook with one empty imperative cell.
    pub fn new(owner: PrincipalId, name: Option<String>) -> Self {
        let mut notebook = Self {
            id: NotebookId::random(),
            owner,
            name,
            db_connection_string: None,
            revision: 0,
            cells: vec![Cell::empty(CellType::Imperative)],
            graph: DepGraph::new(),
        };
        notebook.rebuild_graph();
        notebook
    }

    /// Find a cell by id.
    pub fn cell(&self, cell_id: &CellId) -> Option<&Cell> {
        self.cells.iter().find(|c| &c.id == cell_id)
    }

    /// Find a cell by id, mutably.
    pub fn cell_mut(&mut self, cell_id: &CellId) -> Option<&mut Cell> {
        self.cells.iter_mut().find(|c| &c.id == cell_id)
    }

    /// Position of a cell in the sequence.
    pub fn index_of(&self, cell_id: &CellId) -> Option<usize> {
        self.cells.iter().position(|c| &c.id == cell_id)
    }

    /// Ids of all cells in notebook order.
    pub fn cell_order(&self) -> Vec<CellId> {
        self.cells.iter().map(|c| c.id.clone()).collect()
    }

    /// Recompute every cell's dependency sets and rebuild the graph from
    /// scratch, in notebook order.
    ///
    /// A cell whose dependencies would close a cycle is marked `Error` with
    /// the diagnostic and left out of the graph; the rest of the notebook is
    /// unaffected.
    pub fn rebuild_graph(&mut self) {
        self.graph = DepGraph::new();
        let order = self.cell_order();
        for cell in &mut self.cells {
            let sets = deps::extract(&cell.code, cell.cell_type);
            cell.reads = sets.reads;
            cell.writes = sets.writes;
            if let Err(e) = self.graph.upsert(&cell.id, &cell.reads, &cell.writes) {
                cell.status = CellStatus::Error;
                cell.error = Some(e.to_string());
            }
        }
        self.graph.set_order(&order);
    }

    /// Build the persisted record for this notebook.
    pub fn to_record(&self) -> NotebookRecord {
        NotebookRecord {
            id: self.id.clone(),
            owner_principal: self.owner.clone(),
            name: self.name.clone(),
            db_connection_string: self.db_connection_string.clone(),
            revision: self.revision,
            cells: self
                .cells
                .iter()
                .map(|cell| CellRecord {
                    id: cell.id.clone(),
                    cell_type: cell.cell_type,
                    code: cell.code.clone(),
                    stdout: cell.stdout.clone(),
                    outputs: cell.outputs.clone(),
                    error: cell.error.clone(),
                    reads: cell.reads.iter().cloned().collect(),
                    writes: cell.writes.iter().cloned().collect(),
                })
                .collect(),
        }
    }

    /// Restore a notebook from its persisted record.
    ///
    /// Statuses are not authoritative in storage: every cell resumes `Idle`,
    /// and the stored `reads`/`writes` are advisory — they are recomputed
    /// from the code while rebuilding the graph.
    pub fn from_record(record: NotebookRecord) -> Self {
        let mut notebook = Self {
            id: record.id,
            owner: record.owner_principal,
            name: record.name,
            db_connection_string: record.db_connection_string,
            revision: record.revision,
            cells: record
                .cells
                .into_iter()
                .map(|cell| Cell {
                    id: cell.id,
                    cell_type: cell.cell_type,
                    code: cell.code,
                    status: CellStatus::Idle,
                    stdout: cell.stdout,
                    outputs: cell.outputs,
                    error: None,
                    reads: cell.reads.into_iter().collect(),
                    writes: cell.writes.into_iter().collect(),
                })
                .collect(),
            graph: DepGraph::new(),
        };
        notebook.rebuild_graph();
        notebook
    }
}

/// Storage-neutral persisted notebook record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotebookRecord {
    pub id: NotebookId,
    pub owner_principal: PrincipalId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_connection_string: Option<String>,
    pub revision: u64,
    pub cells: Vec<CellRecord>,
}

/// One cell of the persisted record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellRecord {
    pub id: CellId,
    #[serde(rename = "type")]
    pub cell_type: CellType,
    pub code: String,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub outputs: Vec<Output>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub reads: Vec<String>,
    #[serde(default)]
    pub writes: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> PrincipalId {
        PrincipalId::new("user-1")
    }

    #[test]
    fn test_new_notebook_has_one_empty_imperative_cell() {
        let notebook = Notebook::new(owner(), Some("demo".to_string()));
        assert_eq!(notebook.revision, 0);
        assert_eq!(notebook.cells.len(), 1);
        assert_eq!(notebook.cells[0].cell_type, CellType::Imperative);
        assert!(notebook.cells[0].code.is_empty());
        assert_eq!(notebook.cells[0].status, CellStatus::Idle);
    }

    #[test]
    fn test_record_roundtrip_preserves_identity() {
        let mut notebook = Notebook::new(owner(), None);
        notebook.cells[0].code = "let x = 10;".to_string();
        notebook.cells.push(Cell::with_code(
            CellType::Query,
            "SELECT {x} AS x".to_string(),
        ));
        notebook.revision = 7;
        notebook.rebuild_graph();

        let record = notebook.to_record();
        let json = serde_json::to_string(&record).unwrap();
        let parsed: NotebookRecord = serde_json::from_str(&json).unwrap();
        let restored = Notebook::from_record(parsed);

        assert_eq!(restored.id, notebook.id);
        assert_eq!(restored.revision, 7);
        assert_eq!(restored.cells.len(), 2);
        for (a, b) in restored.cells.iter().zip(&notebook.cells) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.cell_type, b.cell_type);
            assert_eq!(a.code, b.code);
            assert_eq!(a.reads, b.reads);
            assert_eq!(a.writes, b.writes);
            assert_eq!(a.status, CellStatus::Idle);
        }
    }

    #[test]
    fn test_load_recomputes_advisory_dep_sets() {
        let mut notebook = Notebook::new(owner(), None);
        notebook.cells[0].code = "let y = x * 2;".to_string();
        let mut record = notebook.to_record();
        // Stored sets are stale on purpose; load must recompute from code.
        record.cells[0].reads = vec!["bogus".to_string()];
        record.cells[0].writes.clear();

        let restored = Notebook::from_record(record);
        assert!(restored.cells[0].reads.contains("x"));
        assert!(restored.cells[0].writes.contains("y"));
        assert!(!restored.cells[0].reads.contains("bogus"));
    }

    #[test]
    fn test_cycle_on_load_marks_cell_error_and_keeps_rest() {
        let mut notebook = Notebook::new(owner(), None);
        notebook.cells[0].code = "let a = b + 1;".to_string();
        notebook
            .cells
            .push(Cell::with_code(CellType::Imperative, "let b = a + 1;".to_string()));
        let record = notebook.to_record();

        let restored = Notebook::from_record(record);
        assert_eq!(restored.cells[0].status, CellStatus::Idle);
        assert_eq!(restored.cells[1].status, CellStatus::Error);
        assert!(restored.cells[1].error.as_deref().unwrap_or("").contains("cyclic"));
    }
}
