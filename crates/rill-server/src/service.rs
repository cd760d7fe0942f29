//! Locked notebook CRUD with optimistic revisions and atomic persistence.
//!
//! Every mutation takes the notebook's mutex for its entire body, persists
//! inside the lock (the mutation must be durable before it becomes
//! visible), and rolls back on storage failure so the revision only ever
//! advances together with a successful save.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};

use rill_core::deps;
use rill_core::error::{Error, Result};
use rill_core::model::{
    Cell, CellId, CellStatus, CellType, Notebook, NotebookId, PrincipalId,
};
use rill_core::store::NotebookStore;

/// Shared handle to one open notebook.
pub struct NotebookHandle {
    pub id: NotebookId,
    pub owner: PrincipalId,
    state: Mutex<Notebook>,
}

impl NotebookHandle {
    fn new(notebook: Notebook) -> Arc<Self> {
        Arc::new(Self {
            id: notebook.id.clone(),
            owner: notebook.owner.clone(),
            state: Mutex::new(notebook),
        })
    }

    /// Take the notebook mutex.
    pub async fn lock(&self) -> MutexGuard<'_, Notebook> {
        self.state.lock().await
    }
}

/// Read-only view of a notebook with public fields only.
#[derive(Debug, Clone, Serialize)]
pub struct NotebookSnapshot {
    pub id: NotebookId,
    pub name: Option<String>,
    pub db_connection_string: Option<String>,
    pub revision: u64,
    pub cells: Vec<Cell>,
}

/// Notebook lifecycle and strictly-locked cell mutations.
pub struct NotebookService {
    store: Arc<dyn NotebookStore>,
    open: StdMutex<HashMap<NotebookId, Arc<NotebookHandle>>>,
}

impl NotebookService {
    pub fn new(store: Arc<dyn NotebookStore>) -> Self {
        Self {
            store,
            open: StdMutex::new(HashMap::new()),
        }
    }

    /// Create a notebook (one empty imperative cell) and persist it.
    pub async fn create(
        &self,
        owner: PrincipalId,
        name: Option<String>,
    ) -> Result<Arc<NotebookHandle>> {
        let notebook = Notebook::new(owner, name);
        self.store.save(&notebook.to_record()).await?;
        Ok(self.install(notebook))
    }

    /// Open a notebook the principal owns, loading it from the store if
    /// necessary. Other owners' notebooks are indistinguishable from
    /// missing ones here; the REST surface never reveals their existence.
    ///
    /// On load every cell resumes `Idle` and the dependency graph is rebuilt
    /// from the recomputed read/write sets.
    pub async fn open(
        &self,
        owner: &PrincipalId,
        id: &NotebookId,
    ) -> Result<Arc<NotebookHandle>> {
        if let Some(handle) = self.get_open(id) {
            if handle.owner != *owner {
                return Err(Error::NotebookNotFound(id.to_string()));
            }
            return Ok(handle);
        }
        let record = self.store.load(owner, id).await?;
        Ok(self.install(Notebook::from_record(record)))
    }

    /// Open a notebook for a live-channel attach: the record is looked up
    /// by id alone, then the principal must own it. An existing notebook
    /// owned by someone else is `Forbidden`, not `NotebookNotFound`.
    pub async fn open_by_id(
        &self,
        principal: &PrincipalId,
        id: &NotebookId,
    ) -> Result<Arc<NotebookHandle>> {
        if let Some(handle) = self.get_open(id) {
            if handle.owner != *principal {
                return Err(Error::Forbidden);
            }
            return Ok(handle);
        }
        let record = self.store.load_by_id(id).await?;
        if record.owner_principal != *principal {
            return Err(Error::Forbidden);
        }
        Ok(self.install(Notebook::from_record(record)))
    }

    fn install(&self, notebook: Notebook) -> Arc<NotebookHandle> {
        let handle = NotebookHandle::new(notebook);
        self.open
            .lock()
            .expect("open table poisoned")
            .insert(handle.id.clone(), handle.clone());
        handle
    }

    /// The handle for an already-open notebook.
    pub fn get_open(&self, id: &NotebookId) -> Option<Arc<NotebookHandle>> {
        self.open
            .lock()
            .expect("open table poisoned")
            .get(id)
            .cloned()
    }

    /// Ids of all notebooks owned by the principal.
    pub async fn list(&self, owner: &PrincipalId) -> Result<Vec<NotebookId>> {
        self.store.list(owner).await
    }

    /// Delete a notebook and evict it from the open table.
    pub async fn delete(&self, owner: &PrincipalId, id: &NotebookId) -> Result<()> {
        self.store.delete(owner, id).await?;
        self.open.lock().expect("open table poisoned").remove(id);
        Ok(())
    }

    /// Rename the notebook. Not a cell mutation; the revision stays put.
    pub async fn rename(&self, handle: &NotebookHandle, name: Option<String>) -> Result<u64> {
        let mut notebook = handle.lock().await;
        let previous = notebook.name.take();
        notebook.name = name;
        if let Err(e) = self.store.save(&notebook.to_record()).await {
            notebook.name = previous;
            return Err(e);
        }
        Ok(notebook.revision)
    }

    /// Update the query backend connection string.
    pub async fn set_db_connection(
        &self,
        handle: &NotebookHandle,
        connection_string: String,
    ) -> Result<u64> {
        let mut notebook = handle.lock().await;
        let previous = notebook.db_connection_string.take();
        notebook.db_connection_string = Some(connection_string);
        if let Err(e) = self.store.save(&notebook.to_record()).await {
            notebook.db_connection_string = previous;
            return Err(e);
        }
        Ok(notebook.revision)
    }

    /// Insert a cell at `index` (or append), extract its dependencies, and
    /// apply it to the graph. A cycle keeps the cell but marks it `Error`
    /// with the diagnostic.
    pub async fn locked_create_cell(
        &self,
        handle: &NotebookHandle,
        cell_type: CellType,
        code: String,
        index: Option<usize>,
    ) -> Result<(Cell, usize, u64)> {
        let mut notebook = handle.lock().await;
        let backup = Backup::of(&notebook);

        let mut cell = Cell::with_code(cell_type, code);
        let sets = deps::extract(&cell.code, cell.cell_type);
        cell.reads = sets.reads;
        cell.writes = sets.writes;

        if let Err(e) = notebook.graph.upsert(&cell.id, &cell.reads, &cell.writes) {
            cell.status = CellStatus::Error;
            cell.error = Some(e.to_string());
        }

        let index = index.unwrap_or(notebook.cells.len()).min(notebook.cells.len());
        notebook.cells.insert(index, cell.clone());
        let order = notebook.cell_order();
        notebook.graph.set_order(&order);
        notebook.revision += 1;

        if let Err(e) = self.persist(&mut notebook, backup).await {
            return Err(e);
        }
        Ok((cell, index, notebook.revision))
    }

    /// Update a cell's code under an optional optimistic-revision check.
    pub async fn locked_update_cell(
        &self,
        handle: &NotebookHandle,
        cell_id: &CellId,
        code: String,
        expected_revision: Option<u64>,
    ) -> Result<(Cell, u64)> {
        let mut notebook = handle.lock().await;
        if let Some(expected) = expected_revision
            && notebook.revision != expected
        {
            return Err(Error::RevisionConflict {
                expected,
                actual: notebook.revision,
            });
        }
        let Some(cell_type) = notebook.cell(cell_id).map(|c| c.cell_type) else {
            return Err(Error::CellNotFound(cell_id.clone()));
        };
        let backup = Backup::of(&notebook);

        let sets = deps::extract(&code, cell_type);
        let Some(cell) = notebook.cell_mut(cell_id) else {
            return Err(Error::CellNotFound(cell_id.clone()));
        };
        cell.code = code;
        cell.clear_runtime_state();
        cell.reads = sets.reads;
        cell.writes = sets.writes;
        let reads = cell.reads.clone();
        let writes = cell.writes.clone();

        if let Err(e) = notebook.graph.upsert(cell_id, &reads, &writes)
            && let Some(cell) = notebook.cell_mut(cell_id)
        {
            cell.status = CellStatus::Error;
            cell.error = Some(e.to_string());
        }
        notebook.revision += 1;

        if let Err(e) = self.persist(&mut notebook, backup).await {
            return Err(e);
        }
        let cell = notebook
            .cell(cell_id)
            .cloned()
            .ok_or_else(|| Error::CellNotFound(cell_id.clone()))?;
        Ok((cell, notebook.revision))
    }

    /// Remove a cell from the sequence and the graph. Returns the names the
    /// cell wrote, for eviction from the kernel globals.
    pub async fn locked_delete_cell(
        &self,
        handle: &NotebookHandle,
        cell_id: &CellId,
    ) -> Result<(Vec<String>, u64)> {
        let mut notebook = handle.lock().await;
        let Some(index) = notebook.index_of(cell_id) else {
            return Err(Error::CellNotFound(cell_id.clone()));
        };
        let backup = Backup::of(&notebook);

        let cell = notebook.cells.remove(index);
        notebook.graph.remove(cell_id);
        let order = notebook.cell_order();
        notebook.graph.set_order(&order);
        notebook.revision += 1;

        if let Err(e) = self.persist(&mut notebook, backup).await {
            return Err(e);
        }
        Ok((cell.writes.into_iter().collect(), notebook.revision))
    }

    /// Deep copy of the notebook's public state.
    pub async fn locked_snapshot(&self, handle: &NotebookHandle) -> NotebookSnapshot {
        let notebook = handle.lock().await;
        NotebookSnapshot {
            id: notebook.id.clone(),
            name: notebook.name.clone(),
            db_connection_string: notebook.db_connection_string.clone(),
            revision: notebook.revision,
            cells: notebook.cells.clone(),
        }
    }

    async fn persist(&self, notebook: &mut Notebook, backup: Backup) -> Result<()> {
        if let Err(e) = self.store.save(&notebook.to_record()).await {
            backup.restore(notebook);
            return Err(e);
        }
        Ok(())
    }
}

/// Cell-level state captured before a mutation, for rollback on storage
/// failure.
struct Backup {
    cells: Vec<Cell>,
    graph: rill_core::DepGraph,
    revision: u64,
}

impl Backup {
    fn of(notebook: &Notebook) -> Self {
        Self {
            cells: notebook.cells.clone(),
            graph: notebook.graph.clone(),
            revision: notebook.revision,
        }
    }

    fn restore(self, notebook: &mut Notebook) {
        notebook.cells = self.cells;
        notebook.graph = self.graph;
        notebook.revision = self.revision;
    }
}
