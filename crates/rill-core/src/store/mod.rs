//! Persistence capability for notebooks.
//!
//! The engine writes the full notebook record on every mutation;
//! implementations must be crash-safe (rename-into-place on file backends).

mod file;
mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{NotebookId, NotebookRecord, PrincipalId};

pub use file::FileStore;
pub use memory::MemoryStore;

/// Storage backend for notebook records.
#[async_trait]
pub trait NotebookStore: Send + Sync {
    /// Persist the full record, replacing any previous version.
    async fn save(&self, record: &NotebookRecord) -> Result<()>;

    /// Load a notebook owned by `owner`. `NotebookNotFound` if it does not
    /// exist or belongs to someone else.
    async fn load(&self, owner: &PrincipalId, id: &NotebookId) -> Result<NotebookRecord>;

    /// Load a notebook regardless of owner. Callers own the access check;
    /// the live-channel attach uses this to tell a forbidden notebook apart
    /// from a missing one.
    async fn load_by_id(&self, id: &NotebookId) -> Result<NotebookRecord>;

    /// Ids of all notebooks owned by `owner`.
    async fn list(&self, owner: &PrincipalId) -> Result<Vec<NotebookId>>;

    /// Delete a notebook owned by `owner`.
    async fn delete(&self, owner: &PrincipalId, id: &NotebookId) -> Result<()>;
}
