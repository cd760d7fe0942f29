//! File-backed notebook store.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::model::{NotebookId, NotebookRecord, PrincipalId};

use super::NotebookStore;

/// Stores each notebook as `<dir>/<id>.json`.
///
/// Writes go to a temporary file in the same directory followed by an atomic
/// rename, so a crash mid-save never corrupts the previous version.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .map_err(|e| Error::Storage(format!("failed to create {}: {e}", dir.display())))?;
        Ok(Self { dir })
    }

    fn path_for(&self, id: &NotebookId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    async fn read_record(&self, id: &NotebookId) -> Result<NotebookRecord> {
        let path = self.path_for(id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotebookNotFound(id.to_string()));
            }
            Err(e) => {
                return Err(Error::Storage(format!(
                    "failed to read {}: {e}",
                    path.display()
                )));
            }
        };
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::Storage(format!("corrupt notebook record {id}: {e}")))
    }
}

#[async_trait]
impl NotebookStore for FileStore {
    async fn save(&self, record: &NotebookRecord) -> Result<()> {
        let path = self.path_for(&record.id);
        let tmp = self
            .dir
            .join(format!("{}.tmp-{}", record.id, uuid::Uuid::new_v4()));
        let bytes = serde_json::to_vec_pretty(record)
            .map_err(|e| Error::Storage(format!("failed to encode notebook record: {e}")))?;

        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| Error::Storage(format!("failed to write {}: {e}", tmp.display())))?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(Error::Storage(format!(
                "failed to move record into place at {}: {e}",
                path.display()
            )));
        }
        Ok(())
    }

    async fn load(&self, owner: &PrincipalId, id: &NotebookId) -> Result<NotebookRecord> {
        let record = self.read_record(id).await?;
        if record.owner_principal != *owner {
            return Err(Error::NotebookNotFound(id.to_string()));
        }
        Ok(record)
    }

    async fn load_by_id(&self, id: &NotebookId) -> Result<NotebookRecord> {
        self.read_record(id).await
    }

    async fn list(&self, owner: &PrincipalId) -> Result<Vec<NotebookId>> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| Error::Storage(format!("failed to list {}: {e}", self.dir.display())))?;
        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::Storage(format!("failed to list {}: {e}", self.dir.display())))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let id = NotebookId::new(stem);
            if let Ok(record) = self.read_record(&id).await
                && record.owner_principal == *owner
            {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn delete(&self, owner: &PrincipalId, id: &NotebookId) -> Result<()> {
        // Ownership check before unlinking.
        self.load(owner, id).await?;
        tokio::fs::remove_file(self.path_for(id))
            .await
            .map_err(|e| Error::Storage(format!("failed to delete notebook {id}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Notebook, PrincipalId};

    fn record(owner: &str) -> NotebookRecord {
        Notebook::new(PrincipalId::new(owner), Some("t".to_string())).to_record()
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        let owner = PrincipalId::new("alice");
        let record = record("alice");

        store.save(&record).await.unwrap();
        let loaded = store.load(&owner, &record.id).await.unwrap();
        assert_eq!(loaded.id, record.id);
        assert_eq!(loaded.revision, record.revision);
        assert_eq!(loaded.cells.len(), record.cells.len());
    }

    #[tokio::test]
    async fn test_load_wrong_owner_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        let record = record("alice");
        store.save(&record).await.unwrap();

        let result = store.load(&PrincipalId::new("bob"), &record.id).await;
        assert!(matches!(result, Err(Error::NotebookNotFound(_))));
    }

    #[tokio::test]
    async fn test_list_filters_by_owner() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        let mine = record("alice");
        let theirs = record("bob");
        store.save(&mine).await.unwrap();
        store.save(&theirs).await.unwrap();

        let ids = store.list(&PrincipalId::new("alice")).await.unwrap();
        assert_eq!(ids, vec![mine.id]);
    }

    #[tokio::test]
    async fn test_delete_removes_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        let owner = PrincipalId::new("alice");
        let record = record("alice");
        store.save(&record).await.unwrap();

        store.delete(&owner, &record.id).await.unwrap();
        let result = store.load(&owner, &record.id).await;
        assert!(matches!(result, Err(Error::NotebookNotFound(_))));
    }

    #[tokio::test]
    async fn test_save_replaces_previous_version() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        let owner = PrincipalId::new("alice");
        let mut record = record("alice");
        store.save(&record).await.unwrap();

        record.revision = 9;
        store.save(&record).await.unwrap();
        let loaded = store.load(&owner, &record.id).await.unwrap();
        assert_eq!(loaded.revision, 9);
    }
}
