//! In-memory notebook store for tests and ephemeral serving.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::model::{NotebookId, NotebookRecord, PrincipalId};

use super::NotebookStore;

/// Keeps records in a process-local map. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<NotebookId, NotebookRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotebookStore for MemoryStore {
    async fn save(&self, record: &NotebookRecord) -> Result<()> {
        self.records
            .lock()
            .expect("store mutex poisoned")
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn load(&self, owner: &PrincipalId, id: &NotebookId) -> Result<NotebookRecord> {
        let records = self.records.lock().expect("store mutex poisoned");
        records
            .get(id)
            .filter(|r| r.owner_principal == *owner)
            .cloned()
            .ok_or_else(|| Error::NotebookNotFound(id.to_string()))
    }

    async fn load_by_id(&self, id: &NotebookId) -> Result<NotebookRecord> {
        let records = self.records.lock().expect("store mutex poisoned");
        records
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotebookNotFound(id.to_string()))
    }

    async fn list(&self, owner: &PrincipalId) -> Result<Vec<NotebookId>> {
        let records = self.records.lock().expect("store mutex poisoned");
        let mut ids: Vec<NotebookId> = records
            .values()
            .filter(|r| r.owner_principal == *owner)
            .map(|r| r.id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn delete(&self, owner: &PrincipalId, id: &NotebookId) -> Result<()> {
        let mut records = self.records.lock().expect("store mutex poisoned");
        match records.get(id) {
            Some(record) if record.owner_principal == *owner => {
                records.remove(id);
                Ok(())
            }
            _ => Err(Error::NotebookNotFound(id.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Notebook;

    #[tokio::test]
    async fn test_memory_roundtrip() {
        let store = MemoryStore::new();
        let owner = PrincipalId::new("alice");
        let record = Notebook::new(owner.clone(), None).to_record();

        store.save(&record).await.unwrap();
        assert_eq!(store.load(&owner, &record.id).await.unwrap().id, record.id);
        assert_eq!(store.list(&owner).await.unwrap(), vec![record.id.clone()]);

        store.delete(&owner, &record.id).await.unwrap();
        assert!(store.load(&owner, &record.id).await.is_err());
    }
}
