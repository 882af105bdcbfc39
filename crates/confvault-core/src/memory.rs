//! In-process [`SnapshotStore`] backed by a single async mutex.
//!
//! A transaction owns the mutex for its whole lifetime and works on a staged
//! copy of the rows, so transactions are fully serialized and a dropped
//! transaction leaves no trace. It enforces the same uniqueness rules as the
//! `PostgreSQL` schema.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::model::{NewSnapshot, Snapshot, Version};
use crate::store::{SnapshotStore, StoreTransaction};

/// Snapshot store that lives entirely in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    rows: Vec<Snapshot>,
}

impl MemoryState {
    fn by_version(&self, service: &str, version: Version) -> Option<&Snapshot> {
        self.rows
            .iter()
            .find(|row| row.service == service && row.version == version)
    }

    fn active(&self, service: &str) -> Option<&Snapshot> {
        self.rows
            .iter()
            .find(|row| row.service == service && row.active)
    }
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All snapshots of `service`, ordered by version.
    pub async fn list(&self, service: &str) -> Vec<Snapshot> {
        let state = self.state.lock().await;
        let mut rows: Vec<Snapshot> = state
            .rows
            .iter()
            .filter(|row| row.service == service)
            .cloned()
            .collect();
        rows.sort_by_key(|row| row.version);
        rows
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    type Tx = MemoryTransaction;

    async fn begin(&self) -> StoreResult<Self::Tx> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let staged = MemoryState::clone(&guard);
        Ok(MemoryTransaction { guard, staged })
    }

    async fn find_by_version(
        &self,
        service: &str,
        version: Version,
    ) -> StoreResult<Option<Snapshot>> {
        Ok(self.state.lock().await.by_version(service, version).cloned())
    }

    async fn find_active(&self, service: &str) -> StoreResult<Option<Snapshot>> {
        Ok(self.state.lock().await.active(service).cloned())
    }
}

/// Open [`MemoryStore`] transaction.
#[derive(Debug)]
pub struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn lock_service(&mut self, _service: &str) -> StoreResult<()> {
        // The whole store is already held by this transaction.
        Ok(())
    }

    async fn max_version(&mut self, service: &str) -> StoreResult<Option<Version>> {
        Ok(self
            .staged
            .rows
            .iter()
            .filter(|row| row.service == service)
            .map(|row| row.version)
            .max())
    }

    async fn insert(&mut self, snapshot: NewSnapshot<'_>) -> StoreResult<Snapshot> {
        let taken = self
            .staged
            .by_version(snapshot.service, snapshot.version)
            .is_some();
        let second_active = snapshot.active && self.staged.active(snapshot.service).is_some();
        if taken || second_active {
            return Err(StoreError::Conflict {
                service: snapshot.service.to_string(),
                version: Some(snapshot.version),
            });
        }

        let row = Snapshot {
            id: Uuid::new_v4(),
            service: snapshot.service.to_string(),
            version: snapshot.version,
            data: snapshot.data.clone(),
            active: snapshot.active,
            created_at: Utc::now(),
        };
        self.staged.rows.push(row.clone());
        Ok(row)
    }

    async fn find_by_version(
        &mut self,
        service: &str,
        version: Version,
    ) -> StoreResult<Option<Snapshot>> {
        Ok(self.staged.by_version(service, version).cloned())
    }

    async fn find_active(&mut self, service: &str) -> StoreResult<Option<Snapshot>> {
        Ok(self.staged.active(service).cloned())
    }

    async fn set_active(&mut self, id: Uuid, active: bool) -> StoreResult<()> {
        let Some(index) = self.staged.rows.iter().position(|row| row.id == id) else {
            return Err(StoreError::backend("memory.set_active", "snapshot row not found"));
        };
        let service = self.staged.rows[index].service.clone();
        if active
            && self
                .staged
                .active(&service)
                .is_some_and(|current| current.id != id)
        {
            return Err(StoreError::Conflict {
                service,
                version: Some(self.staged.rows[index].version),
            });
        }
        self.staged.rows[index].active = active;
        Ok(())
    }

    async fn delete(&mut self, id: Uuid) -> StoreResult<()> {
        let before = self.staged.rows.len();
        self.staged.rows.retain(|row| row.id != id);
        if self.staged.rows.len() == before {
            return Err(StoreError::backend("memory.delete", "snapshot row not found"));
        }
        Ok(())
    }

    async fn commit(self) -> StoreResult<()> {
        let Self { mut guard, staged } = self;
        *guard = staged;
        Ok(())
    }

    async fn rollback(self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Document;
    use serde_json::json;

    fn doc(value: &serde_json::Value) -> Document {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn dropped_transaction_discards_writes() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let data = doc(&json!({"k": "v"}));
        {
            let mut tx = store.begin().await?;
            tx.insert(NewSnapshot {
                service: "svc",
                version: Version::FIRST,
                data: &data,
                active: true,
            })
            .await?;
        }
        assert!(store.list("svc").await.is_empty());

        let mut tx = store.begin().await?;
        tx.insert(NewSnapshot {
            service: "svc",
            version: Version::FIRST,
            data: &data,
            active: true,
        })
        .await?;
        tx.commit().await?;
        assert_eq!(store.list("svc").await.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn open_transaction_holds_every_service() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let mut held = store.begin().await?;
        held.lock_service("alpha").await?;

        let waiting =
            tokio::time::timeout(std::time::Duration::from_millis(50), store.begin()).await;
        assert!(waiting.is_err());

        held.rollback().await?;
        let mut next = store.begin().await?;
        next.lock_service("beta").await?;
        next.commit().await?;
        Ok(())
    }

    #[tokio::test]
    async fn insert_rejects_duplicates_and_second_active() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let data = doc(&json!({}));
        let mut tx = store.begin().await?;
        tx.insert(NewSnapshot {
            service: "svc",
            version: Version::FIRST,
            data: &data,
            active: true,
        })
        .await?;

        let duplicate = tx
            .insert(NewSnapshot {
                service: "svc",
                version: Version::FIRST,
                data: &data,
                active: false,
            })
            .await;
        assert!(matches!(duplicate, Err(StoreError::Conflict { .. })));

        let second_active = tx
            .insert(NewSnapshot {
                service: "svc",
                version: Version::try_from(2)?,
                data: &data,
                active: true,
            })
            .await;
        assert!(matches!(second_active, Err(StoreError::Conflict { .. })));

        let other_service = tx
            .insert(NewSnapshot {
                service: "other",
                version: Version::FIRST,
                data: &data,
                active: true,
            })
            .await;
        assert!(other_service.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn set_active_and_delete_require_existing_rows() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let mut tx = store.begin().await?;
        assert!(tx.set_active(Uuid::new_v4(), true).await.is_err());
        assert!(tx.delete(Uuid::new_v4()).await.is_err());
        tx.rollback().await?;
        Ok(())
    }
}
