//! Transactional persistence contract for configuration snapshots.
//!
//! Implementations must make every write inside a [`StoreTransaction`]
//! all-or-nothing, and [`StoreTransaction::lock_service`] must serialize
//! concurrent transactions on the same service until commit or rollback.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreResult;
use crate::model::{NewSnapshot, Snapshot, Version};

/// Durable snapshot storage.
#[async_trait]
pub trait SnapshotStore: Send + Sync + 'static {
    /// Transaction handle produced by [`SnapshotStore::begin`].
    type Tx: StoreTransaction;

    /// Open a transaction.
    async fn begin(&self) -> StoreResult<Self::Tx>;

    /// Exact lookup outside any transaction.
    async fn find_by_version(&self, service: &str, version: Version)
    -> StoreResult<Option<Snapshot>>;

    /// Active snapshot lookup outside any transaction.
    async fn find_active(&self, service: &str) -> StoreResult<Option<Snapshot>>;
}

/// An open store transaction. Dropping it without [`commit`](Self::commit)
/// discards every write.
#[async_trait]
pub trait StoreTransaction: Send + Sized {
    /// Serialize against other transactions touching `service`.
    async fn lock_service(&mut self, service: &str) -> StoreResult<()>;

    /// Highest stored version for `service`, `None` when it has no snapshots.
    async fn max_version(&mut self, service: &str) -> StoreResult<Option<Version>>;

    /// Insert a new row, failing with `Conflict` on a duplicate version.
    async fn insert(&mut self, snapshot: NewSnapshot<'_>) -> StoreResult<Snapshot>;

    /// Exact lookup.
    async fn find_by_version(
        &mut self,
        service: &str,
        version: Version,
    ) -> StoreResult<Option<Snapshot>>;

    /// Active snapshot lookup.
    async fn find_active(&mut self, service: &str) -> StoreResult<Option<Snapshot>>;

    /// Flip the active flag on one row.
    async fn set_active(&mut self, id: Uuid, active: bool) -> StoreResult<()>;

    /// Remove one row.
    async fn delete(&mut self, id: Uuid) -> StoreResult<()>;

    /// Make every write visible.
    async fn commit(self) -> StoreResult<()>;

    /// Discard every write.
    async fn rollback(self) -> StoreResult<()>;
}
