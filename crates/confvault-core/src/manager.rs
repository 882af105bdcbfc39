//! Version manager: assigns versions and moves the active flag.
//!
//! # Design
//! - Holds no state besides the store handle; every decision is re-read inside
//!   the transaction that acts on it.
//! - Mutations take the per-service store lock first, so create, activate, and
//!   delete on one service never interleave.
//! - Failed transactions are rolled back explicitly and the original error is
//!   returned unchanged.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use crate::error::{VersionError, VersionResult};
use crate::model::{
    ConfigRequest, ConfigResponse, Document, NewSnapshot, Snapshot, Version, VersionSelector,
};
use crate::store::{SnapshotStore, StoreTransaction};

/// Operations exposed to transport adapters.
#[async_trait]
pub trait VersionFacade: Send + Sync {
    /// Store `data` as the new active snapshot of the service.
    async fn create(&self, request: &ConfigRequest) -> VersionResult<ConfigResponse>;
    /// Read the active or an explicit snapshot.
    async fn get(&self, request: &ConfigRequest) -> VersionResult<ConfigResponse>;
    /// Activate or deactivate a snapshot.
    async fn update(&self, request: &ConfigRequest) -> VersionResult<ConfigResponse>;
    /// Remove an inactive snapshot.
    async fn delete(&self, request: &ConfigRequest) -> VersionResult<ConfigResponse>;
}

/// Shared reference to the version manager used by transports.
pub type SharedVersions = Arc<dyn VersionFacade>;

/// Enforces the versioning and activation protocol on top of a store.
#[derive(Debug, Clone)]
pub struct VersionManager<S> {
    store: S,
}

impl<S: SnapshotStore> VersionManager<S> {
    /// Wrap a store.
    #[must_use]
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// Access the underlying store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Create a new snapshot with the next version and make it active.
    ///
    /// # Errors
    ///
    /// `BadRequest` when the service or data is missing, `Conflict` when the
    /// version is already taken, `Internal` when the store fails.
    #[instrument(name = "version_manager.create", skip_all, fields(service = %request.service()))]
    pub async fn create(&self, request: &ConfigRequest) -> VersionResult<ConfigResponse> {
        let service = require_service(request)?;
        let data = request.data().ok_or(VersionError::BadRequest {
            field: "data",
            reason: "must be specified",
        })?;

        let mut tx = self
            .store
            .begin()
            .await
            .map_err(VersionError::store("create.begin"))?;
        let outcome = create_in(&mut tx, service, data).await;
        let snapshot = finish(tx, outcome, "create.commit").await?;

        info!(version = %snapshot.version, "configuration snapshot created");
        Ok(ConfigResponse::from(snapshot))
    }

    /// Read a snapshot by explicit version, or the active one for the sentinel.
    ///
    /// # Errors
    ///
    /// `BadRequest` when the service is missing, `NotFound` when nothing
    /// matches, `Internal` when the store fails.
    #[instrument(
        name = "version_manager.get",
        skip_all,
        fields(service = %request.service(), version = %request.version())
    )]
    pub async fn get(&self, request: &ConfigRequest) -> VersionResult<ConfigResponse> {
        let service = require_service(request)?;
        let found = match request.version() {
            VersionSelector::Active => self.store.find_active(service).await,
            VersionSelector::Exact(version) => self.store.find_by_version(service, version).await,
        }
        .map_err(VersionError::store("get.find"))?;

        let snapshot = found.ok_or_else(|| not_found(service, request.version()))?;
        debug!(
            version = %snapshot.version,
            active = snapshot.active,
            "configuration snapshot read"
        );
        Ok(ConfigResponse::from(snapshot))
    }

    /// Move the active flag according to `used`.
    ///
    /// Activating an inactive snapshot deactivates the current one in the same
    /// transaction. Deactivating leaves the service without an active snapshot.
    ///
    /// # Errors
    ///
    /// `BadRequest` when the service is missing, `NotFound` when the target does
    /// not exist, `Internal` when the store fails.
    #[instrument(
        name = "version_manager.update",
        skip_all,
        fields(
            service = %request.service(),
            version = %request.version(),
            used = request.used()
        )
    )]
    pub async fn update(&self, request: &ConfigRequest) -> VersionResult<ConfigResponse> {
        let service = require_service(request)?;

        let mut tx = self
            .store
            .begin()
            .await
            .map_err(VersionError::store("update.begin"))?;
        let outcome = update_in(&mut tx, service, request.version(), request.used()).await;
        let (version, changed) = finish(tx, outcome, "update.commit").await?;

        if changed {
            info!(version = %version, "configuration activation changed");
        } else {
            debug!(version = %version, "configuration activation already in requested state");
        }
        Ok(ConfigResponse {
            service: service.to_string(),
            version,
            data: None,
            active: request.used(),
        })
    }

    /// Delete an explicit, inactive snapshot.
    ///
    /// # Errors
    ///
    /// `BadRequest` for the sentinel version, `NotFound` when the snapshot does
    /// not exist, `Forbidden` when it is active, `Internal` when the store fails.
    #[instrument(
        name = "version_manager.delete",
        skip_all,
        fields(service = %request.service(), version = %request.version())
    )]
    pub async fn delete(&self, request: &ConfigRequest) -> VersionResult<ConfigResponse> {
        let service = require_service(request)?;
        let VersionSelector::Exact(version) = request.version() else {
            return Err(VersionError::BadRequest {
                field: "version",
                reason: "must be specified",
            });
        };

        let mut tx = self
            .store
            .begin()
            .await
            .map_err(VersionError::store("delete.begin"))?;
        let outcome = delete_in(&mut tx, service, version).await;
        finish(tx, outcome, "delete.commit").await?;

        info!("configuration snapshot deleted");
        Ok(ConfigResponse {
            service: service.to_string(),
            version,
            data: None,
            active: false,
        })
    }
}

#[async_trait]
impl<S: SnapshotStore> VersionFacade for VersionManager<S> {
    async fn create(&self, request: &ConfigRequest) -> VersionResult<ConfigResponse> {
        Self::create(self, request).await
    }

    async fn get(&self, request: &ConfigRequest) -> VersionResult<ConfigResponse> {
        Self::get(self, request).await
    }

    async fn update(&self, request: &ConfigRequest) -> VersionResult<ConfigResponse> {
        Self::update(self, request).await
    }

    async fn delete(&self, request: &ConfigRequest) -> VersionResult<ConfigResponse> {
        Self::delete(self, request).await
    }
}

fn require_service(request: &ConfigRequest) -> VersionResult<&str> {
    let service = request.service();
    if service.is_empty() {
        return Err(VersionError::BadRequest {
            field: "service",
            reason: "must be specified",
        });
    }
    Ok(service)
}

fn not_found(service: &str, version: VersionSelector) -> VersionError {
    VersionError::NotFound {
        service: service.to_string(),
        version,
    }
}

async fn resolve<T: StoreTransaction>(
    tx: &mut T,
    service: &str,
    selector: VersionSelector,
) -> VersionResult<Snapshot> {
    let found = match selector {
        VersionSelector::Active => tx.find_active(service).await,
        VersionSelector::Exact(version) => tx.find_by_version(service, version).await,
    }
    .map_err(VersionError::store("resolve.find"))?;
    found.ok_or_else(|| not_found(service, selector))
}

async fn create_in<T: StoreTransaction>(
    tx: &mut T,
    service: &str,
    data: &Document,
) -> VersionResult<Snapshot> {
    tx.lock_service(service)
        .await
        .map_err(VersionError::store("create.lock"))?;

    let current = tx
        .max_version(service)
        .await
        .map_err(VersionError::store("create.max_version"))?;
    let version = match current {
        None => Version::FIRST,
        Some(max) => {
            let active = tx
                .find_active(service)
                .await
                .map_err(VersionError::store("create.find_active"))?;
            if let Some(active) = active {
                tx.set_active(active.id, false)
                    .await
                    .map_err(VersionError::store("create.deactivate"))?;
            }
            max.next().ok_or_else(|| VersionError::Conflict {
                service: service.to_string(),
                version: Some(max),
            })?
        }
    };

    tx.insert(NewSnapshot {
        service,
        version,
        data,
        active: true,
    })
    .await
    .map_err(VersionError::store("create.insert"))
}

async fn update_in<T: StoreTransaction>(
    tx: &mut T,
    service: &str,
    selector: VersionSelector,
    used: bool,
) -> VersionResult<(Version, bool)> {
    tx.lock_service(service)
        .await
        .map_err(VersionError::store("update.lock"))?;

    let target = resolve(tx, service, selector).await?;
    if target.active == used {
        return Ok((target.version, false));
    }

    if used {
        let current = tx
            .find_active(service)
            .await
            .map_err(VersionError::store("update.find_active"))?;
        if let Some(current) = current {
            tx.set_active(current.id, false)
                .await
                .map_err(VersionError::store("update.deactivate"))?;
        }
    }
    tx.set_active(target.id, used)
        .await
        .map_err(VersionError::store("update.set_active"))?;
    Ok((target.version, true))
}

async fn delete_in<T: StoreTransaction>(
    tx: &mut T,
    service: &str,
    version: Version,
) -> VersionResult<()> {
    tx.lock_service(service)
        .await
        .map_err(VersionError::store("delete.lock"))?;

    let target = resolve(tx, service, VersionSelector::Exact(version)).await?;
    if target.active {
        return Err(VersionError::Forbidden {
            service: service.to_string(),
            version,
        });
    }
    tx.delete(target.id)
        .await
        .map_err(VersionError::store("delete.remove"))
}

async fn finish<T: StoreTransaction, R>(
    tx: T,
    outcome: VersionResult<R>,
    operation: &'static str,
) -> VersionResult<R> {
    match outcome {
        Ok(value) => {
            tx.commit().await.map_err(VersionError::store(operation))?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback) = tx.rollback().await {
                warn!(error = %rollback, operation, "transaction rollback failed");
            }
            Err(err)
        }
    }
}
