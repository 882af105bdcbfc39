//! `PostgreSQL` implementation of the snapshot store.
//!
//! # Design
//! - Concurrent writers on one service are serialized with a transaction-scoped
//!   advisory lock keyed by the service name.
//! - `UNIQUE (service, version)` and the partial unique index on active rows
//!   back the lock; violations surface as `StoreError::Conflict`.
//! - Every query helper is generic over the executor so the same SQL runs on
//!   the pool and inside a transaction.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use confvault_core::{
    Document, NewSnapshot, Snapshot, SnapshotStore, StoreError, StoreResult, StoreTransaction,
    Version,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{Executor, FromRow, PgPool, Postgres, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{DataError, Result};

const LOCK_SERVICE: &str = "SELECT pg_advisory_xact_lock(hashtextextended($1, 0))";

const SELECT_MAX_VERSION: &str = "SELECT MAX(version) FROM config_snapshots WHERE service = $1";

const INSERT_SNAPSHOT: &str = r"
    INSERT INTO config_snapshots (id, service, version, data, active)
    VALUES ($1, $2, $3, $4, $5)
    RETURNING id, service, version, data, active, created_at
";

const SELECT_BY_VERSION: &str = r"
    SELECT id, service, version, data, active, created_at
    FROM config_snapshots
    WHERE service = $1 AND version = $2
";

const SELECT_ACTIVE: &str = r"
    SELECT id, service, version, data, active, created_at
    FROM config_snapshots
    WHERE service = $1 AND active
";

const UPDATE_ACTIVE: &str = "UPDATE config_snapshots SET active = $2 WHERE id = $1";

const DELETE_SNAPSHOT: &str = "DELETE FROM config_snapshots WHERE id = $1";

fn map_query_err(operation: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |source| StoreError::from(DataError::QueryFailed { operation, source })
}

fn map_write_err(
    operation: &'static str,
    service: String,
    version: Option<Version>,
) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |source| {
        let err = DataError::QueryFailed { operation, source };
        if err.is_unique_violation() {
            StoreError::Conflict { service, version }
        } else {
            StoreError::from(err)
        }
    }
}

/// Apply the embedded schema migrations.
///
/// # Errors
///
/// Returns an error when migration execution fails.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    let mut migrator = sqlx::migrate!("./migrations");
    migrator.set_ignore_missing(true);
    migrator
        .run(pool)
        .await
        .map_err(|source| DataError::MigrationFailed { source })?;
    Ok(())
}

/// Connection pool sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    /// Upper bound on open connections.
    pub max_connections: u32,
    /// How long a request waits for a free connection.
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 8,
            acquire_timeout: Duration::from_secs(10),
        }
    }
}

/// Database-backed snapshot store.
#[derive(Clone)]
pub struct PgSnapshotStore {
    pool: PgPool,
}

impl PgSnapshotStore {
    /// Wrap an existing pool. Migrations are not applied.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool against `url` and apply pending migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is unreachable or migrations fail.
    pub async fn connect(url: &str, settings: PoolSettings) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.acquire_timeout)
            .connect(url)
            .await
            .map_err(|source| DataError::ConnectFailed { source })?;
        run_migrations(&pool).await?;
        info!(
            max_connections = settings.max_connections,
            "snapshot store connected"
        );
        Ok(Self { pool })
    }

    /// Access the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
        debug!("snapshot store closed");
    }
}

#[async_trait]
impl SnapshotStore for PgSnapshotStore {
    type Tx = PgTransaction;

    async fn begin(&self) -> StoreResult<Self::Tx> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(map_query_err("snapshot.begin"))?;
        Ok(PgTransaction { tx })
    }

    async fn find_by_version(
        &self,
        service: &str,
        version: Version,
    ) -> StoreResult<Option<Snapshot>> {
        fetch_by_version(&self.pool, service, version).await
    }

    async fn find_active(&self, service: &str) -> StoreResult<Option<Snapshot>> {
        fetch_active(&self.pool, service).await
    }
}

/// Open `PostgreSQL` transaction; dropping it rolls back.
pub struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn lock_service(&mut self, service: &str) -> StoreResult<()> {
        sqlx::query(LOCK_SERVICE)
            .bind(service)
            .execute(&mut *self.tx)
            .await
            .map_err(map_query_err("snapshot.lock_service"))?;
        Ok(())
    }

    async fn max_version(&mut self, service: &str) -> StoreResult<Option<Version>> {
        let max: Option<i32> = sqlx::query_scalar(SELECT_MAX_VERSION)
            .bind(service)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(map_query_err("snapshot.max_version"))?;
        max.map(|raw| stored_version("snapshot.max_version", raw))
            .transpose()
    }

    async fn insert(&mut self, snapshot: NewSnapshot<'_>) -> StoreResult<Snapshot> {
        let row: SnapshotRow = sqlx::query_as(INSERT_SNAPSHOT)
            .bind(Uuid::new_v4())
            .bind(snapshot.service)
            .bind(snapshot.version.get())
            .bind(Json(snapshot.data))
            .bind(snapshot.active)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(map_write_err(
                "snapshot.insert",
                snapshot.service.to_string(),
                Some(snapshot.version),
            ))?;
        row.into_snapshot()
    }

    async fn find_by_version(
        &mut self,
        service: &str,
        version: Version,
    ) -> StoreResult<Option<Snapshot>> {
        fetch_by_version(&mut *self.tx, service, version).await
    }

    async fn find_active(&mut self, service: &str) -> StoreResult<Option<Snapshot>> {
        fetch_active(&mut *self.tx, service).await
    }

    async fn set_active(&mut self, id: Uuid, active: bool) -> StoreResult<()> {
        // The row's service is not at hand here, so conflicts report the id.
        let result = sqlx::query(UPDATE_ACTIVE)
            .bind(id)
            .bind(active)
            .execute(&mut *self.tx)
            .await
            .map_err(map_write_err("snapshot.set_active", id.to_string(), None))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::backend(
                "snapshot.set_active",
                "snapshot row not found",
            ));
        }
        Ok(())
    }

    async fn delete(&mut self, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query(DELETE_SNAPSHOT)
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(map_query_err("snapshot.delete"))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::backend(
                "snapshot.delete",
                "snapshot row not found",
            ));
        }
        Ok(())
    }

    async fn commit(self) -> StoreResult<()> {
        self.tx
            .commit()
            .await
            .map_err(map_query_err("snapshot.commit"))
    }

    async fn rollback(self) -> StoreResult<()> {
        self.tx
            .rollback()
            .await
            .map_err(map_query_err("snapshot.rollback"))
    }
}

#[derive(Debug, FromRow)]
struct SnapshotRow {
    id: Uuid,
    service: String,
    version: i32,
    data: Json<Document>,
    active: bool,
    created_at: DateTime<Utc>,
}

impl SnapshotRow {
    fn into_snapshot(self) -> StoreResult<Snapshot> {
        Ok(Snapshot {
            id: self.id,
            version: stored_version("snapshot.decode", self.version)?,
            service: self.service,
            data: self.data.0,
            active: self.active,
            created_at: self.created_at,
        })
    }
}

fn stored_version(operation: &'static str, raw: i32) -> StoreResult<Version> {
    Version::try_from(raw).map_err(|_| {
        StoreError::backend(operation, format!("stored version {raw} is not positive"))
    })
}

async fn fetch_by_version<'e, E>(
    executor: E,
    service: &str,
    version: Version,
) -> StoreResult<Option<Snapshot>>
where
    E: Executor<'e, Database = Postgres>,
{
    let row: Option<SnapshotRow> = sqlx::query_as(SELECT_BY_VERSION)
        .bind(service)
        .bind(version.get())
        .fetch_optional(executor)
        .await
        .map_err(map_query_err("snapshot.find_by_version"))?;
    row.map(SnapshotRow::into_snapshot).transpose()
}

async fn fetch_active<'e, E>(executor: E, service: &str) -> StoreResult<Option<Snapshot>>
where
    E: Executor<'e, Database = Postgres>,
{
    let row: Option<SnapshotRow> = sqlx::query_as(SELECT_ACTIVE)
        .bind(service)
        .fetch_optional(executor)
        .await
        .map_err(map_query_err("snapshot.find_active"))?;
    row.map(SnapshotRow::into_snapshot).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_settings_defaults() {
        let settings = PoolSettings::default();
        assert_eq!(settings.max_connections, 8);
        assert_eq!(settings.acquire_timeout, Duration::from_secs(10));
    }

    #[test]
    fn stored_versions_must_be_positive() {
        assert!(stored_version("test", 0).is_err());
        assert_eq!(
            stored_version("test", 3).ok().map(Version::get),
            Some(3)
        );
    }

    #[test]
    fn non_unique_failures_stay_backend_errors() {
        let mapped = map_write_err("snapshot.insert", "svc".into(), Some(Version::FIRST))(
            sqlx::Error::RowNotFound,
        );
        assert!(matches!(mapped, StoreError::Backend { .. }));
    }
}
