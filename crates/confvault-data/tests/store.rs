use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use confvault_core::{
    ConfigRequest, Document, ErrorKind, NewSnapshot, SnapshotStore, StoreError, StoreTransaction,
    Version, VersionError, VersionManager, VersionSelector,
};
use confvault_data::{PgSnapshotStore, PoolSettings};
use confvault_test_support::postgres::start_postgres;
use serde_json::json;

async fn with_store<F, Fut>(test: F) -> Result<()>
where
    F: FnOnce(PgSnapshotStore) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let database = match start_postgres() {
        Ok(database) => database,
        Err(err) => {
            eprintln!("skipping postgres snapshot store tests: {err:#}");
            return Ok(());
        }
    };

    assert!(database.name().starts_with("confvault_test_"));

    let settings = PoolSettings {
        max_connections: 8,
        acquire_timeout: Duration::from_secs(5),
    };
    let store = PgSnapshotStore::connect(database.connection_string(), settings)
        .await
        .context("failed to initialise snapshot store")?;

    let result = test(store.clone()).await;

    store.close().await;
    drop(database);
    result
}

fn doc(value: &serde_json::Value) -> Document {
    value.as_object().cloned().unwrap_or_default()
}

fn exact(version: i32) -> Result<VersionSelector> {
    Ok(VersionSelector::Exact(Version::try_from(version)?))
}

#[tokio::test]
async fn rollback_scenario_against_postgres() -> Result<()> {
    with_store(|store| async move {
        let manager = VersionManager::new(store);
        let create = |value: serde_json::Value| {
            ConfigRequest::builder("billing").data(doc(&value)).build()
        };

        assert_eq!(manager.create(&create(json!({"k": "v"}))).await?.version.get(), 1);
        assert_eq!(manager.create(&create(json!({"k": "v2"}))).await?.version.get(), 2);

        let first = manager
            .get(&ConfigRequest::builder("billing").version(exact(1)?).build())
            .await?;
        assert!(!first.active);

        manager
            .update(
                &ConfigRequest::builder("billing")
                    .version(exact(1)?)
                    .used(true)
                    .build(),
            )
            .await?;
        let current = manager.get(&ConfigRequest::builder("billing").build()).await?;
        assert_eq!(current.version.get(), 1);
        assert_eq!(current.data, Some(doc(&json!({"k": "v"}))));

        manager
            .delete(&ConfigRequest::builder("billing").version(exact(2)?).build())
            .await?;
        let gone = manager
            .get(&ConfigRequest::builder("billing").version(exact(2)?).build())
            .await;
        assert_eq!(gone.err().map(|err| err.kind()), Some(ErrorKind::NotFound));

        let refused = manager
            .delete(&ConfigRequest::builder("billing").version(exact(1)?).build())
            .await;
        assert!(matches!(refused, Err(VersionError::Forbidden { .. })));
        Ok(())
    })
    .await
}

#[tokio::test]
async fn concurrent_creates_get_consecutive_versions() -> Result<()> {
    with_store(|store| async move {
        let manager = Arc::new(VersionManager::new(store.clone()));
        let mut handles = Vec::new();
        for round in 0..12 {
            let manager = Arc::clone(&manager);
            handles.push(tokio::spawn(async move {
                manager
                    .create(
                        &ConfigRequest::builder("race")
                            .data(doc(&json!({ "round": round })))
                            .build(),
                    )
                    .await
            }));
        }

        let mut versions = Vec::new();
        for handle in handles {
            versions.push(handle.await??.version.get());
        }
        versions.sort_unstable();
        assert_eq!(versions, (1..=12).collect::<Vec<_>>());

        let active: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM config_snapshots WHERE service = $1 AND active",
        )
        .bind("race")
        .fetch_one(store.pool())
        .await?;
        assert_eq!(active, 1);
        Ok(())
    })
    .await
}

#[tokio::test]
async fn concurrent_activations_and_creates_keep_one_active() -> Result<()> {
    with_store(|store| async move {
        let manager = Arc::new(VersionManager::new(store.clone()));
        for seed in 0..6 {
            manager
                .create(
                    &ConfigRequest::builder("flip")
                        .data(doc(&json!({ "seed": seed })))
                        .build(),
                )
                .await?;
        }

        let mut updates = Vec::new();
        for version in 1..=6 {
            let manager = Arc::clone(&manager);
            let selector = exact(version)?;
            updates.push(tokio::spawn(async move {
                manager
                    .update(
                        &ConfigRequest::builder("flip")
                            .version(selector)
                            .used(true)
                            .build(),
                    )
                    .await
            }));
        }
        let mut creates = Vec::new();
        for round in 0..4 {
            let manager = Arc::clone(&manager);
            creates.push(tokio::spawn(async move {
                manager
                    .create(
                        &ConfigRequest::builder("flip")
                            .data(doc(&json!({ "round": round })))
                            .build(),
                    )
                    .await
            }));
        }

        for handle in updates {
            handle.await??;
        }
        for handle in creates {
            handle.await??;
        }

        let active: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM config_snapshots WHERE service = $1 AND active",
        )
        .bind("flip")
        .fetch_one(store.pool())
        .await?;
        assert_eq!(active, 1);

        let versions: Vec<i32> = sqlx::query_scalar(
            "SELECT version FROM config_snapshots WHERE service = $1 ORDER BY version",
        )
        .bind("flip")
        .fetch_all(store.pool())
        .await?;
        assert_eq!(versions, (1..=10).collect::<Vec<_>>());
        Ok(())
    })
    .await
}

#[tokio::test]
async fn constraints_surface_as_conflicts() -> Result<()> {
    with_store(|store| async move {
        let data = doc(&json!({"k": "v"}));
        let mut tx = store.begin().await?;
        tx.insert(NewSnapshot {
            service: "dupes",
            version: Version::FIRST,
            data: &data,
            active: true,
        })
        .await?;
        tx.commit().await?;

        let mut tx = store.begin().await?;
        let duplicate = tx
            .insert(NewSnapshot {
                service: "dupes",
                version: Version::FIRST,
                data: &data,
                active: false,
            })
            .await;
        assert!(matches!(duplicate, Err(StoreError::Conflict { .. })));
        tx.rollback().await?;

        let mut tx = store.begin().await?;
        let second_active = tx
            .insert(NewSnapshot {
                service: "dupes",
                version: Version::try_from(2)?,
                data: &data,
                active: true,
            })
            .await;
        assert!(matches!(second_active, Err(StoreError::Conflict { .. })));
        tx.rollback().await?;
        Ok(())
    })
    .await
}

#[tokio::test]
async fn dropped_transaction_leaves_no_rows() -> Result<()> {
    with_store(|store| async move {
        let data = doc(&json!({"nested": {"a": [1, 2, 3]}}));
        {
            let mut tx = store.begin().await?;
            tx.lock_service("ephemeral").await?;
            tx.insert(NewSnapshot {
                service: "ephemeral",
                version: Version::FIRST,
                data: &data,
                active: true,
            })
            .await?;
        }
        assert!(store.find_active("ephemeral").await?.is_none());

        let mut tx = store.begin().await?;
        assert_eq!(tx.max_version("ephemeral").await?, None);
        let inserted = tx
            .insert(NewSnapshot {
                service: "ephemeral",
                version: Version::FIRST,
                data: &data,
                active: true,
            })
            .await?;
        tx.commit().await?;

        let stored = store
            .find_by_version("ephemeral", Version::FIRST)
            .await?
            .context("snapshot should be persisted")?;
        assert_eq!(stored.id, inserted.id);
        assert_eq!(stored.data, data);
        Ok(())
    })
    .await
}
