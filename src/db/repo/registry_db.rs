use crate::db::error::DbError;
use crate::db::repo::{Abort, RegistryStore, RegistryTx};
use crate::db::retry::RetryConfig;
use crate::db::{Db, DbResult, map_row_opt};
use crate::models::{ClaimRecord, ClaimWrite, NormalizedKey, OwnerId, OwnerRecord, OwnerWrite};
use async_trait::async_trait;
use deadpool_postgres::Transaction;
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio_postgres::IsolationLevel;

/// Registry backed by PostgreSQL `SERIALIZABLE` transactions.
///
/// Postgres detects overlapping transactions itself and fails one of them with a serialization
/// error; those, and a unique violation from two first-time claims racing on the same key, are
/// retried. Commit-time columns are written with `now()`, which is fixed for the whole
/// transaction.
pub struct PgRegistryStore {
    db: Arc<Db>,
    retry: RetryConfig,
}

impl PgRegistryStore {
    pub fn new(db: Arc<Db>, retry: RetryConfig) -> Self {
        Self { db, retry }
    }
}

struct PgTx<'c> {
    txn: Transaction<'c>,
}

#[async_trait]
impl<'c> RegistryTx for PgTx<'c> {
    async fn get_owner(&mut self, id: &OwnerId) -> DbResult<Option<OwnerRecord>> {
        let stmt = self
            .txn
            .prepare_cached("SELECT id, display_name, normalized_key, last_rename_at FROM owners WHERE id = $1")
            .await?;

        let row_opt = self.txn.query_opt(&stmt, &[id]).await?;
        map_row_opt(
            row_opt,
            OwnerRecord::try_from_row,
            &format!("RegistryTx::get_owner id={}", id),
        )
    }

    async fn get_claim(&mut self, key: &NormalizedKey) -> DbResult<Option<ClaimRecord>> {
        let stmt = self
            .txn
            .prepare_cached(
                "SELECT normalized_key, owner_id, display_name, claimed_at FROM claims WHERE normalized_key = $1",
            )
            .await?;

        let row_opt = self.txn.query_opt(&stmt, &[key]).await?;
        map_row_opt(
            row_opt,
            ClaimRecord::try_from_row,
            &format!("RegistryTx::get_claim key={}", key),
        )
    }

    async fn put_owner(&mut self, id: &OwnerId, owner: OwnerWrite) -> DbResult<()> {
        let stmt = self
            .txn
            .prepare_cached(
                r#"
                INSERT INTO owners (id, display_name, normalized_key, last_rename_at)
                VALUES ($1, $2, $3, now())
                ON CONFLICT (id)
                DO UPDATE SET display_name = EXCLUDED.display_name,
                              normalized_key = EXCLUDED.normalized_key,
                              last_rename_at = EXCLUDED.last_rename_at
                "#,
            )
            .await?;

        self.txn
            .execute(&stmt, &[id, &owner.display_name, &owner.normalized_key])
            .await?;
        Ok(())
    }

    async fn put_claim(&mut self, key: &NormalizedKey, claim: ClaimWrite) -> DbResult<()> {
        let stmt = self
            .txn
            .prepare_cached(
                r#"
                INSERT INTO claims (normalized_key, owner_id, display_name, claimed_at)
                VALUES ($1, $2, $3, now())
                ON CONFLICT (normalized_key)
                DO UPDATE SET owner_id = EXCLUDED.owner_id,
                              display_name = EXCLUDED.display_name,
                              claimed_at = EXCLUDED.claimed_at
                "#,
            )
            .await?;

        self.txn
            .execute(&stmt, &[key, &claim.owner_id, &claim.display_name])
            .await?;
        Ok(())
    }

    async fn delete_claim(&mut self, key: &NormalizedKey) -> DbResult<()> {
        let stmt = self
            .txn
            .prepare_cached("DELETE FROM claims WHERE normalized_key = $1")
            .await?;

        self.txn.execute(&stmt, &[key]).await?;
        Ok(())
    }
}

#[async_trait]
impl RegistryStore for PgRegistryStore {
    async fn run_atomic<T, E, F>(&self, f: F) -> Result<T, Abort<E>>
    where
        T: Send,
        E: Send,
        F: for<'a> Fn(&'a mut dyn RegistryTx) -> BoxFuture<'a, Result<T, Abort<E>>> + Send + Sync,
    {
        let f = &f;
        let db = &self.db;
        self.retry
            .run(move |attempt| async move {
                tracing::trace!(attempt, "postgres transaction attempt");
                let mut client = db.get_client().await?;
                let txn = client
                    .build_transaction()
                    .isolation_level(IsolationLevel::Serializable)
                    .start()
                    .await
                    .map_err(DbError::from)?;

                let mut tx = PgTx { txn };
                match f(&mut tx).await {
                    Ok(value) => {
                        tx.txn.commit().await.map_err(DbError::from)?;
                        Ok::<T, Abort<E>>(value)
                    }
                    Err(e) => {
                        if let Err(rb) = tx.txn.rollback().await {
                            tracing::warn!(error = %rb, "rollback failed");
                        }
                        Err(e)
                    }
                }
            })
            .await
    }
}
