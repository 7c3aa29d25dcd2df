mod registry_db;
mod registry_mem;

pub use registry_db::PgRegistryStore;
pub use registry_mem::MemoryRegistryStore;

use crate::db::DbResult;
use crate::db::error::DbError;
use crate::models::{ClaimRecord, ClaimWrite, CommitTimestamp, NormalizedKey, OwnerId, OwnerRecord, OwnerWrite};
use futures::future::BoxFuture;

/// Why a transaction did not commit.
#[derive(Debug)]
pub enum Abort<E> {
    /// Store-level failure. Conflicts among these are retried by the store.
    Store(DbError),
    /// The transaction function refused to continue. Never retried.
    Rejected(E),
}

impl<E> From<DbError> for Abort<E> {
    fn from(e: DbError) -> Self {
        Abort::Store(e)
    }
}

/// Point reads and writes available inside one atomic transaction.
///
/// Writes become visible to other transactions only when the transaction commits. Reads observe
/// this transaction's own writes.
#[async_trait::async_trait]
pub trait RegistryTx: Send {
    async fn get_owner(&mut self, id: &OwnerId) -> DbResult<Option<OwnerRecord>>;
    async fn get_claim(&mut self, key: &NormalizedKey) -> DbResult<Option<ClaimRecord>>;

    async fn put_owner(&mut self, id: &OwnerId, owner: OwnerWrite) -> DbResult<()>;
    async fn put_claim(&mut self, key: &NormalizedKey, claim: ClaimWrite) -> DbResult<()>;
    async fn delete_claim(&mut self, key: &NormalizedKey) -> DbResult<()>;

    /// Token standing in for this transaction's commit time.
    fn commit_timestamp(&self) -> CommitTimestamp {
        CommitTimestamp::issue()
    }
}

/// Storage for owner and claim records with serializable multi-key transactions.
#[async_trait::async_trait]
pub trait RegistryStore: Send + Sync + 'static {
    /// Runs `f` inside a transaction and commits its writes atomically.
    ///
    /// `f` may be called more than once: on a conflict the attempt is rolled back and `f` runs
    /// again on a fresh snapshot, up to the store's retry budget.
    async fn run_atomic<T, E, F>(&self, f: F) -> Result<T, Abort<E>>
    where
        T: Send,
        E: Send,
        F: for<'a> Fn(&'a mut dyn RegistryTx) -> BoxFuture<'a, Result<T, Abort<E>>> + Send + Sync;
}
