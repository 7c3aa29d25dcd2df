use crate::clock::Clock;
use crate::db::DbResult;
use crate::db::error::DbError;
use crate::db::repo::{Abort, RegistryStore, RegistryTx};
use crate::db::retry::RetryConfig;
use crate::models::{ClaimRecord, ClaimWrite, NormalizedKey, OwnerId, OwnerRecord, OwnerWrite};
use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

/// In-process registry with optimistic concurrency control.
///
/// Every live key carries the version of the commit that last wrote it; an absent key reads as
/// version 0. A transaction records the version of every key it reads and buffers its writes. At
/// commit the read versions are checked against the tables and the writes are applied under the
/// same lock, or the attempt fails with [`DbError::Conflict`]. A key read as absent that is absent
/// again at commit passes, since the transaction serializes at its commit point.
pub struct MemoryRegistryStore {
    tables: Mutex<Tables>,
    clock: Arc<dyn Clock>,
    retry: RetryConfig,
}

#[derive(Default)]
struct Tables {
    owners: HashMap<OwnerId, Versioned<OwnerRecord>>,
    claims: HashMap<NormalizedKey, Versioned<ClaimRecord>>,
    version: u64,
}

struct Versioned<T> {
    version: u64,
    value: T,
}

fn current<K: Eq + Hash, T: Clone>(map: &HashMap<K, Versioned<T>>, key: &K) -> (u64, Option<T>) {
    map.get(key)
        .map(|v| (v.version, Some(v.value.clone())))
        .unwrap_or((0, None))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ReadKey {
    Owner(OwnerId),
    Claim(NormalizedKey),
}

impl MemoryRegistryStore {
    pub fn new(clock: Arc<dyn Clock>, retry: RetryConfig) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            clock,
            retry,
        }
    }

    /// Committed owner record, outside of any transaction.
    pub fn owner(&self, id: &OwnerId) -> Option<OwnerRecord> {
        current(&self.tables.lock().owners, id).1
    }

    /// Committed claim record for `name` in any casing, outside of any transaction.
    pub fn claim(&self, name: &str) -> Option<ClaimRecord> {
        current(&self.tables.lock().claims, &NormalizedKey::from_literal(name)).1
    }

    /// Number of live claims.
    pub fn claim_count(&self) -> usize {
        self.tables.lock().claims.len()
    }

    /// Number of commits that wrote at least one record.
    pub fn commit_count(&self) -> u64 {
        self.tables.lock().version
    }

    fn commit(&self, tx: MemTx<'_>) -> DbResult<()> {
        let mut tables = self.tables.lock();

        for (key, seen) in &tx.reads {
            let now = match key {
                ReadKey::Owner(id) => tables.owners.get(id).map_or(0, |v| v.version),
                ReadKey::Claim(k) => tables.claims.get(k).map_or(0, |v| v.version),
            };
            if now != *seen {
                tracing::debug!(?key, seen, now, "read set invalidated");
                return Err(DbError::Conflict);
            }
        }

        if tx.owner_writes.is_empty() && tx.claim_writes.is_empty() {
            return Ok(());
        }

        tables.version += 1;
        let version = tables.version;
        let at = self.clock.now();

        for (id, write) in tx.owner_writes {
            let record = write.stamp(id.clone(), at);
            tables.owners.insert(id, Versioned { version, value: record });
        }

        for (key, write) in tx.claim_writes {
            match write {
                Some(w) => {
                    let value = w.stamp(key.clone(), at);
                    tables.claims.insert(key, Versioned { version, value });
                }
                None => {
                    tables.claims.remove(&key);
                }
            }
        }

        Ok(())
    }
}

struct MemTx<'s> {
    store: &'s MemoryRegistryStore,
    reads: HashMap<ReadKey, u64>,
    owner_writes: HashMap<OwnerId, OwnerWrite>,
    // None marks a delete
    claim_writes: HashMap<NormalizedKey, Option<ClaimWrite>>,
}

impl<'s> MemTx<'s> {
    fn new(store: &'s MemoryRegistryStore) -> Self {
        Self {
            store,
            reads: HashMap::new(),
            owner_writes: HashMap::new(),
            claim_writes: HashMap::new(),
        }
    }

    fn track(&mut self, key: ReadKey, version: u64) {
        // the first observation is the one validated at commit
        self.reads.entry(key).or_insert(version);
    }
}

#[async_trait]
impl<'s> RegistryTx for MemTx<'s> {
    async fn get_owner(&mut self, id: &OwnerId) -> DbResult<Option<OwnerRecord>> {
        let (version, value) = current(&self.store.tables.lock().owners, id);
        self.track(ReadKey::Owner(id.clone()), version);

        // Own writes carry a provisional stamp until commit
        if let Some(w) = self.owner_writes.get(id) {
            return Ok(Some(w.clone().stamp(id.clone(), self.store.clock.now())));
        }
        Ok(value)
    }

    async fn get_claim(&mut self, key: &NormalizedKey) -> DbResult<Option<ClaimRecord>> {
        let (version, value) = current(&self.store.tables.lock().claims, key);
        self.track(ReadKey::Claim(key.clone()), version);

        if let Some(w) = self.claim_writes.get(key) {
            let now = self.store.clock.now();
            return Ok(w.clone().map(|w| w.stamp(key.clone(), now)));
        }
        Ok(value)
    }

    async fn put_owner(&mut self, id: &OwnerId, owner: OwnerWrite) -> DbResult<()> {
        self.owner_writes.insert(id.clone(), owner);
        Ok(())
    }

    async fn put_claim(&mut self, key: &NormalizedKey, claim: ClaimWrite) -> DbResult<()> {
        self.claim_writes.insert(key.clone(), Some(claim));
        Ok(())
    }

    async fn delete_claim(&mut self, key: &NormalizedKey) -> DbResult<()> {
        self.claim_writes.insert(key.clone(), None);
        Ok(())
    }
}

#[async_trait]
impl RegistryStore for MemoryRegistryStore {
    async fn run_atomic<T, E, F>(&self, f: F) -> Result<T, Abort<E>>
    where
        T: Send,
        E: Send,
        F: for<'a> Fn(&'a mut dyn RegistryTx) -> BoxFuture<'a, Result<T, Abort<E>>> + Send + Sync,
    {
        let f = &f;
        self.retry
            .run(move |attempt| async move {
                tracing::trace!(attempt, "memory transaction attempt");
                let mut tx = MemTx::new(self);
                let value = f(&mut tx).await?;
                self.commit(tx)?;
                Ok::<T, Abort<E>>(value)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::ValidatedName;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn store(retry: RetryConfig) -> Arc<MemoryRegistryStore> {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        Arc::new(MemoryRegistryStore::new(clock, retry))
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig::default().with_base_delay_ms(0).with_max_delay_ms(0)
    }

    fn key(s: &str) -> NormalizedKey {
        ValidatedName::parse(Some(s)).unwrap().lower().clone()
    }

    fn uid(s: &str) -> OwnerId {
        OwnerId::verified(s).unwrap()
    }

    async fn claim(store: &MemoryRegistryStore, owner: &OwnerId, k: &NormalizedKey) -> Result<(), Abort<()>> {
        let (owner, k) = (owner.clone(), k.clone());
        store
            .run_atomic(move |tx| {
                let (owner, k) = (owner.clone(), k.clone());
                Box::pin(async move {
                    let claimed_at = tx.commit_timestamp();
                    tx.put_claim(
                        &k,
                        ClaimWrite {
                            owner_id: owner,
                            display_name: k.to_string(),
                            claimed_at,
                        },
                    )
                    .await?;
                    Ok(())
                })
            })
            .await
    }

    #[tokio::test]
    async fn writes_are_stamped_with_commit_time() {
        let s = store(fast_retry());
        claim(&s, &uid("a"), &key("alice")).await.unwrap();

        let c = s.claim("alice").unwrap();
        assert_eq!(c.owner_id, uid("a"));
        assert_eq!(c.claimed_at, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(s.commit_count(), 1);
    }

    #[tokio::test]
    async fn rejection_discards_buffered_writes() {
        let s = store(fast_retry());
        let k = key("alice");

        let out: Result<(), Abort<&str>> = s
            .run_atomic(move |tx| {
                let k = k.clone();
                Box::pin(async move {
                    tx.delete_claim(&k).await?;
                    Err(Abort::Rejected("nope"))
                })
            })
            .await;

        assert!(matches!(out, Err(Abort::Rejected("nope"))));
        assert_eq!(s.commit_count(), 0);
    }

    #[tokio::test]
    async fn reads_see_own_writes() {
        let s = store(fast_retry());
        let k = key("alice");

        let seen: Result<(Option<String>, bool), Abort<()>> = s
            .run_atomic(move |tx| {
                let k = k.clone();
                Box::pin(async move {
                    let claimed_at = tx.commit_timestamp();
                    tx.put_claim(
                        &k,
                        ClaimWrite {
                            owner_id: OwnerId::verified("a").unwrap(),
                            display_name: "Alice".into(),
                            claimed_at,
                        },
                    )
                    .await?;
                    let mid = tx.get_claim(&k).await?;
                    tx.delete_claim(&k).await?;
                    let after = tx.get_claim(&k).await?;
                    Ok((mid.map(|c| c.display_name), after.is_none()))
                })
            })
            .await;

        assert_eq!(seen.unwrap(), (Some("Alice".to_string()), true));
        assert!(s.claim("alice").is_none());
    }

    #[tokio::test]
    async fn interleaved_commit_forces_retry() {
        let s = store(fast_retry());
        let attempts = Arc::new(AtomicUsize::new(0));
        let k = key("alice");

        let inner = s.clone();
        let counter = attempts.clone();
        let out: Result<bool, Abort<()>> = s
            .run_atomic(move |tx| {
                let (inner, counter, k) = (inner.clone(), counter.clone(), k.clone());
                Box::pin(async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    let existing = tx.get_claim(&k).await?;
                    if n == 0 {
                        // another transaction claims the key behind our back
                        claim(&inner, &uid("b"), &k).await.unwrap();
                    }
                    if existing.is_some() {
                        return Ok(false);
                    }
                    let claimed_at = tx.commit_timestamp();
                    tx.put_claim(
                        &k,
                        ClaimWrite {
                            owner_id: uid("a"),
                            display_name: "alice".into(),
                            claimed_at,
                        },
                    )
                    .await?;
                    Ok(true)
                })
            })
            .await;

        assert_eq!(out.unwrap(), false);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(s.claim("alice").unwrap().owner_id, uid("b"));
    }

    #[tokio::test]
    async fn key_that_comes_and_goes_behind_a_reader_does_not_conflict() {
        let s = store(fast_retry());
        let k = key("alice");

        let inner = s.clone();
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let out: Result<(), Abort<()>> = s
            .run_atomic(move |tx| {
                let (inner, counter, k) = (inner.clone(), counter.clone(), k.clone());
                Box::pin(async move {
                    let absent = tx.get_claim(&k).await?.is_none();
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        // the key comes and goes again before we commit
                        claim(&inner, &uid("b"), &k).await.unwrap();
                        let key = k.clone();
                        let deleted: Result<(), Abort<()>> = inner
                            .run_atomic(move |tx| {
                                let key = key.clone();
                                Box::pin(async move { Ok(tx.delete_claim(&key).await?) })
                            })
                            .await;
                        deleted.unwrap();
                    }
                    if absent {
                        let claimed_at = tx.commit_timestamp();
                        tx.put_claim(
                            &k,
                            ClaimWrite {
                                owner_id: uid("c"),
                                display_name: "alice".into(),
                                claimed_at,
                            },
                        )
                        .await?;
                    }
                    Ok(())
                })
            })
            .await;

        assert!(out.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(s.claim("alice").unwrap().owner_id, uid("c"));
        assert_eq!(s.claim_count(), 1);
    }

    #[tokio::test]
    async fn deleted_claims_free_their_entries() {
        let s = store(fast_retry());
        for i in 0..100 {
            let k = key(&format!("name{i}"));
            claim(&s, &uid("a"), &k).await.unwrap();
            let deleted: Result<(), Abort<()>> = s
                .run_atomic(move |tx| {
                    let k = k.clone();
                    Box::pin(async move { Ok(tx.delete_claim(&k).await?) })
                })
                .await;
            deleted.unwrap();
        }

        assert_eq!(s.tables.lock().claims.len(), 0);
        assert!(s.claim("name99").is_none());
    }

    #[tokio::test]
    async fn persistent_conflict_exhausts_retries() {
        let s = store(fast_retry().with_max_retries(2));
        let attempts = Arc::new(AtomicUsize::new(0));
        let k = key("alice");

        let inner = s.clone();
        let counter = attempts.clone();
        let out: Result<(), Abort<()>> = s
            .run_atomic(move |tx| {
                let (inner, counter, k) = (inner.clone(), counter.clone(), k.clone());
                Box::pin(async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    let _ = tx.get_claim(&k).await?;
                    claim(&inner, &uid(&format!("other{n}")), &k).await.unwrap();
                    tx.delete_claim(&k).await?;
                    Ok(())
                })
            })
            .await;

        assert!(matches!(out, Err(Abort::Store(DbError::RetriesExhausted { attempts: 3 }))));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        // only the interfering claims landed
        assert_eq!(s.claim("alice").unwrap().owner_id, uid("other2"));
    }
}
