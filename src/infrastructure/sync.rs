//! Batch synchronization engine
//!
//! Reconciles one unit's deduplicated batch against the backing store.
//!
//! Full replace writes the fresh batch first and deletes the unit's stale
//! rows afterwards, so the delete is the last destructive action: a crash
//! or cancellation mid-run can never leave the unit deleted-but-unwritten.
//! An empty batch performs no writes and no deletes at all.
//!
//! Incremental upsert reads the unit's cursor (max stored external id),
//! keeps only records above it and upserts those, leaving every other
//! stored row untouched.
//!
//! A failed chunk write is retried once as individual single-record writes
//! to isolate a malformed record; a record that still fails is counted as
//! skipped and the remaining chunks continue.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::error::PersistenceError;
use crate::domain::product::{ProductRecord, SyncMode, SyncOutcome, UnitKey};
use crate::infrastructure::store::ProductStore;

pub struct SyncEngine {
    store: Arc<dyn ProductStore>,
    chunk_size: usize,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn ProductStore>, chunk_size: usize) -> Self {
        Self {
            store,
            chunk_size: chunk_size.max(1),
        }
    }

    pub async fn sync(
        &self,
        unit: &UnitKey,
        records: &[ProductRecord],
        mode: SyncMode,
    ) -> Result<SyncOutcome, PersistenceError> {
        match mode {
            SyncMode::FullReplace => self.full_replace(unit, records).await,
            SyncMode::Incremental => self.incremental(unit, records).await,
        }
    }

    async fn full_replace(
        &self,
        unit: &UnitKey,
        records: &[ProductRecord],
    ) -> Result<SyncOutcome, PersistenceError> {
        // Data-loss guard: an empty or failed fetch must never trigger
        // deletion of existing rows.
        if records.is_empty() {
            warn!(unit = %unit, "empty batch, keeping stored rows untouched");
            return Ok(SyncOutcome::default());
        }

        let existing = self.store.stored_ids(unit).await?;
        let (written, skipped) = self.write_chunks(unit, records).await;

        let mut outcome = SyncOutcome {
            inserted: written.iter().filter(|id| !existing.contains(id)).count() as u64,
            updated: written.iter().filter(|id| existing.contains(id)).count() as u64,
            skipped,
            deleted: 0,
        };

        // Stale rows are those the fresh batch no longer names. Records
        // whose individual write failed stay in the keep set so their old
        // rows survive.
        let keep: HashSet<i64> = records.iter().map(|r| r.external_id).collect();
        let stale: Vec<i64> = existing
            .iter()
            .copied()
            .filter(|id| !keep.contains(id))
            .collect();
        if !stale.is_empty() {
            outcome.deleted = self.store.delete_ids(unit, &stale).await?;
        }

        debug!(unit = %unit, ?outcome, "full replace finished");
        Ok(outcome)
    }

    async fn incremental(
        &self,
        unit: &UnitKey,
        records: &[ProductRecord],
    ) -> Result<SyncOutcome, PersistenceError> {
        let cursor = self.store.max_external_id(unit).await?;
        let fresh: Vec<ProductRecord> = match cursor {
            Some(cursor) => records
                .iter()
                .filter(|r| r.external_id > cursor)
                .cloned()
                .collect(),
            None => records.to_vec(),
        };

        if fresh.is_empty() {
            debug!(unit = %unit, ?cursor, "nothing above cursor");
            return Ok(SyncOutcome::default());
        }

        let (written, skipped) = self.write_chunks(unit, &fresh).await;
        let outcome = SyncOutcome {
            inserted: written.len() as u64,
            updated: 0,
            skipped,
            deleted: 0,
        };
        debug!(unit = %unit, ?cursor, ?outcome, "incremental upsert finished");
        Ok(outcome)
    }

    /// Chunked writes with one per-record retry pass per failed chunk.
    async fn write_chunks(
        &self,
        unit: &UnitKey,
        records: &[ProductRecord],
    ) -> (Vec<i64>, u64) {
        let mut written = Vec::with_capacity(records.len());
        let mut skipped = 0u64;

        for chunk in records.chunks(self.chunk_size) {
            match self.store.upsert_chunk(unit, chunk).await {
                Ok(()) => written.extend(chunk.iter().map(|r| r.external_id)),
                Err(e) => {
                    warn!(unit = %unit, error = %e, "chunk write failed, retrying per record");
                    for record in chunk {
                        match self.store.upsert_one(unit, record).await {
                            Ok(()) => written.push(record.external_id),
                            Err(e) => {
                                skipped += 1;
                                warn!(unit = %unit, external_id = record.external_id,
                                    error = %e, "record skipped");
                            }
                        }
                    }
                }
            }
        }

        (written, skipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::product::CanonicalCategory;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    /// In-memory store. Records whose external id is in `poisoned` fail
    /// every write they participate in.
    #[derive(Default)]
    struct MemoryStore {
        rows: Mutex<HashMap<i64, ProductRecord>>,
        poisoned: HashSet<i64>,
        delete_calls: AtomicU64,
    }

    impl MemoryStore {
        fn with_rows(ids: &[i64]) -> Self {
            let store = Self::default();
            {
                let mut rows = store.rows.lock().unwrap();
                for id in ids {
                    rows.insert(*id, record(*id, "seed"));
                }
            }
            store
        }
    }

    #[async_trait]
    impl ProductStore for MemoryStore {
        async fn ping(&self) -> Result<(), PersistenceError> {
            Ok(())
        }

        async fn upsert_chunk(
            &self,
            unit: &UnitKey,
            records: &[ProductRecord],
        ) -> Result<(), PersistenceError> {
            if records.iter().any(|r| self.poisoned.contains(&r.external_id)) {
                return Err(PersistenceError::BadPath {
                    path: unit.to_string(),
                    reason: "poisoned chunk".to_string(),
                });
            }
            let mut rows = self.rows.lock().unwrap();
            for r in records {
                rows.insert(r.external_id, r.clone());
            }
            Ok(())
        }

        async fn upsert_one(
            &self,
            unit: &UnitKey,
            record: &ProductRecord,
        ) -> Result<(), PersistenceError> {
            if self.poisoned.contains(&record.external_id) {
                return Err(PersistenceError::BadPath {
                    path: unit.to_string(),
                    reason: "poisoned record".to_string(),
                });
            }
            self.rows
                .lock()
                .unwrap()
                .insert(record.external_id, record.clone());
            Ok(())
        }

        async fn stored_ids(&self, _unit: &UnitKey) -> Result<HashSet<i64>, PersistenceError> {
            Ok(self.rows.lock().unwrap().keys().copied().collect())
        }

        async fn max_external_id(
            &self,
            _unit: &UnitKey,
        ) -> Result<Option<i64>, PersistenceError> {
            Ok(self.rows.lock().unwrap().keys().max().copied())
        }

        async fn delete_ids(
            &self,
            _unit: &UnitKey,
            ids: &[i64],
        ) -> Result<u64, PersistenceError> {
            self.delete_calls.fetch_add(1, Ordering::SeqCst);
            let mut rows = self.rows.lock().unwrap();
            let before = rows.len();
            for id in ids {
                rows.remove(id);
            }
            Ok((before - rows.len()) as u64)
        }
    }

    fn record(id: i64, title: &str) -> ProductRecord {
        let now = Utc::now();
        ProductRecord {
            source_id: "gs25".to_string(),
            external_id: id,
            title: title.to_string(),
            normalized_title: title.to_uppercase(),
            price: 1000,
            image_url: None,
            category: CanonicalCategory::Other,
            native_category: None,
            promotion_tag: None,
            source_url: "https://example.test".to_string(),
            is_active: true,
            collected_at: now,
            updated_at: now,
        }
    }

    fn unit() -> UnitKey {
        UnitKey::new("gs25", "one-plus-one")
    }

    #[tokio::test]
    async fn incremental_upserts_only_ids_above_cursor() {
        let store = Arc::new(MemoryStore::with_rows(&[100]));
        let engine = SyncEngine::new(store.clone(), 100);

        let batch = vec![record(50, "stale"), record(101, "new"), record(205, "new")];
        let outcome = engine
            .sync(&unit(), &batch, SyncMode::Incremental)
            .await
            .unwrap();

        assert_eq!(outcome.inserted, 2);
        assert_eq!(outcome.updated, 0);
        let rows = store.rows.lock().unwrap();
        assert!(rows.contains_key(&101) && rows.contains_key(&205));
        // 50 was below the cursor and never written; the seed row at 100
        // was left untouched.
        assert_eq!(rows.get(&100).unwrap().title, "seed");
        assert!(!rows.contains_key(&50));
    }

    #[tokio::test]
    async fn incremental_with_no_stored_rows_takes_everything() {
        let store = Arc::new(MemoryStore::default());
        let engine = SyncEngine::new(store.clone(), 100);
        let outcome = engine
            .sync(&unit(), &[record(1, "a"), record(2, "b")], SyncMode::Incremental)
            .await
            .unwrap();
        assert_eq!(outcome.inserted, 2);
    }

    #[tokio::test]
    async fn full_replace_counts_and_deletes_stale_rows() {
        let store = Arc::new(MemoryStore::with_rows(&[1, 2, 3]));
        let engine = SyncEngine::new(store.clone(), 100);

        let batch = vec![record(2, "kept"), record(3, "kept"), record(4, "added")];
        let outcome = engine
            .sync(&unit(), &batch, SyncMode::FullReplace)
            .await
            .unwrap();

        assert_eq!(outcome.inserted, 1);
        assert_eq!(outcome.updated, 2);
        assert_eq!(outcome.deleted, 1);
        let rows = store.rows.lock().unwrap();
        assert!(!rows.contains_key(&1));
        assert_eq!(rows.len(), 3);
    }

    #[tokio::test]
    async fn empty_batch_never_deletes() {
        let store = Arc::new(MemoryStore::with_rows(&[1, 2]));
        let engine = SyncEngine::new(store.clone(), 100);

        let outcome = engine.sync(&unit(), &[], SyncMode::FullReplace).await.unwrap();

        assert_eq!(outcome, SyncOutcome::default());
        assert_eq!(store.delete_calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.rows.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn poisoned_record_is_isolated_and_skipped() {
        let mut store = MemoryStore::with_rows(&[7]);
        store.poisoned = HashSet::from([2]);
        let store = Arc::new(store);
        let engine = SyncEngine::new(store.clone(), 100);

        let batch = vec![record(1, "good"), record(2, "bad"), record(3, "good")];
        let outcome = engine
            .sync(&unit(), &batch, SyncMode::FullReplace)
            .await
            .unwrap();

        assert_eq!(outcome.inserted, 2);
        assert_eq!(outcome.skipped, 1);
        // The chunk degraded to per-record writes; the good records landed.
        let rows = store.rows.lock().unwrap();
        assert!(rows.contains_key(&1) && rows.contains_key(&3));
        assert!(!rows.contains_key(&2));
        // Stale row 7 is still deleted.
        assert!(!rows.contains_key(&7));
    }

    #[tokio::test]
    async fn failed_record_keeps_its_stored_row_alive() {
        // Id 5 exists in the store, reappears in the batch, but its write
        // fails. Full replace must not delete the old row.
        let mut store = MemoryStore::with_rows(&[5]);
        store.poisoned = HashSet::from([5]);
        let store = Arc::new(store);
        let engine = SyncEngine::new(store.clone(), 100);

        let batch = vec![record(5, "update fails"), record(6, "ok")];
        let outcome = engine
            .sync(&unit(), &batch, SyncMode::FullReplace)
            .await
            .unwrap();

        assert_eq!(outcome.skipped, 1);
        assert_eq!(outcome.deleted, 0);
        let rows = store.rows.lock().unwrap();
        assert_eq!(rows.get(&5).unwrap().title, "seed");
        assert!(rows.contains_key(&6));
    }

    #[tokio::test]
    async fn chunking_splits_large_batches() {
        let store = Arc::new(MemoryStore::default());
        let engine = SyncEngine::new(store.clone(), 2);
        let batch: Vec<ProductRecord> = (1..=5).map(|id| record(id, "x")).collect();
        let outcome = engine
            .sync(&unit(), &batch, SyncMode::FullReplace)
            .await
            .unwrap();
        assert_eq!(outcome.inserted, 5);
        assert_eq!(store.rows.lock().unwrap().len(), 5);
    }
}
