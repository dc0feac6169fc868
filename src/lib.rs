pub mod codec;
pub mod config;
pub mod embed;
pub mod error;
pub mod filter;
pub mod hasher;
pub mod index;
pub mod manager;
pub mod model;
pub mod parser;
pub mod storage;
pub mod vector;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::codec::Payload;
use crate::config::StoreConfig;
use crate::embed::Embedder;
use crate::error::{Result, StoreError};
use crate::filter::{sort_records, RecordFilter};
use crate::index::{rank_buckets, BucketSample, FingerprintIndex};
use crate::model::{Chain, FormattedRecord, Record, SimilarRecord, Snapshot};
use crate::storage::SnapshotFile;

pub use crate::manager::QueryManager;

/// Content-addressed record store with a fingerprint index over embeddings.
///
/// Both maps live behind one store-wide lock. An `add` holds the write lock for
/// the whole insert-and-rewrite, so writers inside one process serialize. Two
/// processes writing the same snapshot file are not supported.
pub struct RefBaseDb {
    state: RwLock<Snapshot>,
    file: SnapshotFile,
    config: StoreConfig,
    embedder: Arc<dyn Embedder>,
    bucket_vectors: Mutex<HashMap<String, Vec<f32>>>,
}

impl fmt::Debug for RefBaseDb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefBaseDb")
            .field("path", &self.file.file_path)
            .field("record_count", &self.len())
            .finish()
    }
}

impl RefBaseDb {
    pub fn open(config: StoreConfig, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let file = SnapshotFile::new(&config.path);
        let snapshot = file.load()?;
        info!(
            path = %config.path.display(),
            records = snapshot.store.len(),
            ref_mode = ?config.ref_mode,
            "store opened"
        );
        Ok(Self {
            state: RwLock::new(snapshot),
            file,
            config,
            embedder,
            bucket_vectors: Mutex::new(HashMap::new()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.file.file_path
    }

    /// Insert a record stamped with the current time and return its ref.
    pub fn add(&self, payload: Payload, text_hint: Option<&str>, prev: Option<&str>) -> Result<String> {
        self.add_at(payload, text_hint, prev, Utc::now().timestamp())
    }

    /// Insert a record with an explicit timestamp.
    ///
    /// Text payloads, and any payload given a non-empty hint, are embedded and
    /// bucketed. The embedding happens before the store is touched, so an
    /// embedder failure leaves no trace. A snapshot write failure rolls the
    /// in-memory insert back. Adding a record whose ref already exists changes
    /// nothing and returns that ref.
    pub fn add_at(
        &self,
        payload: Payload,
        text_hint: Option<&str>,
        prev: Option<&str>,
        ts: i64,
    ) -> Result<String> {
        let hint = text_hint.filter(|h| !h.is_empty());
        let record = Record::new(&payload, prev, ts, hint);
        let reference = record.compute_ref(self.config.ref_mode);

        let fingerprint = match hint.or_else(|| payload.as_text()) {
            Some(text) => Some(FingerprintIndex::key_for(&self.embedder.embed(text)?)),
            None => None,
        };

        let mut state = self.state.write().map_err(|_| StoreError::Poisoned)?;
        if state.store.contains_key(&reference) {
            debug!(reference = %reference, "record already present");
            return Ok(reference);
        }

        state.store.insert(reference.clone(), record);
        if let Some(key) = &fingerprint {
            state.fingerprints.insert(key, &reference);
        }

        if let Err(e) = self.file.save(&state) {
            warn!(reference = %reference, error = %e, "snapshot write failed, rolling back insert");
            state.store.remove(&reference);
            if let Some(key) = &fingerprint {
                state.fingerprints.retract(key, &reference);
            }
            return Err(e);
        }

        debug!(reference = %reference, bucket = ?fingerprint, "record added");
        Ok(reference)
    }

    /// Exact lookup.
    pub fn get(&self, reference: &str) -> Option<Record> {
        let state = self.state.read().ok()?;
        state.store.get(reference).cloned()
    }

    /// Follow `prev` links from `start`, stopping at a missing link, a dangling
    /// ref, or the first ref seen twice. A revisit is reported in `cycle`.
    pub fn walk_chain(&self, start: &str) -> Result<Chain> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        let mut chain = Chain::default();
        let mut visited = HashSet::new();
        let mut current = Some(start).filter(|r| !r.is_empty());

        while let Some(reference) = current {
            let Some(record) = state.store.get(reference) else { break };
            if !visited.insert(reference) {
                warn!(reference, start, "cycle in prev links");
                chain.cycle = Some(reference.to_string());
                break;
            }
            chain.refs.push(reference.to_string());
            chain.payloads.push(record.decode());
            current = record.prev_ref();
        }
        Ok(chain)
    }

    /// Decoded payloads from `start` back to the root of its chain.
    /// A looping chain is an error rather than an endless walk.
    pub fn get_chain(&self, start: &str) -> Result<Vec<Payload>> {
        let chain = self.walk_chain(start)?;
        match chain.cycle {
            Some(at) => Err(StoreError::ChainCycle { at }),
            None => Ok(chain.payloads),
        }
    }

    pub fn get_all(&self, sort_by: &str, descending: bool) -> Vec<FormattedRecord> {
        self.select(&RecordFilter::All, sort_by, descending)
    }

    pub fn get_by_type(&self, type_tag: &str, sort_by: &str, descending: bool) -> Vec<FormattedRecord> {
        self.select(&RecordFilter::Type(type_tag.to_string()), sort_by, descending)
    }

    pub fn select(&self, filter: &RecordFilter, sort_by: &str, descending: bool) -> Vec<FormattedRecord> {
        let mut records: Vec<FormattedRecord> = match self.state.read() {
            Ok(state) => state
                .store
                .iter()
                .filter(|(_, record)| filter.matches(record))
                .map(|(reference, record)| FormattedRecord::new(reference, record))
                .collect(),
            Err(_) => return vec![],
        };
        sort_records(&mut records, sort_by, descending);
        records
    }

    /// Records whose bucket scores at least `threshold` against `text`.
    ///
    /// Cost: one embedding for the query plus one per scoreable bucket, unless
    /// bucket vectors are cached. Every member of a bucket gets the bucket's score.
    pub fn query_similar(&self, text: &str, threshold: f64) -> Result<Vec<SimilarRecord>> {
        let query = self.embedder.embed(text)?;
        let samples = {
            let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
            state.fingerprints.samples(&state.store)
        };
        let buckets = samples.len();
        let results = rank_buckets(&query, samples, threshold, |sample| self.sample_vector(sample))?;
        debug!(buckets, hits = results.len(), threshold, "similarity query");
        Ok(results)
    }

    fn sample_vector(&self, sample: &BucketSample) -> Result<Vec<f32>> {
        if !self.config.cache_bucket_vectors {
            return self.embedder.embed(&sample.text);
        }
        if let Some(v) = self.bucket_vectors.lock().map_err(|_| StoreError::Poisoned)?.get(&sample.key) {
            return Ok(v.clone());
        }
        let v = self.embedder.embed(&sample.text)?;
        self.bucket_vectors
            .lock()
            .map_err(|_| StoreError::Poisoned)?
            .insert(sample.key.clone(), v.clone());
        Ok(v)
    }

    /// Visit every record under the read lock.
    pub fn scan<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&str, &Record),
    {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        for (reference, record) in &state.store {
            f(reference, record);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.store.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bucket_count(&self) -> usize {
        self.state.read().map(|s| s.fingerprints.len()).unwrap_or(0)
    }

    /// Replace in-memory state with what is on disk.
    pub fn reload(&self) -> Result<()> {
        let snapshot = self.file.load()?;
        *self.state.write().map_err(|_| StoreError::Poisoned)? = snapshot;
        self.bucket_vectors.lock().map_err(|_| StoreError::Poisoned)?.clear();
        info!(path = %self.file.file_path.display(), "store reloaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RefMode;
    use crate::embed::HashEmbedder;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn open(temp: &TempDir) -> RefBaseDb {
        let config = StoreConfig::new(temp.path().join("db.json"));
        RefBaseDb::open(config, Arc::new(HashEmbedder::default())).unwrap()
    }

    struct CountingEmbedder {
        calls: AtomicUsize,
        inner: HashEmbedder,
    }

    impl Embedder for CountingEmbedder {
        fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.embed(text)
        }
    }

    #[test]
    fn add_and_get() {
        let temp = TempDir::new().unwrap();
        let db = open(&temp);
        let r = db.add("hello".into(), None, None).unwrap();
        let record = db.get(&r).unwrap();
        assert_eq!(record.data, "t:u:hello");
        assert_eq!(record.type_tag, "t");
        assert_eq!(record.compute_ref(RefMode::Timestamped), r);
        assert!(db.get("sha3:0000000000000000").is_none());
    }

    #[test]
    fn only_text_or_hinted_records_are_bucketed() {
        let temp = TempDir::new().unwrap();
        let db = open(&temp);
        db.add_at(4.0.into(), None, None, 1).unwrap();
        assert_eq!(db.bucket_count(), 0);
        db.add_at("some words".into(), None, None, 1).unwrap();
        assert_eq!(db.bucket_count(), 1);
        db.add_at(json!({"a": 1}).into(), Some("other words"), None, 1).unwrap();
        assert_eq!(db.bucket_count(), 2);
        db.add_at(json!({"a": 2}).into(), Some(""), None, 1).unwrap();
        assert_eq!(db.bucket_count(), 2);
    }

    #[test]
    fn duplicate_ref_is_not_reinserted() {
        let temp = TempDir::new().unwrap();
        let db = open(&temp);
        let a = db.add_at("same".into(), None, None, 7).unwrap();
        let b = db.add_at("same".into(), None, None, 7).unwrap();
        assert_eq!(a, b);
        assert_eq!(db.len(), 1);
        let state = db.state.read().unwrap();
        let (_, refs) = state.fingerprints.iter().next().unwrap();
        assert_eq!(refs.len(), 1);
    }

    #[test]
    fn content_only_mode_dedups_across_time() {
        let temp = TempDir::new().unwrap();
        let config = StoreConfig::new(temp.path().join("db.json")).with_ref_mode(RefMode::ContentOnly);
        let db = RefBaseDb::open(config, Arc::new(HashEmbedder::default())).unwrap();
        let a = db.add_at("same".into(), None, None, 1).unwrap();
        let b = db.add_at("same".into(), None, None, 2).unwrap();
        assert_eq!(a, b);
        assert_eq!(db.get(&a).unwrap().ts, 1);
    }

    #[test]
    fn embedder_failure_leaves_store_untouched() {
        let temp = TempDir::new().unwrap();
        let failing = |_: &str| -> Result<Vec<f32>> { Err(StoreError::Embedding("model offline".into())) };
        let db = RefBaseDb::open(StoreConfig::new(temp.path().join("db.json")), Arc::new(failing)).unwrap();

        let err = db.add("hello".into(), None, None).unwrap_err();
        assert!(matches!(err, StoreError::Embedding(_)));
        assert!(db.is_empty());
        assert!(!temp.path().join("db.json").exists());

        // Non-text payloads without a hint never reach the embedder.
        db.add(1.0.into(), None, None).unwrap();
        assert_eq!(db.len(), 1);
    }

    #[test]
    fn failed_write_rolls_back() {
        let temp = TempDir::new().unwrap();
        // A directory where the snapshot file should be makes the rename fail.
        let path = temp.path().join("db.json");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("occupied"), "x").unwrap();
        let db = RefBaseDb::open(StoreConfig::new(&path), Arc::new(HashEmbedder::default()));
        // Opening reads a directory, which is an IO error.
        assert!(db.is_err());

        let path = temp.path().join("ok.json");
        let db = RefBaseDb::open(StoreConfig::new(&path), Arc::new(HashEmbedder::default())).unwrap();
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("occupied"), "x").unwrap();
        assert!(db.add("hello".into(), None, None).is_err());
        assert!(db.is_empty());
        assert_eq!(db.bucket_count(), 0);
    }

    #[test]
    fn snapshot_rewritten_on_every_add() {
        let temp = TempDir::new().unwrap();
        let db = open(&temp);
        let a = db.add_at("one".into(), None, None, 1).unwrap();
        let b = db.add_at(2.0.into(), None, Some(&a), 2).unwrap();

        let reopened = open(&temp);
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.get(&b).unwrap().prev.as_deref(), Some(a.as_str()));
        assert_eq!(reopened.bucket_count(), 1);
    }

    #[test]
    fn chain_walks_back_to_root() {
        let temp = TempDir::new().unwrap();
        let db = open(&temp);
        let r1 = db.add_at("first".into(), None, None, 1).unwrap();
        let r2 = db.add_at("second".into(), None, Some(&r1), 2).unwrap();
        let r3 = db.add_at(3.0.into(), None, Some(&r2), 3).unwrap();

        let chain = db.walk_chain(&r3).unwrap();
        assert_eq!(chain.refs, vec![r3.clone(), r2, r1]);
        assert!(chain.cycle.is_none());
        assert_eq!(
            db.get_chain(&r3).unwrap(),
            vec![Payload::Number(3.0), "second".into(), "first".into()]
        );
    }

    #[test]
    fn chain_stops_at_dangling_prev() {
        let temp = TempDir::new().unwrap();
        let db = open(&temp);
        let r = db.add_at("orphan".into(), None, Some("sha3:doesnotexist00"), 1).unwrap();
        assert_eq!(db.get_chain(&r).unwrap(), vec![Payload::Text("orphan".into())]);
        assert!(db.get_chain("sha3:doesnotexist00").unwrap().is_empty());
        assert!(db.get_chain("").unwrap().is_empty());
    }

    #[test]
    fn cycle_is_detected_not_looped() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("db.json");
        std::fs::write(
            &path,
            r#"{
              "store": {
                "sha3:a": {"data": "t:u:a", "prev": "sha3:b", "ts": 1, "type": "t"},
                "sha3:b": {"data": "t:u:b", "prev": "sha3:c", "ts": 2, "type": "t"},
                "sha3:c": {"data": "t:u:c", "prev": "sha3:a", "ts": 3, "type": "t"}
              },
              "fingerprints": {}
            }"#,
        )
        .unwrap();
        let db = RefBaseDb::open(StoreConfig::new(&path), Arc::new(HashEmbedder::default())).unwrap();

        let chain = db.walk_chain("sha3:a").unwrap();
        assert_eq!(chain.len(), 3);
        assert_eq!(chain.cycle.as_deref(), Some("sha3:a"));
        assert!(matches!(db.get_chain("sha3:b"), Err(StoreError::ChainCycle { at }) if at == "sha3:b"));
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("db.json");
        std::fs::write(
            &path,
            r#"{"store": {"sha3:s": {"data": "n:f:1", "prev": "sha3:s", "ts": 1, "type": "n"}}, "fingerprints": {}}"#,
        )
        .unwrap();
        let db = RefBaseDb::open(StoreConfig::new(&path), Arc::new(HashEmbedder::default())).unwrap();
        let chain = db.walk_chain("sha3:s").unwrap();
        assert_eq!(chain.payloads, vec![Payload::Number(1.0)]);
        assert_eq!(chain.cycle.as_deref(), Some("sha3:s"));
    }

    #[test]
    fn query_reembeds_one_sample_per_bucket() {
        let temp = TempDir::new().unwrap();
        let embedder = Arc::new(CountingEmbedder { calls: AtomicUsize::new(0), inner: HashEmbedder::default() });
        let db = RefBaseDb::open(StoreConfig::new(temp.path().join("db.json")), embedder.clone()).unwrap();
        db.add_at("alpha beta".into(), None, None, 1).unwrap();
        db.add_at("alpha beta".into(), None, None, 2).unwrap();
        db.add_at("gamma".into(), None, None, 3).unwrap();
        assert_eq!(db.bucket_count(), 2);

        embedder.calls.store(0, Ordering::SeqCst);
        let hits = db.query_similar("alpha beta", 0.9).unwrap();
        // query + one per bucket
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].similarity, hits[1].similarity);

        db.query_similar("alpha beta", 0.9).unwrap();
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn bucket_cache_skips_reembedding() {
        let temp = TempDir::new().unwrap();
        let embedder = Arc::new(CountingEmbedder { calls: AtomicUsize::new(0), inner: HashEmbedder::default() });
        let config = StoreConfig::new(temp.path().join("db.json")).with_bucket_cache(true);
        let db = RefBaseDb::open(config, embedder.clone()).unwrap();
        db.add_at("alpha".into(), None, None, 1).unwrap();
        db.add_at("gamma".into(), None, None, 2).unwrap();

        embedder.calls.store(0, Ordering::SeqCst);
        db.query_similar("alpha", 0.5).unwrap();
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
        db.query_similar("alpha", 0.5).unwrap();
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn concurrent_adds_all_reach_disk() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 10;

        let temp = TempDir::new().unwrap();
        let db = Arc::new(open(&temp));
        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let db = Arc::clone(&db);
                std::thread::spawn(move || {
                    for i in 0..PER_THREAD {
                        let text = format!("thread {t} item {i}");
                        db.add_at(text.as_str().into(), None, None, (t * PER_THREAD + i) as i64 + 1).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(db.len(), THREADS * PER_THREAD);
        let reopened = open(&temp);
        assert_eq!(reopened.len(), THREADS * PER_THREAD);
        assert_eq!(reopened.bucket_count(), db.bucket_count());
    }

    #[test]
    fn reload_picks_up_external_edits() {
        let temp = TempDir::new().unwrap();
        let db = open(&temp);
        db.add_at("one".into(), None, None, 1).unwrap();

        let other = open(&temp);
        other.add_at("two".into(), None, None, 2).unwrap();

        assert_eq!(db.len(), 1);
        db.reload().unwrap();
        assert_eq!(db.len(), 2);
    }
}
