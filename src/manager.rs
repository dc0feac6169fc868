use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use crate::codec::Payload;
use crate::config::{EmbedderConfig, StoreConfig};
use crate::embed::Embedder;
use crate::error::Result;
use crate::filter::{RecordFilter, DEFAULT_SORT_FIELD};
use crate::model::{Chain, FormattedRecord, SimilarRecord, StoreStats, UNKNOWN_TYPE};
use crate::RefBaseDb;

pub const DEFAULT_THRESHOLD: f64 = 0.6;

/// Read-side views over a [`RefBaseDb`], plus the add path.
///
/// Holds no state of its own; every call reflects the store as it is now.
/// Cloning is cheap and clones share the store.
#[derive(Debug, Clone)]
pub struct QueryManager {
    db: Arc<RefBaseDb>,
}

impl QueryManager {
    pub fn new(db: Arc<RefBaseDb>) -> Self {
        Self { db }
    }

    /// Open the store at `store.path` with an embedder built from `embedder`.
    pub fn open(store: StoreConfig, embedder: &EmbedderConfig) -> Result<Self> {
        let embedder: Arc<dyn Embedder> = embedder.build()?;
        let db = RefBaseDb::open(store, embedder)?;
        info!(records = db.len(), buckets = db.bucket_count(), "query manager ready");
        Ok(Self::new(Arc::new(db)))
    }

    pub fn db(&self) -> &Arc<RefBaseDb> {
        &self.db
    }

    pub fn add_record(&self, payload: Payload, text_hint: Option<&str>, prev: Option<&str>) -> Result<String> {
        self.db.add(payload, text_hint, prev)
    }

    pub fn get_all_records(&self, sort_by: &str, descending: bool) -> Vec<FormattedRecord> {
        self.db.get_all(sort_by, descending)
    }

    pub fn get_records_by_type(&self, type_tag: &str, sort_by: &str, descending: bool) -> Vec<FormattedRecord> {
        self.db.get_by_type(type_tag, sort_by, descending)
    }

    /// Records written strictly after `ts`, newest first.
    pub fn get_records_after(&self, ts: i64) -> Vec<FormattedRecord> {
        self.db.select(&RecordFilter::After(ts), DEFAULT_SORT_FIELD, true)
    }

    pub fn get_record_by_ref(&self, reference: &str) -> Option<FormattedRecord> {
        self.db.get(reference).map(|record| FormattedRecord::new(reference, &record))
    }

    pub fn query_similar(&self, text: &str, threshold: f64) -> Result<Vec<SimilarRecord>> {
        self.db.query_similar(text, threshold)
    }

    pub fn query_similar_limit(&self, text: &str, threshold: f64, limit: usize) -> Result<Vec<SimilarRecord>> {
        let mut results = self.db.query_similar(text, threshold)?;
        results.truncate(limit);
        Ok(results)
    }

    pub fn get_chain(&self, start: &str) -> Result<Vec<Payload>> {
        self.db.get_chain(start)
    }

    pub fn walk_chain(&self, start: &str) -> Result<Chain> {
        self.db.walk_chain(start)
    }

    /// Record count per type tag. An empty tag counts as `unknown`.
    pub fn get_record_types(&self) -> Result<BTreeMap<String, usize>> {
        let mut counts = BTreeMap::new();
        self.db.scan(|_, record| {
            let tag = if record.type_tag.is_empty() { UNKNOWN_TYPE } else { record.type_tag.as_str() };
            *counts.entry(tag.to_string()).or_insert(0) += 1;
        })?;
        Ok(counts)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        Ok(StoreStats {
            records: self.db.len(),
            buckets: self.db.bucket_count(),
            types: self.get_record_types()?,
        })
    }
}
