use std::collections::BTreeMap;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::codec::Payload;
use crate::error::Result;
use crate::hasher::fingerprint_key;
use crate::model::{Record, SimilarRecord};
use crate::vector::{cosine_similarity, rounded_rendering};

/// Fingerprint key -> refs whose associated text embedded to that key.
///
/// Buckets only grow. Order inside a bucket is insertion order, and the first
/// member is the one scored on behalf of the whole bucket.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(transparent)]
pub struct FingerprintIndex {
    buckets: BTreeMap<String, Vec<String>>,
}

/// One bucket, resolved against the record map and ready to be scored.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketSample {
    pub key: String,
    /// Text re-embedded to score the bucket
    pub text: String,
    /// Every member still present in the store, with its decoded payload
    pub members: Vec<(String, Payload)>,
}

impl FingerprintIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Key of the bucket a vector falls into.
    pub fn key_for(vector: &[f32]) -> String {
        fingerprint_key(&rounded_rendering(vector))
    }

    pub fn insert(&mut self, key: &str, reference: &str) {
        self.buckets
            .entry(key.to_string())
            .or_insert_with(Vec::new)
            .push(reference.to_string());
    }

    /// Undo the most recent `insert` of `reference` into `key`. Only used to
    /// roll back an add whose snapshot write failed.
    pub(crate) fn retract(&mut self, key: &str, reference: &str) {
        if let Some(refs) = self.buckets.get_mut(key) {
            if refs.last().map(String::as_str) == Some(reference) {
                refs.pop();
            }
            if refs.is_empty() {
                self.buckets.remove(key);
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.buckets.get(key).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.buckets.iter()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Resolve every scoreable bucket.
    ///
    /// A bucket is scored through its first member: that record's text payload,
    /// or, for non-text payloads, the hint it was added with. Buckets whose
    /// first member has neither, or is missing from the store, are skipped.
    pub fn samples(&self, records: &BTreeMap<String, Record>) -> Vec<BucketSample> {
        let mut samples = Vec::with_capacity(self.buckets.len());
        for (key, refs) in &self.buckets {
            let Some(first) = refs.first() else { continue };
            let Some(record) = records.get(first) else {
                warn!(bucket = %key, reference = %first, "fingerprint points at a missing record");
                continue;
            };

            let text = match record.decode() {
                Payload::Text(t) => Some(t),
                _ => record.hint.clone(),
            };
            let Some(text) = text else { continue };

            let members = refs
                .iter()
                .filter_map(|r| records.get(r).map(|rec| (r.clone(), rec.decode())))
                .collect();
            samples.push(BucketSample { key: key.clone(), text, members });
        }
        samples
    }
}

/// Score each bucket once and expand passing buckets into one result per member.
///
/// `sample_vector` supplies the embedding of a bucket's sample text. Every
/// member of a bucket shares the bucket's score. Results come back ordered by
/// similarity, highest first.
pub fn rank_buckets<F>(
    query: &[f32],
    samples: Vec<BucketSample>,
    threshold: f64,
    mut sample_vector: F,
) -> Result<Vec<SimilarRecord>>
where
    F: FnMut(&BucketSample) -> Result<Vec<f32>>,
{
    let mut results = Vec::new();
    for sample in samples {
        let vector = sample_vector(&sample)?;
        let similarity = cosine_similarity(query, &vector);
        if similarity < threshold {
            continue;
        }
        for (reference, data) in sample.members {
            results.push(SimilarRecord { reference, similarity, data });
        }
    }
    results.sort_by(|a, b| OrderedFloat(b.similarity).cmp(&OrderedFloat(a.similarity)));
    Ok(results)
}
