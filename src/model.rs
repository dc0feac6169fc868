use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::codec::{self, Payload};
use crate::config::RefMode;
use crate::hasher;
use crate::index::FingerprintIndex;

pub const UNKNOWN_TYPE: &str = "unknown";

fn unknown_type() -> String {
    UNKNOWN_TYPE.to_string()
}

/// The atomic unit of the store. Immutable once written.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Record {
    /// Tagged payload, see [`crate::codec`]
    pub data: String,

    /// Ref of the record this one follows, if any
    #[serde(default)]
    pub prev: Option<String>,

    /// Write time, unix seconds
    #[serde(default)]
    pub ts: i64,

    #[serde(rename = "type", default = "unknown_type")]
    pub type_tag: String,

    /// Text the record was fingerprinted under when it was not text itself.
    /// Not part of the ref.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl Record {
    pub fn new(payload: &Payload, prev: Option<&str>, ts: i64, hint: Option<&str>) -> Self {
        let data = codec::encode(payload);
        let type_tag = codec::type_tag(&data).to_string();
        Self {
            data,
            prev: prev.map(str::to_string),
            ts,
            type_tag,
            hint: hint.map(str::to_string),
        }
    }

    pub fn compute_ref(&self, mode: RefMode) -> String {
        hasher::record_ref(&self.data, self.prev.as_deref(), self.ts, &self.type_tag, mode)
    }

    pub fn decode(&self) -> Payload {
        codec::decode(&self.data)
    }

    /// `prev`, treating an empty string as no link.
    pub fn prev_ref(&self) -> Option<&str> {
        self.prev.as_deref().filter(|p| !p.is_empty())
    }
}

/// The persisted unit: every record plus the fingerprint buckets.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    #[serde(default)]
    pub store: BTreeMap<String, Record>,
    #[serde(default)]
    pub fingerprints: FingerprintIndex,
}

/// A record as handed to readers: payload decoded, timestamp rendered.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct FormattedRecord {
    #[serde(rename = "ref")]
    pub reference: String,
    pub data: Payload,
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub type_tag: String,
    pub prev: Option<String>,
    pub timestamp_iso: String,
}

impl FormattedRecord {
    pub fn new(reference: &str, record: &Record) -> Self {
        Self {
            reference: reference.to_string(),
            data: record.decode(),
            timestamp: record.ts,
            type_tag: record.type_tag.clone(),
            prev: record.prev.clone(),
            timestamp_iso: iso_timestamp(record.ts),
        }
    }
}

/// UTC `YYYY-MM-DDTHH:MM:SS`.
pub fn iso_timestamp(ts: i64) -> String {
    if ts <= 0 {
        return "Unknown".to_string();
    }
    match DateTime::<Utc>::from_timestamp(ts, 0) {
        Some(dt) => dt.format("%Y-%m-%dT%H:%M:%S").to_string(),
        None => "Invalid timestamp".to_string(),
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SimilarRecord {
    #[serde(rename = "ref")]
    pub reference: String,
    pub similarity: f64,
    pub data: Payload,
}

/// Result of following `prev` links from a starting ref.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct Chain {
    /// Refs visited, newest first
    pub refs: Vec<String>,
    /// Decoded payloads, aligned with `refs`
    pub payloads: Vec<Payload>,
    /// First ref that was reached a second time, if the links loop
    pub cycle: Option<String>,
}

impl Chain {
    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct StoreStats {
    pub records: usize,
    pub buckets: usize,
    pub types: BTreeMap<String, usize>,
}
