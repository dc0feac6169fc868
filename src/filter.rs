use std::cmp::Ordering;
use std::mem::discriminant;

use ordered_float::OrderedFloat;
use tracing::debug;

use crate::codec::Payload;
use crate::model::{FormattedRecord, Record};

pub const DEFAULT_SORT_FIELD: &str = "timestamp";

/// Which records a listing includes.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordFilter {
    All,
    /// Records whose type tag equals the given tag
    Type(String),
    /// Records written strictly after the given unix time
    After(i64),
}

impl RecordFilter {
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            RecordFilter::All => true,
            RecordFilter::Type(tag) => record.type_tag == *tag,
            RecordFilter::After(ts) => record.ts > *ts,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum SortKey {
    Int(i64),
    Float(OrderedFloat<f64>),
    Text(String),
}

fn sort_key(record: &FormattedRecord, field: &str) -> Option<SortKey> {
    match field {
        "timestamp" | "ts" => Some(SortKey::Int(record.timestamp)),
        "ref" => Some(SortKey::Text(record.reference.clone())),
        "type" => Some(SortKey::Text(record.type_tag.clone())),
        "prev" => record.prev.clone().map(SortKey::Text),
        "timestamp_iso" => Some(SortKey::Text(record.timestamp_iso.clone())),
        "data" => match &record.data {
            Payload::Text(s) | Payload::Opaque(s) => Some(SortKey::Text(s.clone())),
            Payload::Number(n) => Some(SortKey::Float(OrderedFloat(*n))),
            _ => None,
        },
        _ => None,
    }
}

/// Sort by `field`, ties broken by ref.
///
/// When the field is unknown, missing on some record, or holds values of
/// different kinds across records, the whole list is ordered by ref instead.
/// `descending` applies either way.
pub fn sort_records(records: &mut Vec<FormattedRecord>, field: &str, descending: bool) {
    let keys: Option<Vec<SortKey>> = records.iter().map(|r| sort_key(r, field)).collect();
    let keys = keys.filter(|ks| ks.windows(2).all(|w| discriminant(&w[0]) == discriminant(&w[1])));

    let Some(keys) = keys else {
        debug!(field, "sort key unusable, ordering by ref");
        records.sort_by(|a, b| directed(a.reference.cmp(&b.reference), descending));
        return;
    };

    let mut keyed: Vec<(SortKey, FormattedRecord)> = keys.into_iter().zip(records.drain(..)).collect();
    keyed.sort_by(|(ka, ra), (kb, rb)| {
        directed(ka.cmp(kb), descending).then_with(|| ra.reference.cmp(&rb.reference))
    });
    records.extend(keyed.into_iter().map(|(_, r)| r));
}

fn directed(ord: Ordering, descending: bool) -> Ordering {
    if descending {
        ord.reverse()
    } else {
        ord
    }
}
