use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use refbase::codec::Payload;
use refbase::config::{RefMode, StoreConfig};
use refbase::embed::HashEmbedder;
use refbase::filter::DEFAULT_SORT_FIELD;
use refbase::{QueryManager, RefBaseDb};

fn open(temp: &TempDir) -> QueryManager {
    let db = RefBaseDb::open(StoreConfig::new(temp.path().join("db.json")), Arc::new(HashEmbedder::default()))
        .unwrap();
    QueryManager::new(Arc::new(db))
}

#[test]
fn hinted_records_rank_by_hint() {
    let temp = TempDir::new().unwrap();
    let qm = open(&temp);
    let buddy = qm
        .add_record(json!({"name": "Buddy", "type": "dog"}).into(), Some("dog Golden Retriever"), None)
        .unwrap();
    let whiskers = qm
        .add_record(json!({"name": "Whiskers", "type": "cat"}).into(), Some("cat Siamese"), None)
        .unwrap();

    let results = qm.query_similar("dog", 0.5).unwrap();
    let pos = |r: &str| results.iter().position(|s| s.reference == r);
    let buddy_at = pos(&buddy).expect("Buddy should clear 0.5");
    if let Some(whiskers_at) = pos(&whiskers) {
        assert!(buddy_at < whiskers_at);
    }
    assert_eq!(results[buddy_at].data, Payload::from(json!({"name": "Buddy", "type": "dog"})));
}

#[test]
fn hinted_text_bucket_is_scored_by_its_text() {
    let temp = TempDir::new().unwrap();
    let qm = open(&temp);
    let r = qm.db().add_at("hello world".into(), Some("greeting"), None, 1).unwrap();

    let hits = qm.query_similar("hello world", 0.9).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].reference, r);
    assert_eq!(hits[0].similarity, 1.0);
}

#[test]
fn two_record_chain() {
    let temp = TempDir::new().unwrap();
    let qm = open(&temp);
    let r1 = qm.add_record("first".into(), None, None).unwrap();
    let r2 = qm.add_record(json!({"step": 2}).into(), None, Some(&r1)).unwrap();

    assert_eq!(
        qm.get_chain(&r2).unwrap(),
        vec![Payload::from(json!({"step": 2})), Payload::Text("first".into())]
    );
}

#[test]
fn unknown_type_is_empty() {
    let temp = TempDir::new().unwrap();
    let qm = open(&temp);
    qm.add_record("x".into(), None, None).unwrap();
    assert!(qm.get_records_by_type("nonexistent-tag", DEFAULT_SORT_FIELD, true).is_empty());
}

#[test]
fn type_partitions_cover_the_store() {
    let temp = TempDir::new().unwrap();
    let qm = open(&temp);
    let db = qm.db();
    db.add_at("alpha".into(), None, None, 1).unwrap();
    db.add_at("beta".into(), None, None, 2).unwrap();
    db.add_at(1.5.into(), None, None, 3).unwrap();
    db.add_at(vec![1.0, 2.0].into(), None, None, 4).unwrap();
    db.add_at(json!({"k": [1, 2]}).into(), None, None, 5).unwrap();
    db.add_at(json!(true).into(), None, None, 6).unwrap();

    let all: BTreeSet<String> = qm
        .get_all_records(DEFAULT_SORT_FIELD, true)
        .into_iter()
        .map(|r| r.reference)
        .collect();

    let mut seen = HashSet::new();
    for tag in qm.get_record_types().unwrap().keys() {
        for record in qm.get_records_by_type(tag, DEFAULT_SORT_FIELD, true) {
            assert_eq!(&record.type_tag, tag);
            assert!(seen.insert(record.reference), "record listed under two types");
        }
    }
    assert_eq!(seen.into_iter().collect::<BTreeSet<_>>(), all);
    assert_eq!(all.len(), 6);
}

#[test]
fn ref_depends_on_timestamp() {
    let temp = TempDir::new().unwrap();
    let qm = open(&temp);
    let db = qm.db();
    let a = db.add_at("same content".into(), None, None, 100).unwrap();
    let b = db.add_at("same content".into(), None, None, 100).unwrap();
    let c = db.add_at("same content".into(), None, None, 101).unwrap();
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(db.len(), 2);
}

#[test]
fn content_only_refs_ignore_timestamp() {
    let temp = TempDir::new().unwrap();
    let config = StoreConfig::new(temp.path().join("db.json")).with_ref_mode(RefMode::ContentOnly);
    let db = RefBaseDb::open(config, Arc::new(HashEmbedder::default())).unwrap();
    let a = db.add_at("same content".into(), None, None, 100).unwrap();
    let c = db.add_at("same content".into(), None, None, 101).unwrap();
    assert_eq!(a, c);
}

#[test]
fn threshold_edges() {
    let temp = TempDir::new().unwrap();
    let qm = open(&temp);
    let r = qm.add_record("the quick brown fox".into(), None, None).unwrap();
    qm.add_record("lazy dogs sleep".into(), None, None).unwrap();

    let exact = qm.query_similar("the quick brown fox", 1.0).unwrap();
    assert!(exact.iter().any(|s| s.reference == r));
    assert!(exact.iter().all(|s| s.similarity == 1.0));

    assert!(qm.query_similar("the quick brown fox", 1.0 + 1e-7).unwrap().is_empty());
    assert!(qm.query_similar("the quick brown fox", 1.001).unwrap().is_empty());
}

#[test]
fn empty_store_queries() {
    let temp = TempDir::new().unwrap();
    let qm = open(&temp);
    assert!(qm.query_similar("anything", 0.0).unwrap().is_empty());
    assert!(qm.get_all_records(DEFAULT_SORT_FIELD, true).is_empty());
    assert!(qm.get_record_types().unwrap().is_empty());
    assert!(qm.get_chain("sha3:0000000000000000").unwrap().is_empty());
}

#[test]
fn survives_reopen() {
    let temp = TempDir::new().unwrap();
    let payloads: Vec<Payload> = vec![
        "text payload".into(),
        42.0.into(),
        vec![0.25, -1.5].into(),
        json!({"nested": {"b": 1, "a": [1, 2]}, "café": "ü"}).into(),
    ];

    let refs: Vec<String> = {
        let qm = open(&temp);
        payloads
            .iter()
            .map(|p| qm.add_record(p.clone(), Some("hint words"), None).unwrap())
            .collect()
    };

    let qm = open(&temp);
    assert_eq!(qm.db().len(), payloads.len());
    for (reference, payload) in refs.iter().zip(&payloads) {
        let record = qm.db().get(reference).unwrap();
        assert_eq!(&record.decode(), payload);
        assert_eq!(&record.compute_ref(RefMode::Timestamped), reference);
    }
    // One bucket, scored through its first member's own text.
    assert_eq!(qm.query_similar("text payload", 0.9).unwrap().len(), payloads.len());
}

#[test]
fn loads_snapshot_written_by_earlier_deployment() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("db.json");
    std::fs::write(
        &path,
        r#"{
          "store": {
            "sha3:5acee3309584ebf6": {"data": "t:u:hello", "prev": null, "ts": 1700000000, "type": "t"}
          },
          "fingerprints": {}
        }"#,
    )
    .unwrap();
    let db = RefBaseDb::open(StoreConfig::new(&path), Arc::new(HashEmbedder::default())).unwrap();
    let record = db.get("sha3:5acee3309584ebf6").unwrap();
    assert_eq!(record.compute_ref(RefMode::Timestamped), "sha3:5acee3309584ebf6");

    // Re-adding the same content at the same second is recognised as present.
    let again = db.add_at("hello".into(), None, None, 1_700_000_000).unwrap();
    assert_eq!(again, "sha3:5acee3309584ebf6");
    assert_eq!(db.len(), 1);
}
