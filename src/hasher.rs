//! Deterministic content identifiers.
//!
//! Refs and fingerprint keys are `sha3:` followed by the first 16 hex digits of
//! a SHA3-256 digest. The record material is rendered as canonical JSON: keys
//! sorted at every depth, `", "` and `": "` separators, non-ASCII escaped as
//! `\uXXXX`. That rendering is stable byte-for-byte, which is what makes a ref
//! reproducible from a stored record.

use std::io::{self, Write};

use serde::Serialize;
use serde_json::ser::{Formatter, Serializer};
use serde_json::{Map, Value};
use sha3::{Digest, Sha3_256};

use crate::config::RefMode;

pub const HASH_PREFIX: &str = "sha3:";
pub const DIGEST_HEX_LEN: usize = 16;

/// Prefix mixed into fingerprint material so it never collides with record material.
const FINGERPRINT_PREFIX: &str = "vf:";

pub fn content_hash(content: &str) -> String {
    let digest = hex::encode(Sha3_256::digest(content.as_bytes()));
    format!("{HASH_PREFIX}{}", &digest[..DIGEST_HEX_LEN])
}

/// Reference of a record assembled from its stored fields.
pub fn record_ref(data: &str, prev: Option<&str>, ts: i64, type_tag: &str, mode: RefMode) -> String {
    let mut material = Map::new();
    material.insert("data".into(), Value::String(data.to_string()));
    material.insert(
        "prev".into(),
        prev.map_or(Value::Null, |p| Value::String(p.to_string())),
    );
    if mode == RefMode::Timestamped {
        material.insert("ts".into(), Value::from(ts));
    }
    material.insert("type".into(), Value::String(type_tag.to_string()));
    content_hash(&canonical_json(&Value::Object(material)))
}

/// Fingerprint key of an already-rounded vector rendering.
pub fn fingerprint_key(rounded: &str) -> String {
    content_hash(&format!("{FINGERPRINT_PREFIX}{rounded}"))
}

/// Compact JSON with `", "` / `": "` separators and every non-ASCII character
/// escaped as `\uXXXX`. Object keys come out sorted because `Map` is ordered.
struct CanonicalFormatter;

impl Formatter for CanonicalFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }

    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        for ch in fragment.chars() {
            if ch.is_ascii() {
                writer.write_all(&[ch as u8])?;
            } else {
                let mut units = [0u16; 2];
                for unit in ch.encode_utf16(&mut units) {
                    write!(writer, "\\u{:04x}", unit)?;
                }
            }
        }
        Ok(())
    }
}

pub fn canonical_json(value: &Value) -> String {
    let mut buf = Vec::new();
    let mut ser = Serializer::with_formatter(&mut buf, CanonicalFormatter);
    // A Value written into memory has no failure path, and the output is ASCII.
    let _ = value.serialize(&mut ser);
    String::from_utf8_lossy(&buf).into_owned()
}
