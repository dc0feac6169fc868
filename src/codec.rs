//! Tagged text encoding for record payloads.
//!
//! Every payload is stored as `<kind>:<format>:<body>`:
//!
//! | kind       | tag    | body                                   |
//! |------------|--------|----------------------------------------|
//! | text       | `t:u:` | verbatim                               |
//! | number     | `n:f:` | decimal form                           |
//! | vector     | `v:f:` | comma-joined, 6 fractional digits each |
//! | structured | `j:j:` | canonical JSON (sorted keys)           |
//! | opaque     | `u:u:` | string rendering, verbatim             |
//!
//! Decoding is total. A body that does not parse as its declared kind comes back
//! as the raw residual text, so hand-edited snapshots still load.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::hasher::canonical_json;

pub const TEXT_TAG: &str = "t:u:";
pub const NUMBER_TAG: &str = "n:f:";
pub const VECTOR_TAG: &str = "v:f:";
pub const STRUCTURED_TAG: &str = "j:j:";
pub const OPAQUE_TAG: &str = "u:u:";

/// All tags share this length.
pub const TAG_LEN: usize = 4;

/// Fractional digits kept per vector element.
pub const VECTOR_PRECISION: usize = 6;

/// A decoded record payload.
///
/// Serializes to the plain JSON value it represents (string, number, array or
/// object), which is the shape handed to callers of the query layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Text(String),
    Number(f64),
    Vector(Vec<f64>),
    Structured(Map<String, Value>),
    /// Anything without a dedicated encoding. Only the string rendering is
    /// kept, so the original value cannot be recovered from it.
    Opaque(String),
}

/// Single-character discriminator stored alongside each record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TypeTag {
    Text,
    Numeric,
    Vector,
    Structured,
    Opaque,
}

impl TypeTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            TypeTag::Text => "t",
            TypeTag::Numeric => "n",
            TypeTag::Vector => "v",
            TypeTag::Structured => "j",
            TypeTag::Opaque => "u",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "t" => Some(TypeTag::Text),
            "n" => Some(TypeTag::Numeric),
            "v" => Some(TypeTag::Vector),
            "j" => Some(TypeTag::Structured),
            "u" => Some(TypeTag::Opaque),
            _ => None,
        }
    }
}

impl std::fmt::Display for TypeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Payload {
    pub fn kind(&self) -> TypeTag {
        match self {
            Payload::Text(_) => TypeTag::Text,
            Payload::Number(_) => TypeTag::Numeric,
            Payload::Vector(_) => TypeTag::Vector,
            Payload::Structured(_) => TypeTag::Structured,
            Payload::Opaque(_) => TypeTag::Opaque,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        match value {
            Value::String(s) => Payload::Text(s),
            Value::Number(n) => match n.as_f64() {
                Some(f) => Payload::Number(f),
                None => Payload::Opaque(n.to_string()),
            },
            Value::Array(items) => {
                let numbers: Option<Vec<f64>> = items.iter().map(Value::as_f64).collect();
                match numbers {
                    Some(v) => Payload::Vector(v),
                    None => Payload::Opaque(Value::Array(items).to_string()),
                }
            }
            Value::Object(map) => Payload::Structured(map),
            other => Payload::Opaque(other.to_string()),
        }
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::Text(s.to_string())
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload::Text(s)
    }
}

impl From<f64> for Payload {
    fn from(n: f64) -> Self {
        Payload::Number(n)
    }
}

impl From<Vec<f64>> for Payload {
    fn from(v: Vec<f64>) -> Self {
        Payload::Vector(v)
    }
}

impl From<Map<String, Value>> for Payload {
    fn from(m: Map<String, Value>) -> Self {
        Payload::Structured(m)
    }
}

pub fn encode(payload: &Payload) -> String {
    match payload {
        Payload::Text(s) => format!("{TEXT_TAG}{s}"),
        Payload::Number(n) => format!("{NUMBER_TAG}{n}"),
        Payload::Vector(v) => {
            let body = v
                .iter()
                .map(|x| format!("{:.*}", VECTOR_PRECISION, x))
                .collect::<Vec<_>>()
                .join(",");
            format!("{VECTOR_TAG}{body}")
        }
        Payload::Structured(m) => {
            format!("{STRUCTURED_TAG}{}", canonical_json(&Value::Object(m.clone())))
        }
        Payload::Opaque(s) => format!("{OPAQUE_TAG}{s}"),
    }
}

pub fn decode(encoded: &str) -> Payload {
    if let Some(body) = encoded.strip_prefix(TEXT_TAG) {
        return Payload::Text(body.to_string());
    }
    if let Some(body) = encoded.strip_prefix(NUMBER_TAG) {
        return match body.trim().parse::<f64>() {
            Ok(n) => Payload::Number(n),
            Err(_) => Payload::Text(body.to_string()),
        };
    }
    if let Some(body) = encoded.strip_prefix(VECTOR_TAG) {
        return decode_vector(body);
    }
    if let Some(body) = encoded.strip_prefix(STRUCTURED_TAG) {
        return match serde_json::from_str::<Map<String, Value>>(body) {
            Ok(map) => Payload::Structured(map),
            Err(_) => Payload::Text(body.to_string()),
        };
    }
    // Opaque tag or anything unrecognised: drop exactly the four tag
    // characters. Earlier readers of this format sliced five here and lost the
    // first body character; stored bodies are read back whole instead.
    Payload::Opaque(encoded.get(TAG_LEN..).unwrap_or(encoded).to_string())
}

fn decode_vector(body: &str) -> Payload {
    if body.trim().is_empty() {
        return Payload::Vector(Vec::new());
    }
    let parsed: Result<Vec<f64>, _> = body.split(',').map(|x| x.trim().parse::<f64>()).collect();
    match parsed {
        Ok(v) => Payload::Vector(v),
        Err(_) => Payload::Text(body.to_string()),
    }
}

/// First `:`-separated segment of an encoded payload.
pub fn type_tag(encoded: &str) -> &str {
    encoded.split(':').next().unwrap_or_default()
}
