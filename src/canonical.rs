//! Canonical Encoder
//!
//! Deterministic byte serialization of structured values used as hashing
//! input. Output is compact JSON with object keys sorted by their UTF-8
//! bytes, so a value hashes identically whatever order its fields were
//! inserted in, and `encode(decode(bytes)) == bytes` for canonical input.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::{OversightError, Result};

/// Predecessor hash of the first record in a ledger.
pub const GENESIS_HASH: &str =
    "sha256:0000000000000000000000000000000000000000000000000000000000000000";

/// Current snapshot schema version.
pub const SNAPSHOT_VERSION: u32 = 1;

const MAX_DEPTH: usize = 64;

/// Encode a value canonically.
pub fn encode(value: &Value) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(128);
    write_value(&mut out, value, 0)?;
    Ok(out)
}

/// Decode canonical (or any JSON) bytes back into a value.
pub fn decode(bytes: &[u8]) -> Result<Value> {
    serde_json::from_slice(bytes)
        .map_err(|e| OversightError::Encoding(format!("Malformed canonical bytes: {}", e)))
}

/// True when `bytes` is already in canonical form.
pub fn is_canonical(bytes: &[u8]) -> bool {
    match decode(bytes).and_then(|v| encode(&v)) {
        Ok(reencoded) => reencoded == bytes,
        Err(_) => false,
    }
}

fn write_value(out: &mut Vec<u8>, value: &Value, depth: usize) -> Result<()> {
    if depth > MAX_DEPTH {
        return Err(OversightError::Encoding(format!(
            "Value nested deeper than {} levels",
            MAX_DEPTH
        )));
    }

    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        Value::Number(n) => out.extend_from_slice(n.to_string().as_bytes()),
        Value::String(s) => write_string(out, s)?,
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(out, item, depth + 1)?;
            }
            out.push(b']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push(b'{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_string(out, key)?;
                out.push(b':');
                write_value(out, &map[key], depth + 1)?;
            }
            out.push(b'}');
        }
    }
    Ok(())
}

fn write_string(out: &mut Vec<u8>, s: &str) -> Result<()> {
    serde_json::to_writer(&mut *out, s)?;
    Ok(())
}

/// `sha256:<hex>` digest of arbitrary bytes.
pub fn sha256_tagged(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// Chain link: `H(canonical || previous_hash)`.
pub fn chain_hash(canonical: &[u8], previous_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical);
    hasher.update(previous_hash.as_bytes());
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// Versioned structured snapshot of an entity's state.
///
/// The body is always a JSON object; the core never interprets it beyond
/// hashing its canonical encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub body: Map<String, Value>,
}

impl Snapshot {
    pub fn new(body: Value) -> Result<Self> {
        match body {
            Value::Object(map) => {
                let snapshot = Self {
                    version: SNAPSHOT_VERSION,
                    body: map,
                };
                // Reject anything the encoder cannot hash.
                snapshot.canonical_bytes()?;
                Ok(snapshot)
            }
            other => Err(OversightError::Encoding(format!(
                "Snapshot body must be an object, got {}",
                json_type(&other)
            ))),
        }
    }

    pub fn from_serializable<T: Serialize>(value: &T) -> Result<Self> {
        Self::new(serde_json::to_value(value)?)
    }

    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        encode(&serde_json::to_value(self)?)
    }

    pub fn content_hash(&self) -> Result<String> {
        Ok(sha256_tagged(&self.canonical_bytes()?))
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
