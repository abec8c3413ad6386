//! The value model.
//!
//! Callers hand the facade JSON documents, UTF-8 text, or opaque bytes. The
//! stored form on the wire is provider-specific; adapters work from the
//! serialized byte form produced here and re-type on read according to the
//! caller's [`ValueKind`] hint.

use std::hash::{Hash, Hasher};

/// The type hint a caller attaches to a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueKind {
    /// Parse the stored form as a JSON document.
    Json,
    /// Return the stored form as UTF-8 text.
    #[default]
    Text,
    /// Return the stored form untouched.
    Bytes,
}

/// A value held by the fabric.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheValue {
    /// A JSON document. Serialized with `serde_json` on write.
    Json(serde_json::Value),
    /// UTF-8 text, stored as-is.
    Text(String),
    /// Opaque bytes, stored as-is.
    Bytes(Vec<u8>),
}

impl CacheValue {
    /// The serialized form sent to providers.
    pub fn to_wire(&self) -> Vec<u8> {
        match self {
            // serde_json only fails on non-string map keys / NaN floats,
            // neither of which serde_json::Value can hold.
            CacheValue::Json(doc) => serde_json::to_vec(doc).unwrap_or_default(),
            CacheValue::Text(text) => text.as_bytes().to_vec(),
            CacheValue::Bytes(bytes) => bytes.clone(),
        }
    }

    /// The serialized form as a string, for providers with text-only wire
    /// protocols. Non-UTF-8 bytes are replaced lossily.
    pub fn to_wire_string(&self) -> String {
        match self {
            CacheValue::Json(doc) => doc.to_string(),
            CacheValue::Text(text) => text.clone(),
            CacheValue::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        }
    }

    /// Re-types a stored wire form according to the caller's hint.
    ///
    /// A `Json` hint over a body that does not parse falls back to text
    /// rather than failing the read; the stored bytes are still the value.
    pub fn from_wire(bytes: Vec<u8>, kind: ValueKind) -> CacheValue {
        match kind {
            ValueKind::Bytes => CacheValue::Bytes(bytes),
            ValueKind::Text => CacheValue::Text(String::from_utf8_lossy(&bytes).into_owned()),
            ValueKind::Json => match serde_json::from_slice(&bytes) {
                Ok(doc) => CacheValue::Json(doc),
                Err(err) => {
                    tracing::debug!(error = %err, "stored value is not json, returning text");
                    CacheValue::Text(String::from_utf8_lossy(&bytes).into_owned())
                }
            },
        }
    }

    /// Interprets the value as an integer counter, the way `incr` does.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CacheValue::Json(serde_json::Value::Number(n)) => n.as_i64(),
            CacheValue::Json(_) => None,
            CacheValue::Text(text) => text.trim().parse().ok(),
            CacheValue::Bytes(bytes) => std::str::from_utf8(bytes).ok()?.trim().parse().ok(),
        }
    }
}

impl From<serde_json::Value> for CacheValue {
    fn from(doc: serde_json::Value) -> Self {
        CacheValue::Json(doc)
    }
}

impl From<String> for CacheValue {
    fn from(text: String) -> Self {
        CacheValue::Text(text)
    }
}

impl From<&str> for CacheValue {
    fn from(text: &str) -> Self {
        CacheValue::Text(text.to_string())
    }
}

impl From<Vec<u8>> for CacheValue {
    fn from(bytes: Vec<u8>) -> Self {
        CacheValue::Bytes(bytes)
    }
}

/// A stable fingerprint over the serialized form, used by the L1 cache to
/// detect writes that would not change the stored value.
///
/// Two values with equal wire forms fingerprint equally regardless of how
/// the caller typed them, which is exactly the redundancy `is_unchanged`
/// wants to catch.
pub fn fingerprint(value: &CacheValue) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    value.to_wire().hash(&mut hasher);
    hasher.finish()
}
