//! Track metadata and its out-of-band wire payloads.
//!
//! Metadata is an ordered list of key/value string pairs; key lookup is
//! case-insensitive but insertion order is preserved so brocas can relay
//! tags in the order the decoder produced them.
//!
//! Two payload formats travel through packet ring buffers out of band with
//! the audio: `OOBM` (metadata records) and `OOBC` (the original command
//! serialized as JSON).

use std::sync::Arc;

use serde_json::Value;

/// Magic prefix of an out-of-band metadata payload.
pub const OOB_METADATA_MAGIC: &[u8; 4] = b"OOBM";
/// Magic prefix of an out-of-band original-command payload.
pub const OOB_COMMAND_MAGIC: &[u8; 4] = b"OOBC";

/// Ordered key/value metadata for one track.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    pairs: Vec<(String, String)>,
}

impl Metadata {
    /// Creates empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a key/value pair, keeping insertion order.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.pairs.push((key.into(), value.into()));
    }

    /// Looks up the first value whose key matches case-insensitively.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Iterates pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of pairs.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// True when no pairs are present.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl FromIterator<(String, String)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            pairs: iter.into_iter().collect(),
        }
    }
}

/// Serializes metadata as an `OOBM` payload: magic, then zero or more
/// `key "=" value "\0"` records.
pub fn encode_oob_metadata(metadata: &Metadata) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + metadata.len() * 16);
    out.extend_from_slice(OOB_METADATA_MAGIC);
    for (key, value) in metadata.iter() {
        out.extend_from_slice(key.as_bytes());
        out.push(b'=');
        out.extend_from_slice(value.as_bytes());
        out.push(0);
    }
    out
}

/// Parses an `OOBM` payload.
///
/// Truncated input yields whatever pairs were fully parsed; a missing or
/// wrong magic yields empty metadata. Never fails.
pub fn decode_oob_metadata(payload: &[u8]) -> Metadata {
    let mut metadata = Metadata::new();
    let Some(body) = payload.strip_prefix(&OOB_METADATA_MAGIC[..]) else {
        return metadata;
    };

    for record in body.split(|&b| b == 0) {
        let Some(eq) = record.iter().position(|&b| b == b'=') else {
            continue;
        };
        let key = String::from_utf8_lossy(&record[..eq]).into_owned();
        let value = String::from_utf8_lossy(&record[eq + 1..]).into_owned();
        metadata.push(key, value);
    }
    metadata
}

/// Serializes a command object as an `OOBC` payload: magic, then the
/// command as JSON.
pub fn encode_oob_command(command: &Value) -> Vec<u8> {
    let mut out = Vec::with_capacity(64);
    out.extend_from_slice(OOB_COMMAND_MAGIC);
    // serializing a Value cannot fail
    out.extend_from_slice(command.to_string().as_bytes());
    out
}

/// Parses an `OOBC` payload back into the command object.
///
/// Returns `None` on a missing magic or malformed JSON.
pub fn decode_oob_command(payload: &[u8]) -> Option<Arc<Value>> {
    let body = payload.strip_prefix(&OOB_COMMAND_MAGIC[..])?;
    serde_json::from_slice(body).ok().map(Arc::new)
}
