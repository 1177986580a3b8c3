//! Buffer-preserving JSON convention for binary record payloads.
//!
//! The record format is JSON text, so raw bytes inside a record are carried as
//! a tagged object `{"type":"Buffer","data":"<base64>"}`. [`Buffer`] is the
//! newtype whose serde impls apply that convention: serialization always emits
//! the base64 form, deserialization also accepts the numeric-array form
//! (`"data":[1,2,3]`) that older writers produced.

use base64::Engine;
use serde::de::Error as _;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Raw bytes that round-trip through the textual record format.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Buffer(pub Vec<u8>);

impl Buffer {
    pub fn new(bytes: Vec<u8>) -> Self {
        Buffer(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(bytes: Vec<u8>) -> Self {
        Buffer(bytes)
    }
}

impl From<&[u8]> for Buffer {
    fn from(bytes: &[u8]) -> Self {
        Buffer(bytes.to_vec())
    }
}

impl<const N: usize> From<[u8; N]> for Buffer {
    fn from(bytes: [u8; N]) -> Self {
        Buffer(bytes.to_vec())
    }
}

impl AsRef<[u8]> for Buffer {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

// Key material flows through here; Debug shows only the length.
impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Buffer({} bytes)", self.0.len())
    }
}

impl Serialize for Buffer {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("Buffer", 2)?;
        s.serialize_field("type", "Buffer")?;
        s.serialize_field(
            "data",
            &base64::engine::general_purpose::STANDARD.encode(&self.0),
        )?;
        s.end()
    }
}

#[derive(Deserialize)]
struct TaggedBuffer {
    #[serde(rename = "type")]
    tag: String,
    data: BufferPayload,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BufferPayload {
    Base64(String),
    Bytes(Vec<u8>),
}

impl<'de> Deserialize<'de> for Buffer {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tagged = TaggedBuffer::deserialize(deserializer)?;
        if tagged.tag != "Buffer" {
            return Err(D::Error::custom(format!(
                "expected tag \"Buffer\", found \"{}\"",
                tagged.tag
            )));
        }
        let bytes = match tagged.data {
            BufferPayload::Base64(s) => base64::engine::general_purpose::STANDARD
                .decode(&s)
                .map_err(D::Error::custom)?,
            BufferPayload::Bytes(v) => v,
        };
        Ok(Buffer(bytes))
    }
}
