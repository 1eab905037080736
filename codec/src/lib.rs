//! The canonical binary encoding.
//!
//! Every persistent or wire value in silo is encoded the same way: integers
//! are little-endian and fixed width, sequences carry a u64 length prefix,
//! and structures are the concatenation of their fields in declared order.
//! The shape of a value, not a tag, describes it. Decoding is strict: any
//! truncation, trailing garbage or length overflow is a [`CodecError`].

use bincode::Options;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("malformed encoding: {0}")]
    Malformed(String),

    #[error("encoded object exceeds the {limit} byte limit")]
    Oversized { limit: u64 },
}

pub type CodecResult<T> = std::result::Result<T, CodecError>;

fn options() -> impl Options {
    bincode::DefaultOptions::new().with_fixint_encoding().with_little_endian()
}

/// Encodes a value. Encoding a value that is representable in memory cannot
/// fail, so the result is returned directly.
pub fn encode<T: Serialize>(value: &T) -> Vec<u8> {
    options().serialize(value).expect("canonical values are always encodable")
}

/// The number of bytes [`encode`] would produce.
pub fn encoded_len<T: Serialize>(value: &T) -> u64 {
    options().serialized_size(value).expect("canonical values are always encodable")
}

/// Decodes a value, consuming the entire input.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    options().deserialize(bytes).map_err(|err| CodecError::Malformed(err.to_string()))
}

/// Decodes a value while refusing to read more than `limit` bytes, for
/// inputs arriving from untrusted peers.
pub fn decode_bounded<T: DeserializeOwned>(bytes: &[u8], limit: u64) -> CodecResult<T> {
    if bytes.len() as u64 > limit {
        return Err(CodecError::Oversized { limit });
    }
    options().with_limit(limit).deserialize(bytes).map_err(|err| match *err {
        bincode::ErrorKind::SizeLimit => CodecError::Oversized { limit },
        other => CodecError::Malformed(other.to_string()),
    })
}
