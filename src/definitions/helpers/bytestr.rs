use serde::{Deserialize, Serialize};

/// A CBOR byte string (major type 2).
///
/// A plain `Vec<u8>` would be encoded by serde as an array of integers.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct ByteStr(#[serde(with = "serde_bytes")] Vec<u8>);

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("Expected to parse a CBOR byte string, received: '{0:?}'")]
    NotAByteString(ciborium::Value),
}

impl ByteStr {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for ByteStr {
    fn from(bytes: Vec<u8>) -> ByteStr {
        ByteStr(bytes)
    }
}

impl From<ByteStr> for Vec<u8> {
    fn from(ByteStr(bytes): ByteStr) -> Vec<u8> {
        bytes
    }
}

impl AsRef<[u8]> for ByteStr {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<ByteStr> for ciborium::Value {
    fn from(ByteStr(bytes): ByteStr) -> ciborium::Value {
        ciborium::Value::Bytes(bytes)
    }
}

impl TryFrom<ciborium::Value> for ByteStr {
    type Error = Error;

    fn try_from(v: ciborium::Value) -> Result<ByteStr> {
        match v {
            ciborium::Value::Bytes(bytes) => Ok(ByteStr(bytes)),
            other => Err(Error::NotAByteString(other)),
        }
    }
}
