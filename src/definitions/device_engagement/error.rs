use crate::cbor::CborError;
use crate::definitions::device_key::cose_key::Error as CoseKeyError;

/// Errors that can occur when building or decoding a DeviceEngagement.
///
/// None of these are retried: they describe a holder that cannot be talked to.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("malformed engagement: {0}")]
    MalformedEngagement(String),
    #[error("ephemeral key is not on a supported curve (P-256, P-384)")]
    UnsupportedCurve,
    #[error("engagement offers no usable connection method")]
    NoTransportsOffered,
}

impl Error {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Error::MalformedEngagement(reason.into())
    }
}

impl From<CoseKeyError> for Error {
    fn from(e: CoseKeyError) -> Self {
        match e {
            CoseKeyError::UnsupportedCurve => Error::UnsupportedCurve,
            other => Error::MalformedEngagement(format!("invalid EDeviceKey: {other}")),
        }
    }
}

impl From<CborError> for Error {
    fn from(e: CborError) -> Self {
        Error::MalformedEngagement(e.to_string())
    }
}
