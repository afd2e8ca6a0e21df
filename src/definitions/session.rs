//! Session establishment: ephemeral key agreement, the session transcript, session key
//! derivation, and the two messages exchanged once the parties are connected.
use ciborium::Value;
use elliptic_curve::ecdh::diffie_hellman;
use hkdf::Hkdf;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::cbor::{self, CborError};
use crate::definitions::device_engagement::{DeviceEngagement, EDeviceKeyBytes, EReaderKeyBytes};
use crate::definitions::device_key::cose_key::{CoseKey, EC2Curve};
use crate::definitions::helpers::{ByteStr, Tag24};

pub type DeviceEngagementBytes = Tag24<DeviceEngagement>;

/// Length of `SKReader` and `SKDevice`.
pub const SESSION_KEY_LEN: usize = 32;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("curve not supported for key agreement")]
    UnsupportedCurve,
    #[error("key agreement failed: {0}")]
    KeyAgreementFailure(String),
    #[error("unable to encode session transcript: {0}")]
    Encoding(#[from] CborError),
}

/// The ephemeral private key of one party. The secret scalar is zeroized on drop.
pub enum EphemeralKeyPair {
    P256(p256::SecretKey),
    P384(p384::SecretKey),
}

impl std::fmt::Debug for EphemeralKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EphemeralKeyPair({:?})", self.curve())
    }
}

impl EphemeralKeyPair {
    pub fn generate(curve: EC2Curve) -> Result<Self, Error> {
        match curve {
            EC2Curve::P256 => Ok(Self::P256(p256::SecretKey::random(&mut OsRng))),
            EC2Curve::P384 => Ok(Self::P384(p384::SecretKey::random(&mut OsRng))),
            _ => Err(Error::UnsupportedCurve),
        }
    }

    pub fn curve(&self) -> EC2Curve {
        match self {
            Self::P256(_) => EC2Curve::P256,
            Self::P384(_) => EC2Curve::P384,
        }
    }

    pub fn public_key(&self) -> CoseKey {
        match self {
            Self::P256(sk) => CoseKey::from(&sk.public_key()),
            Self::P384(sk) => CoseKey::from(&sk.public_key()),
        }
    }

    /// ECDH with the peer's public key, returning the x-coordinate of the shared point.
    pub fn agree(&self, peer: &CoseKey) -> Result<Zeroizing<Vec<u8>>, Error> {
        let invalid =
            |e: crate::definitions::device_key::Error| Error::KeyAgreementFailure(e.to_string());
        match self {
            Self::P256(sk) => {
                let peer = p256::PublicKey::try_from(peer).map_err(invalid)?;
                let shared = diffie_hellman(sk.to_nonzero_scalar(), peer.as_affine());
                Ok(Zeroizing::new(shared.raw_secret_bytes().to_vec()))
            }
            Self::P384(sk) => {
                let peer = p384::PublicKey::try_from(peer).map_err(invalid)?;
                let shared = diffie_hellman(sk.to_nonzero_scalar(), peer.as_affine());
                Ok(Zeroizing::new(shared.raw_secret_bytes().to_vec()))
            }
        }
    }
}

/// How the engagement reached the reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handover {
    Qr,
    Nfc {
        handover_select: ByteStr,
        handover_request: Option<ByteStr>,
    },
}

impl From<Handover> for Value {
    fn from(h: Handover) -> Value {
        match h {
            Handover::Qr => Value::Null,
            Handover::Nfc {
                handover_select,
                handover_request,
            } => Value::Array(vec![
                handover_select.into(),
                handover_request.map(Value::from).unwrap_or(Value::Null),
            ]),
        }
    }
}

impl TryFrom<Value> for Handover {
    type Error = CborError;

    fn try_from(v: Value) -> Result<Self, CborError> {
        match v {
            Value::Null => Ok(Handover::Qr),
            Value::Array(items) => match <[Value; 2]>::try_from(items) {
                Ok([Value::Bytes(select), Value::Bytes(request)]) => Ok(Handover::Nfc {
                    handover_select: select.into(),
                    handover_request: Some(request.into()),
                }),
                Ok([Value::Bytes(select), Value::Null]) => Ok(Handover::Nfc {
                    handover_select: select.into(),
                    handover_request: None,
                }),
                _ => Err(CborError::UnexpectedItem("array", "[bstr, bstr / null]")),
            },
            other => Err(CborError::UnexpectedItem(cbor::kind(&other), "null or array")),
        }
    }
}

/// `[DeviceEngagementBytes, EReaderKeyBytes, Handover]`.
///
/// Both parties build this from the exact engagement bytes that crossed the wire, so
/// the encodings, and hence the derived keys, match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTranscript {
    pub device_engagement_bytes: DeviceEngagementBytes,
    pub e_reader_key_bytes: EReaderKeyBytes,
    pub handover: Handover,
}

impl SessionTranscript {
    pub fn new(
        device_engagement_bytes: DeviceEngagementBytes,
        e_reader_key_bytes: EReaderKeyBytes,
        handover: Handover,
    ) -> Self {
        Self {
            device_engagement_bytes,
            e_reader_key_bytes,
            handover,
        }
    }

    pub fn to_value(&self) -> Value {
        Value::Array(vec![
            self.device_engagement_bytes.clone().into(),
            self.e_reader_key_bytes.clone().into(),
            self.handover.clone().into(),
        ])
    }

    /// `SessionTranscriptBytes = #6.24(bstr .cbor SessionTranscript)`.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        let inner = cbor::to_vec(&self.to_value())?;
        Ok(cbor::to_vec(&Value::Tag(24, Box::new(Value::Bytes(inner))))?)
    }

    pub fn hash(&self) -> Result<[u8; 32], Error> {
        Ok(Sha256::digest(self.to_bytes()?).into())
    }
}

impl TryFrom<Value> for SessionTranscript {
    type Error = CborError;

    fn try_from(v: Value) -> Result<Self, CborError> {
        let Value::Array(items) = v else {
            return Err(CborError::UnexpectedItem(cbor::kind(&v), "array"));
        };
        let Ok([engagement, reader_key, handover]) = <[Value; 3]>::try_from(items) else {
            return Err(CborError::UnexpectedItem("array", "array of three"));
        };
        let de_err = |e: crate::definitions::helpers::tag24::Error| {
            CborError::DecodeFailed(e.to_string())
        };
        Ok(SessionTranscript {
            device_engagement_bytes: Tag24::try_from(engagement).map_err(de_err)?,
            e_reader_key_bytes: Tag24::try_from(reader_key).map_err(de_err)?,
            handover: Handover::try_from(handover)?,
        })
    }
}

/// `SKReader` and `SKDevice`, zeroized on drop.
pub struct SessionKeys {
    pub sk_reader: Zeroizing<[u8; SESSION_KEY_LEN]>,
    pub sk_device: Zeroizing<[u8; SESSION_KEY_LEN]>,
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKeys(..)")
    }
}

/// The outcome of key agreement: session keys plus the transcript they are bound to.
#[derive(Debug)]
pub struct EstablishedSession {
    pub keys: SessionKeys,
    pub transcript: SessionTranscript,
    pub transcript_hash: [u8; 32],
}

/// HKDF-SHA-256 over the ECDH shared secret, salted with the transcript hash.
pub fn derive_session_key(
    shared_secret: &[u8],
    transcript_hash: &[u8; 32],
    reader: bool,
) -> Result<Zeroizing<[u8; SESSION_KEY_LEN]>, Error> {
    let info: &[u8] = if reader { b"SKReader" } else { b"SKDevice" };
    let mut okm = Zeroizing::new([0u8; SESSION_KEY_LEN]);
    Hkdf::<Sha256>::new(Some(&transcript_hash[..]), shared_secret)
        .expand(info, okm.as_mut_slice())
        .map_err(|e| Error::KeyAgreementFailure(format!("unable to perform HKDF: {e}")))?;
    Ok(okm)
}

/// Derive both session keys. Either party calls this with its own ephemeral key and
/// the peer's public key; the results are identical when the transcripts are.
pub fn establish(
    local: &EphemeralKeyPair,
    peer: &CoseKey,
    transcript: SessionTranscript,
) -> Result<EstablishedSession, Error> {
    if peer.ec2_curve() != Some(local.curve()) {
        return Err(Error::KeyAgreementFailure(format!(
            "peer key is not on {:?}",
            local.curve()
        )));
    }
    let shared_secret = local.agree(peer)?;
    let transcript_hash = transcript.hash()?;
    let keys = SessionKeys {
        sk_reader: derive_session_key(&shared_secret, &transcript_hash, true)?,
        sk_device: derive_session_key(&shared_secret, &transcript_hash, false)?,
    };
    Ok(EstablishedSession {
        keys,
        transcript,
        transcript_hash,
    })
}

/// The value a BLE peripheral exposes so the reader can check it reached the right holder.
pub fn ble_ident(e_device_key: &EDeviceKeyBytes) -> Result<[u8; 16], Error> {
    let e_device_key_bytes = e_device_key.to_tagged_bytes().map_err(|e| match e {
        crate::definitions::helpers::tag24::Error::UnableToEncode(c) => Error::Encoding(c),
        other => Error::Encoding(CborError::EncodeFailed(other.to_string())),
    })?;
    let mut ble_ident = [0u8; 16];

    Hkdf::<Sha256>::new(None, &e_device_key_bytes)
        .expand("BLEIdent".as_bytes(), &mut ble_ident)
        .map_err(|e| Error::KeyAgreementFailure(format!("unable to perform HKDF: {e}")))?;

    Ok(ble_ident)
}

/// First message from the reader: its ephemeral key and the first encrypted request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionEstablishment {
    pub e_reader_key: EReaderKeyBytes,
    pub data: ByteStr,
}

/// Every later message, in either direction.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ByteStr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u64>,
}

/// Status codes carried in [SessionData].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, strum_macros::EnumIter, strum_macros::FromRepr,
)]
#[repr(u64)]
pub enum Status {
    SessionEncryptionError = 10,
    CborDecodingError = 11,
    SessionTermination = 20,
}

impl Status {
    pub fn code(self) -> u64 {
        self as u64
    }
}

impl SessionEstablishment {
    pub fn encode(&self) -> Result<Vec<u8>, CborError> {
        cbor::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CborError> {
        cbor::from_slice(bytes)
    }
}

impl SessionData {
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: Some(data.into()),
            status: None,
        }
    }

    pub fn with_status(status: Status) -> Self {
        Self {
            data: None,
            status: Some(status.code()),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, CborError> {
        cbor::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CborError> {
        cbor::from_slice(bytes)
    }
}
