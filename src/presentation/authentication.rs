//! Signatures bound to a session.
//!
//! 1. The holder signs `DeviceAuthenticationBytes`, which embed the session transcript,
//!    with a long-term device key it never sees directly: signing goes through a
//!    [KeyProvider] and keys are named by an opaque [KeyReference].
//!
//! 2. The reader may sign `ReaderAuthenticationBytes` over its items request in the
//!    same way.
//!
//! 3. The peer checks either signature against the signer's public [CoseKey] with
//!    [verify_signature].
//!
//! Because the transcript carries both ephemeral keys, a signature made for one session
//! does not verify in any other.
use std::collections::HashMap;

use ciborium::Value;
use p256::ecdsa::SigningKey;
use signature::{Signer, Verifier};

use crate::definitions::device_key::{CoseKey, EC2Curve};
use crate::definitions::helpers::Tag24;
use crate::definitions::session::SessionTranscript;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("no key registered under '{0}'")]
    UnknownKey(String),
    #[error("signing failed: {0}")]
    SigningFailed(String),
    #[error("signature verification failed")]
    InvalidSignature,
    #[error("cannot verify with a {0:?} key")]
    UnsupportedKey(Option<EC2Curve>),
    #[error("unable to encode the authentication payload: {0}")]
    Encoding(String),
}

/// Names a signing key held by a [KeyProvider]. The key material itself is never exposed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyReference(String);

impl KeyReference {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

/// Signing capability supplied by the platform, typically backed by a secure element.
pub trait KeyProvider: Send + Sync {
    /// A raw `r || s` ECDSA signature over `data`.
    fn sign(&self, key: &KeyReference, data: &[u8]) -> Result<Vec<u8>, Error>;

    /// DER certificates attesting to `key`, leaf first.
    fn attestation(&self, key: &KeyReference) -> Result<Vec<Vec<u8>>, Error>;
}

struct SoftwareKey {
    signing_key: SigningKey,
    chain: Vec<Vec<u8>>,
}

/// P-256 keys held in memory, for tests and devices without a secure element.
#[derive(Default)]
pub struct SoftwareKeyProvider {
    keys: HashMap<KeyReference, SoftwareKey>,
}

impl std::fmt::Debug for SoftwareKeyProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftwareKeyProvider")
            .field("keys", &self.keys.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl SoftwareKeyProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a key under `reference`, replacing any previous one, and return its
    /// public half.
    pub fn generate(&mut self, reference: KeyReference) -> CoseKey {
        self.insert(reference, SigningKey::random(&mut rand::thread_rng()), vec![])
    }

    /// Register an existing key together with its certificate chain.
    pub fn insert(
        &mut self,
        reference: KeyReference,
        signing_key: SigningKey,
        chain: Vec<Vec<u8>>,
    ) -> CoseKey {
        let public_key = CoseKey::from(&p256::PublicKey::from(signing_key.verifying_key()));
        self.keys.insert(reference, SoftwareKey { signing_key, chain });
        public_key
    }

    fn key(&self, reference: &KeyReference) -> Result<&SoftwareKey, Error> {
        self.keys
            .get(reference)
            .ok_or_else(|| Error::UnknownKey(reference.name().to_string()))
    }
}

impl KeyProvider for SoftwareKeyProvider {
    fn sign(&self, key: &KeyReference, data: &[u8]) -> Result<Vec<u8>, Error> {
        let signature: p256::ecdsa::Signature = self
            .key(key)?
            .signing_key
            .try_sign(data)
            .map_err(|e| Error::SigningFailed(e.to_string()))?;
        Ok(signature.to_bytes().to_vec())
    }

    fn attestation(&self, key: &KeyReference) -> Result<Vec<Vec<u8>>, Error> {
        Ok(self.key(key)?.chain.clone())
    }
}

/// `#6.24(bstr .cbor ["DeviceAuthentication", SessionTranscript, DocType, DeviceNameSpacesBytes])`
pub fn device_authentication_bytes(
    transcript: &SessionTranscript,
    doc_type: &str,
    device_namespaces_bytes: &Tag24<Value>,
) -> Result<Vec<u8>, Error> {
    authentication_bytes(
        "DeviceAuthentication",
        transcript,
        vec![
            Value::Text(doc_type.to_string()),
            device_namespaces_bytes.clone().into(),
        ],
    )
}

/// `#6.24(bstr .cbor ["ReaderAuthentication", SessionTranscript, ItemsRequestBytes])`
pub fn reader_authentication_bytes(
    transcript: &SessionTranscript,
    items_request_bytes: &Tag24<Value>,
) -> Result<Vec<u8>, Error> {
    authentication_bytes(
        "ReaderAuthentication",
        transcript,
        vec![items_request_bytes.clone().into()],
    )
}

fn authentication_bytes(
    context: &str,
    transcript: &SessionTranscript,
    rest: Vec<Value>,
) -> Result<Vec<u8>, Error> {
    let mut items = vec![Value::Text(context.to_string()), transcript.to_value()];
    items.extend(rest);
    Tag24::new(Value::Array(items))
        .and_then(|tagged| tagged.to_tagged_bytes())
        .map_err(|e| Error::Encoding(e.to_string()))
}

/// Sign `DeviceAuthenticationBytes` for this session with the holder's device key.
pub fn sign_device_authentication(
    provider: &dyn KeyProvider,
    key: &KeyReference,
    transcript: &SessionTranscript,
    doc_type: &str,
    device_namespaces_bytes: &Tag24<Value>,
) -> Result<Vec<u8>, Error> {
    let payload = device_authentication_bytes(transcript, doc_type, device_namespaces_bytes)?;
    tracing::debug!(key = key.name(), doc_type, "signing device authentication");
    provider.sign(key, &payload)
}

/// Check a raw `r || s` ECDSA signature made by `public_key` over `data`.
pub fn verify_signature(public_key: &CoseKey, data: &[u8], signature: &[u8]) -> Result<(), Error> {
    match public_key.ec2_curve() {
        Some(EC2Curve::P256) => {
            let public_key = p256::PublicKey::try_from(public_key)
                .map_err(|_| Error::UnsupportedKey(Some(EC2Curve::P256)))?;
            let signature = ecdsa::Signature::<p256::NistP256>::from_slice(signature)
                .map_err(|_| Error::InvalidSignature)?;
            ecdsa::VerifyingKey::<p256::NistP256>::from(&public_key)
                .verify(data, &signature)
                .map_err(|_| Error::InvalidSignature)
        }
        Some(EC2Curve::P384) => {
            let public_key = p384::PublicKey::try_from(public_key)
                .map_err(|_| Error::UnsupportedKey(Some(EC2Curve::P384)))?;
            let signature = ecdsa::Signature::<p384::NistP384>::from_slice(signature)
                .map_err(|_| Error::InvalidSignature)?;
            ecdsa::VerifyingKey::<p384::NistP384>::from(&public_key)
                .verify(data, &signature)
                .map_err(|_| Error::InvalidSignature)
        }
        other => Err(Error::UnsupportedKey(other)),
    }
}
