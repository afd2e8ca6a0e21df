//! The reader's side of engagement.
//!
//! The reader scans or taps the holder's engagement, generates its own ephemeral key
//! on the same curve, and derives the session keys before any radio is brought up.
//! The resulting [SessionManagerEngaged] is handed to
//! [Session::start_as_reader](crate::presentation::session::Session::start_as_reader).
use crate::definitions::device_engagement::{DeviceEngagement, EReaderKeyBytes};
use crate::definitions::helpers::{ByteStr, Tag24};
use crate::definitions::session::{self, EphemeralKeyPair, EstablishedSession, Handover, SessionTranscript};
use crate::error::{EngagementError, Result};

/// A decoded engagement plus the keys derived for it.
#[derive(Debug)]
pub struct SessionManagerEngaged {
    device_engagement: Tag24<DeviceEngagement>,
    e_reader_key_bytes: EReaderKeyBytes,
    established: EstablishedSession,
}

impl SessionManagerEngaged {
    /// Engage from a scanned `mdoc:` URI.
    pub fn from_qr_code(qr_code: &str) -> Result<Self> {
        let device_engagement = Tag24::<DeviceEngagement>::from_qr_code_uri(qr_code)?;
        Self::engage(device_engagement, Handover::Qr)
    }

    /// Engage from raw `DeviceEngagementBytes` received out-of-band (no NFC handover).
    pub fn from_engagement_bytes(bytes: &[u8]) -> Result<Self> {
        Self::engage(DeviceEngagement::decode(bytes)?, Handover::Qr)
    }

    /// Engage from an NFC handover that carried the engagement.
    pub fn from_nfc_handover(
        engagement_bytes: &[u8],
        handover_select: Vec<u8>,
        handover_request: Option<Vec<u8>>,
    ) -> Result<Self> {
        let handover = Handover::Nfc {
            handover_select: ByteStr::from(handover_select),
            handover_request: handover_request.map(ByteStr::from),
        };
        Self::engage(DeviceEngagement::decode(engagement_bytes)?, handover)
    }

    fn engage(device_engagement: Tag24<DeviceEngagement>, handover: Handover) -> Result<Self> {
        let e_device_key = device_engagement.as_ref().e_device_key().clone();
        let curve = e_device_key
            .ec2_curve()
            .ok_or(EngagementError::UnsupportedCurve)?;
        let e_reader_key = EphemeralKeyPair::generate(curve)?;
        let e_reader_key_bytes = Tag24::new(e_reader_key.public_key())
            .map_err(|e| EngagementError::malformed(format!("unable to encode EReaderKey: {e}")))?;

        let transcript = SessionTranscript::new(
            device_engagement.clone(),
            e_reader_key_bytes.clone(),
            handover,
        );
        let established = session::establish(&e_reader_key, &e_device_key, transcript)?;
        tracing::debug!(?curve, "reader engaged, session keys derived");

        Ok(Self {
            device_engagement,
            e_reader_key_bytes,
            established,
        })
    }

    pub fn device_engagement(&self) -> &Tag24<DeviceEngagement> {
        &self.device_engagement
    }

    pub fn transcript_hash(&self) -> &[u8; 32] {
        &self.established.transcript_hash
    }

    /// The value the holder's BLE peripheral must present.
    pub fn ble_ident(&self) -> Result<[u8; 16]> {
        Ok(session::ble_ident(&self.device_engagement.as_ref().security.1)?)
    }

    pub(crate) fn into_parts(self) -> (Tag24<DeviceEngagement>, EReaderKeyBytes, EstablishedSession) {
        (
            self.device_engagement,
            self.e_reader_key_bytes,
            self.established,
        )
    }
}
