//! The holder's side of engagement.
//!
//! It is handled through the **State pattern**:
//!
//! ```text
//! SessionManagerInit ──qr_engagement()/nfc_engagement()──▶ SessionManagerEngaged
//!                                                               │
//!                                     Session::start_as_holder ◀┘
//! ```
//!
//! [SessionManagerInit::initialise] generates the ephemeral device key and builds the
//! engagement. Once the engagement has been shown to a reader, the engaged state is
//! handed to [Session::start_as_holder](crate::presentation::session::Session::start_as_holder),
//! which waits for the reader's `SessionEstablishment`.
use crate::definitions::device_engagement::{Capabilities, ConnectionMethod, DeviceEngagement};
use crate::definitions::helpers::{ByteStr, Tag24};
use crate::definitions::session::{
    self, EphemeralKeyPair, EstablishedSession, Handover, SessionEstablishment, SessionTranscript,
};
use crate::definitions::EC2Curve;
use crate::error::{EngagementError, Result};

/// Initialisation state.
///
/// Holds the ephemeral device key and the device engagement built around it.
/// You enter this state by calling [SessionManagerInit::initialise].
#[derive(Debug)]
pub struct SessionManagerInit {
    e_device_key: EphemeralKeyPair,
    device_engagement: Tag24<DeviceEngagement>,
}

/// Engaged state.
///
/// The engagement has been handed to a reader, by QR code or NFC.
#[derive(Debug)]
pub struct SessionManagerEngaged {
    e_device_key: EphemeralKeyPair,
    device_engagement: Tag24<DeviceEngagement>,
    handover: Handover,
}

impl SessionManagerInit {
    /// Generate a P-256 ephemeral key and an engagement offering `connection_methods`,
    /// in order of preference.
    pub fn initialise(
        connection_methods: Vec<ConnectionMethod>,
        capabilities: Option<Capabilities>,
    ) -> Result<Self> {
        Self::initialise_with_curve(EC2Curve::P256, connection_methods, capabilities)
    }

    pub fn initialise_with_curve(
        curve: EC2Curve,
        connection_methods: Vec<ConnectionMethod>,
        capabilities: Option<Capabilities>,
    ) -> Result<Self> {
        let e_device_key = EphemeralKeyPair::generate(curve)?;
        let device_engagement =
            DeviceEngagement::new(e_device_key.public_key(), connection_methods, capabilities)?;
        let device_engagement = Tag24::new(device_engagement)
            .map_err(|e| EngagementError::malformed(format!("unable to encode: {e}")))?;
        tracing::debug!(?curve, "holder engagement created");
        Ok(Self {
            e_device_key,
            device_engagement,
        })
    }

    pub fn device_engagement(&self) -> &Tag24<DeviceEngagement> {
        &self.device_engagement
    }

    /// `DeviceEngagementBytes`, for delivery over a channel other than QR.
    pub fn engagement_bytes(&self) -> &[u8] {
        &self.device_engagement.inner_bytes
    }

    /// Identifies this holder to a BLE reader.
    pub fn ble_ident(&self) -> Result<[u8; 16]> {
        Ok(session::ble_ident(&self.device_engagement.as_ref().security.1)?)
    }

    /// Engage by QR code. Returns the engaged state and the `mdoc:` URI to display.
    pub fn qr_engagement(self) -> (SessionManagerEngaged, String) {
        let qr_code_uri = self.device_engagement.to_qr_code_uri();
        let engaged = SessionManagerEngaged {
            e_device_key: self.e_device_key,
            device_engagement: self.device_engagement,
            handover: Handover::Qr,
        };
        (engaged, qr_code_uri)
    }

    /// Engage by NFC static or negotiated handover; the handover messages become part
    /// of the session transcript.
    pub fn nfc_engagement(
        self,
        handover_select: Vec<u8>,
        handover_request: Option<Vec<u8>>,
    ) -> SessionManagerEngaged {
        SessionManagerEngaged {
            e_device_key: self.e_device_key,
            device_engagement: self.device_engagement,
            handover: Handover::Nfc {
                handover_select: ByteStr::from(handover_select),
                handover_request: handover_request.map(ByteStr::from),
            },
        }
    }
}

impl SessionManagerEngaged {
    pub fn device_engagement(&self) -> &Tag24<DeviceEngagement> {
        &self.device_engagement
    }

    pub fn handover(&self) -> &Handover {
        &self.handover
    }

    /// Derive the session keys from the reader's `SessionEstablishment`.
    pub(crate) fn process_session_establishment(
        &self,
        establishment: &SessionEstablishment,
    ) -> Result<EstablishedSession> {
        let transcript = SessionTranscript::new(
            self.device_engagement.clone(),
            establishment.e_reader_key.clone(),
            self.handover.clone(),
        );
        Ok(session::establish(
            &self.e_device_key,
            establishment.e_reader_key.as_ref(),
            transcript,
        )?)
    }
}

#[cfg(test)]
mod test {
    use uuid::Uuid;

    use super::*;
    use crate::definitions::device_engagement::{BleOptions, PeripheralServerMode};
    use crate::error::SessionError;

    fn ble() -> ConnectionMethod {
        ConnectionMethod::Ble(BleOptions {
            peripheral_server_mode: Some(PeripheralServerMode {
                uuid: Uuid::new_v4(),
                ble_device_address: None,
            }),
            central_client_mode: None,
        })
    }

    #[test]
    fn qr_engagement_roundtrips() {
        let init = SessionManagerInit::initialise(vec![ble()], None).unwrap();
        let bytes = init.engagement_bytes().to_vec();
        let (engaged, uri) = init.qr_engagement();
        let decoded = Tag24::<DeviceEngagement>::from_qr_code_uri(&uri).unwrap();
        assert_eq!(decoded.inner_bytes, bytes);
        assert_eq!(engaged.handover(), &Handover::Qr);
    }

    #[test]
    fn no_methods_is_an_engagement_error() {
        assert_eq!(
            SessionManagerInit::initialise(vec![], None).unwrap_err(),
            SessionError::Engagement(EngagementError::NoTransportsOffered)
        );
    }

    #[test]
    fn p384_engagement() {
        let init =
            SessionManagerInit::initialise_with_curve(EC2Curve::P384, vec![ble()], None).unwrap();
        assert_eq!(
            init.device_engagement().as_ref().e_device_key().ec2_curve(),
            Some(EC2Curve::P384)
        );
        assert_eq!(init.ble_ident().unwrap().len(), 16);
    }

    #[test]
    fn nfc_handover_is_kept() {
        let init = SessionManagerInit::initialise(vec![ble()], None).unwrap();
        let engaged = init.nfc_engagement(vec![0xd1, 0x02], None);
        assert!(matches!(engaged.handover(), Handover::Nfc { .. }));
    }
}
