//! Wire-level data structures of ISO/IEC 18013-5 device retrieval.
pub mod device_engagement;
pub mod device_key;
pub mod helpers;
pub mod session;

pub use device_engagement::{
    BleOptions, Capabilities, CentralClientMode, ConnectionMethod, DeviceEngagement, NfcOptions,
    PeripheralServerMode, Security, WifiOptions,
};
pub use device_key::cose_key::{EC2Curve, EC2Y};
pub use device_key::CoseKey;
pub use session::{
    EphemeralKeyPair, EstablishedSession, Handover, SessionData, SessionEstablishment,
    SessionKeys, SessionTranscript, Status,
};
