//! Error taxonomy of a proximity session.
//!
//! Every failure surfaces as a [SessionError] from the operation that detected it. Only
//! [TransportError::Timeout] and [TransportError::Unreachable] are worth retrying, and
//! then only by the caller, from a fresh engagement.
use thiserror::Error;

use crate::cbor::CborError;
use crate::definitions::session::{self, Status};

pub use crate::definitions::device_engagement::Error as EngagementError;

pub type Result<T, E = SessionError> = std::result::Result<T, E>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("operation timed out")]
    Timeout,
    #[error("peer unreachable: {0}")]
    Unreachable(String),
    #[error("platform denied access to the radio: {0}")]
    PlatformDenied(String),
    #[error("peer requires a radio role this device does not support")]
    RoleMismatch,
    #[error("no connection method could be used")]
    NoUsableTransport,
    #[error("mtu {0} leaves no room for payload")]
    InvalidMtu(usize),
    #[error("transport is closed")]
    Disconnected,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("key agreement failed: {0}")]
    KeyAgreementFailure(String),
    #[error("message failed authentication")]
    AuthenticationFailure,
    #[error("message counter mismatch")]
    CounterMismatch,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed fragment: {0}")]
    MalformedFragment(String),
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("transport dropped without a termination status")]
    AbnormalTermination,
    #[error("malformed session message: {0}")]
    MalformedMessage(String),
    #[error("peer reported status {0}")]
    PeerReportedError(u64),
    #[error("a previous operation was cancelled mid-flight")]
    Cancelled,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)]
    Engagement(#[from] EngagementError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl SessionError {
    /// Whether a caller may try again with a fresh engagement.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SessionError::Transport(TransportError::Timeout)
                | SessionError::Transport(TransportError::Unreachable(_))
        )
    }

    /// The status to send the peer before giving up, if any.
    pub(crate) fn status_for_peer(&self) -> Option<Status> {
        match self {
            SessionError::Crypto(CryptoError::AuthenticationFailure)
            | SessionError::Crypto(CryptoError::CounterMismatch) => {
                Some(Status::SessionEncryptionError)
            }
            SessionError::Protocol(ProtocolError::MalformedMessage(_)) => {
                Some(Status::CborDecodingError)
            }
            _ => None,
        }
    }

    pub(crate) fn violation(reason: impl Into<String>) -> Self {
        ProtocolError::ProtocolViolation(reason.into()).into()
    }
}

impl From<session::Error> for SessionError {
    fn from(e: session::Error) -> Self {
        match e {
            session::Error::UnsupportedCurve => EngagementError::UnsupportedCurve.into(),
            session::Error::KeyAgreementFailure(reason) => {
                CryptoError::KeyAgreementFailure(reason).into()
            }
            session::Error::Encoding(e) => ProtocolError::MalformedMessage(e.to_string()).into(),
        }
    }
}

impl From<CborError> for SessionError {
    fn from(e: CborError) -> Self {
        ProtocolError::MalformedMessage(e.to_string()).into()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn only_timeout_and_unreachable_are_retryable() {
        assert!(SessionError::from(TransportError::Timeout).is_retryable());
        assert!(SessionError::from(TransportError::Unreachable("ble".into())).is_retryable());
        assert!(!SessionError::from(TransportError::RoleMismatch).is_retryable());
        assert!(!SessionError::from(CryptoError::AuthenticationFailure).is_retryable());
        assert!(!SessionError::from(EngagementError::UnsupportedCurve).is_retryable());
        assert!(!SessionError::from(ProtocolError::AbnormalTermination).is_retryable());
    }

    #[test]
    fn statuses_reported_to_the_peer() {
        assert_eq!(
            SessionError::from(CryptoError::CounterMismatch).status_for_peer(),
            Some(Status::SessionEncryptionError)
        );
        assert_eq!(
            SessionError::from(ProtocolError::MalformedMessage("x".into())).status_for_peer(),
            Some(Status::CborDecodingError)
        );
        assert_eq!(
            SessionError::from(TransportError::Timeout).status_for_peer(),
            None
        );
    }

    #[test]
    fn key_agreement_errors_map_to_crypto() {
        let e = SessionError::from(session::Error::KeyAgreementFailure("off curve".into()));
        assert!(matches!(
            e,
            SessionError::Crypto(CryptoError::KeyAgreementFailure(_))
        ));
    }
}
