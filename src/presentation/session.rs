//! The session state machine shared by both parties.
//!
//! ```text
//! Engaged ──connect──▶ Establishing ──first exchange──▶ Ready ──terminate──▶ Terminating ──▶ Closed
//!    └──────────────────────┴───────────────────────────────┴──── any error ──▶ Failed
//! ```
//!
//! Traffic is strictly half-duplex: the reader speaks first and each side must receive
//! before it may send again. A session owns its transport handle, its keys and its
//! counters; all of them are released when it reaches `Closed` or `Failed`.
use std::future::Future;
use std::time::Duration;

use crate::config::SessionConfig;
use crate::definitions::device_engagement::EReaderKeyBytes;
use crate::definitions::helpers::ByteStr;
use crate::definitions::session::{SessionData, SessionEstablishment, SessionTranscript, Status};
use crate::error::{ProtocolError, Result, SessionError, TransportError};
use crate::presentation::cipher::SessionCipher;
use crate::presentation::{device, reader};
use crate::transport::{
    connect_first, select_channels, Capability, Channel, Connector, Party, TransportHandle,
};

#[derive(Debug, Clone, PartialEq, Eq, strum_macros::Display)]
pub enum SessionState {
    Engaged,
    Establishing,
    Ready,
    Terminating,
    Closed,
    Failed(SessionError),
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed(_))
    }
}

/// What a successful [Session::receive] produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    Message(Vec<u8>),
    /// The peer ended the session, optionally with a last payload.
    Terminated(Option<Vec<u8>>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Turn {
    Send,
    Receive,
}

/// State that only exists until the first message has been exchanged.
#[derive(Debug)]
enum Establishment {
    /// The holder's ephemeral key, waiting for the reader's.
    Holder(Box<device::SessionManagerEngaged>),
    /// The reader's key, to be sent with its first request.
    Reader(EReaderKeyBytes),
    Done,
}

#[derive(Debug)]
pub struct Session {
    party: Party,
    state: SessionState,
    config: SessionConfig,
    transport: Option<TransportHandle>,
    cipher: Option<SessionCipher>,
    transcript: Option<SessionTranscript>,
    transcript_hash: Option<[u8; 32]>,
    establishment: Establishment,
    turn: Turn,
    /// Set when an operation's future was dropped before it finished.
    cancelled: Option<&'static str>,
}

/// Held by an operation while it runs. Dropping it before [InFlight::finish] means the
/// operation's future was dropped, and the session is torn down on the spot.
struct InFlight<'a> {
    session: &'a mut Session,
    operation: &'static str,
    armed: bool,
}

impl<'a> InFlight<'a> {
    fn new(session: &'a mut Session, operation: &'static str) -> Self {
        Self {
            session,
            operation,
            armed: true,
        }
    }

    fn finish<T>(mut self, result: T) -> T {
        self.armed = false;
        result
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.session.cancel(self.operation);
        }
    }
}

impl Session {
    /// Bring up a transport for an engagement the holder has shown, and wait in
    /// `Establishing` for the reader's first message.
    pub async fn start_as_holder(
        engaged: device::SessionManagerEngaged,
        connector: &dyn Connector,
        config: SessionConfig,
    ) -> Result<Session> {
        let channels = Channel::expand(&engaged.device_engagement().as_ref().connection_methods);
        let mut session = Session::new(
            Party::Holder,
            config,
            Establishment::Holder(Box::new(engaged)),
            Turn::Receive,
        );
        session.connect(connector, &channels).await?;
        Ok(session)
    }

    /// Connect to the holder over the first usable channel. Keys are already derived; the
    /// first [Session::send] carries the reader's key to the holder.
    pub async fn start_as_reader(
        engaged: reader::SessionManagerEngaged,
        capabilities: &[Capability],
        connector: &dyn Connector,
        config: SessionConfig,
    ) -> Result<Session> {
        let channels = select_channels(
            &engaged.device_engagement().as_ref().connection_methods,
            Party::Reader,
            capabilities,
        )?;
        let (_, e_reader_key_bytes, established) = engaged.into_parts();
        let cipher = SessionCipher::new(&established.keys, Party::Reader)?;
        let mut session = Session::new(
            Party::Reader,
            config,
            Establishment::Reader(e_reader_key_bytes),
            Turn::Send,
        );
        session.cipher = Some(cipher);
        session.transcript = Some(established.transcript);
        session.transcript_hash = Some(established.transcript_hash);
        session.connect(connector, &channels).await?;
        Ok(session)
    }

    fn new(party: Party, config: SessionConfig, establishment: Establishment, turn: Turn) -> Self {
        Self {
            party,
            state: SessionState::Engaged,
            config,
            transport: None,
            cipher: None,
            transcript: None,
            transcript_hash: None,
            establishment,
            turn,
            cancelled: None,
        }
    }

    async fn connect(&mut self, connector: &dyn Connector, channels: &[Channel]) -> Result<()> {
        let handle = connect_first(
            connector,
            channels,
            self.party,
            self.config.connect_timeout(),
            self.config.max_message_size,
        )
        .await?;
        self.transport = Some(handle);
        self.transition(SessionState::Establishing);
        Ok(())
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn party(&self) -> Party {
        self.party
    }

    /// The channel in use, until the transport is released.
    pub fn channel(&self) -> Option<&Channel> {
        self.transport.as_ref().map(TransportHandle::channel)
    }

    /// SHA-256 of `SessionTranscriptBytes`, once keys have been derived.
    pub fn transcript_hash(&self) -> Option<&[u8; 32]> {
        self.transcript_hash.as_ref()
    }

    /// The transcript the session keys are bound to, for use in signatures.
    pub fn transcript(&self) -> Option<&SessionTranscript> {
        self.transcript.as_ref()
    }

    /// Encrypt and send one message.
    pub async fn send(&mut self, payload: &[u8]) -> Result<()> {
        self.begin()?;
        let mut guard = InFlight::new(self, "send");
        let result = guard.session.send_inner(payload).await;
        guard.finish(result)
    }

    /// Wait for the next message from the peer.
    ///
    /// While it is our turn to send, only a status from the peer (termination or an
    /// error) is accepted.
    pub async fn receive(&mut self) -> Result<Received> {
        self.begin()?;
        let mut guard = InFlight::new(self, "receive");
        let result = guard.session.receive_inner().await;
        guard.finish(result)
    }

    /// End the session with the termination status.
    pub async fn terminate(&mut self) -> Result<()> {
        self.begin()?;
        let mut guard = InFlight::new(self, "terminate");
        let result = guard.session.terminate_inner(None).await;
        guard.finish(result)
    }

    /// End the session, sending `payload` along with the termination status.
    pub async fn terminate_with(&mut self, payload: &[u8]) -> Result<()> {
        self.begin()?;
        let mut guard = InFlight::new(self, "terminate");
        let result = guard.session.terminate_inner(Some(payload)).await;
        guard.finish(result)
    }

    /// Drop the transport and all key material without telling the peer.
    pub fn abort(&mut self) {
        if !self.state.is_terminal() {
            tracing::info!(party = %self.party, "session aborted");
            self.release();
            self.transition(SessionState::Closed);
        }
    }

    fn begin(&self) -> Result<()> {
        if let Some(operation) = self.cancelled {
            return Err(SessionError::violation(format!(
                "previous {operation} cancelled"
            )));
        }
        if self.state.is_terminal() {
            return Err(SessionError::violation(format!(
                "session is {}",
                self.state
            )));
        }
        Ok(())
    }

    /// The link may hold half a message, so nothing more can be said on it.
    fn cancel(&mut self, operation: &'static str) {
        tracing::warn!(party = %self.party, operation, "operation cancelled mid-flight");
        self.cancelled = Some(operation);
        self.release();
        self.transition(SessionState::Failed(ProtocolError::Cancelled.into()));
    }

    async fn send_inner(&mut self, payload: &[u8]) -> Result<()> {
        match (&self.state, self.turn) {
            (SessionState::Establishing | SessionState::Ready, Turn::Send) => {}
            (SessionState::Establishing, _) if self.party == Party::Holder => {
                return Err(SessionError::violation(
                    "the holder cannot send before the reader's first message",
                ))
            }
            (state, _) => {
                return Err(SessionError::violation(format!(
                    "cannot send while {state} and awaiting the peer"
                )))
            }
        }
        let Some(cipher) = self.cipher.as_mut() else {
            return Err(SessionError::violation("no session keys"));
        };
        let ciphertext = match cipher.encrypt(payload) {
            Ok(ciphertext) => ciphertext,
            Err(e) => return Err(self.fail(e.into()).await),
        };
        let message = match std::mem::replace(&mut self.establishment, Establishment::Done) {
            Establishment::Reader(e_reader_key) => SessionEstablishment {
                e_reader_key,
                data: ciphertext.into(),
            }
            .encode(),
            other => {
                self.establishment = other;
                SessionData::with_data(ciphertext).encode()
            }
        };
        let message = match message {
            Ok(message) => message,
            Err(e) => return Err(self.fail(e.into()).await),
        };
        if let Err(e) = self.send_message(&message).await {
            return Err(self.fail(e).await);
        }
        tracing::debug!(party = %self.party, bytes = payload.len(), "message sent");
        if self.state == SessionState::Establishing {
            self.transition(SessionState::Ready);
        }
        self.turn = Turn::Receive;
        Ok(())
    }

    async fn receive_inner(&mut self) -> Result<Received> {
        if self.state == SessionState::Terminating {
            return Err(SessionError::violation("cannot receive while terminating"));
        }
        let out_of_turn = self.turn == Turn::Send;
        let establishing = self.state == SessionState::Establishing;
        let timeout = if establishing {
            self.config.engagement_timeout()
        } else {
            self.config.receive_timeout()
        };
        let message = match self.receive_message(timeout).await {
            Ok(Some(message)) => message,
            Ok(None) => return Err(self.fail(ProtocolError::AbnormalTermination.into()).await),
            Err(e) => return Err(self.fail(e).await),
        };

        let result = if out_of_turn {
            self.process_status(&message)
        } else if matches!(self.establishment, Establishment::Holder(_)) {
            self.process_establishment(&message)
        } else {
            SessionData::decode(&message)
                .map_err(SessionError::from)
                .and_then(|data| self.process_session_data(data))
        };
        match result {
            Ok(Received::Terminated(payload)) => {
                tracing::info!(party = %self.party, "peer terminated the session");
                self.transition(SessionState::Terminating);
                self.release();
                self.transition(SessionState::Closed);
                Ok(Received::Terminated(payload))
            }
            Ok(received) => {
                if self.state == SessionState::Establishing {
                    self.transition(SessionState::Ready);
                }
                self.turn = Turn::Send;
                Ok(received)
            }
            Err(e) => Err(self.fail(e).await),
        }
    }

    fn process_establishment(&mut self, message: &[u8]) -> Result<Received> {
        let establishment = match SessionEstablishment::decode(message) {
            Ok(establishment) => establishment,
            // The reader may give up before establishing, with a bare status.
            Err(e) => match SessionData::decode(message) {
                Ok(data) if data.data.is_none() && data.status.is_some() => {
                    return self.process_session_data(data)
                }
                _ => return Err(e.into()),
            },
        };
        let Establishment::Holder(engaged) =
            std::mem::replace(&mut self.establishment, Establishment::Done)
        else {
            return Err(SessionError::violation("session already established"));
        };
        let established = engaged.process_session_establishment(&establishment)?;
        let mut cipher = SessionCipher::new(&established.keys, Party::Holder)?;
        let request = cipher.decrypt(establishment.data.as_ref())?;
        self.cipher = Some(cipher);
        self.transcript = Some(established.transcript);
        self.transcript_hash = Some(established.transcript_hash);
        tracing::debug!("session established with reader");
        Ok(Received::Message(request))
    }

    /// A message that arrived while it was our turn to send: only a status may do that.
    fn process_status(&mut self, message: &[u8]) -> Result<Received> {
        let session_data = SessionData::decode(message)?;
        if session_data.status.is_none() {
            return Err(SessionError::violation("peer sent data out of turn"));
        }
        self.process_session_data(session_data)
    }

    fn process_session_data(&mut self, session_data: SessionData) -> Result<Received> {
        let payload = match (&session_data.data, self.cipher.as_mut()) {
            (Some(data), Some(cipher)) => Some(cipher.decrypt(data.as_ref())?),
            (Some(_), None) => {
                return Err(SessionError::violation("encrypted data before establishment"))
            }
            (None, _) => None,
        };
        match (session_data.status, payload) {
            (None, Some(payload)) => Ok(Received::Message(payload)),
            (None, None) => Err(ProtocolError::MalformedMessage(
                "SessionData carries neither data nor status".into(),
            )
            .into()),
            (Some(status), payload) => match Status::from_repr(status) {
                Some(Status::SessionTermination) => Ok(Received::Terminated(payload)),
                _ => Err(ProtocolError::PeerReportedError(status).into()),
            },
        }
    }

    async fn terminate_inner(&mut self, payload: Option<&[u8]>) -> Result<()> {
        let data: Option<ByteStr> = match (payload, self.cipher.as_mut()) {
            (Some(payload), Some(cipher)) => match cipher.encrypt(payload) {
                Ok(ciphertext) => Some(ciphertext.into()),
                Err(e) => return Err(self.fail(e.into()).await),
            },
            (Some(_), None) => {
                return Err(SessionError::violation(
                    "cannot send a final payload before establishment",
                ))
            }
            (None, _) => None,
        };
        let message = SessionData {
            data,
            status: Some(Status::SessionTermination.code()),
        };
        self.transition(SessionState::Terminating);
        let sent = match message.encode() {
            Ok(bytes) => self.send_message(&bytes).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = sent {
            return Err(self.fail(e).await);
        }
        tracing::info!(party = %self.party, "session terminated");
        self.release();
        self.transition(SessionState::Closed);
        Ok(())
    }

    async fn send_message(&mut self, message: &[u8]) -> Result<()> {
        let timeout = self.config.receive_timeout();
        let transport = self
            .transport
            .as_mut()
            .ok_or(TransportError::Disconnected)?;
        with_timeout(timeout, transport.send_message(message)).await
    }

    async fn receive_message(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        let transport = self
            .transport
            .as_mut()
            .ok_or(TransportError::Disconnected)?;
        with_timeout(timeout, transport.receive_message()).await
    }

    /// Tell the peer why, where the protocol has a status for it, then release
    /// everything and enter `Failed`.
    async fn fail(&mut self, error: SessionError) -> SessionError {
        tracing::warn!(party = %self.party, %error, "session failed");
        if let Some(status) = error.status_for_peer() {
            if let Ok(bytes) = SessionData::with_status(status).encode() {
                if let Err(e) = self.send_message(&bytes).await {
                    tracing::debug!(%e, "could not report status {} to peer", status.code());
                }
            }
        }
        self.release();
        self.transition(SessionState::Failed(error.clone()));
        error
    }

    fn release(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        self.cipher = None;
        self.establishment = Establishment::Done;
    }

    fn transition(&mut self, next: SessionState) {
        tracing::debug!(party = %self.party, from = %self.state, to = %next, "session state");
        self.state = next;
    }
}

async fn with_timeout<T>(
    timeout: Duration,
    operation: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(timeout, operation)
        .await
        .map_err(|_| SessionError::from(TransportError::Timeout))?
}

#[cfg(test)]
mod test {
    use uuid::Uuid;

    use super::*;
    use crate::definitions::device_engagement::{BleOptions, ConnectionMethod, PeripheralServerMode};
    use crate::transport::memory::MemoryConnector;

    fn methods() -> Vec<ConnectionMethod> {
        vec![ConnectionMethod::Ble(BleOptions {
            peripheral_server_mode: Some(PeripheralServerMode {
                uuid: Uuid::new_v4(),
                ble_device_address: None,
            }),
            central_client_mode: None,
        })]
    }

    async fn connected() -> (Session, Session) {
        let connector = MemoryConnector::default();
        let (engaged, qr) = device::SessionManagerInit::initialise(methods(), None)
            .unwrap()
            .qr_engagement();
        let holder = Session::start_as_holder(engaged, &connector, SessionConfig::default())
            .await
            .unwrap();
        let reader = Session::start_as_reader(
            reader::SessionManagerEngaged::from_qr_code(&qr).unwrap(),
            &Capability::all(),
            &connector,
            SessionConfig::default(),
        )
        .await
        .unwrap();
        (holder, reader)
    }

    #[tokio::test]
    async fn holder_cannot_speak_first() {
        let (mut holder, _reader) = connected().await;
        assert!(matches!(
            holder.send(b"hello").await,
            Err(SessionError::Protocol(ProtocolError::ProtocolViolation(_)))
        ));
        assert_eq!(holder.state(), &SessionState::Establishing);
    }

    #[tokio::test]
    async fn reader_must_wait_for_the_response() {
        let (mut holder, mut reader) = connected().await;
        reader.send(b"request").await.unwrap();
        assert!(matches!(
            reader.send(b"again").await,
            Err(SessionError::Protocol(ProtocolError::ProtocolViolation(_)))
        ));
        assert_eq!(
            holder.receive().await.unwrap(),
            Received::Message(b"request".to_vec())
        );
        assert_eq!(holder.transcript_hash(), reader.transcript_hash());
    }

    #[tokio::test]
    async fn aborted_sessions_reject_everything() {
        let (_holder, mut reader) = connected().await;
        reader.abort();
        assert_eq!(reader.state(), &SessionState::Closed);
        assert!(reader.channel().is_none());
        assert!(matches!(
            reader.send(b"request").await,
            Err(SessionError::Protocol(ProtocolError::ProtocolViolation(_)))
        ));
        assert_eq!(reader.state(), &SessionState::Closed);
    }

    #[tokio::test]
    async fn dropped_receive_releases_the_session() {
        let (mut holder, _reader) = connected().await;
        {
            let receive = holder.receive();
            tokio::pin!(receive);
            // Nothing was sent, so this only gets as far as the first suspension point.
            assert!(futures_poll_once(receive.as_mut()).await.is_none());
        }
        assert_eq!(
            holder.state(),
            &SessionState::Failed(ProtocolError::Cancelled.into())
        );
        assert!(holder.channel().is_none());
        assert_eq!(
            holder.receive().await,
            Err(SessionError::violation("previous receive cancelled"))
        );
    }

    #[tokio::test]
    async fn termination_is_received_out_of_turn() {
        let (mut holder, mut reader) = connected().await;
        reader.send(b"request").await.unwrap();
        holder.receive().await.unwrap();
        holder.send(b"response").await.unwrap();
        reader.receive().await.unwrap();

        // The reader may speak next, but the holder ends the session instead.
        holder.terminate().await.unwrap();
        assert_eq!(reader.receive().await.unwrap(), Received::Terminated(None));
        assert_eq!(reader.state(), &SessionState::Closed);
    }

    #[tokio::test]
    async fn data_out_of_turn_is_a_violation() {
        let (mut holder, mut reader) = connected().await;
        reader.send(b"request").await.unwrap();
        holder.receive().await.unwrap();
        holder.send(b"response").await.unwrap();
        reader.receive().await.unwrap();

        holder.turn = Turn::Send;
        holder.send(b"unsolicited").await.unwrap();
        assert!(matches!(
            reader.receive().await,
            Err(SessionError::Protocol(ProtocolError::ProtocolViolation(_)))
        ));
        assert!(matches!(reader.state(), SessionState::Failed(_)));
        assert!(reader.channel().is_none());
    }

    async fn futures_poll_once<F: Future + Unpin>(future: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            output = future => Some(output),
            _ = tokio::task::yield_now() => None,
        }
    }
}
