//! Transport abstraction for device retrieval.
//!
//! A [ConnectionMethod] from the engagement expands into one or more [Channel]s. The
//! platform supplies a [Connector] that turns a channel into a live [Transport]; this
//! module picks which channel to use and wraps the result in a [TransportHandle]
//! that does fragmentation and owns the link for the lifetime of a session.
//!
//! ```text
//! ┌───────────────────────────┐
//! │           Session         │
//! └─────────────┬─────────────┘
//!               │ whole messages
//! ┌─────────────▼─────────────┐
//! │      TransportHandle      │  fragment / reassemble
//! └─────────────┬─────────────┘
//!               │ units ≤ mtu
//!      ┌────────┼────────┬────────────┐
//!      ▼        ▼        ▼            ▼
//!   BLE (S)  BLE (C)    NFC     Wi-Fi Aware
//! ```
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::definitions::device_engagement::{ConnectionMethod, NfcOptions, WifiOptions};
use crate::definitions::helpers::ByteStr;
use crate::error::{Result, SessionError, TransportError};

pub mod fragment;
pub mod memory;

use fragment::{fragment, Reassembler};

/// Which side of the presentment a party is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum Party {
    Holder,
    Reader,
}

/// Radio role. The initiator scans and connects, the responder advertises and accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum Role {
    Initiator,
    Responder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
pub enum TransportKind {
    #[strum(serialize = "BLE")]
    Ble,
    #[strum(serialize = "NFC")]
    Nfc,
    #[strum(serialize = "Wi-Fi Aware")]
    WifiAware,
}

/// One concrete way of reaching the holder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Channel {
    /// The holder is the GATT server and the reader connects to it.
    BlePeripheralServer {
        uuid: Uuid,
        address: Option<ByteStr>,
    },
    /// The holder is the GATT client and connects to the reader.
    BleCentralClient { uuid: Uuid },
    Nfc(NfcOptions),
    WifiAware(WifiOptions),
}

impl Channel {
    pub fn kind(&self) -> TransportKind {
        match self {
            Channel::BlePeripheralServer { .. } | Channel::BleCentralClient { .. } => {
                TransportKind::Ble
            }
            Channel::Nfc(_) => TransportKind::Nfc,
            Channel::WifiAware(_) => TransportKind::WifiAware,
        }
    }

    /// The radio role `party` takes on this channel.
    pub fn role_of(&self, party: Party) -> Role {
        let holder = match self {
            Channel::BleCentralClient { .. } => Role::Initiator,
            Channel::BlePeripheralServer { .. } | Channel::Nfc(_) | Channel::WifiAware(_) => {
                Role::Responder
            }
        };
        match (party, holder) {
            (Party::Holder, role) => role,
            (Party::Reader, Role::Initiator) => Role::Responder,
            (Party::Reader, Role::Responder) => Role::Initiator,
        }
    }

    /// Expand an engagement's connection methods, keeping the holder's order.
    pub fn expand(methods: &[ConnectionMethod]) -> Vec<Channel> {
        let mut channels = vec![];
        for method in methods {
            match method {
                ConnectionMethod::Ble(options) => {
                    if let Some(mode) = &options.peripheral_server_mode {
                        channels.push(Channel::BlePeripheralServer {
                            uuid: mode.uuid,
                            address: mode.ble_device_address.clone(),
                        });
                    }
                    if let Some(mode) = &options.central_client_mode {
                        channels.push(Channel::BleCentralClient { uuid: mode.uuid });
                    }
                }
                ConnectionMethod::Nfc(options) => channels.push(Channel::Nfc(options.clone())),
                ConnectionMethod::WifiAware(options) => {
                    channels.push(Channel::WifiAware(options.clone()))
                }
            }
        }
        channels
    }
}

/// What the local platform can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Ble(Role),
    Nfc,
    WifiAware,
}

impl Capability {
    /// Everything, in both BLE roles.
    pub fn all() -> Vec<Capability> {
        vec![
            Capability::Ble(Role::Initiator),
            Capability::Ble(Role::Responder),
            Capability::Nfc,
            Capability::WifiAware,
        ]
    }
}

/// Channels from `methods` that `party` can use, in the holder's order.
pub fn select_channels(
    methods: &[ConnectionMethod],
    party: Party,
    capabilities: &[Capability],
) -> Result<Vec<Channel>, TransportError> {
    let mut role_mismatch = false;
    let mut selected = vec![];
    for channel in Channel::expand(methods) {
        let usable = match channel.kind() {
            TransportKind::Ble => {
                let role = channel.role_of(party);
                let usable = capabilities.contains(&Capability::Ble(role));
                if !usable && capabilities.iter().any(|c| matches!(c, Capability::Ble(_))) {
                    role_mismatch = true;
                }
                usable
            }
            TransportKind::Nfc => capabilities.contains(&Capability::Nfc),
            TransportKind::WifiAware => capabilities.contains(&Capability::WifiAware),
        };
        if usable {
            selected.push(channel);
        } else {
            tracing::debug!(?channel, %party, "channel not supported locally");
        }
    }
    match (selected.is_empty(), role_mismatch) {
        (false, _) => Ok(selected),
        (true, true) => Err(TransportError::RoleMismatch),
        (true, false) => Err(TransportError::NoUsableTransport),
    }
}

/// A live link that moves units of at most [Transport::mtu] bytes.
#[async_trait]
pub trait Transport: Send {
    fn kind(&self) -> TransportKind;

    fn mtu(&self) -> usize;

    async fn send(&mut self, unit: Vec<u8>) -> Result<(), TransportError>;

    /// The next unit, or `None` once the peer has gone away.
    async fn receive(&mut self) -> Result<Option<Vec<u8>>, TransportError>;

    /// Release the link. Calling it more than once has no further effect.
    fn close(&mut self);
}

/// Platform hook that brings a channel up.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        channel: &Channel,
        role: Role,
    ) -> Result<Box<dyn Transport>, TransportError>;
}

/// Try each channel in turn until one connects.
pub async fn connect_first(
    connector: &dyn Connector,
    channels: &[Channel],
    party: Party,
    connect_timeout: Duration,
    max_message_size: usize,
) -> Result<TransportHandle, TransportError> {
    for channel in channels {
        let role = channel.role_of(party);
        match tokio::time::timeout(connect_timeout, connector.connect(channel, role)).await {
            Ok(Ok(transport)) => {
                tracing::info!(kind = %channel.kind(), %role, %party, "transport connected");
                return Ok(TransportHandle::new(
                    channel.clone(),
                    transport,
                    max_message_size,
                ));
            }
            Ok(Err(error)) => {
                tracing::warn!(kind = %channel.kind(), %error, "connect failed, trying next");
            }
            Err(_) => {
                tracing::warn!(kind = %channel.kind(), "connect timed out, trying next");
            }
        }
    }
    Err(TransportError::NoUsableTransport)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum HandleState {
    Open,
    Active,
    Closed,
}

/// Owns one connected transport on behalf of one session.
pub struct TransportHandle {
    channel: Channel,
    transport: Box<dyn Transport>,
    reassembler: Reassembler,
    state: HandleState,
}

impl std::fmt::Debug for TransportHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportHandle")
            .field("channel", &self.channel)
            .field("state", &self.state)
            .finish()
    }
}

impl TransportHandle {
    pub fn new(channel: Channel, transport: Box<dyn Transport>, max_message_size: usize) -> Self {
        Self {
            channel,
            transport,
            reassembler: Reassembler::new(max_message_size),
            state: HandleState::Open,
        }
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    /// Send a whole message, fragmented to the transport's mtu.
    pub async fn send_message(&mut self, message: &[u8]) -> Result<()> {
        self.ensure_usable()?;
        let units = fragment(message, self.transport.mtu())?;
        tracing::trace!(units = units.len(), bytes = message.len(), "sending message");
        for unit in units {
            self.transport.send(unit).await?;
        }
        Ok(())
    }

    /// Wait for the next whole message. `None` means the peer dropped the link.
    pub async fn receive_message(&mut self) -> Result<Option<Vec<u8>>> {
        self.ensure_usable()?;
        loop {
            let Some(unit) = self.transport.receive().await? else {
                if self.reassembler.is_pending() {
                    tracing::warn!("link dropped in the middle of a message");
                    self.reassembler.reset();
                }
                return Ok(None);
            };
            if let Some(message) = self.reassembler.push(&unit)? {
                return Ok(Some(message));
            }
        }
    }

    pub fn close(&mut self) {
        if self.state != HandleState::Closed {
            self.state = HandleState::Closed;
            self.reassembler.reset();
            self.transport.close();
            tracing::debug!(kind = %self.channel.kind(), "transport closed");
        }
    }

    fn ensure_usable(&mut self) -> Result<(), SessionError> {
        match self.state {
            HandleState::Closed => Err(TransportError::Disconnected.into()),
            HandleState::Open => {
                self.state = HandleState::Active;
                Ok(())
            }
            HandleState::Active => Ok(()),
        }
    }
}

impl Drop for TransportHandle {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::definitions::device_engagement::{
        BleOptions, CentralClientMode, PeripheralServerMode,
    };

    fn both_ble_modes() -> ConnectionMethod {
        ConnectionMethod::Ble(BleOptions {
            peripheral_server_mode: Some(PeripheralServerMode {
                uuid: Uuid::new_v4(),
                ble_device_address: None,
            }),
            central_client_mode: Some(CentralClientMode {
                uuid: Uuid::new_v4(),
            }),
        })
    }

    #[test]
    fn roles_are_complementary() {
        for channel in Channel::expand(&[
            both_ble_modes(),
            ConnectionMethod::Nfc(NfcOptions::default()),
        ]) {
            assert_ne!(
                channel.role_of(Party::Holder),
                channel.role_of(Party::Reader)
            );
        }
    }

    #[test]
    fn selection_keeps_holder_order() {
        let methods = vec![
            ConnectionMethod::WifiAware(WifiOptions::default()),
            both_ble_modes(),
            ConnectionMethod::Nfc(NfcOptions::default()),
        ];
        let channels = select_channels(&methods, Party::Reader, &Capability::all()).unwrap();
        let kinds: Vec<_> = channels.iter().map(Channel::kind).collect();
        assert_eq!(
            kinds,
            vec![
                TransportKind::WifiAware,
                TransportKind::Ble,
                TransportKind::Ble,
                TransportKind::Nfc
            ]
        );
        assert!(matches!(channels[1], Channel::BlePeripheralServer { .. }));
    }

    #[test]
    fn ble_role_mismatch() {
        let methods = vec![ConnectionMethod::Ble(BleOptions {
            peripheral_server_mode: Some(PeripheralServerMode {
                uuid: Uuid::new_v4(),
                ble_device_address: None,
            }),
            central_client_mode: None,
        })];
        // The reader must initiate on a peripheral-server channel.
        assert_eq!(
            select_channels(&methods, Party::Reader, &[Capability::Ble(Role::Responder)]),
            Err(TransportError::RoleMismatch)
        );
        assert_eq!(
            select_channels(&methods, Party::Reader, &[Capability::Nfc]),
            Err(TransportError::NoUsableTransport)
        );
        assert_eq!(
            select_channels(&methods, Party::Reader, &[Capability::Ble(Role::Initiator)])
                .unwrap()
                .len(),
            1
        );
    }
}
