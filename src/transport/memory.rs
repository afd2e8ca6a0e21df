//! In-process transport over bounded tokio channels.
//!
//! Both parties share one [MemoryConnector] (it is cheap to clone). The first side to
//! connect a channel creates the link and parks the far end; the second side picks it
//! up. Used by the scenario tests and by `proximity simulate`.
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::fragment::MORE_FRAGMENTS;
use super::{Channel, Connector, Role, Transport, TransportKind};
use crate::error::TransportError;

/// Default mtu, the smallest a BLE link negotiates with room for one header byte.
pub const DEFAULT_MTU: usize = 128;
const DEFAULT_CAPACITY: usize = 16;

/// Counters shared by every transport a connector hands out.
#[derive(Debug, Default)]
pub struct MemoryStats {
    closes: AtomicUsize,
    units_sent: AtomicUsize,
}

impl MemoryStats {
    /// Number of transports closed so far.
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn units_sent(&self) -> usize {
        self.units_sent.load(Ordering::SeqCst)
    }
}

/// Failures to inject into transports created by a connector.
#[derive(Debug, Default)]
pub struct FaultInjector {
    drop_final_fragment: AtomicBool,
}

impl FaultInjector {
    /// Silently lose the last unit of the next message sent by either side.
    pub fn drop_final_fragment_of_next_message(&self) {
        self.drop_final_fragment.store(true, Ordering::SeqCst);
    }

    fn should_drop(&self, unit: &[u8]) -> bool {
        let is_final = unit.first().is_some_and(|h| h & MORE_FRAGMENTS == 0);
        is_final
            && self
                .drop_final_fragment
                .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
    }
}

pub struct MemoryTransport {
    kind: TransportKind,
    mtu: usize,
    tx: Option<mpsc::Sender<Vec<u8>>>,
    rx: mpsc::Receiver<Vec<u8>>,
    stats: Arc<MemoryStats>,
    faults: Arc<FaultInjector>,
    closed: bool,
}

impl MemoryTransport {
    /// A connected pair of transports.
    pub fn pair(
        kind: TransportKind,
        mtu: usize,
        capacity: usize,
        stats: Arc<MemoryStats>,
        faults: Arc<FaultInjector>,
    ) -> (MemoryTransport, MemoryTransport) {
        let (a_tx, b_rx) = mpsc::channel(capacity);
        let (b_tx, a_rx) = mpsc::channel(capacity);
        let a = MemoryTransport {
            kind,
            mtu,
            tx: Some(a_tx),
            rx: a_rx,
            stats: stats.clone(),
            faults: faults.clone(),
            closed: false,
        };
        let b = MemoryTransport {
            kind,
            mtu,
            tx: Some(b_tx),
            rx: b_rx,
            stats,
            faults,
            closed: false,
        };
        (a, b)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn mtu(&self) -> usize {
        self.mtu
    }

    async fn send(&mut self, unit: Vec<u8>) -> Result<(), TransportError> {
        if unit.len() > self.mtu {
            return Err(TransportError::InvalidMtu(unit.len()));
        }
        let tx = self.tx.as_ref().ok_or(TransportError::Disconnected)?;
        if self.faults.should_drop(&unit) {
            tracing::debug!("fault injector dropped a final fragment");
            return Ok(());
        }
        tx.send(unit)
            .await
            .map_err(|_| TransportError::Disconnected)?;
        self.stats.units_sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn receive(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        if self.closed {
            return Err(TransportError::Disconnected);
        }
        Ok(self.rx.recv().await)
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.tx = None;
            self.rx.close();
            self.stats.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Hands out [MemoryTransport]s; clones share the same parked links and counters.
#[derive(Clone)]
pub struct MemoryConnector {
    mtu: usize,
    capacity: usize,
    parked: Arc<Mutex<Vec<(Channel, MemoryTransport)>>>,
    unreachable: Arc<HashSet<TransportKind>>,
    denied: Arc<HashSet<TransportKind>>,
    stats: Arc<MemoryStats>,
    faults: Arc<FaultInjector>,
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new(DEFAULT_MTU)
    }
}

impl MemoryConnector {
    pub fn new(mtu: usize) -> Self {
        Self {
            mtu,
            capacity: DEFAULT_CAPACITY,
            parked: Default::default(),
            unreachable: Default::default(),
            denied: Default::default(),
            stats: Default::default(),
            faults: Default::default(),
        }
    }

    /// Connecting over `kind` fails with [TransportError::Unreachable].
    pub fn with_unreachable(mut self, kind: TransportKind) -> Self {
        Arc::make_mut(&mut self.unreachable).insert(kind);
        self
    }

    /// Connecting over `kind` fails with [TransportError::PlatformDenied].
    pub fn with_denied(mut self, kind: TransportKind) -> Self {
        Arc::make_mut(&mut self.denied).insert(kind);
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn stats(&self) -> Arc<MemoryStats> {
        self.stats.clone()
    }

    pub fn faults(&self) -> Arc<FaultInjector> {
        self.faults.clone()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(
        &self,
        channel: &Channel,
        role: Role,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let kind = channel.kind();
        if self.denied.contains(&kind) {
            return Err(TransportError::PlatformDenied(kind.to_string()));
        }
        if self.unreachable.contains(&kind) {
            return Err(TransportError::Unreachable(kind.to_string()));
        }
        let mut parked = self
            .parked
            .lock()
            .map_err(|_| TransportError::Unreachable("connector poisoned".into()))?;
        if let Some(idx) = parked.iter().position(|(c, _)| c == channel) {
            let (_, transport) = parked.swap_remove(idx);
            tracing::debug!(%kind, %role, "joined parked memory link");
            return Ok(Box::new(transport));
        }
        let (ours, theirs) = MemoryTransport::pair(
            kind,
            self.mtu,
            self.capacity,
            self.stats.clone(),
            self.faults.clone(),
        );
        parked.push((channel.clone(), theirs));
        tracing::debug!(%kind, %role, "parked memory link");
        Ok(Box::new(ours))
    }
}
