//! Splitting session messages into transport units and putting them back together.
//!
//! Every unit starts with a one-byte header. Bit 0 set means more units of the same
//! message follow; the other bits are reserved and must be zero.
use crate::error::{ProtocolError, TransportError};

pub const MORE_FRAGMENTS: u8 = 0x01;
const RESERVED_BITS: u8 = !MORE_FRAGMENTS;
const HEADER_LEN: usize = 1;

/// Split `message` into units of at most `mtu` bytes, header included.
///
/// An empty message still produces one header-only unit so the peer sees it; that unit
/// fits an mtu of exactly the header size. Any payload needs room for one more byte.
pub fn fragment(message: &[u8], mtu: usize) -> Result<Vec<Vec<u8>>, TransportError> {
    if mtu < HEADER_LEN {
        return Err(TransportError::InvalidMtu(mtu));
    }
    if message.is_empty() {
        return Ok(vec![vec![0x00]]);
    }
    if mtu == HEADER_LEN {
        return Err(TransportError::InvalidMtu(mtu));
    }
    let chunk_len = mtu - HEADER_LEN;
    let count = message.len().div_ceil(chunk_len);
    Ok(message
        .chunks(chunk_len)
        .enumerate()
        .map(|(i, chunk)| {
            let mut unit = Vec::with_capacity(HEADER_LEN + chunk.len());
            unit.push(if i + 1 < count { MORE_FRAGMENTS } else { 0x00 });
            unit.extend_from_slice(chunk);
            unit
        })
        .collect())
}

/// Reassembles one direction of traffic. The protocol is half-duplex, so at most one
/// message is ever in progress.
#[derive(Debug)]
pub struct Reassembler {
    pending: Option<Vec<u8>>,
    max_message_size: usize,
}

impl Reassembler {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            pending: None,
            max_message_size,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Drop any partially received message.
    pub fn reset(&mut self) {
        self.pending = None;
    }

    /// Feed one unit. Returns the complete message once its last unit arrives.
    pub fn push(&mut self, unit: &[u8]) -> Result<Option<Vec<u8>>, ProtocolError> {
        let Some((&header, payload)) = unit.split_first() else {
            self.reset();
            return Err(malformed("empty unit"));
        };
        if header & RESERVED_BITS != 0 {
            self.reset();
            return Err(malformed(format!("reserved header bits set: {header:#04x}")));
        }
        let buffered = self.pending.as_ref().map_or(0, Vec::len);
        if buffered + payload.len() > self.max_message_size {
            self.reset();
            return Err(malformed(format!(
                "message exceeds {} bytes",
                self.max_message_size
            )));
        }
        let mut buffer = self.pending.take().unwrap_or_default();
        buffer.extend_from_slice(payload);
        if header & MORE_FRAGMENTS != 0 {
            self.pending = Some(buffer);
            Ok(None)
        } else {
            Ok(Some(buffer))
        }
    }
}

fn malformed(reason: impl Into<String>) -> ProtocolError {
    ProtocolError::MalformedFragment(reason.into())
}
