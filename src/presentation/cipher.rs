//! AES-256-GCM session encryption, ISO/IEC 18013-5 §9.1.1.5.
//!
//! The nonce is an 8-byte direction identifier followed by the 4-byte big-endian
//! message counter. Each direction counts from 1 and never repeats a value.
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};

use crate::definitions::session::SessionKeys;
use crate::error::CryptoError;
use crate::transport::Party;

const READER_IDENTIFIER: [u8; 8] = [0, 0, 0, 0, 0, 0, 0, 0];
const DEVICE_IDENTIFIER: [u8; 8] = [0, 0, 0, 0, 0, 0, 0, 1];

/// How far either side of the expected counter a failed message is re-tried, to tell
/// a replayed or reordered message apart from a forged one.
const TRIAL_WINDOW: u32 = 16;

struct Direction {
    cipher: Aes256Gcm,
    identifier: [u8; 8],
    /// Last counter used (outbound) or accepted (inbound).
    counter: u32,
}

impl Direction {
    fn new(key: &[u8], identifier: [u8; 8]) -> Result<Self, CryptoError> {
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| CryptoError::KeyAgreementFailure(e.to_string()))?;
        Ok(Self {
            cipher,
            identifier,
            counter: 0,
        })
    }

    fn nonce(&self, counter: u32) -> [u8; 12] {
        let mut nonce = [0u8; 12];
        nonce[..8].copy_from_slice(&self.identifier);
        nonce[8..].copy_from_slice(&counter.to_be_bytes());
        nonce
    }

    fn open(&self, ciphertext: &[u8], counter: u32) -> Option<Vec<u8>> {
        let nonce = self.nonce(counter);
        let payload = Payload {
            msg: ciphertext,
            aad: b"",
        };
        self.cipher.decrypt(Nonce::from_slice(&nonce), payload).ok()
    }
}

/// Encrypts outbound and decrypts inbound session data for one party.
pub struct SessionCipher {
    outbound: Direction,
    inbound: Direction,
}

impl std::fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCipher")
            .field("outbound_counter", &self.outbound.counter)
            .field("inbound_counter", &self.inbound.counter)
            .finish()
    }
}

impl SessionCipher {
    pub fn new(keys: &SessionKeys, party: Party) -> Result<Self, CryptoError> {
        let reader = Direction::new(keys.sk_reader.as_slice(), READER_IDENTIFIER)?;
        let device = Direction::new(keys.sk_device.as_slice(), DEVICE_IDENTIFIER)?;
        let (outbound, inbound) = match party {
            Party::Reader => (reader, device),
            Party::Holder => (device, reader),
        };
        Ok(Self { outbound, inbound })
    }

    /// Counter of the last message sent.
    pub fn outbound_counter(&self) -> u32 {
        self.outbound.counter
    }

    /// Counter of the last message accepted.
    pub fn inbound_counter(&self) -> u32 {
        self.inbound.counter
    }

    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let counter = self
            .outbound
            .counter
            .checked_add(1)
            .ok_or(CryptoError::CounterMismatch)?;
        // Consumed even if encryption fails.
        self.outbound.counter = counter;
        let nonce = self.outbound.nonce(counter);
        let payload = Payload {
            msg: plaintext,
            aad: b"",
        };
        self.outbound
            .cipher
            .encrypt(Nonce::from_slice(&nonce), payload)
            .map_err(|_| CryptoError::AuthenticationFailure)
    }

    /// Decrypt the next inbound message.
    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let expected = self
            .inbound
            .counter
            .checked_add(1)
            .ok_or(CryptoError::CounterMismatch)?;
        self.decrypt_at(ciphertext, expected)
    }

    /// Decrypt a message the caller believes was sent under `counter`.
    pub fn decrypt_at(&mut self, ciphertext: &[u8], counter: u32) -> Result<Vec<u8>, CryptoError> {
        let expected = self.inbound.counter.wrapping_add(1);
        if counter != expected || expected == 0 {
            tracing::warn!(counter, expected, "inbound counter out of sequence");
            return Err(CryptoError::CounterMismatch);
        }
        if let Some(plaintext) = self.inbound.open(ciphertext, counter) {
            self.inbound.counter = counter;
            return Ok(plaintext);
        }
        let low = counter.saturating_sub(TRIAL_WINDOW).max(1);
        let high = counter.saturating_add(TRIAL_WINDOW);
        let opens_elsewhere = (low..=high)
            .filter(|c| *c != counter)
            .any(|c| self.inbound.open(ciphertext, c).is_some());
        if opens_elsewhere {
            tracing::warn!(expected, "message sealed under another counter");
            Err(CryptoError::CounterMismatch)
        } else {
            Err(CryptoError::AuthenticationFailure)
        }
    }
}

#[cfg(test)]
mod test {
    use rand::{Rng, RngCore};
    use zeroize::Zeroizing;

    use super::*;

    fn keys() -> SessionKeys {
        let mut sk_reader = Zeroizing::new([0u8; 32]);
        let mut sk_device = Zeroizing::new([0u8; 32]);
        rand::thread_rng().fill_bytes(sk_reader.as_mut_slice());
        rand::thread_rng().fill_bytes(sk_device.as_mut_slice());
        SessionKeys {
            sk_reader,
            sk_device,
        }
    }

    fn pair() -> (SessionCipher, SessionCipher) {
        let keys = keys();
        (
            SessionCipher::new(&keys, Party::Reader).unwrap(),
            SessionCipher::new(&keys, Party::Holder).unwrap(),
        )
    }

    #[test]
    fn counters_start_at_one_and_increase() {
        let (mut reader, mut holder) = pair();
        for i in 1..=5u32 {
            let ct = reader.encrypt(format!("request {i}").as_bytes()).unwrap();
            assert_eq!(reader.outbound_counter(), i);
            assert_eq!(holder.decrypt(&ct).unwrap(), format!("request {i}").as_bytes());
            assert_eq!(holder.inbound_counter(), i);
            let ct = holder.encrypt(b"response").unwrap();
            assert_eq!(reader.decrypt(&ct).unwrap(), b"response");
        }
    }

    #[test]
    fn iso_nonce_layout() {
        let (reader, holder) = pair();
        let nonce = reader.outbound.nonce(1);
        assert_eq!(nonce, [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]);
        let nonce = holder.outbound.nonce(0x0102_0304);
        assert_eq!(nonce, [0, 0, 0, 0, 0, 0, 0, 1, 1, 2, 3, 4]);
    }

    #[test]
    fn directions_do_not_cross() {
        let (mut reader, _) = pair();
        let ct = reader.encrypt(b"hello").unwrap();
        // A reflected message does not open on the sender's own inbound side.
        assert_eq!(reader.decrypt(&ct), Err(CryptoError::AuthenticationFailure));
    }

    #[test]
    fn replay_is_a_counter_mismatch() {
        let (mut reader, mut holder) = pair();
        let first = reader.encrypt(b"one").unwrap();
        holder.decrypt(&first).unwrap();
        assert_eq!(holder.decrypt(&first), Err(CryptoError::CounterMismatch));
    }

    #[test]
    fn reordering_is_a_counter_mismatch() {
        let (mut reader, mut holder) = pair();
        let _first = reader.encrypt(b"one").unwrap();
        let second = reader.encrypt(b"two").unwrap();
        assert_eq!(holder.decrypt(&second), Err(CryptoError::CounterMismatch));
    }

    #[test]
    fn explicit_counter_must_be_next() {
        let (mut reader, mut holder) = pair();
        let ct = reader.encrypt(b"one").unwrap();
        assert_eq!(holder.decrypt_at(&ct, 2), Err(CryptoError::CounterMismatch));
        assert_eq!(holder.decrypt_at(&ct, 1).unwrap(), b"one");
    }

    #[test]
    fn any_bit_flip_fails_authentication() {
        let mut rng = rand::thread_rng();
        for _ in 0..64 {
            let (mut reader, mut holder) = pair();
            let mut ct = reader.encrypt(b"a request of some length").unwrap();
            let bit = rng.gen_range(0..ct.len() * 8);
            ct[bit / 8] ^= 1 << (bit % 8);
            assert_eq!(holder.decrypt(&ct), Err(CryptoError::AuthenticationFailure));
            assert_eq!(holder.inbound_counter(), 0);
        }
    }
}
