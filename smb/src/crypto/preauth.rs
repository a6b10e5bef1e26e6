//! SMB 3.1.1 pre-authentication integrity (MS-SMB2 3.1.4.1): a running
//! SHA-512 hash chain over the raw wire bytes of every NEGOTIATE request
//! and, once 3.1.1 is negotiated, every NEGOTIATE/SESSION_SETUP response.
//! There is no teacher equivalent for this; the chain itself is ordinary
//! Rust, grounded directly in the wire behavior this connection engine
//! must reproduce.

use std::sync::Mutex;

use sha2::{Digest, Sha512};

/// A single connection's pre-auth hash chain. `H(0)` is 64 zero bytes;
/// each update folds in the next message's raw bytes.
pub struct PreauthHashState {
    hash: Mutex<[u8; 64]>,
}

impl Default for PreauthHashState {
    fn default() -> Self {
        Self {
            hash: Mutex::new([0u8; 64]),
        }
    }
}

impl PreauthHashState {
    pub fn new() -> Self {
        Self::default()
    }

    /// `H := SHA-512(H || raw_message)`. Called unconditionally for every
    /// NEGOTIATE request, and for NEGOTIATE/SESSION_SETUP responses only
    /// once the connection has negotiated 3.1.1.
    pub fn update(&self, raw_message: &[u8]) {
        let mut guard = self.hash.lock().expect("preauth hash mutex poisoned");
        let mut hasher = Sha512::new();
        hasher.update(&*guard);
        hasher.update(raw_message);
        guard.copy_from_slice(&hasher.finalize());
    }

    /// Returns a copy of the current hash value; callers never get a
    /// reference into the internal buffer.
    pub fn current(&self) -> [u8; 64] {
        *self.hash.lock().expect("preauth hash mutex poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_all_zero() {
        let state = PreauthHashState::new();
        assert_eq!(state.current(), [0u8; 64]);
    }

    #[test]
    fn update_is_order_dependent() {
        let a = PreauthHashState::new();
        a.update(b"first");
        a.update(b"second");

        let b = PreauthHashState::new();
        b.update(b"second");
        b.update(b"first");

        assert_ne!(a.current(), b.current());
    }

    #[test]
    fn matches_manual_chain_computation() {
        let state = PreauthHashState::new();
        state.update(b"negotiate-request");

        let mut hasher = Sha512::new();
        hasher.update([0u8; 64]);
        hasher.update(b"negotiate-request");
        let expected: [u8; 64] = hasher.finalize().into();

        assert_eq!(state.current(), expected);
    }
}
