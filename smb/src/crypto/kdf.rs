//! SP800-108 counter-mode key derivation (NIST SP 800-108 §5.1, one HMAC
//! block at a time) plus the MS-SMB2 3.3.5.4 label/context table that
//! turns a session key into the signing, encryption, decryption and
//! application keys a connection actually uses.

use std::cmp::min;

use digest::Mac;
use hmac::Hmac;
use sha2::Sha256;

use crate::protocol::body::Dialect;

/// One SP800-108 counter-mode derivation: `K(i) = PRF(KI, [i]_2 || Label
/// || 0x00 || Context || [L]_2)`, concatenating blocks until `key_len_bits
/// / 8` bytes have been produced.
pub fn derive_key<T: Mac + Clone>(mac: T, label: &[u8], context: &[u8], key_len_bits: u32) -> Vec<u8> {
    let mut buffer = vec![0u8; 4 + label.len() + 1 + context.len() + 4];
    buffer[4..(label.len() + 4)].copy_from_slice(label);

    let ctx_start = 5 + label.len();
    let ctx_end = ctx_start + context.len();
    buffer[ctx_start..ctx_end].copy_from_slice(context);

    let len_bytes = key_len_bits.to_be_bytes();
    let b_start = 5 + label.len() + context.len();
    buffer[b_start..b_start + len_bytes.len()].copy_from_slice(&len_bytes);

    let mut num_written = 0u32;
    let mut num_remaining = key_len_bits / 8;
    let mut output = vec![0u8; num_remaining as usize];
    let mut counter: u32 = 1;
    while num_remaining > 0 {
        buffer[..4].copy_from_slice(&counter.to_be_bytes());
        let block = mac.clone().chain_update(&buffer).finalize().into_bytes();
        let num_to_copy = min(num_remaining, block.len() as u32);
        output[num_written as usize..(num_written + num_to_copy) as usize]
            .copy_from_slice(&block[..num_to_copy as usize]);
        num_written += num_to_copy;
        num_remaining -= num_to_copy;
        counter += 1;
    }
    output
}

fn hmac_sha256(session_key: &[u8]) -> Result<Hmac<Sha256>, smb_core::error::SMBError> {
    <Hmac<Sha256>>::new_from_slice(session_key)
        .map_err(|e| smb_core::error::SMBError::crypto_error(e.to_string()))
}

enum Purpose {
    Signing,
    EncryptionServerToClient,
    DecryptionClientToServer,
    Application,
}

fn label_and_context<'a>(purpose: Purpose, dialect: Dialect, preauth_hash: &'a [u8]) -> (&'static [u8], &'a [u8]) {
    if dialect == Dialect::V3_1_1 {
        let label: &'static [u8] = match purpose {
            Purpose::Signing => b"SMBSigningKey\0",
            Purpose::EncryptionServerToClient => b"SMBC2SCipherKey\0",
            Purpose::DecryptionClientToServer => b"SMBS2CCipherKey\0",
            Purpose::Application => b"SMBAppKey\0",
        };
        (label, preauth_hash)
    } else {
        let (label, context): (&'static [u8], &'static [u8]) = match purpose {
            Purpose::Signing => (b"SMB2AESCMAC\0", b"SmbSign\0"),
            Purpose::EncryptionServerToClient => (b"SMB2AESCCM\0", b"ServerIn \0"),
            Purpose::DecryptionClientToServer => (b"SMB2AESCCM\0", b"ServerOut\0"),
            Purpose::Application => (b"SMB2APP\0", b"SmbRpc\0"),
        };
        (label, context)
    }
}

fn derive(purpose: Purpose, session_key: &[u8], dialect: Dialect, preauth_hash: &[u8], key_len_bits: u32) -> Result<Vec<u8>, smb_core::error::SMBError> {
    if matches!(dialect, Dialect::V2_0_2 | Dialect::V2_1_0) {
        return Ok(session_key.to_vec());
    }
    let (label, context) = label_and_context(purpose, dialect, preauth_hash);
    let mac = hmac_sha256(session_key)?;
    Ok(derive_key(mac, label, context, key_len_bits))
}

/// Signing keys are always 128 bits and, for 2.0.2/2.1.0, simply the
/// session key itself (no SP800-108 derivation applies).
pub fn derive_signing_key(session_key: &[u8], dialect: Dialect, preauth_hash: &[u8]) -> Result<Vec<u8>, smb_core::error::SMBError> {
    derive(Purpose::Signing, session_key, dialect, preauth_hash, 128)
}

pub fn derive_encryption_key(session_key: &[u8], dialect: Dialect, preauth_hash: &[u8], key_len_bits: u32) -> Result<Vec<u8>, smb_core::error::SMBError> {
    derive(Purpose::EncryptionServerToClient, session_key, dialect, preauth_hash, key_len_bits)
}

pub fn derive_decryption_key(session_key: &[u8], dialect: Dialect, preauth_hash: &[u8], key_len_bits: u32) -> Result<Vec<u8>, smb_core::error::SMBError> {
    derive(Purpose::DecryptionClientToServer, session_key, dialect, preauth_hash, key_len_bits)
}

pub fn derive_application_key(session_key: &[u8], dialect: Dialect, preauth_hash: &[u8], key_len_bits: u32) -> Result<Vec<u8>, smb_core::error::SMBError> {
    derive(Purpose::Application, session_key, dialect, preauth_hash, key_len_bits)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The literal MS-SMB2 3.0 signing key test vector.
    #[test]
    fn reproduces_ms_smb2_signing_key_test_vector() {
        let session_key: [u8; 16] = [
            0x7C, 0xD4, 0x51, 0x82, 0x5D, 0x04, 0x50, 0xD2, 0x35, 0x42, 0x4E, 0x44, 0xBA, 0x6E, 0x78, 0xCC,
        ];
        let expected: [u8; 16] = [
            0x0B, 0x7E, 0x9C, 0x5C, 0xAC, 0x36, 0xC0, 0xF6, 0xEA, 0x9A, 0xB2, 0x75, 0x29, 0x8C, 0xED, 0xCE,
        ];
        let signing_key = derive_signing_key(&session_key, Dialect::V3_0_0, &[]).unwrap();
        assert_eq!(signing_key, expected);
    }

    #[test]
    fn pre_smb3_dialects_use_session_key_directly() {
        let session_key = vec![0x11; 16];
        let signing_key = derive_signing_key(&session_key, Dialect::V2_1_0, &[]).unwrap();
        assert_eq!(signing_key, session_key);
    }

    #[test]
    fn v3_1_1_signing_key_depends_on_preauth_hash() {
        let session_key = vec![0x22; 16];
        let a = derive_signing_key(&session_key, Dialect::V3_1_1, &[0xAA; 64]).unwrap();
        let b = derive_signing_key(&session_key, Dialect::V3_1_1, &[0xBB; 64]).unwrap();
        assert_ne!(a, b);
    }
}
