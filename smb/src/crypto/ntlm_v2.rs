//! NTLMv2 authentication (MS-NLMP 3.3.2): NTOWFv2/LMOWFv2 key derivation
//! and NT-proof-string validation against a client's Type 3 response.

use hmac::{Hmac, Mac};
use md4::Md4;
use md5::Md5;

use smb_core::error::SMBError;
use smb_core::SMBResult;

use crate::byte_helper::u16_to_bytes;

/// Validates an NTLMv2 response, returning whether it matched and, if
/// so, the session base key derived from it.
pub fn authenticate_v2(domain: &str, account: &str, password: &str, server_challenge: &[u8], lm_response: &[u8], nt_response: &[u8]) -> SMBResult<(bool, Vec<u8>)> {
    let server_name = &nt_response[44..(nt_response.len() - 4)];
    let (nt_expected, lm_expected) = compute_ntlm_v2_response(server_challenge, &nt_response[16..], server_name, password, account, domain)?;

    let matched = nt_expected == nt_response || lm_expected == lm_response;
    if !matched {
        return Ok((false, Vec::new()));
    }

    let response_key_nt = ntowf_v2(password, account, domain)?;
    let nt_proof_str = &nt_response[0..16];
    let session_base_key = new_hmac_from_slice(&response_key_nt)?
        .chain_update(nt_proof_str)
        .finalize()
        .into_bytes()
        .to_vec();
    Ok((matched, session_base_key))
}

fn compute_ntlm_v2_response(server_challenge: &[u8], client_challenge: &[u8], server_name: &[u8], password: &str, account: &str, domain: &str) -> SMBResult<(Vec<u8>, Vec<u8>)> {
    let time = &client_challenge[8..16];
    let client_challenge = &client_challenge[16..24];
    let temp = [
        &[1u8][..],
        &[1u8],
        &[0; 6],
        time,
        client_challenge,
        &[0; 4],
        server_name,
        &[0; 4],
    ]
    .concat();

    let key = lmowf_v2(password, account, domain)?;
    let nt_proof_str = new_hmac_from_slice(&key)?
        .chain_update(server_challenge)
        .chain_update(&temp)
        .finalize()
        .into_bytes();
    let nt_challenge_response = [nt_proof_str.as_slice(), &temp].concat();

    let lm_challenge_response_1 = new_hmac_from_slice(&key)?
        .chain_update(server_challenge)
        .chain_update(client_challenge)
        .finalize()
        .into_bytes();
    let lm_challenge_response = [lm_challenge_response_1.as_slice(), client_challenge].concat();

    Ok((nt_challenge_response, lm_challenge_response))
}

fn lmowf_v2(password: &str, user: &str, domain: &str) -> SMBResult<Vec<u8>> {
    ntowf_v2(password, user, domain)
}

fn ntowf_v2(password: &str, user: &str, domain: &str) -> SMBResult<Vec<u8>> {
    use digest::Digest;

    let password = password.encode_utf16().map(u16_to_bytes).collect::<Vec<[u8; 2]>>().concat();
    let password_hash = Md4::digest(password);
    let text = user.to_uppercase() + domain;
    let bytes = text.encode_utf16().map(u16_to_bytes).collect::<Vec<[u8; 2]>>().concat();
    let result = new_hmac_from_slice(password_hash.as_slice())?
        .chain_update(&bytes)
        .finalize()
        .into_bytes();
    Ok(result.to_vec())
}

fn new_hmac_from_slice(slice: &[u8]) -> SMBResult<Hmac<Md5>> {
    <Hmac<Md5>>::new_from_slice(slice).map_err(|_| SMBError::crypto_error("invalid length for key"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_nt_response(server_challenge: &[u8], client_challenge: &[u8], server_name: &[u8], password: &str, account: &str, domain: &str) -> Vec<u8> {
        let time = [0u8; 8];
        let padded_client_challenge = [&[0u8; 8][..], &time, client_challenge, &[0u8; 4], server_name, &[0u8; 4]].concat();
        let (nt, _) = compute_ntlm_v2_response(server_challenge, &padded_client_challenge, server_name, password, account, domain).unwrap();
        nt
    }

    #[test]
    fn accepts_matching_ntlmv2_response() {
        let server_challenge = [0x10u8; 8];
        let client_challenge = [0x20u8; 8];
        let server_name = b"WORKGROUP";
        let nt_response = make_nt_response(&server_challenge, &client_challenge, server_name, "hunter2", "alice", "WORKGROUP");

        let (ok, key) = authenticate_v2("WORKGROUP", "alice", "hunter2", &server_challenge, &[], &nt_response).unwrap();
        assert!(ok);
        assert_eq!(key.len(), 16);
    }

    #[test]
    fn rejects_wrong_password() {
        let server_challenge = [0x10u8; 8];
        let client_challenge = [0x20u8; 8];
        let server_name = b"WORKGROUP";
        let nt_response = make_nt_response(&server_challenge, &client_challenge, server_name, "hunter2", "alice", "WORKGROUP");

        let (ok, _) = authenticate_v2("WORKGROUP", "alice", "wrongpass", &server_challenge, &[], &nt_response).unwrap();
        assert!(!ok);
    }
}
