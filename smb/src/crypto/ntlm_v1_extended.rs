//! NTLMv1 with extended session security: kept as the fallback path for
//! clients that negotiate NTLMSSP_NEGOTIATE_EXTENDED_SESSIONSECURITY
//! without offering an NTLMv2 response.

use digest::Digest;
use md4::Md4;

use smb_core::SMBResult;

use crate::byte_helper::u16_to_bytes;
use crate::crypto::des::des_long_encrypt;

pub fn authenticate_v1_extended(password: &str, server_challenge: &[u8], lm_response: &[u8], nt_response: &[u8]) -> SMBResult<bool> {
    let client_challenge = &lm_response[0..8];
    let expected = compute_ntlmv1_extended_response(server_challenge, client_challenge, password)?;
    Ok(nt_response == expected)
}

fn compute_ntlmv1_extended_response(server_challenge: &[u8], client_challenge: &[u8], password: &str) -> SMBResult<Vec<u8>> {
    let challenge_hash = Md4::new()
        .chain_update(server_challenge)
        .chain_update(client_challenge)
        .finalize();
    let ntowf = ntowf_v1(password);
    des_long_encrypt(&ntowf, &challenge_hash[0..8])
}

fn ntowf_v1(password: &str) -> Vec<u8> {
    let password = password.encode_utf16().map(u16_to_bytes).collect::<Vec<[u8; 2]>>().concat();
    Md4::new().chain_update(password).finalize().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_matching_response() {
        let password = "letmein";
        let server_challenge = [0x01u8; 8];
        let client_challenge = [0x02u8; 8];
        let mut lm_response = client_challenge.to_vec();
        lm_response.extend_from_slice(&[0u8; 16]);
        let nt_response = compute_ntlmv1_extended_response(&server_challenge, &client_challenge, password).unwrap();

        assert!(authenticate_v1_extended(password, &server_challenge, &lm_response, &nt_response).unwrap());
    }

    #[test]
    fn rejects_wrong_password() {
        let server_challenge = [0x01u8; 8];
        let client_challenge = [0x02u8; 8];
        let mut lm_response = client_challenge.to_vec();
        lm_response.extend_from_slice(&[0u8; 16]);
        let nt_response = compute_ntlmv1_extended_response(&server_challenge, &client_challenge, "correct").unwrap();

        assert!(!authenticate_v1_extended("wrong", &server_challenge, &lm_response, &nt_response).unwrap());
    }
}
