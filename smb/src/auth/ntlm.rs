//! NTLM message codec (MS-NLMP 2.2): NEGOTIATE/CHALLENGE/AUTHENTICATE,
//! parsed with `nom` the way the teacher's own
//! `util/auth/ntlm/ntlm_message.rs` does, extended here with a real
//! `parse()` for the challenge message (the teacher's own is `todo!()`)
//! and a finished `authenticate()` that returns a typed result instead
//! of a bare status byte.

use bitflags::bitflags;
use nom::bytes::complete::take;
use nom::combinator::map;
use nom::error::ErrorKind;
use nom::number::complete::{le_u16, le_u32};
use nom::sequence::tuple;
use nom::Err::Error as NomError;
use nom::IResult;
use rand::rngs::ThreadRng;
use rand::RngCore;
use rc4::consts::U16;
use rc4::{Key, Rc4, StreamCipher};

use crate::byte_helper::{u16_to_bytes, u32_to_bytes};
use crate::crypto::ntlm_v1_extended::authenticate_v1_extended;
use crate::crypto::ntlm_v2::authenticate_v2;

pub const NTLM_SIGNATURE: &[u8; 8] = b"NTLMSSP\0";

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NtlmNegotiateFlags: u32 {
        const UNICODE_ENCODING = 0x0000_0001;
        const OEM_ENCODING = 0x0000_0002;
        const TARGET_NAME_SUPPLIED = 0x0000_0004;
        const SIGN = 0x0000_0010;
        const SEAL = 0x0000_0020;
        const DATAGRAM = 0x0000_0040;
        const LAN_MANAGER_SESSION_KEY = 0x0000_0080;
        const NTLM_SESSION_SECURITY = 0x0000_0200;
        const ANONYMOUS = 0x0000_0800;
        const DOMAIN_NAME_SUPPLIED = 0x0000_1000;
        const WORKSTATION_NAME_SUPPLIED = 0x0000_2000;
        const ALWAYS_SIGN = 0x0000_8000;
        const TARGET_TYPE_DOMAIN = 0x0001_0000;
        const TARGET_TYPE_SERVER = 0x0002_0000;
        const EXTENDED_SESSION_SECURITY = 0x0008_0000;
        const IDENTIFY = 0x0010_0000;
        const REQUEST_LM_SESSION_KEY = 0x0040_0000;
        const TARGET_INFO = 0x0080_0000;
        const VERSION = 0x0200_0000;
        const USE_128_BIT_ENCRYPTION = 0x2000_0000;
        const KEY_EXCHANGE = 0x4000_0000;
        const USE_56_BIT_ENCRYPTION = 0x8000_0000;
    }
}

/// Server's default offer: 3.1.1-era servers only need enough of the
/// handshake to extract an NTLMv2 response, so the fixed flag set below
/// is the minimum the client needs to produce one.
pub const SERVER_NEGOTIATE_FLAGS: NtlmNegotiateFlags = NtlmNegotiateFlags::from_bits_truncate(
    NtlmNegotiateFlags::UNICODE_ENCODING.bits()
        | NtlmNegotiateFlags::TARGET_NAME_SUPPLIED.bits()
        | NtlmNegotiateFlags::NTLM_SESSION_SECURITY.bits()
        | NtlmNegotiateFlags::TARGET_TYPE_SERVER.bits()
        | NtlmNegotiateFlags::EXTENDED_SESSION_SECURITY.bits()
        | NtlmNegotiateFlags::TARGET_INFO.bits()
        | NtlmNegotiateFlags::KEY_EXCHANGE.bits(),
);

fn parse_buffer_field(bytes: &[u8]) -> IResult<&[u8], (u16, u32)> {
    let (remaining, length) = le_u16(bytes)?;
    let (remaining, offset) = take(2_usize)(remaining).and_then(|(r, _)| le_u32(r))?;
    Ok((remaining, (length, offset)))
}

fn get_buffer<'a>(length: u16, offset: u32, whole: &'a [u8]) -> IResult<&'a [u8], &'a [u8]> {
    let (remaining, _) = take(offset as usize)(whole)?;
    take(length as usize)(remaining)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NtlmNegotiateMessage {
    pub negotiate_flags: NtlmNegotiateFlags,
    pub domain: String,
    pub workstation: String,
}

impl NtlmNegotiateMessage {
    pub fn parse(bytes: &[u8]) -> IResult<&[u8], Self> {
        let (remaining, _) = take(8_usize)(bytes)?; // signature
        let (remaining, _) = take(4_usize)(remaining)?; // message type
        let (remaining, flags) = map(le_u32, NtlmNegotiateFlags::from_bits_truncate)(remaining)?;
        let (remaining, domain_info) = parse_buffer_field(remaining)?;
        let (remaining, workstation_info) = parse_buffer_field(remaining)?;
        let (_, domain_bytes) = get_buffer(domain_info.0, domain_info.1, bytes)?;
        let (_, workstation_bytes) = get_buffer(workstation_info.0, workstation_info.1, bytes)?;
        Ok((
            remaining,
            Self {
                negotiate_flags: flags,
                domain: String::from_utf8_lossy(domain_bytes).to_string(),
                workstation: String::from_utf8_lossy(workstation_bytes).to_string(),
            },
        ))
    }
}

/// The Type 2 challenge the server sends after a Type 1 NEGOTIATE,
/// carrying the 8-byte server challenge that anchors the rest of the
/// handshake (spec.md §4.3 `PendingAuth`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NtlmChallengeMessage {
    pub target_name: String,
    pub negotiate_flags: NtlmNegotiateFlags,
    pub server_challenge: [u8; 8],
}

impl NtlmChallengeMessage {
    pub fn new(target_name: String, negotiate_flags: NtlmNegotiateFlags) -> Self {
        let mut server_challenge = [0u8; 8];
        ThreadRng::default().fill_bytes(&mut server_challenge);
        Self {
            target_name,
            negotiate_flags,
            server_challenge,
        }
    }

    /// Parses the fixed header plus the target-name buffer field; the
    /// target-info AV-pair list (bytes 40 onward) is not needed by this
    /// engine since it only ever emits challenges, never consumes one.
    pub fn parse(bytes: &[u8]) -> IResult<&[u8], Self> {
        let (remaining, _) = take(8_usize)(bytes)?; // signature
        let (remaining, _) = take(4_usize)(remaining)?; // message type
        let (remaining, target_name_info) = parse_buffer_field(remaining)?;
        let (remaining, flags) = map(le_u32, NtlmNegotiateFlags::from_bits_truncate)(remaining)?;
        let (remaining, challenge) = take(8_usize)(remaining)?;
        let (_, target_name_bytes) = get_buffer(target_name_info.0, target_name_info.1, bytes)?;
        let mut server_challenge = [0u8; 8];
        server_challenge.copy_from_slice(challenge);
        Ok((
            remaining,
            Self {
                target_name: String::from_utf8_lossy(target_name_bytes).to_string(),
                negotiate_flags: flags,
                server_challenge,
            },
        ))
    }

    /// Encodes the Type 2 message: fixed header, target name (encoded
    /// twice, as target-name buffer and as the MsvAvNbDomainName AV pair
    /// inside a minimal target-info list), matching the teacher's own
    /// `as_bytes` layout byte-for-byte.
    pub fn as_bytes(&self) -> Vec<u8> {
        let name: Vec<u8> = self
            .target_name
            .encode_utf16()
            .flat_map(|c| u16_to_bytes(c).to_vec())
            .collect();
        let name_len = name.len() as u16;
        [
            NTLM_SIGNATURE.as_slice(),
            &u32_to_bytes(0x02),
            &u16_to_bytes(name_len),
            &u16_to_bytes(name_len),
            &u32_to_bytes(32 + 8 + 8),
            &u32_to_bytes(self.negotiate_flags.bits()),
            &self.server_challenge,
            &[0u8; 8], // reserved
            &u16_to_bytes(name_len),
            &u16_to_bytes(name_len),
            &u32_to_bytes(32 + 8 + 8 + name_len as u32),
            &name,
            // target info: a single NetBIOS domain-name AV pair then terminator
            &u16_to_bytes(1),
            &u16_to_bytes(name_len),
            &name,
            &u16_to_bytes(2),
            &u16_to_bytes(name_len),
            &name,
            &[0u8; 4],
        ]
        .concat()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NtlmAuthenticateMessage {
    pub negotiate_flags: NtlmNegotiateFlags,
    pub domain_name: String,
    pub user_name: String,
    pub workstation: String,
    pub lm_challenge_response: Vec<u8>,
    pub nt_challenge_response: Vec<u8>,
    pub encrypted_session_key: Vec<u8>,
}

impl NtlmAuthenticateMessage {
    pub fn parse(bytes: &[u8]) -> IResult<&[u8], Self> {
        let (remaining, _) = tuple((
            take(8_usize), // signature
            take(4_usize), // message type
        ))(bytes)?;
        let (remaining, lm_info) = parse_buffer_field(remaining)?;
        let (remaining, nt_info) = parse_buffer_field(remaining)?;
        let (remaining, domain_info) = parse_buffer_field(remaining)?;
        let (remaining, user_info) = parse_buffer_field(remaining)?;
        let (remaining, workstation_info) = parse_buffer_field(remaining)?;
        let (remaining, session_key_info) = parse_buffer_field(remaining)?;
        let (remaining, flags) = map(le_u32, NtlmNegotiateFlags::from_bits_truncate)(remaining)?;

        let (_, lm_challenge_response) = get_buffer(lm_info.0, lm_info.1, bytes)?;
        let (_, nt_challenge_response) = get_buffer(nt_info.0, nt_info.1, bytes)?;
        let (_, domain_bytes) = get_buffer(domain_info.0, domain_info.1, bytes)?;
        let (_, user_bytes) = get_buffer(user_info.0, user_info.1, bytes)?;
        let (_, workstation_bytes) = get_buffer(workstation_info.0, workstation_info.1, bytes)?;
        let (_, encrypted_session_key) = get_buffer(session_key_info.0, session_key_info.1, bytes)?;

        Ok((
            remaining,
            Self {
                negotiate_flags: flags,
                domain_name: decode_utf16(domain_bytes),
                user_name: decode_utf16(user_bytes),
                workstation: decode_utf16(workstation_bytes),
                lm_challenge_response: lm_challenge_response.to_vec(),
                nt_challenge_response: nt_challenge_response.to_vec(),
                encrypted_session_key: encrypted_session_key.to_vec(),
            },
        ))
    }

    pub fn is_anonymous(&self) -> bool {
        self.negotiate_flags.contains(NtlmNegotiateFlags::ANONYMOUS)
            || (self.user_name.is_empty() && self.nt_challenge_response.is_empty())
    }

    fn is_ntlm_v1_extended(&self) -> bool {
        self.lm_challenge_response.len() == 24 && self.lm_challenge_response[0..8] != [0u8; 8]
    }

    /// Validates this AUTHENTICATE message against the challenge issued
    /// for `domain`/`password`, returning the NTLM session base key on
    /// success. Prefers NTLMv2 (spec.md §1.2); falls back to the
    /// NTLMv1-extended path only when the client's response shape rules
    /// out v2 (24-byte LM response with a non-zero client-challenge
    /// prefix), matching `ntlm_authenticate_message.rs::authenticate`'s
    /// branch.
    pub fn validate(&self, domain: &str, password: &str, server_challenge: &[u8; 8]) -> Result<Option<Vec<u8>>, smb_core::error::SMBError> {
        if !self
            .negotiate_flags
            .contains(NtlmNegotiateFlags::EXTENDED_SESSION_SECURITY)
        {
            return Ok(None);
        }
        if self.is_ntlm_v1_extended() {
            let ok = authenticate_v1_extended(password, server_challenge, &self.lm_challenge_response, &self.nt_challenge_response)?;
            return Ok(if ok { Some(Vec::new()) } else { None });
        }
        let (matched, session_base_key) = authenticate_v2(
            domain,
            &self.user_name,
            password,
            server_challenge,
            &self.lm_challenge_response,
            &self.nt_challenge_response,
        )?;
        Ok(if matched { Some(session_base_key) } else { None })
    }

    /// Unwraps the RC4-encrypted session key carried in `KEY_EXCHANGE`
    /// negotiations, matching the teacher's own RC4 unwrap in
    /// `ntlm_authenticate_message.rs::authenticate` (spec.md §1.2).
    pub fn unwrap_session_key(&self, session_base_key: &[u8]) -> Result<Vec<u8>, smb_core::error::SMBError> {
        if !self.negotiate_flags.contains(NtlmNegotiateFlags::KEY_EXCHANGE) || self.encrypted_session_key.is_empty() {
            return Ok(session_base_key.to_vec());
        }
        let key = Key::<U16>::from_slice(session_base_key);
        let mut rc4 = Rc4::new(key);
        let mut output = vec![0u8; self.encrypted_session_key.len()];
        rc4.apply_keystream_b2b(&self.encrypted_session_key, &mut output)
            .map_err(|_| smb_core::error::SMBError::crypto_error("RC4 key/session-key length mismatch"))?;
        Ok(output)
    }
}

fn decode_utf16(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect();
    String::from_utf16_lossy(&units)
}

/// The three NTLM message kinds this engine's state machine drives,
/// matching the teacher's `NTLMMessage` enum shape (minus the `Dummy`
/// placeholder variant, which had no caller).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NtlmMessage {
    Negotiate(NtlmNegotiateMessage),
    Challenge(NtlmChallengeMessage),
    Authenticate(NtlmAuthenticateMessage),
}

impl NtlmMessage {
    pub fn parse(bytes: &[u8]) -> IResult<&[u8], Self> {
        if bytes.len() < 12 || &bytes[0..8] != NTLM_SIGNATURE {
            return Err(NomError(nom::error::Error::new(bytes, ErrorKind::Tag)));
        }
        let message_type = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        match message_type {
            1 => NtlmNegotiateMessage::parse(bytes).map(|(r, m)| (r, NtlmMessage::Negotiate(m))),
            2 => NtlmChallengeMessage::parse(bytes).map(|(r, m)| (r, NtlmMessage::Challenge(m))),
            3 => NtlmAuthenticateMessage::parse(bytes).map(|(r, m)| (r, NtlmMessage::Authenticate(m))),
            _ => Err(NomError(nom::error::Error::new(bytes, ErrorKind::Tag))),
        }
    }
}

/// True iff `bytes` begins with the NTLM signature, i.e. it is raw
/// (non-SPNEGO-wrapped) NTLM rather than a token this engine must first
/// unwrap (spec.md §4.3, §9 open question on keeping this path enabled).
pub fn is_raw_ntlm(bytes: &[u8]) -> bool {
    bytes.len() >= 8 && &bytes[0..8] == NTLM_SIGNATURE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_round_trips_server_challenge() {
        let challenge = NtlmChallengeMessage::new("WORKGROUP".into(), SERVER_NEGOTIATE_FLAGS);
        let bytes = challenge.as_bytes();
        let (_, parsed) = NtlmChallengeMessage::parse(&bytes).unwrap();
        assert_eq!(parsed.server_challenge, challenge.server_challenge);
        assert_eq!(parsed.target_name, "WORKGROUP");
    }

    #[test]
    fn recognizes_raw_ntlm_signature() {
        let challenge = NtlmChallengeMessage::new("X".into(), SERVER_NEGOTIATE_FLAGS);
        assert!(is_raw_ntlm(&challenge.as_bytes()));
        assert!(!is_raw_ntlm(b"not ntlm"));
    }

    #[test]
    fn anonymous_authenticate_detected_by_empty_username() {
        let msg = NtlmAuthenticateMessage {
            negotiate_flags: NtlmNegotiateFlags::empty(),
            domain_name: String::new(),
            user_name: String::new(),
            workstation: String::new(),
            lm_challenge_response: Vec::new(),
            nt_challenge_response: Vec::new(),
            encrypted_session_key: Vec::new(),
        };
        assert!(msg.is_anonymous());
    }
}
