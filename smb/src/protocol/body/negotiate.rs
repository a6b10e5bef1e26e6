//! NEGOTIATE request/response bodies (MS-SMB2 2.2.3 / 2.2.4), trimmed to
//! the fields the connection engine itself consumes: dialect selection,
//! the client GUID carried into the pre-auth hash, and the security
//! buffer offset/length that wraps the SPNEGO token the engine begins
//! driving in the very first round of SESSION_SETUP.

use uuid::Uuid;

use smb_core::error::SMBError;
use smb_core::SMBResult;

use crate::byte_helper::{bytes_to_u16, bytes_to_u32, u16_to_bytes, u32_to_bytes, u64_to_bytes};

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Dialect {
    V2_0_2 = 0x0202,
    V2_1_0 = 0x0210,
    V3_0_0 = 0x0300,
    V3_0_2 = 0x0302,
    V3_1_1 = 0x0311,
}

impl Dialect {
    pub const SUPPORTED: [Dialect; 5] = [
        Dialect::V2_0_2,
        Dialect::V2_1_0,
        Dialect::V3_0_0,
        Dialect::V3_0_2,
        Dialect::V3_1_1,
    ];

    pub fn from_u16(value: u16) -> Option<Self> {
        Dialect::SUPPORTED.into_iter().find(|d| *d as u16 == value)
    }

    pub fn requires_preauth_integrity(self) -> bool {
        matches!(self, Dialect::V3_1_1)
    }
}

#[derive(Debug, Clone)]
pub struct NegotiateRequest {
    pub dialects: Vec<u16>,
    pub security_mode: u16,
    pub client_guid: Uuid,
}

impl NegotiateRequest {
    pub fn parse(body: &[u8]) -> SMBResult<Self> {
        if body.len() < 36 {
            return Err(SMBError::payload_too_small(36, body.len()));
        }
        let dialect_count = bytes_to_u16(&body[2..4]) as usize;
        let security_mode = bytes_to_u16(&body[4..6]);
        let mut client_guid = [0u8; 16];
        client_guid.copy_from_slice(&body[12..28]);
        let dialects_start = 36;
        let dialects_end = dialects_start + dialect_count * 2;
        if body.len() < dialects_end {
            return Err(SMBError::payload_too_small(dialects_end, body.len()));
        }
        let dialects = body[dialects_start..dialects_end]
            .chunks_exact(2)
            .map(bytes_to_u16)
            .collect();
        Ok(Self {
            dialects,
            security_mode,
            client_guid: Uuid::from_bytes(client_guid),
        })
    }

    /// Highest dialect this engine supports that the client also offered,
    /// MS-SMB2 3.3.5.4's negotiate selection rule restricted to the
    /// versions this connection engine implements.
    pub fn select_dialect(&self) -> Option<Dialect> {
        Dialect::SUPPORTED
            .iter()
            .rev()
            .copied()
            .find(|d| self.dialects.contains(&(*d as u16)))
    }
}

pub struct NegotiateResponse {
    pub security_mode: u16,
    pub dialect: Dialect,
    pub server_guid: Uuid,
    pub capabilities: u32,
    pub max_transact_size: u32,
    pub max_read_size: u32,
    pub max_write_size: u32,
    pub security_buffer: Vec<u8>,
}

impl NegotiateResponse {
    /// Encodes the fixed 64-byte structure, `StructureSize=65` (MS-SMB2's
    /// convention of counting one byte of the variable-length `Buffer`
    /// field in the structure size), followed by the SPNEGO security
    /// buffer itself. `SecurityBufferOffset` is fixed at 128 (64-byte
    /// header + 64-byte fixed body). When `security_buffer` is empty a
    /// single zero `Buffer` byte is still emitted, so the body is always
    /// at least 65 bytes, matching the upgrade scenario this engine must
    /// reproduce exactly.
    pub fn as_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 + self.security_buffer.len().max(1));
        out.extend_from_slice(&u16_to_bytes(65)); // StructureSize
        out.extend_from_slice(&u16_to_bytes(self.security_mode));
        out.extend_from_slice(&u16_to_bytes(self.dialect as u16));
        out.extend_from_slice(&u16_to_bytes(0)); // NegotiateContextCount/Reserved
        out.extend_from_slice(self.server_guid.as_bytes());
        out.extend_from_slice(&u32_to_bytes(self.capabilities));
        out.extend_from_slice(&u32_to_bytes(self.max_transact_size));
        out.extend_from_slice(&u32_to_bytes(self.max_read_size));
        out.extend_from_slice(&u32_to_bytes(self.max_write_size));
        out.extend_from_slice(&u64_to_bytes(0)); // SystemTime
        out.extend_from_slice(&u64_to_bytes(0)); // ServerStartTime
        out.extend_from_slice(&u16_to_bytes(128)); // SecurityBufferOffset
        out.extend_from_slice(&u16_to_bytes(self.security_buffer.len() as u16));
        out.extend_from_slice(&u32_to_bytes(0)); // Reserved2
        if self.security_buffer.is_empty() {
            out.push(0); // Buffer (the one byte StructureSize=65 accounts for)
        } else {
            out.extend_from_slice(&self.security_buffer);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_highest_common_dialect() {
        let req = NegotiateRequest {
            dialects: vec![0x0202, 0x0210, 0x0300],
            security_mode: 1,
            client_guid: Uuid::nil(),
        };
        assert_eq!(req.select_dialect(), Some(Dialect::V3_0_0));
    }

    #[test]
    fn no_overlap_selects_nothing() {
        let req = NegotiateRequest {
            dialects: vec![0x9999],
            security_mode: 0,
            client_guid: Uuid::nil(),
        };
        assert_eq!(req.select_dialect(), None);
    }

    #[test]
    fn v3_1_1_requires_preauth_integrity() {
        assert!(Dialect::V3_1_1.requires_preauth_integrity());
        assert!(!Dialect::V2_0_2.requires_preauth_integrity());
    }

    /// spec.md §8 Scenario 1: the SMB1 upgrade response body is exactly
    /// 65 bytes, even with no security buffer to carry.
    #[test]
    fn empty_security_buffer_still_yields_a_65_byte_body() {
        let response = NegotiateResponse {
            security_mode: 1,
            dialect: Dialect::V2_0_2,
            server_guid: Uuid::nil(),
            capabilities: 0,
            max_transact_size: 0,
            max_read_size: 0,
            max_write_size: 0,
            security_buffer: Vec::new(),
        };
        let body = response.as_bytes();
        assert_eq!(body.len(), 65);
        assert_eq!(&body[0..2], &u16_to_bytes(65));
    }
}
