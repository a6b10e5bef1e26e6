//! SESSION_SETUP request/response bodies (MS-SMB2 2.2.5 / 2.2.6), trimmed
//! to the security buffer the SPNEGO/NTLM state machine needs.

use smb_core::error::SMBError;
use smb_core::SMBResult;

use crate::byte_helper::{bytes_to_u16, u16_to_bytes};

pub struct SessionSetupRequest {
    pub security_mode: u8,
    pub previous_session_id: u64,
    pub security_buffer: Vec<u8>,
}

impl SessionSetupRequest {
    /// `body` is the command body as split out by compound processing,
    /// i.e. it starts at StructureSize, not at the SMB2 header.
    pub fn parse(body: &[u8]) -> SMBResult<Self> {
        if body.len() < 24 {
            return Err(SMBError::payload_too_small(24, body.len()));
        }
        let security_mode = body[2];
        let buffer_offset = bytes_to_u16(&body[12..14]) as usize;
        let buffer_len = bytes_to_u16(&body[14..16]) as usize;
        let previous_session_id = crate::byte_helper::bytes_to_u64(&body[16..24]);
        // buffer_offset is measured from the start of the SMB2 header (64
        // bytes before this body slice begins).
        let local_offset = buffer_offset.checked_sub(64).ok_or_else(|| {
            SMBError::parse_error("security buffer offset precedes the body")
        })?;
        if body.len() < local_offset + buffer_len {
            return Err(SMBError::payload_too_small(local_offset + buffer_len, body.len()));
        }
        let security_buffer = body[local_offset..local_offset + buffer_len].to_vec();
        Ok(Self {
            security_mode,
            previous_session_id,
            security_buffer,
        })
    }
}

pub struct SessionSetupResponse {
    pub session_flags: u16,
    pub security_buffer: Vec<u8>,
}

impl SessionSetupResponse {
    pub fn as_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.security_buffer.len());
        out.extend_from_slice(&u16_to_bytes(9)); // StructureSize
        out.extend_from_slice(&u16_to_bytes(self.session_flags));
        out.extend_from_slice(&u16_to_bytes(72)); // SecurityBufferOffset (64 header + 8 fixed body)
        out.extend_from_slice(&u16_to_bytes(self.security_buffer.len() as u16));
        out.extend_from_slice(&self.security_buffer);
        out
    }
}
