//! TREE_CONNECT request/response bodies (MS-SMB2 2.2.9 / 2.2.10), trimmed
//! to the share-name extraction the dispatcher needs; the share registry
//! itself is an external collaborator.

use smb_core::error::SMBError;
use smb_core::SMBResult;

use crate::byte_helper::{bytes_to_u16, u16_to_bytes, u32_to_bytes};

pub struct TreeConnectRequest {
    pub path: String,
}

impl TreeConnectRequest {
    pub fn parse(body: &[u8]) -> SMBResult<Self> {
        if body.len() < 8 {
            return Err(SMBError::payload_too_small(8, body.len()));
        }
        let path_offset = bytes_to_u16(&body[4..6]) as usize;
        let path_len = bytes_to_u16(&body[6..8]) as usize;
        let local_offset = path_offset.checked_sub(64).ok_or_else(|| {
            SMBError::parse_error("tree connect path offset precedes the body")
        })?;
        if body.len() < local_offset + path_len {
            return Err(SMBError::payload_too_small(local_offset + path_len, body.len()));
        }
        let raw = &body[local_offset..local_offset + path_len];
        let units: Vec<u16> = raw.chunks_exact(2).map(bytes_to_u16).collect();
        let path = String::from_utf16_lossy(&units);
        Ok(Self { path })
    }

    /// The share name is the last `\`-separated component of
    /// `\\server\share`, lower-cased for lookup.
    pub fn share_name(&self) -> String {
        self.path
            .rsplit('\\')
            .next()
            .unwrap_or(&self.path)
            .to_lowercase()
    }
}

pub struct TreeConnectResponse {
    pub share_type: u8,
    pub maximal_access: u32,
}

impl TreeConnectResponse {
    pub fn as_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16);
        out.extend_from_slice(&u16_to_bytes(16)); // StructureSize
        out.push(self.share_type);
        out.push(0); // Reserved
        out.extend_from_slice(&u32_to_bytes(0)); // ShareFlags
        out.extend_from_slice(&u32_to_bytes(0)); // Capabilities
        out.extend_from_slice(&u32_to_bytes(self.maximal_access));
        out
    }
}
