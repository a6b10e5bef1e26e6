use num_enum::TryFromPrimitiveError;
use smb_core::error::SMBError;
use smb_core::SMBResult;

use crate::byte_helper::{bytes_to_u16, bytes_to_u32, bytes_to_u64, u16_to_bytes, u32_to_bytes, u64_to_bytes};
use crate::protocol::command::Command;
use crate::protocol::flags::HeaderFlags;

pub const PROTOCOL_ID: [u8; 4] = [0xFE, b'S', b'M', b'B'];
pub const STRUCTURE_SIZE: u16 = 64;
pub const HEADER_LEN: usize = 64;

/// The fixed 64-byte SMB2 packet header, little-endian, per the offset
/// table this engine implements: ProtocolID(0,4) StructureSize(4,2)
/// CreditCharge(6,2) Status(8,4) Command(12,2) Credits(14,2) Flags(16,4)
/// NextCommand(20,4) MessageID(24,8) Reserved(32,4) TreeID(36,4)
/// SessionID(40,8) Signature(48,16).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2Header {
    pub credit_charge: u16,
    pub status: u32,
    pub command: Command,
    pub credits: u16,
    pub flags: HeaderFlags,
    pub next_command: u32,
    pub message_id: u64,
    pub reserved: u32,
    pub tree_id: u32,
    pub session_id: u64,
    pub signature: [u8; 16],
}

impl Smb2Header {
    pub fn new(command: Command, message_id: u64, tree_id: u32, session_id: u64) -> Self {
        Self {
            credit_charge: 1,
            status: 0,
            command,
            credits: 1,
            flags: HeaderFlags::empty(),
            next_command: 0,
            message_id,
            reserved: 0,
            tree_id,
            session_id,
            signature: [0; 16],
        }
    }

    /// Parses a header from the front of `bytes`, returning the header and
    /// whatever follows it. Fails unless `ProtocolID` and `StructureSize`
    /// match exactly, per the wire invariant this type enforces.
    pub fn decode(bytes: &[u8]) -> SMBResult<(Self, &[u8])> {
        if bytes.len() < HEADER_LEN {
            return Err(SMBError::payload_too_small(HEADER_LEN, bytes.len()));
        }
        if bytes[0..4] != PROTOCOL_ID {
            return Err(SMBError::parse_error("bad SMB2 ProtocolID"));
        }
        let structure_size = bytes_to_u16(&bytes[4..6]);
        if structure_size != STRUCTURE_SIZE {
            return Err(SMBError::parse_error("SMB2 StructureSize must be 64"));
        }
        let credit_charge = bytes_to_u16(&bytes[6..8]);
        let status = bytes_to_u32(&bytes[8..12]);
        let command = Command::try_from(bytes_to_u16(&bytes[12..14]))
            .map_err(|e: TryFromPrimitiveError<Command>| SMBError::parse_error(e.to_string()))?;
        let credits = bytes_to_u16(&bytes[14..16]);
        let flags = HeaderFlags::from_bits_truncate(bytes_to_u32(&bytes[16..20]));
        let next_command = bytes_to_u32(&bytes[20..24]);
        let message_id = bytes_to_u64(&bytes[24..32]);
        let reserved = bytes_to_u32(&bytes[32..36]);
        let tree_id = bytes_to_u32(&bytes[36..40]);
        let session_id = bytes_to_u64(&bytes[40..48]);
        let mut signature = [0u8; 16];
        signature.copy_from_slice(&bytes[48..64]);
        Ok((
            Self {
                credit_charge,
                status,
                command,
                credits,
                flags,
                next_command,
                message_id,
                reserved,
                tree_id,
                session_id,
                signature,
            },
            &bytes[HEADER_LEN..],
        ))
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&PROTOCOL_ID);
        out[4..6].copy_from_slice(&u16_to_bytes(STRUCTURE_SIZE));
        out[6..8].copy_from_slice(&u16_to_bytes(self.credit_charge));
        out[8..12].copy_from_slice(&u32_to_bytes(self.status));
        out[12..14].copy_from_slice(&u16_to_bytes(self.command as u16));
        out[14..16].copy_from_slice(&u16_to_bytes(self.credits));
        out[16..20].copy_from_slice(&u32_to_bytes(self.flags.bits()));
        out[20..24].copy_from_slice(&u32_to_bytes(self.next_command));
        out[24..32].copy_from_slice(&u64_to_bytes(self.message_id));
        out[32..36].copy_from_slice(&u32_to_bytes(self.reserved));
        out[36..40].copy_from_slice(&u32_to_bytes(self.tree_id));
        out[40..48].copy_from_slice(&u64_to_bytes(self.session_id));
        out[48..64].copy_from_slice(&self.signature);
        out
    }

    /// Zeroes the 16-byte Signature field, matching the layout above, for
    /// MAC computation (the field must read as zero while it is signed).
    pub fn zero_signature(&self) -> Self {
        let mut copy = self.clone();
        copy.signature = [0; 16];
        copy
    }

    /// Builds a response header from this request header: copies identity
    /// fields, sets the Response flag, and grants at least 256 credits
    /// unless the caller asks for a different amount.
    pub fn new_response_header_with_credits(&self, status: u32, credits: Option<u16>) -> Self {
        Self {
            credit_charge: self.credit_charge,
            status,
            command: self.command,
            credits: credits.unwrap_or(256).max(1),
            flags: HeaderFlags::RESPONSE,
            next_command: 0,
            message_id: self.message_id,
            reserved: 0,
            tree_id: self.tree_id,
            session_id: self.session_id,
            signature: [0; 16],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> Smb2Header {
        Smb2Header::new(Command::Negotiate, 7, 0, 0)
    }

    #[test]
    fn header_round_trip() {
        let header = sample_header();
        let (parsed, rest) = Smb2Header::decode(&header.encode()).unwrap();
        assert_eq!(parsed, header);
        assert!(rest.is_empty());
    }

    #[test]
    fn rejects_bad_protocol_id() {
        let mut bytes = sample_header().encode();
        bytes[1] = b'X';
        assert!(Smb2Header::decode(&bytes).is_err());
    }

    #[test]
    fn rejects_wrong_structure_size() {
        let mut bytes = sample_header().encode();
        bytes[4] = 63;
        assert!(Smb2Header::decode(&bytes).is_err());
    }

    #[test]
    fn response_header_sets_response_flag_and_credit_floor() {
        let req = sample_header();
        let resp = req.new_response_header_with_credits(0, Some(0));
        assert!(resp.flags.contains(HeaderFlags::RESPONSE));
        assert_eq!(resp.credits, 1);
    }
}
