use crate::byte_helper::u16_to_bytes;

/// The minimal 9-byte SMB2 error response body (MS-SMB2 2.2.2):
/// StructureSize=9, ErrorContextCount(1), Reserved(1), ByteCount(4)=0.
pub fn minimal_error_body() -> Vec<u8> {
    let mut out = Vec::with_capacity(9);
    out.extend_from_slice(&u16_to_bytes(9));
    out.push(0); // ErrorContextCount
    out.push(0); // Reserved
    out.extend_from_slice(&[0; 4]); // ByteCount
    out
}
