//! NetBIOS session-service framing (RFC 1001/1002 §4.3.1): a 4-byte
//! header of a 1-byte session packet type followed by a 24-bit
//! big-endian length, then that many bytes of payload. This connection
//! engine only ever answers SESSION MESSAGE and SESSION KEEP ALIVE;
//! every other session packet type is a fatal framing error and the
//! connection is torn down.

use std::fmt;

use smb_core::error::SMBError;
use smb_core::SMBResult;

pub const HEADER_LEN: usize = 4;
pub const SESSION_MESSAGE: u8 = 0x00;
pub const SESSION_KEEP_ALIVE: u8 = 0x85;

/// The SMB1 dialect negotiate this engine still recognizes, to answer it
/// with a single SMB2 NEGOTIATE upgrade response rather than a protocol
/// error.
pub const SMB1_NEGOTIATE_PREFIX: [u8; 4] = [0xFF, b'S', b'M', b'B'];

/// Below this, a SESSION MESSAGE payload can't even carry the SMB1
/// upgrade prefix.
pub const MIN_FRAME_LEN: usize = 4;

/// Bound on a single NetBIOS payload this engine will buffer before
/// closing the connection as a DoS precaution, independent of (and
/// tighter than) the 24-bit length field's own ceiling.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    TooLarge(usize),
    TooSmall(usize),
    FatalSessionType(u8),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooLarge(len) => write!(f, "NetBIOS payload of {len} bytes exceeds the configured bound"),
            Self::TooSmall(len) => write!(f, "NetBIOS payload of {len} bytes is too small to be SMB"),
            Self::FatalSessionType(t) => write!(f, "unsupported NetBIOS session packet type {t:#04x}"),
        }
    }
}

impl std::error::Error for FrameError {}

impl From<FrameError> for SMBError {
    fn from(value: FrameError) -> Self {
        SMBError::parse_error(value.to_string())
    }
}

/// Splits a 4-byte NetBIOS session header into its packet type and
/// 24-bit big-endian payload length.
pub fn decode_header(header: [u8; HEADER_LEN]) -> (u8, u32) {
    let len = ((header[1] as u32) << 16) | ((header[2] as u32) << 8) | header[3] as u32;
    (header[0], len)
}

/// Builds a SESSION MESSAGE header for a payload of the given length.
pub fn encode_header(payload_len: usize) -> SMBResult<[u8; HEADER_LEN]> {
    if payload_len > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge(payload_len).into());
    }
    let len = payload_len as u32;
    Ok([
        SESSION_MESSAGE,
        ((len >> 16) & 0xFF) as u8,
        ((len >> 8) & 0xFF) as u8,
        (len & 0xFF) as u8,
    ])
}

pub fn is_smb1_negotiate(payload: &[u8]) -> bool {
    payload.len() >= MIN_FRAME_LEN && payload[0..4] == SMB1_NEGOTIATE_PREFIX
}

/// The result of pulling one frame off the wire: either an SMB payload to
/// hand to the dispatcher, or notice that the peer only sent a keepalive
/// and the caller should read again.
#[derive(Debug)]
pub enum ReadOutcome {
    Payload(Vec<u8>),
    KeepAlive,
}

#[cfg(feature = "async")]
pub mod io {
    use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

    use smb_core::error::SMBError;
    use smb_core::SMBResult;

    use super::{decode_header, encode_header, FrameError, ReadOutcome, HEADER_LEN, SESSION_KEEP_ALIVE, SESSION_MESSAGE};

    /// Reads one NetBIOS frame, enforcing `max_len` as the DoS bound on
    /// the payload the caller is willing to buffer.
    pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R, max_len: usize) -> SMBResult<ReadOutcome> {
        let mut header = [0u8; HEADER_LEN];
        reader.read_exact(&mut header).await.map_err(SMBError::io_error)?;
        let (session_type, len) = decode_header(header);
        match session_type {
            SESSION_MESSAGE => {
                let len = len as usize;
                if len > max_len {
                    return Err(FrameError::TooLarge(len).into());
                }
                let mut payload = vec![0u8; len];
                reader.read_exact(&mut payload).await.map_err(SMBError::io_error)?;
                Ok(ReadOutcome::Payload(payload))
            }
            SESSION_KEEP_ALIVE => Ok(ReadOutcome::KeepAlive),
            other => Err(FrameError::FatalSessionType(other).into()),
        }
    }

    pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> SMBResult<()> {
        let header = encode_header(payload.len())?;
        writer.write_all(&header).await.map_err(SMBError::io_error)?;
        writer.write_all(payload).await.map_err(SMBError::io_error)?;
        writer.flush().await.map_err(SMBError::io_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_session_message_header() {
        let header = encode_header(1024).unwrap();
        assert_eq!(decode_header(header), (SESSION_MESSAGE, 1024));
    }

    #[test]
    fn rejects_oversized_payload() {
        assert!(encode_header(MAX_FRAME_LEN + 1).is_err());
    }

    #[test]
    fn recognizes_smb1_negotiate_prefix() {
        let mut payload = SMB1_NEGOTIATE_PREFIX.to_vec();
        payload.extend_from_slice(&[0; 4]);
        assert!(is_smb1_negotiate(&payload));
        assert!(!is_smb1_negotiate(&[0xFE, b'S', b'M', b'B']));
    }
}
