//! A single SMB2 message within a compound chain: one header plus the body
//! bytes belonging to it, with the `NextCommand` splitting point already
//! resolved so callers never have to re-derive it.

use smb_core::error::SMBError;
use smb_core::SMBResult;

use crate::protocol::header::{Smb2Header, HEADER_LEN};

#[derive(Debug, Clone)]
pub struct Smb2Message {
    pub header: Smb2Header,
    pub body: Vec<u8>,
    /// The exact bytes this message occupied on the wire (header through
    /// the end of its body, before `NextCommand` padding), as read off the
    /// socket. Kept alongside the parsed `header`/`body` so the pre-auth
    /// integrity hash (spec.md §4.4) can fold in the real inbound bytes
    /// rather than a re-encoding of the parsed header, which would only be
    /// bit-identical if every reserved field round-trips exactly.
    pub raw: Vec<u8>,
}

impl Smb2Message {
    /// Builds a message the engine is constructing itself (a response, or
    /// a synthetic request such as the SMB1-upgrade NEGOTIATE) rather than
    /// one read off the wire. `raw` is left empty: nothing in the pipeline
    /// ever reads it back out of a message built this way, only `decode()`
    /// populates it meaningfully.
    pub fn response(header: Smb2Header, body: Vec<u8>) -> Self {
        Self { header, body, raw: Vec::new() }
    }

    /// Splits the first chained message off the front of `bytes`, returning
    /// it along with whatever related messages still follow. When
    /// `NextCommand` is zero the body runs to the end of `bytes` and the
    /// returned tail is empty.
    pub fn decode(bytes: &[u8]) -> SMBResult<(Self, &[u8])> {
        let (header, after_header) = Smb2Header::decode(bytes)?;
        if header.next_command == 0 {
            return Ok((
                Self {
                    header,
                    body: after_header.to_vec(),
                    raw: bytes.to_vec(),
                },
                &[],
            ));
        }
        let next_command = header.next_command as usize;
        if next_command < HEADER_LEN {
            return Err(SMBError::parse_error("NextCommand precedes the header it follows"));
        }
        let body_len = next_command - HEADER_LEN;
        if after_header.len() < body_len {
            return Err(SMBError::payload_too_small(body_len, after_header.len()));
        }
        let body = after_header[..body_len].to_vec();
        let raw = bytes[..next_command].to_vec();
        let tail = &bytes[next_command..];
        Ok((Self { header, body, raw }, tail))
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.body.len());
        out.extend_from_slice(&self.header.encode());
        out.extend_from_slice(&self.body);
        out
    }

    /// Splits every chained message out of a compound request buffer.
    pub fn decode_compound(mut bytes: &[u8]) -> SMBResult<Vec<Self>> {
        let mut messages = Vec::new();
        loop {
            let (message, tail) = Self::decode(bytes)?;
            messages.push(message);
            if tail.is_empty() {
                return Ok(messages);
            }
            bytes = tail;
        }
    }

    /// Encodes a chain of related responses, filling in `NextCommand` for
    /// every message but the last and 8-byte-aligning each boundary as
    /// MS-SMB2 3.3.4.1 requires of the server side of a compound chain.
    pub fn encode_compound(messages: &[Self]) -> Vec<u8> {
        let mut out = Vec::new();
        for (i, message) in messages.iter().enumerate() {
            let is_last = i + 1 == messages.len();
            let mut header = message.header.clone();
            let mut body = message.body.clone();
            if !is_last {
                let pad = (8 - (body.len() % 8)) % 8;
                body.extend(std::iter::repeat(0).take(pad));
                header.next_command = (HEADER_LEN + body.len()) as u32;
            } else {
                header.next_command = 0;
            }
            out.extend_from_slice(&header.encode());
            out.extend_from_slice(&body);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::command::Command;

    #[test]
    fn single_message_has_empty_tail() {
        let header = Smb2Header::new(Command::Negotiate, 1, 0, 0);
        let mut bytes = header.encode().to_vec();
        bytes.extend_from_slice(&[1, 2, 3]);
        let (message, tail) = Smb2Message::decode(&bytes).unwrap();
        assert_eq!(message.body, vec![1, 2, 3]);
        assert!(tail.is_empty());
    }

    #[test]
    fn compound_chain_splits_on_next_command() {
        let mut header_a = Smb2Header::new(Command::TreeConnect, 1, 0, 0);
        let body_a = vec![0xAA; 8];
        header_a.next_command = (HEADER_LEN + body_a.len()) as u32;
        let header_b = Smb2Header::new(Command::Create, 2, 0, 0);
        let body_b = vec![0xBB; 4];

        let mut bytes = header_a.encode().to_vec();
        bytes.extend_from_slice(&body_a);
        bytes.extend_from_slice(&header_b.encode());
        bytes.extend_from_slice(&body_b);

        let messages = Smb2Message::decode_compound(&bytes).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].body, body_a);
        assert_eq!(messages[1].body, body_b);
    }

    #[test]
    fn round_trips_through_encode_compound() {
        let header_a = Smb2Header::new(Command::TreeConnect, 1, 0, 0);
        let header_b = Smb2Header::new(Command::Create, 2, 0, 0);
        let messages = vec![
            Smb2Message::response(header_a, vec![0xAA; 3]),
            Smb2Message::response(header_b, vec![0xBB; 4]),
        ];
        let encoded = Smb2Message::encode_compound(&messages);
        let decoded = Smb2Message::decode_compound(&encoded).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].body, vec![0xAA; 3]);
        assert_eq!(decoded[1].body, vec![0xBB; 4]);
    }
}
