//! SPNEGO (RFC 4178) token codec: hand-rolled DER tag/length parsing,
//! matching the donor `spnego_token_response.rs`/`util.rs` approach
//! (neither tree actually exercises the `der` crate sitting in the
//! teacher's `Cargo.toml` — see DESIGN.md's dropped-dependency note).

use smb_core::error::SMBError;
use smb_core::SMBResult;

pub const NEG_TOKEN_INIT_TAG: u8 = 0xA0;
pub const NEG_TOKEN_RESP_TAG: u8 = 0xA1;

const NEG_STATE_TAG: u8 = 0xA0;
const MECH_TYPE_LIST_TAG: u8 = 0xA0;
const MECH_TOKEN_TAG: u8 = 0xA2;
const MECH_LIST_MIC_TAG: u8 = 0xA3;
const SUPPORTED_MECH_TAG: u8 = 0xA1;
const RESPONSE_TOKEN_TAG: u8 = 0xA2;

const APPLICATION_TAG: u8 = 0x60;
const DER_SEQUENCE_TAG: u8 = 0x30;
const DER_OID_TAG: u8 = 0x06;
const DER_BYTE_ARRAY_TAG: u8 = 0x04;
const DER_ENUM_TAG: u8 = 0x0A;

pub const SPNEGO_OID: [u8; 6] = [0x2b, 0x06, 0x01, 0x05, 0x05, 0x02];
pub const NTLMSSP_OID: [u8; 10] = [0x2b, 0x06, 0x01, 0x04, 0x01, 0x82, 0x37, 0x02, 0x02, 0x0a];

/// MS-SMB2 6.1's standard Kerberos V5 OID `1.2.840.113554.1.2.2`,
/// encoded per DER's multi-byte base-128 integer rule.
pub const KERBEROS_V5_OID: [u8; 9] = [0x2a, 0x86, 0x48, 0x86, 0xf7, 0x12, 0x01, 0x02, 0x02];
/// MS-SMB2 6.1's Microsoft Kerberos V5 OID `1.2.840.48018.1.2.2`.
pub const KERBEROS_V5_MS_OID: [u8; 9] = [0x2a, 0x86, 0x48, 0x82, 0xf7, 0x12, 0x01, 0x02, 0x02];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiateState {
    AcceptCompleted = 0x00,
    AcceptIncomplete = 0x01,
    Reject = 0x02,
    RequestMic = 0x03,
}

impl NegotiateState {
    fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0x00 => Self::AcceptCompleted,
            0x01 => Self::AcceptIncomplete,
            0x02 => Self::Reject,
            0x03 => Self::RequestMic,
            _ => return None,
        })
    }
}

fn read_length(buffer: &[u8], offset: &mut usize) -> SMBResult<usize> {
    let first = *buffer.get(*offset).ok_or_else(|| SMBError::parse_error("DER length ran past buffer"))?;
    *offset += 1;
    if first < 0x80 {
        return Ok(first as usize);
    }
    let field_size = (first & 0x7F) as usize;
    let end = offset.checked_add(field_size).ok_or_else(|| SMBError::parse_error("DER length overflow"))?;
    if buffer.len() < end {
        return Err(SMBError::parse_error("DER long-form length ran past buffer"));
    }
    let mut len = 0usize;
    for byte in &buffer[*offset..end] {
        len = len * 256 + *byte as usize;
    }
    *offset = end;
    Ok(len)
}

fn write_length(len: usize) -> Vec<u8> {
    if len < 0x80 {
        return vec![len as u8];
    }
    let mut bytes = Vec::new();
    let mut n = len;
    while n > 0 {
        bytes.push((n % 256) as u8);
        n /= 256;
    }
    bytes.reverse();
    let mut out = vec![0x80 | bytes.len() as u8];
    out.extend(bytes);
    out
}

/// Reads a context tag's `[n] InnerType` content. `offset` must already
/// point just past the outer context tag byte, matching the convention
/// the field-dispatch loops use (they consume the tag before matching
/// on it).
fn read_tagged_bytes(buffer: &[u8], offset: &mut usize, inner_tag: u8) -> SMBResult<Vec<u8>> {
    let _ = read_length(buffer, offset)?;
    let tag = *buffer.get(*offset).ok_or_else(|| SMBError::parse_error("DER inner tag ran past buffer"))?;
    if tag != inner_tag {
        return Err(SMBError::parse_error(format!("expected DER inner tag {inner_tag:#04x}, got {tag:#04x}")));
    }
    *offset += 1;
    let len = read_length(buffer, offset)?;
    let end = offset.checked_add(len).ok_or_else(|| SMBError::parse_error("DER content overflow"))?;
    if buffer.len() < end {
        return Err(SMBError::parse_error("DER content ran past buffer"));
    }
    let out = buffer[*offset..end].to_vec();
    *offset = end;
    Ok(out)
}

fn encode_tagged(outer_tag: u8, inner_tag: u8, content: &[u8]) -> Vec<u8> {
    let mut inner = vec![inner_tag];
    inner.extend(write_length(content.len()));
    inner.extend_from_slice(content);
    let mut out = vec![outer_tag];
    out.extend(write_length(inner.len()));
    out.extend(inner);
    out
}

/// `NegTokenInit` (RFC 4178 §4.2.1), trimmed to the fields the engine's
/// authenticator needs: the offered mechanism OIDs and the optional
/// embedded mechanism token (the raw NTLM/Kerberos blob).
#[derive(Debug, Clone, Default)]
pub struct NegTokenInit {
    pub mech_types: Vec<Vec<u8>>,
    pub mech_token: Option<Vec<u8>>,
}

impl NegTokenInit {
    fn parse(sequence: &[u8]) -> SMBResult<Self> {
        let mut offset = 0usize;
        let mut mech_types = Vec::new();
        let mut mech_token = None;
        while offset < sequence.len() {
            let tag = sequence[offset];
            offset += 1;
            match tag {
                MECH_TYPE_LIST_TAG => {
                    // mechTypeList is `[0] SEQUENCE OF MechType`: the
                    // context tag's content is itself a DER SEQUENCE of OIDs.
                    let content = read_length_prefixed_tag(sequence, &mut offset)?;
                    mech_types = parse_oid_sequence(&content)?;
                }
                MECH_TOKEN_TAG => {
                    mech_token = Some(read_tagged_bytes(sequence, &mut offset, DER_BYTE_ARRAY_TAG)?);
                }
                MECH_LIST_MIC_TAG => {
                    let _ = read_tagged_bytes(sequence, &mut offset, DER_BYTE_ARRAY_TAG)?;
                }
                _ => return Err(SMBError::parse_error(format!("unexpected NegTokenInit field tag {tag:#04x}"))),
            }
        }
        Ok(Self { mech_types, mech_token })
    }

    pub fn offers_kerberos(&self) -> bool {
        self.mech_types.iter().any(|oid| oid == &KERBEROS_V5_OID || oid == &KERBEROS_V5_MS_OID)
    }

    pub fn offers_ntlmssp(&self) -> bool {
        self.mech_types.iter().any(|oid| oid == &NTLMSSP_OID)
    }
}

/// Reads a tag's length-prefixed content. `offset` must already point
/// just past the tag byte itself, already consumed by the caller.
fn read_length_prefixed_tag(buffer: &[u8], offset: &mut usize) -> SMBResult<Vec<u8>> {
    let len = read_length(buffer, offset)?;
    let end = offset.checked_add(len).ok_or_else(|| SMBError::parse_error("DER content overflow"))?;
    if buffer.len() < end {
        return Err(SMBError::parse_error("DER content ran past buffer"));
    }
    let out = buffer[*offset..end].to_vec();
    *offset = end;
    Ok(out)
}

fn parse_oid_sequence(outer: &[u8]) -> SMBResult<Vec<Vec<u8>>> {
    let mut offset = 0usize;
    let tag = *outer.get(offset).ok_or_else(|| SMBError::parse_error("OID sequence ran past buffer"))?;
    if tag != DER_SEQUENCE_TAG {
        return Err(SMBError::parse_error("expected DER SEQUENCE for mechTypeList"));
    }
    offset += 1;
    let len = read_length(outer, &mut offset)?;
    let end = offset + len;
    if outer.len() < end {
        return Err(SMBError::parse_error("OID sequence content ran past buffer"));
    }
    let mut sequence = &outer[offset..end];
    let mut oids = Vec::new();
    while !sequence.is_empty() {
        if sequence[0] != DER_OID_TAG {
            return Err(SMBError::parse_error("expected OID tag inside mechTypeList"));
        }
        let mut inner_offset = 1;
        let oid_len = read_length(sequence, &mut inner_offset)?;
        let oid_end = inner_offset + oid_len;
        if sequence.len() < oid_end {
            return Err(SMBError::parse_error("OID content ran past buffer"));
        }
        oids.push(sequence[inner_offset..oid_end].to_vec());
        sequence = &sequence[oid_end..];
    }
    Ok(oids)
}

/// `NegTokenResp` (RFC 4178 §4.2.2): negotiation state, chosen mechanism,
/// and the response token the engine sends back to the client.
#[derive(Debug, Clone, Default)]
pub struct NegTokenResp {
    pub state: Option<NegotiateState>,
    pub supported_mech: Option<Vec<u8>>,
    pub response_token: Option<Vec<u8>>,
}

impl NegTokenResp {
    fn parse(sequence: &[u8]) -> SMBResult<Self> {
        let mut offset = 0usize;
        let mut state = None;
        let mut supported_mech = None;
        let mut response_token = None;
        while offset < sequence.len() {
            let tag = sequence[offset];
            offset += 1;
            match tag {
                NEG_STATE_TAG => {
                    let content = read_tagged_bytes(sequence, &mut offset, DER_ENUM_TAG)?;
                    state = content.first().copied().and_then(NegotiateState::from_u8);
                }
                SUPPORTED_MECH_TAG => {
                    supported_mech = Some(read_tagged_bytes(sequence, &mut offset, DER_OID_TAG)?);
                }
                RESPONSE_TOKEN_TAG => {
                    response_token = Some(read_tagged_bytes(sequence, &mut offset, DER_BYTE_ARRAY_TAG)?);
                }
                MECH_LIST_MIC_TAG => {
                    let _ = read_tagged_bytes(sequence, &mut offset, DER_BYTE_ARRAY_TAG)?;
                }
                _ => return Err(SMBError::parse_error(format!("unexpected NegTokenResp field tag {tag:#04x}"))),
            }
        }
        Ok(Self { state, supported_mech, response_token })
    }

    pub fn new(state: NegotiateState, response_token: Vec<u8>) -> Self {
        Self {
            state: Some(state),
            supported_mech: Some(NTLMSSP_OID.to_vec()),
            response_token: Some(response_token),
        }
    }

    fn body_bytes(&self) -> Vec<u8> {
        let mut fields = Vec::new();
        if let Some(state) = self.state {
            fields.push(encode_tagged(NEG_STATE_TAG, DER_ENUM_TAG, &[state as u8]));
        }
        if let Some(mech) = &self.supported_mech {
            fields.push(encode_tagged(SUPPORTED_MECH_TAG, DER_OID_TAG, mech));
        }
        if let Some(token) = &self.response_token {
            fields.push(encode_tagged(RESPONSE_TOKEN_TAG, DER_BYTE_ARRAY_TAG, token));
        }
        let content: Vec<u8> = fields.concat();
        let mut sequence = vec![DER_SEQUENCE_TAG];
        sequence.extend(write_length(content.len()));
        sequence.extend(content);
        sequence
    }

    /// Wraps this response in its `NegTokenResp` [1] context tag — the
    /// top-level framing a SESSION_SETUP response's security buffer
    /// carries directly (no outer APPLICATION/SPNEGO-OID wrapper, per
    /// RFC 4178 §4.2.1: only the client's initial token gets that).
    pub fn as_bytes(&self) -> Vec<u8> {
        let body = self.body_bytes();
        let mut out = vec![NEG_TOKEN_RESP_TAG];
        out.extend(write_length(body.len()));
        out.extend(body);
        out
    }
}

/// A parsed SPNEGO token, whichever of the two shapes it turned out to
/// be once the outer tag was read (spec.md §4.3 token-parsing rule).
#[derive(Debug, Clone)]
pub enum SpnegoToken {
    Init(NegTokenInit),
    Response(NegTokenResp),
}

/// True iff `bytes`'s first byte marks it as SPNEGO-wrapped, per
/// spec.md §4.3 ("A token is SPNEGO-wrapped iff its first byte is in
/// `{0x60, 0xA0, 0xA1}`").
pub fn is_spnego_wrapped(bytes: &[u8]) -> bool {
    matches!(bytes.first(), Some(0x60) | Some(0xA0) | Some(0xA1))
}

impl SpnegoToken {
    pub fn parse(bytes: &[u8]) -> SMBResult<Self> {
        let mut offset = 0usize;
        let tag = *bytes.first().ok_or_else(|| SMBError::parse_error("empty SPNEGO token"))?;
        offset += 1;
        match tag {
            APPLICATION_TAG => {
                let _total_len = read_length(bytes, &mut offset)?;
                let oid_tag = *bytes.get(offset).ok_or_else(|| SMBError::parse_error("SPNEGO application body ran past buffer"))?;
                if oid_tag != DER_OID_TAG {
                    return Err(SMBError::parse_error("expected SPNEGO OID after APPLICATION tag"));
                }
                offset += 1;
                let oid_len = read_length(bytes, &mut offset)?;
                let oid = &bytes[offset..offset + oid_len];
                if oid != SPNEGO_OID {
                    return Err(SMBError::parse_error("APPLICATION token does not carry the SPNEGO OID"));
                }
                offset += oid_len;
                let inner_tag = *bytes.get(offset).ok_or_else(|| SMBError::parse_error("SPNEGO token missing inner tag"))?;
                offset += 1;
                let content = read_length_prefixed_tag(bytes, &mut offset)?;
                match inner_tag {
                    NEG_TOKEN_INIT_TAG => {
                        let sequence = read_sequence(&content)?;
                        Ok(Self::Init(NegTokenInit::parse(&sequence)?))
                    }
                    NEG_TOKEN_RESP_TAG => {
                        let sequence = read_sequence(&content)?;
                        Ok(Self::Response(NegTokenResp::parse(&sequence)?))
                    }
                    _ => Err(SMBError::parse_error("unknown SPNEGO inner tag")),
                }
            }
            NEG_TOKEN_INIT_TAG => {
                let content = read_length_prefixed_tag(bytes, &mut offset)?;
                let sequence = read_sequence(&content)?;
                Ok(Self::Init(NegTokenInit::parse(&sequence)?))
            }
            NEG_TOKEN_RESP_TAG => {
                let content = read_length_prefixed_tag(bytes, &mut offset)?;
                let sequence = read_sequence(&content)?;
                Ok(Self::Response(NegTokenResp::parse(&sequence)?))
            }
            other => Err(SMBError::parse_error(format!("unrecognized SPNEGO outer tag {other:#04x}"))),
        }
    }
}

fn read_sequence(bytes: &[u8]) -> SMBResult<Vec<u8>> {
    let mut offset = 0usize;
    let tag = *bytes.first().ok_or_else(|| SMBError::parse_error("SPNEGO sequence ran past buffer"))?;
    if tag != DER_SEQUENCE_TAG {
        return Err(SMBError::parse_error("expected DER SEQUENCE"));
    }
    offset += 1;
    let len = read_length(bytes, &mut offset)?;
    let end = offset + len;
    if bytes.len() < end {
        return Err(SMBError::parse_error("DER sequence content ran past buffer"));
    }
    Ok(bytes[offset..end].to_vec())
}

/// Wraps a `NegTokenResp` in the `accept-incomplete` state — the shape
/// the Type-2 NTLM challenge travels back to the client in (spec.md
/// §4.3's "wrap in SPNEGO accept-incomplete").
pub fn wrap_challenge(challenge_token: Vec<u8>) -> Vec<u8> {
    NegTokenResp::new(NegotiateState::AcceptIncomplete, challenge_token).as_bytes()
}

/// Wraps a final auth outcome: `accept-completed` on success,
/// `reject` otherwise, with no response token required in the reject
/// case.
pub fn wrap_outcome(success: bool, response_token: Option<Vec<u8>>) -> Vec<u8> {
    let state = if success { NegotiateState::AcceptCompleted } else { NegotiateState::Reject };
    NegTokenResp {
        state: Some(state),
        supported_mech: None,
        response_token,
    }
    .as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_spnego_wrapped_prefixes() {
        assert!(is_spnego_wrapped(&[0x60, 0x00]));
        assert!(is_spnego_wrapped(&[0xA0, 0x00]));
        assert!(is_spnego_wrapped(&[0xA1, 0x00]));
        assert!(!is_spnego_wrapped(&[0x4E, 0x54]));
    }

    #[test]
    fn neg_token_resp_round_trips_response_token() {
        let resp = NegTokenResp::new(NegotiateState::AcceptIncomplete, vec![1, 2, 3, 4]);
        let bytes = resp.as_bytes();
        let parsed = SpnegoToken::parse(&bytes).unwrap();
        match parsed {
            SpnegoToken::Response(r) => {
                assert_eq!(r.state, Some(NegotiateState::AcceptIncomplete));
                assert_eq!(r.response_token, Some(vec![1, 2, 3, 4]));
            }
            _ => panic!("expected a NegTokenResp"),
        }
    }

    #[test]
    fn neg_token_init_parses_ntlmssp_mech_token() {
        let mech_type_list = encode_tagged(MECH_TYPE_LIST_TAG, DER_SEQUENCE_TAG, &{
            let mut seq = vec![DER_OID_TAG, NTLMSSP_OID.len() as u8];
            seq.extend(NTLMSSP_OID);
            seq
        });
        let mech_token = encode_tagged(MECH_TOKEN_TAG, DER_BYTE_ARRAY_TAG, b"NTLMSSP\0TOKEN");
        let content: Vec<u8> = [mech_type_list, mech_token].concat();
        let mut sequence = vec![DER_SEQUENCE_TAG];
        sequence.extend(write_length(content.len()));
        sequence.extend(content);
        let token_body = encode_tagged(NEG_TOKEN_INIT_TAG, DER_SEQUENCE_TAG, &sequence[2..]);
        let parsed = SpnegoToken::parse(&token_body).unwrap();
        match parsed {
            SpnegoToken::Init(init) => {
                assert!(init.offers_ntlmssp());
                assert!(!init.offers_kerberos());
                assert_eq!(init.mech_token.unwrap(), b"NTLMSSP\0TOKEN".to_vec());
            }
            _ => panic!("expected a NegTokenInit"),
        }
    }
}
