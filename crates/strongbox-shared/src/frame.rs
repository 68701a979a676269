//! Fixed-size request/response headers and the 255-byte string slot.
//!
//! ```text
//! request  : client_id[16] | version u8 | code u16 LE | payload_size u32 LE | payload
//! response : version u8 | code u16 LE | payload_size u32 LE | payload
//! ```
//!
//! Header parsing never allocates. The declared payload size is checked
//! against the configured cap before the caller reads a single payload byte.

use crate::constants::{
    CLIENT_ID_SIZE, NAME_MAX_CONTENT, NAME_SLOT_SIZE, REQUEST_HEADER_SIZE, RESPONSE_HEADER_SIZE,
};
use crate::error::FrameError;
use crate::types::ClientId;

pub type RequestHeaderBytes = [u8; REQUEST_HEADER_SIZE];
pub type ResponseHeaderBytes = [u8; RESPONSE_HEADER_SIZE];

// ---------------------------------------------------------------------------
// Request header
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    pub client_id: ClientId,
    pub version: u8,
    pub code: u16,
    pub payload_size: u32,
}

impl RequestHeader {
    pub fn new(client_id: ClientId, version: u8, code: u16, payload_size: u32) -> Self {
        Self {
            client_id,
            version,
            code,
            payload_size,
        }
    }

    /// Parse a request header. `bytes` must be exactly 23 bytes long.
    pub fn parse(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() != REQUEST_HEADER_SIZE {
            return Err(FrameError::MalformedHeader {
                expected: REQUEST_HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        let mut id = [0u8; CLIENT_ID_SIZE];
        id.copy_from_slice(&bytes[..CLIENT_ID_SIZE]);

        Ok(Self {
            client_id: ClientId(id),
            version: bytes[16],
            code: u16::from_le_bytes([bytes[17], bytes[18]]),
            payload_size: u32::from_le_bytes([bytes[19], bytes[20], bytes[21], bytes[22]]),
        })
    }

    pub fn to_bytes(&self) -> RequestHeaderBytes {
        let mut out: RequestHeaderBytes = [0; REQUEST_HEADER_SIZE];
        out[0..16].copy_from_slice(self.client_id.as_bytes());
        out[16] = self.version;
        out[17..19].copy_from_slice(&self.code.to_le_bytes());
        out[19..23].copy_from_slice(&self.payload_size.to_le_bytes());
        out
    }

    /// Reject declared payloads above `max` before anything is allocated.
    pub fn check_payload_size(&self, max: u32) -> Result<usize, FrameError> {
        if self.payload_size > max {
            return Err(FrameError::PayloadTooLarge {
                size: self.payload_size,
                max,
            });
        }
        Ok(self.payload_size as usize)
    }
}

/// Parse a 23-byte request header into its four fields.
pub fn parse_header(bytes: &[u8]) -> Result<(ClientId, u8, u16, u32), FrameError> {
    let header = RequestHeader::parse(bytes)?;
    Ok((
        header.client_id,
        header.version,
        header.code,
        header.payload_size,
    ))
}

/// Build a full request frame (header + payload). Used by clients and tests.
pub fn build_request(client_id: ClientId, version: u8, code: u16, payload: &[u8]) -> Vec<u8> {
    let header = RequestHeader::new(client_id, version, code, payload.len() as u32);
    let mut frame = Vec::with_capacity(REQUEST_HEADER_SIZE + payload.len());
    frame.extend_from_slice(&header.to_bytes());
    frame.extend_from_slice(payload);
    frame
}

// ---------------------------------------------------------------------------
// Response header
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    pub version: u8,
    pub code: u16,
    pub payload_size: u32,
}

impl ResponseHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() != RESPONSE_HEADER_SIZE {
            return Err(FrameError::MalformedHeader {
                expected: RESPONSE_HEADER_SIZE,
                actual: bytes.len(),
            });
        }
        Ok(Self {
            version: bytes[0],
            code: u16::from_le_bytes([bytes[1], bytes[2]]),
            payload_size: u32::from_le_bytes([bytes[3], bytes[4], bytes[5], bytes[6]]),
        })
    }

    pub fn to_bytes(&self) -> ResponseHeaderBytes {
        let mut out: ResponseHeaderBytes = [0; RESPONSE_HEADER_SIZE];
        out[0] = self.version;
        out[1..3].copy_from_slice(&self.code.to_le_bytes());
        out[3..7].copy_from_slice(&self.payload_size.to_le_bytes());
        out
    }
}

/// Concatenate a 7-byte response header with `payload`.
pub fn build_response(version: u8, code: u16, payload: &[u8]) -> Vec<u8> {
    let header = ResponseHeader {
        version,
        code,
        payload_size: payload.len() as u32,
    };
    let mut frame = Vec::with_capacity(RESPONSE_HEADER_SIZE + payload.len());
    frame.extend_from_slice(&header.to_bytes());
    frame.extend_from_slice(payload);
    frame
}

// ---------------------------------------------------------------------------
// String slots
// ---------------------------------------------------------------------------

/// Encode `s` into a zero-padded 255-byte slot.
///
/// Content is cut to at most 254 bytes at a char boundary, so the slot always
/// holds valid UTF-8 followed by at least one 0x00.
pub fn encode_name(s: &str) -> [u8; NAME_SLOT_SIZE] {
    let mut slot = [0u8; NAME_SLOT_SIZE];
    let mut end = s.len().min(NAME_MAX_CONTENT);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    slot[..end].copy_from_slice(&s.as_bytes()[..end]);
    slot
}

/// Decode a string slot, stopping at the first 0x00.
pub fn decode_name(slot: &[u8]) -> Result<String, FrameError> {
    let end = slot.iter().position(|&b| b == 0).unwrap_or(slot.len());
    std::str::from_utf8(&slot[..end])
        .map(str::to_owned)
        .map_err(|_| FrameError::InvalidString)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_header_roundtrip() {
        let id = ClientId([9u8; 16]);
        let header = RequestHeader::new(id, 3, 1028, 1_048_576 + 267);
        let parsed = RequestHeader::parse(&header.to_bytes()).unwrap();
        assert_eq!(parsed, header);

        let (cid, version, code, size) = parse_header(&header.to_bytes()).unwrap();
        assert_eq!((cid, version, code, size), (id, 3, 1028, 1_048_843));
    }

    #[test]
    fn test_header_is_little_endian() {
        let bytes = RequestHeader::new(ClientId::default(), 2, 0x0401, 0x0102_0304).to_bytes();
        assert_eq!(&bytes[17..19], &[0x01, 0x04]);
        assert_eq!(&bytes[19..23], &[0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn test_parse_header_wrong_length() {
        let err = parse_header(&[0u8; 22]).unwrap_err();
        assert_eq!(
            err,
            FrameError::MalformedHeader {
                expected: 23,
                actual: 22
            }
        );
        assert!(parse_header(&[0u8; 24]).is_err());
    }

    #[test]
    fn test_response_matches_request_fields() {
        let frame = build_response(3, 1603, b"payload");
        assert_eq!(frame.len(), RESPONSE_HEADER_SIZE + 7);

        let header = ResponseHeader::parse(&frame[..RESPONSE_HEADER_SIZE]).unwrap();
        assert_eq!(header.version, 3);
        assert_eq!(header.code, 1603);
        assert_eq!(header.payload_size, 7);
        assert_eq!(&frame[RESPONSE_HEADER_SIZE..], b"payload");

        // Same fields travel through the 23-byte request layout unchanged.
        let req = RequestHeader::new(ClientId::default(), header.version, header.code, 7);
        let reparsed = RequestHeader::parse(&req.to_bytes()).unwrap();
        assert_eq!(reparsed.code, header.code);
        assert_eq!(reparsed.payload_size, header.payload_size);
    }

    #[test]
    fn test_payload_cap() {
        let header = RequestHeader::new(ClientId::default(), 3, 1028, u32::MAX);
        assert_eq!(
            header.check_payload_size(4096),
            Err(FrameError::PayloadTooLarge {
                size: u32::MAX,
                max: 4096
            })
        );

        let header = RequestHeader::new(ClientId::default(), 3, 1028, 4096);
        assert_eq!(header.check_payload_size(4096), Ok(4096));
    }

    #[test]
    fn test_name_slot_roundtrip() {
        for name in ["alice", "", "名前-ファイル.txt", &"x".repeat(254)] {
            let slot = encode_name(name);
            assert_eq!(slot.len(), 255);
            assert_eq!(decode_name(&slot).unwrap(), name);
        }
    }

    #[test]
    fn test_name_slot_truncates() {
        let long = "y".repeat(400);
        let slot = encode_name(&long);
        assert_eq!(slot[254], 0);
        assert_eq!(decode_name(&slot).unwrap(), "y".repeat(254));

        // 253 ASCII bytes followed by a 3-byte char: the char does not fit.
        let tricky = format!("{}€", "a".repeat(253));
        assert_eq!(decode_name(&encode_name(&tricky)).unwrap(), "a".repeat(253));
    }

    #[test]
    fn test_decode_stops_at_first_nul() {
        let mut slot = [0u8; 255];
        slot[..3].copy_from_slice(b"abc");
        slot[4..7].copy_from_slice(b"zzz");
        assert_eq!(decode_name(&slot).unwrap(), "abc");
    }

    #[test]
    fn test_decode_rejects_invalid_utf8() {
        let mut slot = [0u8; 255];
        slot[0] = 0xFF;
        assert_eq!(decode_name(&slot), Err(FrameError::InvalidString));
    }
}
