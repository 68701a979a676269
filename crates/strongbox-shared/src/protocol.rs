use crate::constants::{CHUNK_HEADER_SIZE, CLIENT_ID_SIZE, NAME_SLOT_SIZE};
use crate::error::FrameError;
use crate::frame::{decode_name, encode_name};
use crate::types::ClientId;

/// Request codes sent by backup clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum RequestCode {
    Register = 1025,
    SendPublicKey = 1026,
    Reconnect = 1027,
    SendFile = 1028,
    CrcOk = 1029,
    CrcRetry = 1030,
    CrcAbort = 1031,
}

impl RequestCode {
    pub fn from_u16(code: u16) -> Option<Self> {
        match code {
            1025 => Some(Self::Register),
            1026 => Some(Self::SendPublicKey),
            1027 => Some(Self::Reconnect),
            1028 => Some(Self::SendFile),
            1029 => Some(Self::CrcOk),
            1030 => Some(Self::CrcRetry),
            1031 => Some(Self::CrcAbort),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Register => "Register",
            Self::SendPublicKey => "SendPublicKey",
            Self::Reconnect => "Reconnect",
            Self::SendFile => "SendFile",
            Self::CrcOk => "CrcOk",
            Self::CrcRetry => "CrcRetry",
            Self::CrcAbort => "CrcAbort",
        }
    }
}

/// Response codes sent by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ResponseCode {
    /// Unsolicited greeting written right after accept
    Greeting = 0,
    RegisterOk = 1600,
    RegisterFail = 1601,
    PubKeyAesSent = 1602,
    FileCrc = 1603,
    Ack = 1604,
    ReconnectAesSent = 1605,
    ReconnectFail = 1606,
    GenericServerError = 1607,
    /// Declared payload exceeds the server cap
    PayloadTooLarge = 1608,
}

impl ResponseCode {
    pub fn from_u16(code: u16) -> Option<Self> {
        match code {
            0 => Some(Self::Greeting),
            1600 => Some(Self::RegisterOk),
            1601 => Some(Self::RegisterFail),
            1602 => Some(Self::PubKeyAesSent),
            1603 => Some(Self::FileCrc),
            1604 => Some(Self::Ack),
            1605 => Some(Self::ReconnectAesSent),
            1606 => Some(Self::ReconnectFail),
            1607 => Some(Self::GenericServerError),
            1608 => Some(Self::PayloadTooLarge),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// One segment of a file transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChunk {
    /// Total bytes the client will send for this file
    pub content_size: u32,
    /// Client-side plaintext size, informational only
    pub orig_file_size: u32,
    /// 1-based
    pub packet_number: u16,
    pub total_packets: u16,
    pub filename: String,
    pub content: Vec<u8>,
}

/// Every request a client can make. The state machine matches on this
/// exhaustively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Register { name: String },
    SendPublicKey { name: String, public_key: Vec<u8> },
    Reconnect { name: String },
    SendFile(FileChunk),
    CrcOk { filename: String },
    CrcRetry { filename: String },
    CrcAbort { filename: String },
}

impl Request {
    /// Decode a request body for the header's `code`.
    pub fn decode(code: u16, payload: &[u8]) -> Result<Self, FrameError> {
        let code = RequestCode::from_u16(code).ok_or(FrameError::UnknownCode(code))?;
        let what = code.name();

        match code {
            RequestCode::Register => Ok(Self::Register {
                name: name_slot(payload, what)?,
            }),
            RequestCode::SendPublicKey => {
                if payload.len() <= NAME_SLOT_SIZE {
                    return Err(malformed(what, "missing public key"));
                }
                let (slot, key) = payload.split_at(NAME_SLOT_SIZE);
                Ok(Self::SendPublicKey {
                    name: decode_name(slot)?,
                    public_key: key.to_vec(),
                })
            }
            RequestCode::Reconnect => Ok(Self::Reconnect {
                name: name_slot(payload, what)?,
            }),
            RequestCode::SendFile => decode_chunk(payload).map(Self::SendFile),
            RequestCode::CrcOk => Ok(Self::CrcOk {
                filename: name_slot(payload, what)?,
            }),
            RequestCode::CrcRetry => Ok(Self::CrcRetry {
                filename: name_slot(payload, what)?,
            }),
            RequestCode::CrcAbort => Ok(Self::CrcAbort {
                filename: name_slot(payload, what)?,
            }),
        }
    }

    pub fn code(&self) -> RequestCode {
        match self {
            Self::Register { .. } => RequestCode::Register,
            Self::SendPublicKey { .. } => RequestCode::SendPublicKey,
            Self::Reconnect { .. } => RequestCode::Reconnect,
            Self::SendFile(_) => RequestCode::SendFile,
            Self::CrcOk { .. } => RequestCode::CrcOk,
            Self::CrcRetry { .. } => RequestCode::CrcRetry,
            Self::CrcAbort { .. } => RequestCode::CrcAbort,
        }
    }

    /// Serialize the request body (client direction).
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Register { name } | Self::Reconnect { name } => encode_name(name).to_vec(),
            Self::SendPublicKey { name, public_key } => {
                let mut out = Vec::with_capacity(NAME_SLOT_SIZE + public_key.len());
                out.extend_from_slice(&encode_name(name));
                out.extend_from_slice(public_key);
                out
            }
            Self::SendFile(chunk) => {
                let mut out = Vec::with_capacity(CHUNK_HEADER_SIZE + chunk.content.len());
                out.extend_from_slice(&chunk.content_size.to_le_bytes());
                out.extend_from_slice(&chunk.orig_file_size.to_le_bytes());
                out.extend_from_slice(&chunk.packet_number.to_le_bytes());
                out.extend_from_slice(&chunk.total_packets.to_le_bytes());
                out.extend_from_slice(&encode_name(&chunk.filename));
                out.extend_from_slice(&chunk.content);
                out
            }
            Self::CrcOk { filename } | Self::CrcRetry { filename } | Self::CrcAbort { filename } => {
                encode_name(filename).to_vec()
            }
        }
    }
}

fn malformed(request: &'static str, reason: &'static str) -> FrameError {
    FrameError::MalformedPayload { request, reason }
}

fn name_slot(payload: &[u8], what: &'static str) -> Result<String, FrameError> {
    if payload.len() != NAME_SLOT_SIZE {
        return Err(malformed(what, "expected a single 255-byte name slot"));
    }
    decode_name(payload)
}

fn decode_chunk(payload: &[u8]) -> Result<FileChunk, FrameError> {
    if payload.len() < CHUNK_HEADER_SIZE {
        return Err(malformed("SendFile", "truncated chunk header"));
    }
    let (head, content) = payload.split_at(CHUNK_HEADER_SIZE);

    Ok(FileChunk {
        content_size: u32::from_le_bytes([head[0], head[1], head[2], head[3]]),
        orig_file_size: u32::from_le_bytes([head[4], head[5], head[6], head[7]]),
        packet_number: u16::from_le_bytes([head[8], head[9]]),
        total_packets: u16::from_le_bytes([head[10], head[11]]),
        filename: decode_name(&head[12..])?,
        content: content.to_vec(),
    })
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    RegisterOk {
        client_id: ClientId,
    },
    RegisterFail,
    PubKeyAesSent {
        client_id: ClientId,
        encrypted_key: Vec<u8>,
    },
    FileCrc {
        client_id: ClientId,
        content_size: u32,
        filename: String,
        crc: u32,
    },
    Ack {
        client_id: ClientId,
    },
    ReconnectAesSent {
        client_id: ClientId,
        encrypted_key: Vec<u8>,
    },
    ReconnectFail {
        client_id: ClientId,
    },
    GenericServerError,
    PayloadTooLarge {
        max: u32,
    },
}

impl Response {
    pub fn code(&self) -> ResponseCode {
        match self {
            Self::RegisterOk { .. } => ResponseCode::RegisterOk,
            Self::RegisterFail => ResponseCode::RegisterFail,
            Self::PubKeyAesSent { .. } => ResponseCode::PubKeyAesSent,
            Self::FileCrc { .. } => ResponseCode::FileCrc,
            Self::Ack { .. } => ResponseCode::Ack,
            Self::ReconnectAesSent { .. } => ResponseCode::ReconnectAesSent,
            Self::ReconnectFail { .. } => ResponseCode::ReconnectFail,
            Self::GenericServerError => ResponseCode::GenericServerError,
            Self::PayloadTooLarge { .. } => ResponseCode::PayloadTooLarge,
        }
    }

    pub fn payload(&self) -> Vec<u8> {
        match self {
            Self::RegisterOk { client_id }
            | Self::Ack { client_id }
            | Self::ReconnectFail { client_id } => client_id.as_bytes().to_vec(),
            Self::PubKeyAesSent {
                client_id,
                encrypted_key,
            }
            | Self::ReconnectAesSent {
                client_id,
                encrypted_key,
            } => {
                let mut out = Vec::with_capacity(CLIENT_ID_SIZE + encrypted_key.len());
                out.extend_from_slice(client_id.as_bytes());
                out.extend_from_slice(encrypted_key);
                out
            }
            Self::FileCrc {
                client_id,
                content_size,
                filename,
                crc,
            } => {
                let mut out = Vec::with_capacity(CLIENT_ID_SIZE + 4 + NAME_SLOT_SIZE + 4);
                out.extend_from_slice(client_id.as_bytes());
                out.extend_from_slice(&content_size.to_le_bytes());
                out.extend_from_slice(&encode_name(filename));
                out.extend_from_slice(&crc.to_le_bytes());
                out
            }
            Self::RegisterFail | Self::GenericServerError => Vec::new(),
            Self::PayloadTooLarge { max } => max.to_le_bytes().to_vec(),
        }
    }

    /// Full frame: 7-byte header followed by the payload.
    pub fn to_frame(&self, version: u8) -> Vec<u8> {
        crate::frame::build_response(version, self.code() as u16, &self.payload())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_codes_are_closed() {
        for code in 1025..=1031u16 {
            let parsed = RequestCode::from_u16(code).unwrap();
            assert_eq!(parsed as u16, code);
        }
        assert!(RequestCode::from_u16(1024).is_none());
        assert!(RequestCode::from_u16(1032).is_none());

        for code in (1600..=1608u16).chain([0]) {
            assert_eq!(ResponseCode::from_u16(code).unwrap() as u16, code);
        }
        assert!(ResponseCode::from_u16(1599).is_none());
    }

    #[test]
    fn test_unknown_code_rejected() {
        assert_eq!(
            Request::decode(9999, &[]),
            Err(FrameError::UnknownCode(9999))
        );
    }

    #[test]
    fn test_decode_register() {
        let payload = encode_name("alice");
        let req = Request::decode(1025, &payload).unwrap();
        assert_eq!(
            req,
            Request::Register {
                name: "alice".into()
            }
        );
        assert!(Request::decode(1025, &payload[..100]).is_err());
    }

    #[test]
    fn test_decode_public_key_requires_key_bytes() {
        let payload = encode_name("alice");
        assert!(matches!(
            Request::decode(1026, &payload),
            Err(FrameError::MalformedPayload { .. })
        ));

        let req = Request::SendPublicKey {
            name: "alice".into(),
            public_key: vec![0x30, 0x82, 0x01],
        };
        assert_eq!(Request::decode(1026, &req.encode()).unwrap(), req);
    }

    #[test]
    fn test_decode_chunk() {
        let chunk = FileChunk {
            content_size: 10,
            orig_file_size: 8,
            packet_number: 1,
            total_packets: 1,
            filename: "notes.txt".into(),
            content: b"0123456789".to_vec(),
        };
        let encoded = Request::SendFile(chunk.clone()).encode();
        assert_eq!(encoded.len(), CHUNK_HEADER_SIZE + 10);
        assert_eq!(Request::decode(1028, &encoded).unwrap(), Request::SendFile(chunk));

        assert!(Request::decode(1028, &encoded[..CHUNK_HEADER_SIZE - 1]).is_err());
    }

    #[test]
    fn test_file_crc_payload_layout() {
        let resp = Response::FileCrc {
            client_id: ClientId([1u8; 16]),
            content_size: 2_097_152,
            filename: "big.bin".into(),
            crc: 0xDEAD_BEEF,
        };
        let payload = resp.payload();
        assert_eq!(payload.len(), 16 + 4 + 255 + 4);
        assert_eq!(&payload[..16], &[1u8; 16]);
        assert_eq!(&payload[16..20], &2_097_152u32.to_le_bytes());
        assert_eq!(decode_name(&payload[20..275]).unwrap(), "big.bin");
        assert_eq!(&payload[275..], &0xDEAD_BEEFu32.to_le_bytes());
    }

    #[test]
    fn test_error_responses_have_no_payload() {
        assert!(Response::GenericServerError.payload().is_empty());
        assert!(Response::RegisterFail.payload().is_empty());
        assert_eq!(
            Response::GenericServerError.to_frame(3),
            vec![3, 0x47, 0x06, 0, 0, 0, 0]
        );
    }
}
