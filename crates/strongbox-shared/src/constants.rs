/// Protocol version the server stamps on every response
pub const SERVER_VERSION: u8 = 3;

/// Oldest client version accepted by default
pub const DEFAULT_MIN_CLIENT_VERSION: u8 = 1;

/// Newest client version accepted by default
pub const DEFAULT_MAX_CLIENT_VERSION: u8 = 3;

/// Client identifier size in bytes
pub const CLIENT_ID_SIZE: usize = 16;

/// Request header: client_id[16] | version u8 | code u16 | payload_size u32
pub const REQUEST_HEADER_SIZE: usize = CLIENT_ID_SIZE + 1 + 2 + 4;

/// Response header: version u8 | code u16 | payload_size u32
pub const RESPONSE_HEADER_SIZE: usize = 1 + 2 + 4;

/// Fixed width of every string slot embedded in a payload
pub const NAME_SLOT_SIZE: usize = 255;

/// Maximum content bytes of a string slot (one byte is kept for the terminator)
pub const NAME_MAX_CONTENT: usize = NAME_SLOT_SIZE - 1;

/// Maximum content bytes carried by one SendFile chunk (1 MiB)
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Fixed fields in front of the content of a SendFile chunk
pub const CHUNK_HEADER_SIZE: usize = 4 + 4 + 2 + 2 + NAME_SLOT_SIZE;

/// Default cap on any declared payload (4 MiB)
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 4 * 1024 * 1024;

/// Maximum accepted DER-encoded RSA public key length
pub const MAX_PUBLIC_KEY_SIZE: usize = 1024;

/// AES session key length in bytes (AES-256)
pub const SESSION_KEY_SIZE: usize = 32;

/// CRC confirmations a client may retry before the transfer is fatal
pub const MAX_CRC_RETRIES: u32 = 3;

/// Default TCP port
pub const DEFAULT_PORT: u16 = 1256;
