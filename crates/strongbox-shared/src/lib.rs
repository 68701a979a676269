//! # strongbox-shared
//!
//! Wire-level building blocks shared by the backup server and its clients:
//! the frame codec, typed request/response enums, client identifiers, and
//! thin wrappers over the RSA and CRC-32 primitives the protocol consumes.

pub mod constants;
pub mod crypto;
pub mod error;
pub mod frame;
pub mod protocol;
pub mod types;

pub use error::{CryptoError, FrameError};
pub use frame::{build_request, build_response, parse_header, RequestHeader, ResponseHeader};
pub use protocol::{FileChunk, Request, RequestCode, Response, ResponseCode};
pub use types::ClientId;
