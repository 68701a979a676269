use thiserror::Error;

/// Wire framing violations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Malformed header: expected {expected} bytes, got {actual}")]
    MalformedHeader { expected: usize, actual: usize },

    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: u32, max: u32 },

    #[error("Unknown request code: {0}")]
    UnknownCode(u16),

    #[error("Malformed payload for {request}: {reason}")]
    MalformedPayload {
        request: &'static str,
        reason: &'static str,
    },

    #[error("String slot is not valid UTF-8")]
    InvalidString,
}

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),
}
