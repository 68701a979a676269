use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::constants::CLIENT_ID_SIZE;

// Client identity = 16 random bytes assigned at registration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub struct ClientId(pub [u8; CLIENT_ID_SIZE]);

impl ClientId {
    pub fn generate() -> Self {
        let mut id = [0u8; CLIENT_ID_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut id);
        Self(id)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; CLIENT_ID_SIZE] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; CLIENT_ID_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
