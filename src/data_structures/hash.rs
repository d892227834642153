//! Transfer hashes

use serde::{Deserialize, Serialize};
use std::fmt;

use super::handle::Backend;
use crate::errors::DecodeError;

/// Network hash of a signed transfer
///
/// UTXO hashes are shown byte-reversed, the way block explorers print txids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransferHash {
    backend: Backend,
    bytes: [u8; 32],
}

impl TransferHash {
    pub fn new(backend: Backend, bytes: [u8; 32]) -> Self {
        Self { backend, bytes }
    }

    /// Decode the raw 32-byte buffer an engine callback carries
    pub fn decode_raw(backend: Backend, raw: &[u8]) -> Result<Self, DecodeError> {
        let bytes: [u8; 32] = raw
            .try_into()
            .map_err(|_| DecodeError::InvalidHash { length: raw.len() })?;
        Ok(Self { backend, bytes })
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }
}

impl fmt::Display for TransferHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.backend {
            Backend::Utxo => {
                let mut reversed = self.bytes;
                reversed.reverse();
                f.write_str(&hex::encode(reversed))
            }
            Backend::Account => write!(f, "0x{}", hex::encode(self.bytes)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_per_backend() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xab;
        bytes[31] = 0x01;

        let utxo = TransferHash::new(Backend::Utxo, bytes).to_string();
        assert!(utxo.starts_with("01"));
        assert!(utxo.ends_with("ab"));

        let account = TransferHash::new(Backend::Account, bytes).to_string();
        assert!(account.starts_with("0xab"));
        assert!(account.ends_with("01"));
        assert_eq!(account.len(), 66);
    }

    #[test]
    fn test_decode_requires_32_bytes() {
        assert_eq!(
            TransferHash::decode_raw(Backend::Utxo, &[1, 2, 3]),
            Err(DecodeError::InvalidHash { length: 3 })
        );
        assert!(TransferHash::decode_raw(Backend::Account, &[7u8; 32]).is_ok());
    }
}
