//! Backend-normalized addresses

use bech32::Variant;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::handle::Backend;
use crate::errors::DecodeError;

/// Human-readable parts for mainnet, testnet and regtest segwit addresses
const BECH32_HRPS: [&str; 3] = ["bc", "tb", "bcrt"];
/// Version byte plus a 20-byte hash, once the checksum is stripped
const BASE58_PAYLOAD_LENGTH: usize = 21;
const ACCOUNT_ADDRESS_LENGTH: usize = 20;

/// An address on either backend
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Address {
    /// Base58Check or bech32 text
    Utxo(String),
    /// 20-byte account address
    Account([u8; ACCOUNT_ADDRESS_LENGTH]),
}

impl Address {
    pub fn backend(&self) -> Backend {
        match self {
            Address::Utxo(_) => Backend::Utxo,
            Address::Account(_) => Backend::Account,
        }
    }

    /// Decode the raw byte buffer an engine callback carries
    ///
    /// UTXO engines hand over the address text as bytes, account engines the
    /// 20 raw address bytes.
    pub fn decode_raw(backend: Backend, raw: &[u8]) -> Result<Self, DecodeError> {
        match backend {
            Backend::Utxo => {
                let text = std::str::from_utf8(raw).map_err(|_| DecodeError::InvalidAddress {
                    backend,
                    reason: "address bytes are not UTF-8".to_string(),
                })?;
                Self::parse(backend, text)
            }
            Backend::Account => {
                let bytes: [u8; ACCOUNT_ADDRESS_LENGTH] =
                    raw.try_into().map_err(|_| DecodeError::InvalidAddress {
                        backend,
                        reason: format!(
                            "expected {ACCOUNT_ADDRESS_LENGTH} bytes, got {}",
                            raw.len()
                        ),
                    })?;
                Ok(Address::Account(bytes))
            }
        }
    }

    /// Parse an address string supplied by the application
    pub fn parse(backend: Backend, text: &str) -> Result<Self, DecodeError> {
        let text = text.trim();
        let invalid = |reason: String| DecodeError::InvalidAddress { backend, reason };

        match backend {
            Backend::Utxo => {
                let lower = text.to_ascii_lowercase();
                let is_segwit = BECH32_HRPS
                    .iter()
                    .any(|hrp| lower.starts_with(hrp) && lower[hrp.len()..].starts_with('1'));
                if is_segwit {
                    check_segwit(text).map_err(invalid)?;
                    return Ok(Address::Utxo(text.to_string()));
                }

                let payload = bs58::decode(text)
                    .with_check(None)
                    .into_vec()
                    .map_err(|e| invalid(format!("invalid base58check: {e}")))?;
                if payload.len() != BASE58_PAYLOAD_LENGTH {
                    return Err(invalid(format!(
                        "expected {BASE58_PAYLOAD_LENGTH} payload bytes, got {}",
                        payload.len()
                    )));
                }
                Ok(Address::Utxo(text.to_string()))
            }
            Backend::Account => {
                let digits = text
                    .strip_prefix("0x")
                    .or_else(|| text.strip_prefix("0X"))
                    .unwrap_or(text);
                let bytes = hex::decode(digits).map_err(|e| invalid(format!("invalid hex: {e}")))?;
                Self::decode_raw(backend, &bytes)
            }
        }
    }
}

/// Verify a segwit address checksum and that its variant fits the witness
/// version (bech32 for v0, bech32m after)
fn check_segwit(text: &str) -> Result<(), String> {
    let (hrp, data, variant) = bech32::decode(text).map_err(|e| format!("invalid bech32: {e}"))?;
    if !BECH32_HRPS.contains(&hrp.as_str()) {
        return Err(format!("unknown segwit prefix '{hrp}'"));
    }
    let version = data
        .first()
        .map(|version| version.to_u8())
        .ok_or_else(|| "missing witness version".to_string())?;
    let expected = if version == 0 {
        Variant::Bech32
    } else {
        Variant::Bech32m
    };
    if variant != expected {
        return Err(format!("witness version {version} with {variant:?} checksum"));
    }
    Ok(())
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Utxo(text) => f.write_str(text),
            Address::Account(bytes) => write!(f, "0x{}", hex::encode(bytes)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utxo_addresses() {
        let legacy = Address::parse(Backend::Utxo, "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa").unwrap();
        assert_eq!(legacy.backend(), Backend::Utxo);

        let segwit = Address::decode_raw(
            Backend::Utxo,
            b"bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq",
        )
        .unwrap();
        assert_eq!(segwit.to_string(), "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq");

        assert!(Address::parse(Backend::Utxo, "tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx").is_ok());
        assert!(Address::parse(Backend::Utxo, "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfN0").is_err());
        assert!(Address::parse(Backend::Utxo, "abc").is_err());
        assert!(Address::decode_raw(Backend::Utxo, &[0xff, 0xfe]).is_err());
    }

    #[test]
    fn test_account_addresses() {
        let text = "0xb0f225defec7625c6b5e43126bdde398bd90ef62";
        let parsed = Address::parse(Backend::Account, text).unwrap();
        assert_eq!(parsed.to_string(), text);

        let raw = hex::decode(&text[2..]).unwrap();
        assert_eq!(Address::decode_raw(Backend::Account, &raw).unwrap(), parsed);

        assert!(matches!(
            Address::decode_raw(Backend::Account, &raw[..19]),
            Err(DecodeError::InvalidAddress { backend: Backend::Account, .. })
        ));
    }

    #[test]
    fn test_utxo_checksums_are_verified() {
        // Same length and alphabet as valid addresses, last character changed
        let base58 = Address::parse(Backend::Utxo, "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNb");
        assert!(matches!(
            base58,
            Err(DecodeError::InvalidAddress { backend: Backend::Utxo, .. })
        ));
        assert!(Address::parse(Backend::Utxo, "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdr").is_err());

        // Segwit text for a chain this backend does not serve
        assert!(Address::parse(Backend::Utxo, "ltc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq").is_err());
    }
}
