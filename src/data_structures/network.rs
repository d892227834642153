//! Network, currency and account descriptors
//!
//! A [`Network`] names one blockchain (mainnet or testnet), the backend that
//! serves it and the currencies that exist on it. Wallets are created per
//! currency, so the network is where a raw currency code from an engine
//! callback is resolved.

use serde::{Deserialize, Serialize};

use super::handle::Backend;

/// A denomination of a currency
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Unit {
    /// Lowercase code, e.g. "sat" or "eth"
    pub code: String,
    /// Human-readable name
    pub name: String,
    /// Number of decimal places relative to the base unit
    pub decimals: u8,
}

impl Unit {
    pub fn new(code: &str, name: &str, decimals: u8) -> Self {
        Self {
            code: code.to_string(),
            name: name.to_string(),
            decimals,
        }
    }
}

/// A currency that exists on a network
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Currency {
    /// Lowercase code, unique within the network
    pub code: String,
    pub name: String,
    /// Token contract address for account-model tokens
    pub issuer: Option<String>,
    /// Integer unit that engines report amounts in
    pub base_unit: Unit,
    /// Unit used for display
    pub default_unit: Unit,
}

impl Currency {
    pub fn new(code: &str, name: &str, base_unit: Unit, default_unit: Unit) -> Self {
        Self {
            code: code.to_string(),
            name: name.to_string(),
            issuer: None,
            base_unit,
            default_unit,
        }
    }

    /// Set the token contract address
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    /// Check whether this is a token rather than the network's native currency
    pub fn is_token(&self) -> bool {
        self.issuer.is_some()
    }
}

/// A blockchain network served by one backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    /// Unique name, e.g. "bitcoin-mainnet"
    pub name: String,
    pub backend: Backend,
    pub is_mainnet: bool,
    /// Code of the currency fees are paid in
    pub native_currency: String,
    pub currencies: Vec<Currency>,
    /// Confirmation count after which a transfer is considered final
    pub confirmations_until_final: u32,
}

impl Network {
    pub fn new(
        name: &str,
        backend: Backend,
        is_mainnet: bool,
        native: Currency,
        confirmations_until_final: u32,
    ) -> Self {
        Self {
            name: name.to_string(),
            backend,
            is_mainnet,
            native_currency: native.code.clone(),
            currencies: vec![native],
            confirmations_until_final,
        }
    }

    /// Add a currency (typically a token) to the network
    pub fn with_currency(mut self, currency: Currency) -> Self {
        if self.currency(&currency.code).is_none() {
            self.currencies.push(currency);
        }
        self
    }

    /// Look up a currency by code, case-insensitively
    pub fn currency(&self, code: &str) -> Option<&Currency> {
        self.currencies
            .iter()
            .find(|currency| currency.code.eq_ignore_ascii_case(code))
    }

    /// The currency fees are paid in
    pub fn native(&self) -> Option<&Currency> {
        self.currency(&self.native_currency)
    }

    pub fn bitcoin(is_mainnet: bool) -> Self {
        let btc = Currency::new(
            "btc",
            "Bitcoin",
            Unit::new("sat", "Satoshi", 0),
            Unit::new("btc", "Bitcoin", 8),
        );
        let name = if is_mainnet {
            "bitcoin-mainnet"
        } else {
            "bitcoin-testnet"
        };
        Self::new(name, Backend::Utxo, is_mainnet, btc, 6)
    }

    pub fn ethereum(is_mainnet: bool) -> Self {
        let eth = Currency::new(
            "eth",
            "Ethereum",
            Unit::new("wei", "Wei", 0),
            Unit::new("eth", "Ether", 18),
        );
        let name = if is_mainnet {
            "ethereum-mainnet"
        } else {
            "ethereum-ropsten"
        };
        Self::new(name, Backend::Account, is_mainnet, eth, 6)
    }
}

/// The user account a manager operates for
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Account {
    /// Stable account identifier
    pub id: String,
    /// Earliest key creation time, seconds since the Unix epoch
    pub created_at: u64,
}

impl Account {
    pub fn new(id: impl Into<String>, created_at: u64) -> Self {
        Self {
            id: id.into(),
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_currency_lookup_is_case_insensitive() {
        let network = Network::ethereum(true).with_currency(
            Currency::new(
                "brd",
                "BRD Token",
                Unit::new("brdi", "BRD Token INT", 0),
                Unit::new("brd", "BRD Token", 18),
            )
            .with_issuer("0x558ec3152e2eb2174905cd19aea4e34a23de9ad6"),
        );

        assert_eq!(network.currency("BRD").map(|c| c.is_token()), Some(true));
        assert_eq!(network.native().map(|c| c.code.as_str()), Some("eth"));
        assert!(network.currency("btc").is_none());
    }

    #[test]
    fn test_duplicate_currency_is_not_added_twice() {
        let network = Network::bitcoin(false).with_currency(Currency::new(
            "BTC",
            "Bitcoin again",
            Unit::new("sat", "Satoshi", 0),
            Unit::new("btc", "Bitcoin", 8),
        ));
        assert_eq!(network.currencies.len(), 1);
        assert_eq!(network.name, "bitcoin-testnet");
        assert_eq!(network.backend, Backend::Utxo);
    }
}
