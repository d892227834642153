//! In-memory query client for deterministic testing

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use super::{QueryClient, QueryLog, QueryTransaction};
use crate::data_structures::Network;
use crate::errors::QueryError;

#[derive(Debug, Default)]
struct MockQueryData {
    balances: HashMap<String, String>,
    transactions: HashMap<String, Vec<QueryTransaction>>,
    logs: Vec<QueryLog>,
    blocks: HashMap<String, Vec<u64>>,
    block_number: u64,
    nonces: HashMap<String, u64>,
    gas_price: String,
    gas_estimate: u64,
    submitted: Vec<Vec<u8>>,
    /// Every call, as "kind:argument"
    requests: Vec<String>,
    failure: Option<QueryError>,
}

/// Query client answering from canned data
#[derive(Debug, Clone)]
pub struct MockQueryClient {
    data: Arc<Mutex<MockQueryData>>,
    delay: Option<Duration>,
}

impl Default for MockQueryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockQueryClient {
    pub fn new() -> Self {
        let data = MockQueryData {
            gas_price: "1000000000".to_string(),
            gas_estimate: 21_000,
            ..MockQueryData::default()
        };
        Self {
            data: Arc::new(Mutex::new(data)),
            delay: None,
        }
    }

    fn data(&self) -> MutexGuard<'_, MockQueryData> {
        self.data.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn with_balance(self, address: &str, balance: &str) -> Self {
        self.data()
            .balances
            .insert(address.to_ascii_lowercase(), balance.to_string());
        self
    }

    pub fn with_transactions(self, address: &str, transactions: Vec<QueryTransaction>) -> Self {
        self.data()
            .transactions
            .insert(address.to_ascii_lowercase(), transactions);
        self
    }

    pub fn with_logs(self, logs: Vec<QueryLog>) -> Self {
        self.data().logs = logs;
        self
    }

    pub fn with_blocks(self, address: &str, blocks: Vec<u64>) -> Self {
        self.data()
            .blocks
            .insert(address.to_ascii_lowercase(), blocks);
        self
    }

    pub fn with_block_number(self, block_number: u64) -> Self {
        self.data().block_number = block_number;
        self
    }

    pub fn with_nonce(self, address: &str, nonce: u64) -> Self {
        self.data().nonces.insert(address.to_ascii_lowercase(), nonce);
        self
    }

    pub fn with_gas_price(self, gas_price: &str) -> Self {
        self.data().gas_price = gas_price.to_string();
        self
    }

    pub fn with_gas_estimate(self, gas_estimate: u64) -> Self {
        self.data().gas_estimate = gas_estimate;
        self
    }

    /// Answer every request after `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail every request with `error`
    pub fn failing(self, error: QueryError) -> Self {
        self.data().failure = Some(error);
        self
    }

    pub fn set_failure(&self, error: Option<QueryError>) {
        self.data().failure = error;
    }

    pub fn set_block_number(&self, block_number: u64) {
        self.data().block_number = block_number;
    }

    pub fn request_count(&self) -> usize {
        self.data().requests.len()
    }

    pub fn requests(&self) -> Vec<String> {
        self.data().requests.clone()
    }

    pub fn submitted(&self) -> Vec<Vec<u8>> {
        self.data().submitted.clone()
    }

    /// Log the call, wait out the delay and report the configured failure
    async fn begin(&self, kind: &str, argument: &str) -> Result<(), QueryError> {
        let failure = {
            let mut data = self.data();
            data.requests.push(format!("{kind}:{argument}"));
            data.failure.clone()
        };
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl QueryClient for MockQueryClient {
    async fn get_balance(
        &self,
        _network: &Network,
        address: &str,
        token: Option<&str>,
    ) -> Result<String, QueryError> {
        self.begin("get_balance", address).await?;
        let key = match token {
            Some(token) => format!("{}:{}", address, token).to_ascii_lowercase(),
            None => address.to_ascii_lowercase(),
        };
        self.data()
            .balances
            .get(&key)
            .cloned()
            .ok_or_else(|| QueryError::Rejected(format!("no balance for {address}")))
    }

    async fn get_transactions(
        &self,
        _network: &Network,
        address: &str,
        begin_block: u64,
        end_block: u64,
    ) -> Result<Vec<QueryTransaction>, QueryError> {
        self.begin("get_transactions", address).await?;
        Ok(self
            .data()
            .transactions
            .get(&address.to_ascii_lowercase())
            .map(|transactions| {
                transactions
                    .iter()
                    .filter(|tx| tx.block_number >= begin_block && tx.block_number <= end_block)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_logs(
        &self,
        _network: &Network,
        address: &str,
        contract: Option<&str>,
        topic: &str,
        begin_block: u64,
        end_block: u64,
    ) -> Result<Vec<QueryLog>, QueryError> {
        self.begin("get_logs", address).await?;
        Ok(self
            .data()
            .logs
            .iter()
            .filter(|log| contract.map_or(true, |c| log.contract.eq_ignore_ascii_case(c)))
            .filter(|log| log.topics.first().map(String::as_str) == Some(topic))
            .filter(|log| log.block_number >= begin_block && log.block_number <= end_block)
            .cloned()
            .collect())
    }

    async fn get_blocks(
        &self,
        _network: &Network,
        address: &str,
        begin_block: u64,
        end_block: u64,
    ) -> Result<Vec<u64>, QueryError> {
        self.begin("get_blocks", address).await?;
        Ok(self
            .data()
            .blocks
            .get(&address.to_ascii_lowercase())
            .map(|blocks| {
                blocks
                    .iter()
                    .copied()
                    .filter(|block| *block >= begin_block && *block <= end_block)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_block_number(&self, network: &Network) -> Result<u64, QueryError> {
        self.begin("get_block_number", &network.name).await?;
        Ok(self.data().block_number)
    }

    async fn get_nonce(&self, _network: &Network, address: &str) -> Result<u64, QueryError> {
        self.begin("get_nonce", address).await?;
        Ok(self
            .data()
            .nonces
            .get(&address.to_ascii_lowercase())
            .copied()
            .unwrap_or(0))
    }

    async fn get_gas_price(&self, network: &Network) -> Result<String, QueryError> {
        self.begin("get_gas_price", &network.name).await?;
        Ok(self.data().gas_price.clone())
    }

    async fn estimate_gas(
        &self,
        _network: &Network,
        source: &str,
        _target: &str,
        _amount: &str,
        _data: &str,
    ) -> Result<u64, QueryError> {
        self.begin("estimate_gas", source).await?;
        Ok(self.data().gas_estimate)
    }

    async fn submit_transaction(
        &self,
        _network: &Network,
        raw_transaction: &[u8],
    ) -> Result<String, QueryError> {
        self.begin("submit_transaction", &hex::encode(raw_transaction))
            .await?;
        if raw_transaction.is_empty() {
            return Err(QueryError::MalformedResponse(
                "empty transaction".to_string(),
            ));
        }
        self.data().submitted.push(raw_transaction.to_vec());
        Ok(format!("0x{}", hex::encode([0xabu8; 32])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_canned_answers() {
        let client = MockQueryClient::new()
            .with_nonce("0xAA", 7)
            .with_blocks("0xaa", vec![5, 10, 15]);
        let network = Network::ethereum(false);

        assert_eq!(client.get_nonce(&network, "0xaa").await.unwrap(), 7);
        assert_eq!(
            client.get_blocks(&network, "0xaa", 6, 20).await.unwrap(),
            vec![10, 15]
        );
        assert_eq!(client.get_gas_price(&network).await.unwrap(), "1000000000");
        assert!(client.get_balance(&network, "0xbb", None).await.is_err());
        assert_eq!(client.request_count(), 4);
    }

    #[tokio::test]
    async fn test_failure_can_be_cleared() {
        let client = MockQueryClient::new().failing(QueryError::Rejected("nope".to_string()));
        let network = Network::bitcoin(true);
        assert!(client.get_block_number(&network).await.is_err());

        client.set_failure(None);
        client.set_block_number(42);
        assert_eq!(client.get_block_number(&network).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_submit_records_payload() {
        let client = MockQueryClient::new();
        let network = Network::ethereum(true);
        let hash = client
            .submit_transaction(&network, &[1, 2, 3])
            .await
            .unwrap();
        assert!(hash.starts_with("0x"));
        assert_eq!(client.submitted(), vec![vec![1, 2, 3]]);
        assert!(matches!(
            client.submit_transaction(&network, &[]).await,
            Err(QueryError::MalformedResponse(_))
        ));
    }
}
