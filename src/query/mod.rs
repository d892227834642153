//! Assisted-query collaborator
//!
//! Engines that sync through a remote query service (balances, transactions,
//! fees over HTTP) do not talk to it directly. They raise a request callback
//! carrying an opaque [`RequestId`]; the dispatch context hands the request to
//! a [`QueryClient`] on a spawned task and, when the client answers, feeds the
//! result back into the engine through the matching "announce" command.
//!
//! Every request is completed exactly once, success or failure, so the engine
//! never waits forever.

pub mod mocks;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::data_structures::Network;
use crate::errors::QueryError;

/// Engine-issued correlation id for one query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A transaction as the query service reports it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryTransaction {
    pub hash: String,
    pub source: String,
    pub target: String,
    /// Big integer in base units
    pub amount: String,
    pub block_number: u64,
    pub transaction_index: u64,
    pub timestamp: u64,
    pub gas_used: Option<u64>,
    pub gas_price: Option<String>,
    /// Node error text for failed transactions
    pub error: Option<String>,
}

/// A contract log entry (token transfers on the account backend)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryLog {
    pub transaction_hash: String,
    pub contract: String,
    pub topics: Vec<String>,
    pub data: String,
    pub block_number: u64,
    pub transaction_index: u64,
    pub log_index: u64,
    pub timestamp: u64,
}

/// One request an engine can raise
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryRequest {
    GetBalance {
        address: String,
        /// Token contract, `None` for the native currency
        token: Option<String>,
    },
    GetTransactions {
        address: String,
        begin_block: u64,
        end_block: u64,
    },
    GetLogs {
        address: String,
        contract: Option<String>,
        topic: String,
        begin_block: u64,
        end_block: u64,
    },
    /// Block numbers in which `address` was active
    GetBlocks {
        address: String,
        begin_block: u64,
        end_block: u64,
    },
    GetBlockNumber,
    GetNonce {
        address: String,
    },
    GetGasPrice,
    EstimateGas {
        source: String,
        target: String,
        amount: String,
        data: String,
    },
    SubmitTransaction {
        raw_transaction: Vec<u8>,
    },
}

impl QueryRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            QueryRequest::GetBalance { .. } => "get_balance",
            QueryRequest::GetTransactions { .. } => "get_transactions",
            QueryRequest::GetLogs { .. } => "get_logs",
            QueryRequest::GetBlocks { .. } => "get_blocks",
            QueryRequest::GetBlockNumber => "get_block_number",
            QueryRequest::GetNonce { .. } => "get_nonce",
            QueryRequest::GetGasPrice => "get_gas_price",
            QueryRequest::EstimateGas { .. } => "estimate_gas",
            QueryRequest::SubmitTransaction { .. } => "submit_transaction",
        }
    }
}

/// A successful answer, shaped by the request it answers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryResponse {
    Balance(String),
    Transactions(Vec<QueryTransaction>),
    Logs(Vec<QueryLog>),
    Blocks(Vec<u64>),
    BlockNumber(u64),
    Nonce(u64),
    GasPrice(String),
    GasEstimate(u64),
    /// Network hash of the submitted transaction
    Submitted(String),
}

/// The remote query service
///
/// Implementations own their transport and timeout policy; every call must
/// eventually resolve to a value or a [`QueryError`].
#[async_trait]
pub trait QueryClient: Send + Sync {
    async fn get_balance(
        &self,
        network: &Network,
        address: &str,
        token: Option<&str>,
    ) -> Result<String, QueryError>;

    async fn get_transactions(
        &self,
        network: &Network,
        address: &str,
        begin_block: u64,
        end_block: u64,
    ) -> Result<Vec<QueryTransaction>, QueryError>;

    async fn get_logs(
        &self,
        network: &Network,
        address: &str,
        contract: Option<&str>,
        topic: &str,
        begin_block: u64,
        end_block: u64,
    ) -> Result<Vec<QueryLog>, QueryError>;

    async fn get_blocks(
        &self,
        network: &Network,
        address: &str,
        begin_block: u64,
        end_block: u64,
    ) -> Result<Vec<u64>, QueryError>;

    async fn get_block_number(&self, network: &Network) -> Result<u64, QueryError>;

    async fn get_nonce(&self, network: &Network, address: &str) -> Result<u64, QueryError>;

    async fn get_gas_price(&self, network: &Network) -> Result<String, QueryError>;

    async fn estimate_gas(
        &self,
        network: &Network,
        source: &str,
        target: &str,
        amount: &str,
        data: &str,
    ) -> Result<u64, QueryError>;

    async fn submit_transaction(
        &self,
        network: &Network,
        raw_transaction: &[u8],
    ) -> Result<String, QueryError>;
}

/// Run one request against `client`
pub async fn execute(
    client: &dyn QueryClient,
    network: &Network,
    request: &QueryRequest,
) -> Result<QueryResponse, QueryError> {
    match request {
        QueryRequest::GetBalance { address, token } => client
            .get_balance(network, address, token.as_deref())
            .await
            .map(QueryResponse::Balance),
        QueryRequest::GetTransactions {
            address,
            begin_block,
            end_block,
        } => client
            .get_transactions(network, address, *begin_block, *end_block)
            .await
            .map(QueryResponse::Transactions),
        QueryRequest::GetLogs {
            address,
            contract,
            topic,
            begin_block,
            end_block,
        } => client
            .get_logs(
                network,
                address,
                contract.as_deref(),
                topic,
                *begin_block,
                *end_block,
            )
            .await
            .map(QueryResponse::Logs),
        QueryRequest::GetBlocks {
            address,
            begin_block,
            end_block,
        } => client
            .get_blocks(network, address, *begin_block, *end_block)
            .await
            .map(QueryResponse::Blocks),
        QueryRequest::GetBlockNumber => client
            .get_block_number(network)
            .await
            .map(QueryResponse::BlockNumber),
        QueryRequest::GetNonce { address } => client
            .get_nonce(network, address)
            .await
            .map(QueryResponse::Nonce),
        QueryRequest::GetGasPrice => client
            .get_gas_price(network)
            .await
            .map(QueryResponse::GasPrice),
        QueryRequest::EstimateGas {
            source,
            target,
            amount,
            data,
        } => client
            .estimate_gas(network, source, target, amount, data)
            .await
            .map(QueryResponse::GasEstimate),
        QueryRequest::SubmitTransaction { raw_transaction } => client
            .submit_transaction(network, raw_transaction)
            .await
            .map(QueryResponse::Submitted),
    }
}

#[cfg(test)]
mod tests {
    use super::mocks::MockQueryClient;
    use super::*;

    #[tokio::test]
    async fn test_execute_routes_by_request_kind() {
        let client = MockQueryClient::new()
            .with_block_number(1234)
            .with_balance("0xabc", "1000");
        let network = Network::ethereum(true);

        let response = execute(&client, &network, &QueryRequest::GetBlockNumber)
            .await
            .unwrap();
        assert_eq!(response, QueryResponse::BlockNumber(1234));

        let response = execute(
            &client,
            &network,
            &QueryRequest::GetBalance {
                address: "0xabc".to_string(),
                token: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(response, QueryResponse::Balance("1000".to_string()));
        assert_eq!(client.request_count(), 2);
    }

    #[tokio::test]
    async fn test_failures_pass_through() {
        let client = MockQueryClient::new().failing(QueryError::NetworkUnavailable(
            "connection refused".to_string(),
        ));
        let result = execute(&client, &Network::ethereum(true), &QueryRequest::GetGasPrice).await;
        assert_eq!(
            result,
            Err(QueryError::NetworkUnavailable("connection refused".to_string()))
        );
    }

    #[test]
    fn test_request_kind_names() {
        assert_eq!(QueryRequest::GetBlockNumber.kind(), "get_block_number");
        assert_eq!(
            QueryRequest::SubmitTransaction {
                raw_transaction: vec![]
            }
            .kind(),
            "submit_transaction"
        );
    }
}
