//! Integration tests for assisted queries
//!
//! An engine raises a query callback; the system runs it against the query
//! client off the dispatch task and announces the answer back to the engine.
//! Every request must be announced exactly once, success or failure.

use std::sync::Arc;
use std::time::Duration;

use multichain_wallet_libs::data_structures::{Account, Backend, EngineHandle, Network};
use multichain_wallet_libs::dispatch::EngineCallbacks;
use multichain_wallet_libs::engine::mocks::{MockAccountEngine, MockUtxoEngine};
use multichain_wallet_libs::query::mocks::MockQueryClient;
use multichain_wallet_libs::query::{QueryRequest, RequestId};
use multichain_wallet_libs::records::ManagerMode;
use multichain_wallet_libs::{QueryError, System, SystemConfig};

/// Poll the engine until `count` announcements arrived
async fn wait_for_announcements(
    announcements: impl Fn() -> Vec<(RequestId, String, bool)>,
    count: usize,
) -> Vec<(RequestId, String, bool)> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let seen = announcements();
        if seen.len() >= count || tokio::time::Instant::now() >= deadline {
            return seen;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn account_system(client: Option<MockQueryClient>) -> (System, MockAccountEngine, EngineCallbacks) {
    let mut builder = System::builder(SystemConfig::default());
    let callbacks = builder.callbacks(Backend::Account);
    let engine = MockAccountEngine::new().with_callbacks(callbacks.clone());
    builder = builder.with_account_engine(Arc::new(engine.clone()));
    if let Some(client) = client {
        builder = builder.with_query_client(Arc::new(client));
    }
    (builder.build().unwrap(), engine, callbacks)
}

#[tokio::test]
async fn test_query_result_is_announced_to_the_engine() {
    let client = MockQueryClient::new()
        .with_block_number(12_345_678)
        .with_nonce("0x1111111111111111111111111111111111111111", 7);
    let (system, engine, callbacks) = account_system(Some(client.clone()));
    let manager = system
        .create_manager(Account::new("alice", 0), Network::ethereum(true), ManagerMode::ApiOnly, "/tmp/q1")
        .await
        .unwrap();

    assert!(callbacks.query(manager.engine_handle(), RequestId(1), QueryRequest::GetBlockNumber));
    assert!(callbacks.query(
        manager.engine_handle(),
        RequestId(2),
        QueryRequest::GetNonce {
            address: "0x1111111111111111111111111111111111111111".to_string(),
        },
    ));

    let mut announced = wait_for_announcements(|| engine.announcements(), 2).await;
    announced.sort();
    assert_eq!(
        announced,
        vec![
            (RequestId(1), "block_number".to_string(), true),
            (RequestId(2), "nonce".to_string(), true),
        ]
    );
    assert_eq!(client.request_count(), 2);

    system.flush().await.unwrap();
    let stats = system.stats();
    assert_eq!(stats.queries_issued, 2);
    assert_eq!(stats.queries_failed, 0);
    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_query_without_client_fails_immediately() {
    let (system, engine, callbacks) = account_system(None);
    let manager = system
        .create_manager(Account::new("bob", 0), Network::ethereum(true), ManagerMode::ApiOnly, "/tmp/q2")
        .await
        .unwrap();

    callbacks.query(manager.engine_handle(), RequestId(9), QueryRequest::GetGasPrice);
    system.flush().await.unwrap();

    assert_eq!(
        engine.announcements(),
        vec![(RequestId(9), "gas_price".to_string(), false)]
    );
    let stats = system.stats();
    assert_eq!(stats.queries_issued, 0);
    assert_eq!(stats.queries_failed, 1);
    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_query_failure_is_announced_as_failure() {
    let client = MockQueryClient::new()
        .failing(QueryError::NetworkUnavailable("connection refused".to_string()));
    let (system, engine, callbacks) = account_system(Some(client));
    let manager = system
        .create_manager(Account::new("carol", 0), Network::ethereum(false), ManagerMode::ApiOnly, "/tmp/q3")
        .await
        .unwrap();

    callbacks.query(
        manager.engine_handle(),
        RequestId(3),
        QueryRequest::GetBalance {
            address: "0x2222222222222222222222222222222222222222".to_string(),
            token: None,
        },
    );

    let announced = wait_for_announcements(|| engine.announcements(), 1).await;
    assert_eq!(announced, vec![(RequestId(3), "balance".to_string(), false)]);
    system.flush().await.unwrap();
    assert_eq!(system.stats().queries_failed, 1);
    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_query_for_unknown_manager_is_rejected() {
    let (system, engine, callbacks) = account_system(Some(MockQueryClient::new()));

    callbacks.query(EngineHandle::new(0x4242), RequestId(5), QueryRequest::GetBlockNumber);
    system.flush().await.unwrap();

    assert_eq!(
        engine.announcements(),
        vec![(RequestId(5), "block_number".to_string(), false)]
    );
    assert_eq!(system.stats().dropped("unknown_manager"), 1);
    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_utxo_engine_queries_blocks_and_transactions() {
    let address = "1BoatSLRHtKNngkdXEeobR76b53LETtpyT";
    let client = MockQueryClient::new().with_blocks(address, vec![100, 250, 612]);
    let builder = System::builder(SystemConfig::default());
    let callbacks = builder.callbacks(Backend::Utxo);
    let engine = MockUtxoEngine::new().with_callbacks(callbacks.clone());
    let system = builder
        .with_utxo_engine(Arc::new(engine.clone()))
        .with_query_client(Arc::new(client.clone()))
        .build()
        .unwrap();
    let manager = system
        .create_manager(Account::new("dave", 0), Network::bitcoin(true), ManagerMode::ApiOnly, "/tmp/q4")
        .await
        .unwrap();

    callbacks.query(
        manager.engine_handle(),
        RequestId(10),
        QueryRequest::GetBlocks {
            address: address.to_string(),
            begin_block: 0,
            end_block: 1_000,
        },
    );
    callbacks.query(
        manager.engine_handle(),
        RequestId(11),
        QueryRequest::GetTransactions {
            address: address.to_string(),
            begin_block: 0,
            end_block: 1_000,
        },
    );

    let mut announced = wait_for_announcements(|| engine.announcements(), 2).await;
    announced.sort();
    assert_eq!(
        announced,
        vec![
            (RequestId(10), "blocks".to_string(), true),
            (RequestId(11), "transactions".to_string(), true),
        ]
    );
    system.shutdown().await.unwrap();
}

/// Queries still in flight at shutdown must not keep the system alive
#[tokio::test]
async fn test_shutdown_with_query_in_flight() {
    let client = MockQueryClient::new().with_delay(Duration::from_millis(200));
    let (system, engine, callbacks) = account_system(Some(client));
    let manager = system
        .create_manager(Account::new("erin", 0), Network::ethereum(true), ManagerMode::ApiOnly, "/tmp/q5")
        .await
        .unwrap();

    callbacks.query(manager.engine_handle(), RequestId(77), QueryRequest::GetBlockNumber);
    system.flush().await.unwrap();

    tokio::time::timeout(Duration::from_secs(1), system.shutdown())
        .await
        .expect("shutdown should not wait for the query")
        .unwrap();
    assert!(system.is_shut_down());
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(engine.announcements().is_empty());
}
