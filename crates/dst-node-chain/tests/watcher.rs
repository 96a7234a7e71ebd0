//! Event watcher behaviour under subscription races and failures.

use std::sync::Arc;
use std::time::Duration;

use tracing::Span;

use dst_node_chain::{
    BlockchainInstance, ChainConfig, ChainError, EventKind, EventsChan, WatcherConfig,
};
use dst_node_core::Address;
use dst_node_testkit::fixtures::{alice, bob, TestParty, ETHER};
use dst_node_testkit::{contract_store, SimulatedChain};

const TIMEOUT: Duration = Duration::from_secs(5);

/// Deploy the library and VPC, and return Alice's instance.
async fn prepared(chain: &Arc<SimulatedChain>, alice: &TestParty) -> BlockchainInstance {
    chain.fund(alice.address(), 100 * ETHER);
    let mut a = BlockchainInstance::new(
        chain.clone(),
        alice.id.clone(),
        contract_store(),
        ChainConfig::default(),
        Span::none(),
    );
    alice.arm(a.owner_mut());
    a.setup_lib_signatures(None).await.unwrap();
    alice.arm(a.owner_mut());
    a.deploy_vpc().await.unwrap();
    a
}

#[tokio::test]
async fn test_initializing_delivered_once_when_replayed() {
    let chain = Arc::new(SimulatedChain::new());
    chain.replay_on_subscribe(true);
    let (alice, bob) = (alice(), bob());
    let mut a = prepared(&chain, &alice).await;

    alice.arm(a.owner_mut());
    a.deploy_ms_contract(alice.address(), bob.address())
        .await
        .unwrap();

    let events = a.events().unwrap();
    let init = events.ms_initializing.recv_timeout(TIMEOUT).await.unwrap();
    assert_eq!(init.sender, alice.address());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(events.ms_initializing.try_recv().is_none());
}

#[tokio::test]
async fn test_catch_up_failure_is_not_fatal() {
    let chain = Arc::new(SimulatedChain::new());
    chain.fail_filter_logs(true);
    let (alice, bob) = (alice(), bob());
    let mut a = prepared(&chain, &alice).await;

    alice.arm(a.owner_mut());
    a.deploy_ms_contract(alice.address(), bob.address())
        .await
        .unwrap();

    // Initializing was mined before the subscription and the query failed.
    let events = a.events().unwrap();
    assert!(matches!(
        events
            .ms_initializing
            .recv_timeout(Duration::from_millis(200))
            .await,
        Err(ChainError::EventTimeout(EventKind::MscInitializing))
    ));

    alice.arm(a.owner_mut());
    a.confirm(ETHER).await.unwrap();
    assert_eq!(chain.logs().len(), 1);
}

#[tokio::test]
async fn test_refused_subscription_fails_initialize() {
    let chain = Arc::new(SimulatedChain::new());
    chain.refuse_subscription(EventKind::VpcClosed);

    let result = EventsChan::initialize(
        chain.clone(),
        Address::from_bytes([1; 20]),
        Address::from_bytes([2; 20]),
        &WatcherConfig::default(),
        Span::none(),
    )
    .await;
    match result {
        Err(ChainError::Subscription(reason)) => assert!(reason.contains("VpcClosed"), "{reason}"),
        other => panic!("expected subscription failure, got {other:?}"),
    }
    assert_eq!(chain.subscriber_count(), 0);
}

#[tokio::test]
async fn test_broken_subscription_surfaces_error() {
    let chain = Arc::new(SimulatedChain::new());
    let (alice, bob) = (alice(), bob());
    let mut a = prepared(&chain, &alice).await;
    alice.arm(a.owner_mut());
    a.deploy_ms_contract(alice.address(), bob.address())
        .await
        .unwrap();
    assert_eq!(chain.subscriber_count(), EventKind::ALL.len());

    chain.break_subscriptions(EventKind::MscClosed, "node restarted");
    let events = a.events().unwrap();
    match events.ms_closed.recv_timeout(TIMEOUT).await {
        Err(ChainError::Subscription(reason)) => assert_eq!(reason, "node restarted"),
        other => panic!("expected subscription error, got {other:?}"),
    }
    assert!(matches!(
        events.ms_closed.recv_timeout(TIMEOUT).await,
        Err(ChainError::EventStreamClosed(EventKind::MscClosed))
    ));
}

#[tokio::test]
async fn test_dropping_watcher_ends_subscriptions() {
    let chain = Arc::new(SimulatedChain::new());
    let mut events = EventsChan::initialize(
        chain.clone(),
        Address::from_bytes([1; 20]),
        Address::from_bytes([2; 20]),
        &WatcherConfig::default(),
        Span::none(),
    )
    .await
    .unwrap();
    assert_eq!(chain.subscriber_count(), EventKind::ALL.len());

    events.shutdown();
    drop(events);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(chain.subscriber_count(), 0);
}
