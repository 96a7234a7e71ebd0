//! Settlement lifecycle against the simulated chain.

use std::sync::Arc;
use std::time::Duration;

use tracing::Span;

use dst_node_chain::{BlockchainInstance, ChainConfig, ChainError, MscInitialized, MscStateRegistered};
use dst_node_core::{Address, ContractKind, CoreError, MatchStatus, Role, SessionId};
use dst_node_testkit::fixtures::{
    alice, bob, session_id, sign, signed_msc_base_state, signed_vpc_state, vpc_state, TestParty,
    ETHER,
};
use dst_node_testkit::{contract_store, SimulatedChain};

const TIMEOUT: Duration = Duration::from_secs(5);

fn instance(chain: &Arc<SimulatedChain>, party: &TestParty, config: ChainConfig) -> BlockchainInstance {
    BlockchainInstance::new(
        chain.clone(),
        party.id.clone(),
        contract_store(),
        config,
        Span::none(),
    )
}

struct Channel {
    chain: Arc<SimulatedChain>,
    alice: TestParty,
    bob: TestParty,
    a: BlockchainInstance,
    b: BlockchainInstance,
    sid: SessionId,
}

/// Alice deploys all contracts, Bob binds them after verification.
async fn deployed(config: ChainConfig) -> Channel {
    let chain = Arc::new(SimulatedChain::new());
    let (alice, bob) = (alice(), bob());
    chain.fund(alice.address(), 100 * ETHER);
    chain.fund(bob.address(), 100 * ETHER);

    let mut a = instance(&chain, &alice, config);
    alice.arm(a.owner_mut());
    let lib = a.setup_lib_signatures(None).await.unwrap();
    alice.arm(a.owner_mut());
    let vpc = a.deploy_vpc().await.unwrap();
    alice.arm(a.owner_mut());
    let ms = a
        .deploy_ms_contract(alice.address(), bob.address())
        .await
        .unwrap();

    let mut b = instance(&chain, &bob, config);
    b.setup_lib_signatures(Some(lib)).await.unwrap();
    b.bind_contracts(ms, vpc).await.unwrap();

    let sid = session_id(&alice, &bob);
    Channel {
        chain,
        alice,
        bob,
        a,
        b,
        sid,
    }
}

/// Both parties lock 10 ETH and register the funding commitment.
async fn funded() -> Channel {
    let mut ch = deployed(ChainConfig::default()).await;
    ch.alice.arm(ch.a.owner_mut());
    ch.a.confirm(10 * ETHER).await.unwrap();
    ch.bob.arm(ch.b.owner_mut());
    ch.b.confirm(10 * ETHER).await.unwrap();

    let vpc = ch.a.vpc_addr().unwrap();
    let base = signed_msc_base_state(&ch.sid, vpc, &ch.alice, &ch.bob, 10 * ETHER, 10 * ETHER);
    ch.alice.arm(ch.a.owner_mut());
    ch.a.state_register(&base).await.unwrap();
    ch.bob.arm(ch.b.owner_mut());
    ch.b.state_register(&base).await.unwrap();
    ch
}

#[tokio::test]
async fn test_deploy_and_bind() {
    let mut ch = deployed(ChainConfig::default()).await;

    for kind in ContractKind::ALL {
        assert_eq!(ch.a.contract_addr(kind), ch.b.contract_addr(kind), "{kind}");
        assert!(ch.a.contract_addr(kind).is_some());
    }
    assert!(!ch.a.owner().has_credentials());

    let init = ch.b.events().unwrap().ms_initializing.recv_timeout(TIMEOUT).await.unwrap();
    assert_eq!(init.sender, ch.alice.address());
    assert_eq!(init.receiver, ch.bob.address());
}

#[tokio::test]
async fn test_set_address_rejects_unverified_code() {
    let chain = Arc::new(SimulatedChain::new());
    let bob = bob();
    let mut b = instance(&chain, &bob, ChainConfig::default());

    let bogus = Address::from_bytes([0xee; 20]);
    chain.set_code(bogus, b"\x60\x80not-a-vpc".to_vec());
    match b.set_vpc_addr(bogus).await {
        Err(ChainError::VerificationFailed { kind, status, .. }) => {
            assert_eq!(kind, ContractKind::Vpc);
            assert_eq!(status, MatchStatus::NoMatch);
        }
        other => panic!("expected verification failure, got {other:?}"),
    }
    assert_eq!(b.vpc_addr(), None);

    let empty = Address::from_bytes([0xef; 20]);
    assert!(matches!(
        b.set_lib_signatures(empty).await,
        Err(ChainError::VerificationFailed {
            status: MatchStatus::Missing,
            ..
        })
    ));
    assert_eq!(b.lib_signatures(), None);
    assert!(matches!(
        b.deploy_vpc().await,
        Err(ChainError::AddressNotSet(ContractKind::LibSignatures))
    ));
}

#[tokio::test]
async fn test_funding_emits_initialized() {
    let mut ch = deployed(ChainConfig::default()).await;
    ch.alice.arm(ch.a.owner_mut());
    ch.a.confirm(10 * ETHER).await.unwrap();
    ch.bob.arm(ch.b.owner_mut());
    ch.b.confirm(10 * ETHER).await.unwrap();

    let expected = MscInitialized {
        cash_sender: 10 * ETHER,
        cash_receiver: 10 * ETHER,
    };
    for chain in [&mut ch.a, &mut ch.b] {
        let got = chain.events().unwrap().ms_initialized.recv_timeout(TIMEOUT).await.unwrap();
        assert_eq!(got, expected);
    }
    assert_eq!(ch.chain.balance_of(&ch.alice.address()), 90 * ETHER);
    assert_eq!(
        ch.chain.balance_of(&ch.a.ms_contract_addr().unwrap()),
        20 * ETHER
    );
}

#[tokio::test]
async fn test_state_register_by_both_parties() {
    let mut ch = funded().await;

    let events = ch.a.events().unwrap();
    events.ms_state_registering.recv_timeout(TIMEOUT).await.unwrap();
    let registered = events.ms_state_registered.recv_timeout(TIMEOUT).await.unwrap();
    assert_eq!(
        registered,
        MscStateRegistered {
            blocked_sender: 10 * ETHER,
            blocked_receiver: 10 * ETHER,
        }
    );
}

#[tokio::test]
async fn test_state_register_rejects_foreign_vpc() {
    let mut ch = deployed(ChainConfig::default()).await;
    let base = signed_msc_base_state(
        &ch.sid,
        Address::from_bytes([0x42; 20]),
        &ch.alice,
        &ch.bob,
        ETHER,
        ETHER,
    );
    ch.alice.arm(ch.a.owner_mut());
    assert!(matches!(
        ch.a.state_register(&base).await,
        Err(ChainError::InvalidState(_))
    ));
}

#[tokio::test]
async fn test_close_and_execute_pay_out() {
    let mut ch = funded().await;
    let final_state = signed_vpc_state(&ch.sid, &ch.alice, &ch.bob, 20, 7 * ETHER, 13 * ETHER);
    let id = ch.sid.vpc_id().unwrap();

    ch.alice.arm(ch.a.owner_mut());
    ch.a.vpc_close(&ch.sid, &final_state).await.unwrap();
    let closing = ch.b.events().unwrap().vpc_closing.recv_timeout(TIMEOUT).await.unwrap();
    assert_eq!(closing.id, id);
    assert!(!ch.a.states(id).await.unwrap().is_closed());

    ch.bob.arm(ch.b.owner_mut());
    ch.b.vpc_close(&ch.sid, &final_state).await.unwrap();
    let closed = ch.a.events().unwrap().vpc_closed.recv_timeout(TIMEOUT).await.unwrap();
    assert_eq!((closed.cash_sender, closed.cash_receiver), (7 * ETHER, 13 * ETHER));
    let on_chain = ch.a.states(id).await.unwrap();
    assert!(on_chain.is_closed());
    assert_eq!(on_chain.seq_no, 20);

    ch.alice.arm(ch.a.owner_mut());
    ch.a.execute(ch.alice.address(), ch.bob.address()).await.unwrap();
    for chain in [&mut ch.a, &mut ch.b] {
        chain.events().unwrap().ms_closed.recv_timeout(TIMEOUT).await.unwrap();
    }
    assert_eq!(ch.chain.balance_of(&ch.alice.address()), 97 * ETHER);
    assert_eq!(ch.chain.balance_of(&ch.bob.address()), 103 * ETHER);
    assert_eq!(ch.chain.balance_of(&ch.a.ms_contract_addr().unwrap()), 0);
}

#[tokio::test]
async fn test_dispute_higher_version_wins() {
    let mut ch = funded().await;
    let stale = signed_vpc_state(&ch.sid, &ch.alice, &ch.bob, 1, 9 * ETHER, 11 * ETHER);
    let latest = signed_vpc_state(&ch.sid, &ch.alice, &ch.bob, 5, 6 * ETHER, 14 * ETHER);

    ch.alice.arm(ch.a.owner_mut());
    ch.a.vpc_close(&ch.sid, &stale).await.unwrap();
    ch.bob.arm(ch.b.owner_mut());
    ch.b.vpc_close(&ch.sid, &latest).await.unwrap();

    let closed = ch.b.events().unwrap().vpc_closed.recv_timeout(TIMEOUT).await.unwrap();
    assert_eq!((closed.cash_sender, closed.cash_receiver), (6 * ETHER, 14 * ETHER));

    ch.bob.arm(ch.b.owner_mut());
    ch.b.execute(ch.alice.address(), ch.bob.address()).await.unwrap();
    assert_eq!(ch.chain.balance_of(&ch.alice.address()), 96 * ETHER);
    assert_eq!(ch.chain.balance_of(&ch.bob.address()), 104 * ETHER);
}

#[tokio::test]
async fn test_close_requires_both_signatures() {
    let mut ch = funded().await;
    let half_signed = sign(
        vpc_state(&ch.sid, 2, 5 * ETHER, 15 * ETHER),
        Some(&ch.alice),
        None,
    );
    ch.alice.arm(ch.a.owner_mut());
    assert!(matches!(
        ch.a.vpc_close(&ch.sid, &half_signed).await,
        Err(ChainError::Core(CoreError::MissingSignature(Role::Receiver)))
    ));
}

#[tokio::test]
async fn test_credentials_are_single_use() {
    let mut ch = deployed(ChainConfig::default()).await;
    ch.alice.arm(ch.a.owner_mut());
    ch.a.confirm(ETHER).await.unwrap();
    assert!(!ch.a.owner().has_credentials());

    match ch.b.confirm(ETHER).await {
        Err(ChainError::Core(CoreError::CredentialsNotSet(addr))) => {
            assert_eq!(addr, ch.bob.address())
        }
        other => panic!("expected missing credentials, got {other:?}"),
    }
}

#[tokio::test]
async fn test_reverted_transaction_reports_status() {
    let mut ch = deployed(ChainConfig::default()).await;
    ch.alice.arm(ch.a.owner_mut());
    ch.a.confirm(ETHER).await.unwrap();

    ch.alice.arm(ch.a.owner_mut());
    match ch.a.confirm(ETHER).await {
        Err(ChainError::ReceiptStatusFailed { operation, .. }) => assert_eq!(operation, "confirm"),
        other => panic!("expected reverted confirm, got {other:?}"),
    }
    assert!(!ch.a.owner().has_credentials());
    assert_eq!(ch.chain.balance_of(&ch.alice.address()), 99 * ETHER);
}

#[tokio::test]
async fn test_stalled_mining_times_out() {
    let config = ChainConfig {
        mining_timeout: Duration::from_millis(200),
        ..ChainConfig::default()
    };
    let mut ch = deployed(config).await;
    ch.chain.stall_mining(true);

    ch.alice.arm(ch.a.owner_mut());
    assert!(matches!(
        ch.a.confirm(ETHER).await,
        Err(ChainError::MiningTimeout(_))
    ));
}
