//! Full channel lifecycle between two nodes over TCP and the simulated
//! chain.

use std::sync::Arc;
use std::time::Duration;

use tracing::Span;

use dst_node::channel::ChannelStatus;
use dst_node::chain::ChainClient;
use dst_node::core::{Keystore, Role};
use dst_node::{Node, NodeConfig, NodeError, Party, PaymentChannel, STAGE_VPC_STATE};
use dst_node_testkit::fixtures::{
    alice, bob, carol, session_id, signed_vpc_state, TestParty, ETHER, PASSWORD,
};
use dst_node_testkit::{contract_store, SimulatedChain};

const DEPOSIT: u128 = 10 * ETHER;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn config() -> NodeConfig {
    NodeConfig {
        message_timeout: Duration::from_secs(5),
        event_timeout: Duration::from_secs(5),
        ..NodeConfig::default()
    }
}

fn node(party: &TestParty, chain: &Arc<SimulatedChain>) -> Node {
    let keystore: Arc<dyn Keystore> = party.keystore.clone();
    let client: Arc<dyn ChainClient> = chain.clone();
    Node::new(
        Party::new(party.id.clone(), keystore, PASSWORD),
        client,
        config(),
        Span::none(),
    )
    .with_contract_store(contract_store())
}

struct Setup {
    chain: Arc<SimulatedChain>,
    alice: TestParty,
    bob: TestParty,
    bob_node: Node,
    a: PaymentChannel,
    b: PaymentChannel,
}

/// Alice opens a channel to a listening Bob; both lock `DEPOSIT`.
async fn funded_channel() -> Setup {
    init_tracing();
    let chain = Arc::new(SimulatedChain::new());
    let (alice, bob) = (alice(), bob());
    chain.fund(alice.address(), 100 * ETHER);
    chain.fund(bob.address(), 100 * ETHER);

    let mut bob_node = node(&bob, &chain);
    bob_node.listen().await.unwrap();
    let alice_node = node(&alice, &chain);

    let bob_id = bob_node.id().clone();
    let (a, b) = tokio::join!(alice_node.open_channel(&bob_id), bob_node.accept_channel());
    let (mut a, mut b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.status(), ChannelStatus::Init);
    assert_eq!(b.status(), ChannelStatus::Init);

    let (funded_a, funded_b) = tokio::join!(a.fund(DEPOSIT), b.fund(DEPOSIT));
    funded_a.unwrap();
    funded_b.unwrap();

    Setup {
        chain,
        alice,
        bob,
        bob_node,
        a,
        b,
    }
}

async fn pay(from: &mut PaymentChannel, to: &mut PaymentChannel, amount: u128) {
    let (proposed, answered) = tokio::join!(from.transfer(amount), to.respond_state());
    assert_eq!(proposed.unwrap(), answered.unwrap());
}

#[tokio::test]
async fn test_handshake_binds_same_contracts() {
    let s = funded_channel().await;
    assert_eq!(s.a.role(), Role::Sender);
    assert_eq!(s.b.role(), Role::Receiver);
    assert_eq!(s.a.status(), ChannelStatus::Open);
    assert_eq!(s.b.status(), ChannelStatus::Open);

    assert_eq!(s.a.session_id().unwrap(), s.b.session_id().unwrap());
    assert!(s.a.session_id().unwrap().validate().unwrap());
    assert_eq!(s.a.chain().vpc_addr(), s.b.chain().vpc_addr());
    assert_eq!(s.a.chain().ms_contract_addr(), s.b.chain().ms_contract_addr());
    assert_eq!(s.a.chain().lib_signatures(), s.b.chain().lib_signatures());

    assert_eq!(s.a.balances().unwrap(), (DEPOSIT, DEPOSIT));
    assert_eq!(s.b.balances().unwrap(), (DEPOSIT, DEPOSIT));
    let opening = s.a.current_state().unwrap();
    assert_eq!(opening.state.version, 1);
    assert_eq!(Some(opening), s.b.current_state());
    assert_eq!(s.chain.balance_of(&s.alice.address()), 90 * ETHER);
    assert_eq!(s.chain.balance_of(&s.bob.address()), 90 * ETHER);
}

#[tokio::test]
async fn test_payments_close_and_execute() -> anyhow::Result<()> {
    let Setup {
        chain,
        alice,
        bob,
        bob_node,
        mut a,
        mut b,
    } = funded_channel().await;

    for _ in 0..10 {
        pay(&mut a, &mut b, ETHER / 2).await;
    }
    for _ in 0..10 {
        pay(&mut b, &mut a, ETHER / 5).await;
    }
    let latest = a.current_state().unwrap().clone();
    assert_eq!(latest.state.version, 21);
    assert_eq!(a.balances()?, (7 * ETHER, 13 * ETHER));
    assert_eq!(b.balances()?, (7 * ETHER, 13 * ETHER));

    let (closed_a, closed_b) = tokio::try_join!(a.close(), b.respond_close())?;
    assert_eq!(closed_a, closed_b);
    assert_eq!((closed_a.cash_sender, closed_a.cash_receiver), (7 * ETHER, 13 * ETHER));
    assert_eq!(a.status(), ChannelStatus::VpcClosed);
    assert_eq!(b.status(), ChannelStatus::VpcClosed);
    assert_eq!(a.instance().role_closing(), Some(Role::Sender));
    assert_eq!(b.instance().role_closing(), Some(Role::Receiver));

    tokio::try_join!(a.execute(), b.await_closed())?;
    assert_eq!(a.status(), ChannelStatus::Closed);
    assert_eq!(b.status(), ChannelStatus::Closed);
    assert_eq!(chain.balance_of(&alice.address()), 97 * ETHER);
    assert_eq!(chain.balance_of(&bob.address()), 103 * ETHER);

    a.disconnect().await?;
    assert!(!a.instance().connected());
    bob_node.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_stale_close_is_overruled_by_latest_state() {
    let Setup {
        chain,
        alice,
        bob,
        bob_node: _bob_node,
        mut a,
        mut b,
    } = funded_channel().await;

    pay(&mut a, &mut b, ETHER).await;
    let stale = a.current_state().unwrap().clone();
    pay(&mut a, &mut b, 2 * ETHER).await;
    pay(&mut a, &mut b, ETHER).await;
    assert_eq!(b.balances().unwrap(), (6 * ETHER, 14 * ETHER));

    let (closed_a, closed_b) = tokio::join!(a.close_with(stale), b.respond_close());
    let (closed_a, closed_b) = (closed_a.unwrap(), closed_b.unwrap());
    assert_eq!(closed_a, closed_b);
    assert_eq!((closed_b.cash_sender, closed_b.cash_receiver), (6 * ETHER, 14 * ETHER));

    let (executed, awaited) = tokio::join!(a.execute(), b.await_closed());
    executed.unwrap();
    awaited.unwrap();
    assert_eq!(chain.balance_of(&alice.address()), 96 * ETHER);
    assert_eq!(chain.balance_of(&bob.address()), 104 * ETHER);
}

#[tokio::test]
async fn test_close_right_after_funding() {
    let Setup {
        chain,
        alice,
        bob,
        bob_node: _bob_node,
        mut a,
        mut b,
    } = funded_channel().await;

    let (closed_a, closed_b) = tokio::join!(a.close(), b.respond_close());
    let (closed_a, closed_b) = (closed_a.unwrap(), closed_b.unwrap());
    assert_eq!(closed_a, closed_b);
    assert_eq!((closed_a.cash_sender, closed_a.cash_receiver), (DEPOSIT, DEPOSIT));

    let (executed, awaited) = tokio::join!(a.execute(), b.await_closed());
    executed.unwrap();
    awaited.unwrap();
    assert_eq!(chain.balance_of(&alice.address()), 100 * ETHER);
    assert_eq!(chain.balance_of(&bob.address()), 100 * ETHER);
}

#[tokio::test]
async fn test_proposal_taking_peer_funds_is_declined() {
    let Setup {
        bob_node: _bob_node,
        mut a,
        mut b,
        ..
    } = funded_channel().await;
    let version = b.instance().confirmed_version();

    // Same total, all of Bob's share moved to Alice.
    let (proposed, answered) = tokio::join!(a.propose_state(2 * DEPOSIT, 0), b.respond_state());
    let (proposed, answered) = (proposed.unwrap_err(), answered.unwrap_err());
    assert!(proposed.is_declined_at(STAGE_VPC_STATE), "{proposed}");
    assert!(answered.is_declined_at(STAGE_VPC_STATE), "{answered}");
    assert!(proposed.to_string().contains("lowers own balance"), "{proposed}");

    assert_eq!(b.instance().confirmed_version(), version);
    assert_eq!(a.balances().unwrap(), (DEPOSIT, DEPOSIT));
    assert_eq!(b.balances().unwrap(), (DEPOSIT, DEPOSIT));

    // The channel stays usable.
    pay(&mut b, &mut a, ETHER).await;
    assert_eq!(a.balances().unwrap(), (DEPOSIT + ETHER, DEPOSIT - ETHER));
}

#[tokio::test]
async fn test_overdraft_is_refused_locally() {
    let Setup {
        bob_node: _bob_node,
        mut a,
        b,
        ..
    } = funded_channel().await;
    let err = a.transfer(DEPOSIT + 1).await.unwrap_err();
    assert!(matches!(err, NodeError::InvalidState(_)));
    assert_eq!(a.instance().confirmed_version(), b.instance().confirmed_version());
    assert_eq!(a.status(), ChannelStatus::Open);
}

#[tokio::test]
async fn test_lifecycle_operations_check_status() {
    let Setup {
        alice,
        bob_node: _bob_node,
        mut a,
        ..
    } = funded_channel().await;
    assert!(matches!(a.fund(DEPOSIT).await, Err(NodeError::InvalidState(_))));
    assert!(matches!(a.execute().await, Err(NodeError::InvalidState(_))));

    let carol = carol();
    let foreign = signed_vpc_state(&session_id(&alice, &carol), &alice, &carol, 2, DEPOSIT, DEPOSIT);
    assert!(matches!(a.close_with(foreign).await, Err(NodeError::InvalidState(_))));
    assert_eq!(a.status(), ChannelStatus::Open);
}
