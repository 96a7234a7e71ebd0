//! # DST Node Testkit
//!
//! Testing utilities for the DST node.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Simulated chain**: an in-process [`ChainClient`](dst_node_chain::ChainClient)
//!   with the settlement and VPC contract semantics
//! - **Fixtures**: parties with deterministic keys and countersigned states
//! - **Generators**: Proptest strategies for property-based testing
//! - **Golden vectors**: fixed inputs with expected hashes and addresses
//!
//! ## Simulated Chain
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use dst_node_testkit::chain::{contract_store, SimulatedChain};
//!
//! let chain = Arc::new(SimulatedChain::new());
//! chain.fund(alice.address(), 100 * ETHER);
//! let mut instance = BlockchainInstance::new(chain.clone(), alice.id.clone(), contract_store(), ChainConfig::default(), Span::none());
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use dst_node_testkit::generators::{balances, transfers};
//!
//! proptest! {
//!     #[test]
//!     fn total_is_conserved((s, r) in balances(), moves in transfers(20)) {
//!         // ...
//!     }
//! }
//! ```

pub mod chain;
pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use chain::{contract_store, SimulatedChain};
pub use fixtures::{alice, bob, carol, TestParty, ETHER, PASSWORD};
pub use vectors::{all_vectors, GoldenVector};
