//! Blockchain instance: contract binding and settlement transactions.
//!
//! ## Overview
//!
//! Each party owns one instance per channel. It holds the verified
//! addresses of the three contracts, submits the owner's transactions and
//! exposes the contract events through an [`EventsChan`].
//!
//! Every transaction follows the same path:
//!
//! ```text
//! take credentials -> nonce -> sign -> send -> wait till mined -> check status
//! ```
//!
//! Credentials attached to the owner are used for exactly one transaction
//! and are gone afterwards, whether it succeeded or not. Nothing is
//! retried here.
//!
//! ## Usage
//!
//! ```ignore
//! let mut chain = BlockchainInstance::new(client, owner, store, ChainConfig::default(), span);
//! chain.owner_mut().set_credentials(keystore.clone(), password);
//! chain.setup_lib_signatures(None).await?;
//! chain.owner_mut().set_credentials(keystore.clone(), password);
//! chain.deploy_vpc().await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::Span;

use dst_node_core::{
    Address, ContractKind, ContractStore, CoreError, Hash256, MatchStatus, MscBaseStateSigned,
    OffChainId, SessionId, VpcStateSigned,
};

use crate::bindings::{MsContract, Vpc};
use crate::client::{ChainClient, ReadValue, VpcOnChainState};
use crate::error::{ChainError, Result};
use crate::tx::{DeployParams, TxPayload, TxReceipt, TxRequest};
use crate::watcher::{EventsChan, WatcherConfig};

/// Gas limits and mining timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// How long to wait for a receipt.
    pub mining_timeout: Duration,
    pub confirm_gas: u64,
    pub state_register_gas: u64,
    pub vpc_close_gas: u64,
    pub execute_gas: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            mining_timeout: Duration::from_secs(60),
            confirm_gas: 2_000_000,
            state_register_gas: 300_000,
            vpc_close_gas: 400_000,
            execute_gas: 400_000,
        }
    }
}

/// Contract binding and transaction submission for one owner.
pub struct BlockchainInstance {
    client: Arc<dyn ChainClient>,
    owner: OffChainId,
    contract_store: ContractStore,
    config: ChainConfig,
    watcher: WatcherConfig,
    lib_signatures: Option<Address>,
    ms_contract: Option<MsContract>,
    vpc: Option<Vpc>,
    events: Option<EventsChan>,
    span: Span,
}

impl BlockchainInstance {
    pub fn new(
        client: Arc<dyn ChainClient>,
        owner: OffChainId,
        contract_store: ContractStore,
        config: ChainConfig,
        span: Span,
    ) -> Self {
        Self {
            client,
            owner,
            contract_store,
            config,
            watcher: WatcherConfig::default(),
            lib_signatures: None,
            ms_contract: None,
            vpc: None,
            events: None,
            span,
        }
    }

    /// Replace the event queue capacities.
    pub fn with_watcher_config(mut self, watcher: WatcherConfig) -> Self {
        self.watcher = watcher;
        self
    }

    pub fn client(&self) -> &Arc<dyn ChainClient> {
        &self.client
    }

    /// Identity that signs this instance's transactions.
    pub fn owner(&self) -> &OffChainId {
        &self.owner
    }

    /// Mutable owner, for attaching credentials before a transaction.
    pub fn owner_mut(&mut self) -> &mut OffChainId {
        &mut self.owner
    }

    pub fn contract_store(&self) -> &ContractStore {
        &self.contract_store
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    // -------------------------------------------------------------------------
    // Contract addresses
    // -------------------------------------------------------------------------

    pub fn lib_signatures(&self) -> Option<Address> {
        self.lib_signatures
    }

    pub fn ms_contract_addr(&self) -> Option<Address> {
        self.ms_contract.map(|c| c.address())
    }

    pub fn vpc_addr(&self) -> Option<Address> {
        self.vpc.map(|c| c.address())
    }

    /// Address of a contract kind, if set.
    pub fn contract_addr(&self, kind: ContractKind) -> Option<Address> {
        match kind {
            ContractKind::LibSignatures => self.lib_signatures(),
            ContractKind::MsContract => self.ms_contract_addr(),
            ContractKind::Vpc => self.vpc_addr(),
        }
    }

    /// Verify the code at `address` against the contract store.
    ///
    /// Only [`MatchStatus::Match`] passes.
    pub async fn verify_contract(&self, kind: ContractKind, address: Address) -> Result<()> {
        let handler = self.contract_store.handler(kind);
        let status = self
            .client
            .verify_code_at(&address, &handler.runtime_hash, kind.is_library())
            .await?;
        if status != MatchStatus::Match {
            tracing::warn!(parent: &self.span, %kind, %address, ?status, "contract verification failed");
            return Err(ChainError::VerificationFailed {
                kind,
                address,
                status,
            });
        }
        Ok(())
    }

    /// Verify, then set the address of a contract kind.
    ///
    /// On failure the current address is left untouched.
    pub async fn set_contract_addr(&mut self, kind: ContractKind, address: Address) -> Result<()> {
        self.verify_contract(kind, address).await?;
        match kind {
            ContractKind::LibSignatures => self.lib_signatures = Some(address),
            ContractKind::MsContract => self.ms_contract = Some(MsContract::at(address)),
            ContractKind::Vpc => self.vpc = Some(Vpc::at(address)),
        }
        tracing::debug!(parent: &self.span, %kind, %address, "contract address set");
        Ok(())
    }

    pub async fn set_lib_signatures(&mut self, address: Address) -> Result<()> {
        self.set_contract_addr(ContractKind::LibSignatures, address).await
    }

    pub async fn set_ms_contract_addr(&mut self, address: Address) -> Result<()> {
        self.set_contract_addr(ContractKind::MsContract, address).await
    }

    pub async fn set_vpc_addr(&mut self, address: Address) -> Result<()> {
        self.set_contract_addr(ContractKind::Vpc, address).await
    }

    fn require_lib_signatures(&self) -> Result<Address> {
        self.lib_signatures
            .ok_or(ChainError::AddressNotSet(ContractKind::LibSignatures))
    }

    fn require_ms_contract(&self) -> Result<MsContract> {
        self.ms_contract
            .ok_or(ChainError::AddressNotSet(ContractKind::MsContract))
    }

    fn require_vpc(&self) -> Result<Vpc> {
        self.vpc.ok_or(ChainError::AddressNotSet(ContractKind::Vpc))
    }

    // -------------------------------------------------------------------------
    // Deployment
    // -------------------------------------------------------------------------

    /// Create a contract and return its address, unverified.
    pub async fn deploy_contract(&mut self, params: DeployParams) -> Result<Address> {
        let kind = params.kind();
        let gas = self.contract_store.handler(kind).gas_units;
        tracing::info!(parent: &self.span, %kind, "deploying contract");
        let receipt = self
            .transact("deploy", 0, gas, TxPayload::Deploy(params))
            .await?;
        receipt
            .contract_address
            .ok_or(ChainError::NoContractAddress(receipt.tx_hash))
    }

    pub async fn deploy_lib_signatures(&mut self) -> Result<Address> {
        let address = self.deploy_contract(DeployParams::LibSignatures).await?;
        self.set_lib_signatures(address).await?;
        Ok(address)
    }

    /// Use the configured library if it verifies, otherwise deploy one.
    pub async fn setup_lib_signatures(&mut self, configured: Option<Address>) -> Result<Address> {
        match configured {
            Some(address) => {
                self.set_lib_signatures(address).await?;
                Ok(address)
            }
            None => self.deploy_lib_signatures().await,
        }
    }

    pub async fn deploy_vpc(&mut self) -> Result<Address> {
        let lib_signatures = self.require_lib_signatures()?;
        let address = self
            .deploy_contract(DeployParams::Vpc { lib_signatures })
            .await?;
        self.set_vpc_addr(address).await?;
        Ok(address)
    }

    /// Deploy the settlement contract for `sender` and `receiver`, then
    /// start watching its events.
    pub async fn deploy_ms_contract(&mut self, sender: Address, receiver: Address) -> Result<Address> {
        let lib_signatures = self.require_lib_signatures()?;
        let address = self
            .deploy_contract(DeployParams::MsContract {
                lib_signatures,
                sender,
                receiver,
            })
            .await?;
        self.set_ms_contract_addr(address).await?;
        self.start_watcher().await?;
        Ok(address)
    }

    /// Bind contracts deployed by the peer and start watching events.
    pub async fn bind_contracts(&mut self, ms_contract: Address, vpc: Address) -> Result<()> {
        self.set_vpc_addr(vpc).await?;
        self.set_ms_contract_addr(ms_contract).await?;
        self.start_watcher().await
    }

    /// Start watching the events of the bound settlement and VPC contracts.
    ///
    /// A running watcher is replaced.
    pub async fn start_watcher(&mut self) -> Result<()> {
        let ms = self.require_ms_contract()?.address();
        let vpc = self.require_vpc()?.address();
        let events = EventsChan::initialize(
            self.client.clone(),
            ms,
            vpc,
            &self.watcher,
            self.span.clone(),
        )
        .await?;
        self.events = Some(events);
        Ok(())
    }

    /// Contract event streams.
    pub fn events(&mut self) -> Result<&mut EventsChan> {
        self.events.as_mut().ok_or(ChainError::WatcherNotStarted)
    }

    // -------------------------------------------------------------------------
    // Settlement
    // -------------------------------------------------------------------------

    /// Lock `amount` wei as the owner's deposit.
    pub async fn confirm(&mut self, amount: u128) -> Result<TxReceipt> {
        let payload = self.require_ms_contract()?.confirm();
        let receipt = self
            .transact("confirm", amount, self.config.confirm_gas, payload)
            .await?;
        tracing::info!(parent: &self.span, amount, "amount confirmed and locked in contract");
        Ok(receipt)
    }

    /// Register the countersigned funding commitment.
    pub async fn state_register(&mut self, state: &MscBaseStateSigned) -> Result<TxReceipt> {
        let vpc = self.require_vpc()?;
        if state.state.vpc_address != vpc.address() {
            return Err(ChainError::InvalidState(format!(
                "state is bound to vpc {}, not {}",
                state.state.vpc_address,
                vpc.address()
            )));
        }
        let payload = self.require_ms_contract()?.state_register(state)?;
        self.transact("stateRegister", 0, self.config.state_register_gas, payload)
            .await
    }

    /// Submit a countersigned VPC state of session `sid` for closing.
    pub async fn vpc_close(&mut self, sid: &SessionId, state: &VpcStateSigned) -> Result<TxReceipt> {
        let payload = self.require_vpc()?.close(sid, state)?;
        self.transact("vpcClose", 0, self.config.vpc_close_gas, payload)
            .await
    }

    /// Pay out both parties once the VPC is closed.
    pub async fn execute(&mut self, sender: Address, receiver: Address) -> Result<TxReceipt> {
        let payload = self.require_ms_contract()?.execute(sender, receiver);
        self.transact("execute", 0, self.config.execute_gas, payload)
            .await
    }

    /// On-chain record of VPC `id`.
    pub async fn states(&self, id: Hash256) -> Result<VpcOnChainState> {
        let vpc = self.require_vpc()?;
        match self.client.call(&vpc.address(), vpc.states(id)).await? {
            ReadValue::VpcState(state) => Ok(state),
        }
    }

    async fn transact(
        &mut self,
        operation: &'static str,
        value: u128,
        gas_limit: u64,
        payload: TxPayload,
    ) -> Result<TxReceipt> {
        let from = self.owner.on_chain_id;
        let credentials = self
            .owner
            .take_credentials()
            .ok_or(CoreError::CredentialsNotSet(from))?;
        let mut signer = self.owner.clone();
        signer.set_credentials_from(credentials);

        let nonce = self.client.nonce(&from).await?;
        let request = TxRequest {
            from,
            nonce,
            value,
            gas_limit,
            payload,
        };
        let tx = request.sign(&mut signer)?;
        let tx_hash = self.client.send_transaction(tx).await?;
        tracing::debug!(parent: &self.span, operation, %tx_hash, nonce, "transaction sent");

        let receipt = self
            .client
            .wait_till_tx_mined(&tx_hash, self.config.mining_timeout)
            .await?;
        if !receipt.succeeded() {
            tracing::warn!(parent: &self.span, operation, %tx_hash, "transaction reverted");
            return Err(ChainError::ReceiptStatusFailed { operation, tx_hash });
        }
        Ok(receipt)
    }
}

impl std::fmt::Debug for BlockchainInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockchainInstance")
            .field("owner", &self.owner)
            .field("lib_signatures", &self.lib_signatures)
            .field("ms_contract", &self.ms_contract_addr())
            .field("vpc", &self.vpc_addr())
            .field("watching", &self.events.is_some())
            .finish()
    }
}
