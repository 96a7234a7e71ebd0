//! In-process chain implementing the settlement contract semantics.
//!
//! Transactions are mined instantly, one block each. Contract code is
//! synthetic but hashes to the entries of [`contract_store`], so code
//! verification behaves as against a real node.
//!
//! ## Contracts
//!
//! - **MSContract**: deploy emits `Initializing`; a `confirm` by each party
//!   locks both deposits and emits `Initialized`; `stateRegister` by one
//!   party emits `StateRegistering`, by the other `StateRegistered` (the
//!   higher version wins); `execute` after the VPC closed pays out and
//!   emits `Closing` and `Closed`.
//! - **VPC**: the first `close` for an id emits `VpcClosing`; the other
//!   party's `close` finalises with the higher version and emits
//!   `VpcClosed`.
//!
//! ## Failure injection
//!
//! Subscriptions can be refused or broken per kind, the catch-up query can
//! fail, mining can stall, and live subscriptions can replay past logs to
//! reproduce the catch-up race.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::mpsc;

use dst_node_chain::{
    ChainClient, ChainError, ContractCall, ContractEvent, DeployParams, EventKind, EventLog,
    LogFilter, LogSubscription, MscClosed, MscClosing, MscInitialized, MscInitializing,
    MscStateRegistered, MscStateRegistering, ReadCall, ReadValue, Result, SignedTx, TxPayload,
    TxReceipt, TxRequest, VpcClosed, VpcClosing, VpcOnChainState,
};
use dst_node_core::{
    runtime_code_hash, verify_signature_eth, Address, ContractKind, ContractStore,
    ContractTimeouts, Hash256, MscBaseState, PackedEncoder, Signature, SignableState, VpcState,
    VpcStateId,
};

const PUSH20: u8 = 0x73;

/// Gas charged for every transaction.
const BASE_GAS: u64 = 21_000;

/// Runtime code of a simulated contract, before library linking.
pub fn runtime_code(kind: ContractKind) -> Vec<u8> {
    match kind {
        ContractKind::LibSignatures => {
            let mut code = vec![PUSH20];
            code.extend_from_slice(&[0u8; 20]);
            code.extend_from_slice(b"\x30\x14dst-sim:LibSignatures");
            code
        }
        ContractKind::MsContract => b"\x60\x80dst-sim:MSContract".to_vec(),
        ContractKind::Vpc => b"\x60\x80dst-sim:VPC".to_vec(),
    }
}

/// Contract store matching the simulated contracts.
pub fn contract_store() -> ContractStore {
    let hash = |kind: ContractKind| runtime_code_hash(&runtime_code(kind), kind.is_library());
    ContractStore::new(
        hash(ContractKind::LibSignatures),
        hash(ContractKind::MsContract),
        hash(ContractKind::Vpc),
    )
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

fn signed_by(hash: &Hash256, sign: &Signature, signer: &Address) -> bool {
    verify_signature_eth(hash, sign, signer).unwrap_or(false)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MsStage {
    Initializing,
    Open,
    Registering,
    Registered,
    Closed,
}

#[derive(Debug, Clone)]
struct Registration {
    base: MscBaseState,
    by_sender: bool,
    by_receiver: bool,
}

#[derive(Debug, Clone)]
struct MsState {
    sender: Address,
    receiver: Address,
    stage: MsStage,
    deposit_sender: Option<u128>,
    deposit_receiver: Option<u128>,
    registration: Option<Registration>,
}

#[derive(Debug, Clone, Default)]
struct VpcContractState {
    states: HashMap<Hash256, VpcOnChainState>,
}

#[derive(Debug, Clone)]
enum Contract {
    LibSignatures,
    Ms(MsState),
    Vpc(VpcContractState),
}

/// Outcome of a successful contract execution.
#[derive(Default)]
struct Effects {
    created: Option<Address>,
    /// Contract whose state is replaced, with its new state.
    updated: Option<(Address, Contract)>,
    /// Transfers out of the called contract.
    payouts: Vec<(Address, u128)>,
    /// Emitter and event.
    events: Vec<(Address, ContractEvent)>,
}

type Revert = String;

struct Subscriber {
    filter: LogFilter,
    tx: mpsc::UnboundedSender<Result<EventLog>>,
}

#[derive(Default)]
struct ChainState {
    block_number: u64,
    nonces: HashMap<Address, u64>,
    balances: HashMap<Address, u128>,
    code: HashMap<Address, Vec<u8>>,
    contracts: HashMap<Address, Contract>,
    receipts: HashMap<Hash256, TxReceipt>,
    logs: Vec<EventLog>,
    subscribers: Vec<Subscriber>,
    refused_subscriptions: HashSet<EventKind>,
    filter_fails: bool,
    replay_on_subscribe: bool,
    mining_stalled: bool,
    timeouts: ContractTimeouts,
}

/// Simulated chain.
#[derive(Default)]
pub struct SimulatedChain {
    state: Mutex<ChainState>,
}

impl SimulatedChain {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ChainState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Credit `amount` wei to `address`.
    pub fn fund(&self, address: Address, amount: u128) {
        *self.lock().balances.entry(address).or_default() += amount;
    }

    pub fn balance_of(&self, address: &Address) -> u128 {
        self.lock().balances.get(address).copied().unwrap_or_default()
    }

    /// Place arbitrary code at `address`.
    pub fn set_code(&self, address: Address, code: Vec<u8>) {
        self.lock().code.insert(address, code);
    }

    pub fn block_number(&self) -> u64 {
        self.lock().block_number
    }

    /// Every log emitted so far.
    pub fn logs(&self) -> Vec<EventLog> {
        self.lock().logs.clone()
    }

    /// Live subscriptions not yet dropped by their owner.
    pub fn subscriber_count(&self) -> usize {
        let mut state = self.lock();
        state.subscribers.retain(|s| !s.tx.is_closed());
        state.subscribers.len()
    }

    /// Make new subscriptions deliver matching past logs first.
    pub fn replay_on_subscribe(&self, enabled: bool) {
        self.lock().replay_on_subscribe = enabled;
    }

    /// Refuse subscriptions to `kind`.
    pub fn refuse_subscription(&self, kind: EventKind) {
        self.lock().refused_subscriptions.insert(kind);
    }

    /// Send an error to every live subscription of `kind` and end it.
    pub fn break_subscriptions(&self, kind: EventKind, reason: &str) {
        self.lock().subscribers.retain(|s| {
            if s.filter.kind != kind {
                return true;
            }
            let _ = s.tx.send(Err(ChainError::Subscription(reason.to_owned())));
            false
        });
    }

    /// Make historical log queries fail.
    pub fn fail_filter_logs(&self, enabled: bool) {
        self.lock().filter_fails = enabled;
    }

    /// Withhold receipts, as if transactions stayed pending.
    pub fn stall_mining(&self, stalled: bool) {
        self.lock().mining_stalled = stalled;
    }
}

impl ChainState {
    fn balance(&self, address: &Address) -> u128 {
        self.balances.get(address).copied().unwrap_or_default()
    }

    fn submit(&mut self, tx: SignedTx, tx_hash: Hash256) -> Result<()> {
        let request = tx.request;
        let expected = self.nonces.get(&request.from).copied().unwrap_or_default();
        if request.nonce != expected {
            return Err(ChainError::Rpc(format!(
                "nonce {} does not match expected {}",
                request.nonce, expected
            )));
        }
        if self.balance(&request.from) < request.value {
            return Err(ChainError::Rpc("insufficient funds for transfer".into()));
        }
        *self.nonces.entry(request.from).or_default() += 1;
        self.block_number += 1;

        let (status, contract_address) = match self.execute(&request) {
            Ok(effects) => {
                let created = effects.created;
                self.apply(&request, tx_hash, effects);
                (1, created)
            }
            Err(reason) => {
                tracing::debug!(%tx_hash, %reason, "transaction reverted");
                (0, None)
            }
        };
        self.receipts.insert(
            tx_hash,
            TxReceipt {
                tx_hash,
                block_number: self.block_number,
                status,
                contract_address,
                gas_used: BASE_GAS.min(request.gas_limit),
            },
        );
        Ok(())
    }

    fn execute(&self, request: &TxRequest) -> std::result::Result<Effects, Revert> {
        match &request.payload {
            TxPayload::Deploy(params) => self.deploy(request, params),
            TxPayload::Call { to, call } => {
                if request.value != 0 && !matches!(call, ContractCall::Confirm) {
                    return Err("function is not payable".into());
                }
                match (self.contracts.get(to), call) {
                    (Some(Contract::Ms(ms)), ContractCall::Confirm) => {
                        ms_confirm(ms.clone(), *to, request.from, request.value)
                    }
                    (Some(Contract::Ms(ms)), ContractCall::StateRegister { .. }) => {
                        ms_state_register(ms.clone(), *to, request.from, call)
                    }
                    (Some(Contract::Ms(ms)), ContractCall::Execute { sender, receiver }) => {
                        self.ms_execute(ms.clone(), *to, request.from, *sender, *receiver)
                    }
                    (Some(Contract::Vpc(vpc)), ContractCall::VpcClose { .. }) => {
                        vpc_close(vpc.clone(), *to, request.from, call, now(), &self.timeouts)
                    }
                    (None, _) => Err(format!("no contract at {to}")),
                    (Some(_), call) => Err(format!("{} not available at {to}", call.name())),
                }
            }
        }
    }

    fn deploy(&self, request: &TxRequest, params: &DeployParams) -> std::result::Result<Effects, Revert> {
        if request.value != 0 {
            return Err("constructor is not payable".into());
        }
        let lib_linked = |lib: &Address| matches!(self.contracts.get(lib), Some(Contract::LibSignatures));
        let address = contract_address(&request.from, request.nonce);
        let (contract, events) = match params {
            DeployParams::LibSignatures => (Contract::LibSignatures, Vec::new()),
            DeployParams::Vpc { lib_signatures } => {
                if !lib_linked(lib_signatures) {
                    return Err("LibSignatures not deployed".into());
                }
                (Contract::Vpc(VpcContractState::default()), Vec::new())
            }
            DeployParams::MsContract {
                lib_signatures,
                sender,
                receiver,
            } => {
                if !lib_linked(lib_signatures) {
                    return Err("LibSignatures not deployed".into());
                }
                let ms = MsState {
                    sender: *sender,
                    receiver: *receiver,
                    stage: MsStage::Initializing,
                    deposit_sender: None,
                    deposit_receiver: None,
                    registration: None,
                };
                let event = MscInitializing {
                    sender: *sender,
                    receiver: *receiver,
                };
                (Contract::Ms(ms), vec![(address, event.into())])
            }
        };
        Ok(Effects {
            created: Some(address),
            updated: Some((address, contract)),
            payouts: Vec::new(),
            events,
        })
    }

    fn ms_execute(
        &self,
        mut ms: MsState,
        at: Address,
        from: Address,
        sender: Address,
        receiver: Address,
    ) -> std::result::Result<Effects, Revert> {
        if ms.stage != MsStage::Registered {
            return Err(format!("execute in stage {:?}", ms.stage));
        }
        if from != ms.sender && from != ms.receiver {
            return Err("caller is not a party".into());
        }
        if sender != ms.sender || receiver != ms.receiver {
            return Err("parties do not match contract".into());
        }
        let base = ms
            .registration
            .as_ref()
            .map(|r| r.base.clone())
            .ok_or("no registered state")?;
        let id = VpcStateId {
            addr_sender: sender,
            addr_receiver: receiver,
            sid: base.sid,
        }
        .hash();
        let vpc_state = match self.contracts.get(&base.vpc_address) {
            Some(Contract::Vpc(vpc)) => vpc.states.get(&id).copied().unwrap_or_default(),
            _ => return Err("registered VPC not found".into()),
        };
        if !vpc_state.is_closed() {
            return Err("vpc not closed".into());
        }
        let blocked = base.blocked_sender + base.blocked_receiver;
        let settled = vpc_state
            .cash_sender
            .checked_add(vpc_state.cash_receiver)
            .ok_or("vpc balance overflow")?;
        if settled != blocked {
            return Err("vpc balances do not match blocked amount".into());
        }
        let deposit_sender = ms.deposit_sender.unwrap_or_default();
        let deposit_receiver = ms.deposit_receiver.unwrap_or_default();
        let payouts = vec![
            (
                sender,
                deposit_sender - base.blocked_sender + vpc_state.cash_sender,
            ),
            (
                receiver,
                deposit_receiver - base.blocked_receiver + vpc_state.cash_receiver,
            ),
        ];
        ms.stage = MsStage::Closed;
        Ok(Effects {
            created: None,
            updated: Some((at, Contract::Ms(ms))),
            payouts,
            events: vec![(at, MscClosing.into()), (at, MscClosed.into())],
        })
    }

    fn apply(&mut self, request: &TxRequest, tx_hash: Hash256, effects: Effects) {
        let target = match &request.payload {
            TxPayload::Deploy(_) => effects.created,
            TxPayload::Call { to, .. } => Some(*to),
        };
        if request.value > 0 {
            if let Some(target) = target {
                *self.balances.entry(request.from).or_default() -= request.value;
                *self.balances.entry(target).or_default() += request.value;
            }
        }
        if let (Some(target), false) = (target, effects.payouts.is_empty()) {
            for (to, amount) in &effects.payouts {
                *self.balances.entry(target).or_default() -= amount;
                *self.balances.entry(*to).or_default() += amount;
            }
        }
        if let Some((address, contract)) = effects.updated {
            if effects.created == Some(address) {
                self.code.insert(address, linked_code(kind_of(&contract), &address));
            }
            self.contracts.insert(address, contract);
        }
        for (log_index, (address, event)) in effects.events.into_iter().enumerate() {
            let log = EventLog {
                address,
                block_number: self.block_number,
                tx_hash,
                log_index: log_index as u64,
                event,
            };
            self.publish(log);
        }
    }

    fn publish(&mut self, log: EventLog) {
        self.subscribers.retain(|s| {
            if s.filter.matches(&log) {
                s.tx.send(Ok(log.clone())).is_ok()
            } else {
                !s.tx.is_closed()
            }
        });
        self.logs.push(log);
    }
}

fn kind_of(contract: &Contract) -> ContractKind {
    match contract {
        Contract::LibSignatures => ContractKind::LibSignatures,
        Contract::Ms(_) => ContractKind::MsContract,
        Contract::Vpc(_) => ContractKind::Vpc,
    }
}

/// Code as deployed: libraries carry their own address after PUSH20.
fn linked_code(kind: ContractKind, address: &Address) -> Vec<u8> {
    let mut code = runtime_code(kind);
    if kind.is_library() {
        code[1..21].copy_from_slice(address.as_bytes());
    }
    code
}

fn contract_address(creator: &Address, nonce: u64) -> Address {
    let digest = PackedEncoder::new().address(creator).uint(nonce).keccak();
    let mut addr = [0u8; 20];
    addr.copy_from_slice(&digest.as_bytes()[12..]);
    Address::from_bytes(addr)
}

fn ms_confirm(
    mut ms: MsState,
    at: Address,
    from: Address,
    value: u128,
) -> std::result::Result<Effects, Revert> {
    if ms.stage != MsStage::Initializing {
        return Err(format!("confirm in stage {:?}", ms.stage));
    }
    let deposit = if from == ms.sender {
        &mut ms.deposit_sender
    } else if from == ms.receiver {
        &mut ms.deposit_receiver
    } else {
        return Err("caller is not a party".into());
    };
    if deposit.is_some() {
        return Err("already confirmed".into());
    }
    *deposit = Some(value);

    let mut events = Vec::new();
    if let (Some(cash_sender), Some(cash_receiver)) = (ms.deposit_sender, ms.deposit_receiver) {
        ms.stage = MsStage::Open;
        events.push((
            at,
            MscInitialized {
                cash_sender,
                cash_receiver,
            }
            .into(),
        ));
    }
    Ok(Effects {
        created: None,
        updated: Some((at, Contract::Ms(ms))),
        payouts: Vec::new(),
        events,
    })
}

fn ms_state_register(
    mut ms: MsState,
    at: Address,
    from: Address,
    call: &ContractCall,
) -> std::result::Result<Effects, Revert> {
    let ContractCall::StateRegister {
        vpc_address,
        sid,
        blocked_sender,
        blocked_receiver,
        version,
        sign_sender,
        sign_receiver,
    } = call
    else {
        return Err("not a stateRegister call".into());
    };
    if from != ms.sender && from != ms.receiver {
        return Err("caller is not a party".into());
    }
    let base = MscBaseState {
        vpc_address: *vpc_address,
        sid: *sid,
        blocked_sender: *blocked_sender,
        blocked_receiver: *blocked_receiver,
        version: *version,
    };
    let hash = base.signing_hash();
    if !signed_by(&hash, sign_sender, &ms.sender) || !signed_by(&hash, sign_receiver, &ms.receiver) {
        return Err("invalid signatures".into());
    }
    if base.blocked_sender > ms.deposit_sender.unwrap_or_default()
        || base.blocked_receiver > ms.deposit_receiver.unwrap_or_default()
    {
        return Err("blocked amount exceeds deposit".into());
    }

    let by_sender = from == ms.sender;
    let event: ContractEvent = match ms.stage {
        MsStage::Open => {
            ms.registration = Some(Registration {
                base,
                by_sender,
                by_receiver: !by_sender,
            });
            ms.stage = MsStage::Registering;
            MscStateRegistering.into()
        }
        MsStage::Registering => {
            let registration = ms.registration.as_mut().ok_or("no pending registration")?;
            let already = if by_sender {
                registration.by_sender
            } else {
                registration.by_receiver
            };
            if already {
                return Err("already registered".into());
            }
            if base.version > registration.base.version {
                registration.base = base;
            }
            registration.by_sender = true;
            registration.by_receiver = true;
            let registered = MscStateRegistered {
                blocked_sender: registration.base.blocked_sender,
                blocked_receiver: registration.base.blocked_receiver,
            };
            ms.stage = MsStage::Registered;
            registered.into()
        }
        stage => return Err(format!("stateRegister in stage {stage:?}")),
    };
    Ok(Effects {
        created: None,
        updated: Some((at, Contract::Ms(ms))),
        payouts: Vec::new(),
        events: vec![(at, event)],
    })
}

fn vpc_close(
    mut vpc: VpcContractState,
    at: Address,
    from: Address,
    call: &ContractCall,
    now: u64,
    timeouts: &ContractTimeouts,
) -> std::result::Result<Effects, Revert> {
    let ContractCall::VpcClose {
        sender,
        receiver,
        sid,
        version,
        blocked_sender,
        blocked_receiver,
        sign_sender,
        sign_receiver,
    } = call
    else {
        return Err("not a close call".into());
    };
    if from != *sender && from != *receiver {
        return Err("caller is not a party".into());
    }
    let id = VpcStateId {
        addr_sender: *sender,
        addr_receiver: *receiver,
        sid: *sid,
    }
    .hash();
    let state = VpcState {
        id,
        version: *version,
        blocked_sender: *blocked_sender,
        blocked_receiver: *blocked_receiver,
    };
    let hash = state.signing_hash();
    if !signed_by(&hash, sign_sender, sender) || !signed_by(&hash, sign_receiver, receiver) {
        return Err("invalid signatures".into());
    }

    let entry = vpc.states.entry(id).or_default();
    let event: ContractEvent = if !entry.init {
        *entry = VpcOnChainState {
            cash_sender: state.blocked_sender,
            cash_receiver: state.blocked_receiver,
            seq_no: state.version,
            validity: now + timeouts.vpc_validity.as_secs(),
            extended_validity: now + timeouts.vpc_extended_validity.as_secs(),
            open: true,
            waiting_for_sender: from != *sender,
            waiting_for_receiver: from != *receiver,
            init: true,
        };
        VpcClosing { id }.into()
    } else if entry.open {
        let waiting = if from == *sender {
            &mut entry.waiting_for_sender
        } else {
            &mut entry.waiting_for_receiver
        };
        if !*waiting {
            return Err("state already submitted".into());
        }
        *waiting = false;
        if state.version > entry.seq_no {
            entry.cash_sender = state.blocked_sender;
            entry.cash_receiver = state.blocked_receiver;
            entry.seq_no = state.version;
        }
        entry.open = false;
        VpcClosed {
            id,
            cash_sender: entry.cash_sender,
            cash_receiver: entry.cash_receiver,
        }
        .into()
    } else {
        return Err("vpc already closed".into());
    };
    Ok(Effects {
        created: None,
        updated: Some((at, Contract::Vpc(vpc))),
        payouts: Vec::new(),
        events: vec![(at, event)],
    })
}

#[async_trait]
impl ChainClient for SimulatedChain {
    async fn nonce(&self, address: &Address) -> Result<u64> {
        Ok(self.lock().nonces.get(address).copied().unwrap_or_default())
    }

    async fn send_transaction(&self, tx: SignedTx) -> Result<Hash256> {
        if !tx.verify()? {
            return Err(ChainError::Rpc("invalid sender signature".into()));
        }
        let tx_hash = tx.hash()?;
        self.lock().submit(tx, tx_hash)?;
        Ok(tx_hash)
    }

    async fn transaction_receipt(&self, tx_hash: &Hash256) -> Result<Option<TxReceipt>> {
        let state = self.lock();
        if state.mining_stalled {
            return Ok(None);
        }
        Ok(state.receipts.get(tx_hash).cloned())
    }

    async fn code_at(&self, address: &Address) -> Result<Vec<u8>> {
        Ok(self.lock().code.get(address).cloned().unwrap_or_default())
    }

    async fn call(&self, to: &Address, call: ReadCall) -> Result<ReadValue> {
        let state = self.lock();
        match (state.contracts.get(to), call) {
            (Some(Contract::Vpc(vpc)), ReadCall::VpcStates { id }) => Ok(ReadValue::VpcState(
                vpc.states.get(&id).copied().unwrap_or_default(),
            )),
            _ => Err(ChainError::Rpc(format!("no VPC contract at {to}"))),
        }
    }

    async fn subscribe_logs(&self, filter: LogFilter) -> Result<LogSubscription> {
        let mut state = self.lock();
        if state.refused_subscriptions.contains(&filter.kind) {
            return Err(ChainError::Subscription(format!(
                "subscription to {} refused",
                filter.kind
            )));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        if state.replay_on_subscribe {
            for log in state.logs.iter().filter(|log| filter.matches(log)) {
                let _ = tx.send(Ok(log.clone()));
            }
        }
        state.subscribers.push(Subscriber { filter, tx });
        Ok(LogSubscription::new(rx))
    }

    async fn filter_logs(&self, filter: LogFilter, from_block: u64) -> Result<Vec<EventLog>> {
        let state = self.lock();
        if state.filter_fails {
            return Err(ChainError::Rpc("log query failed".into()));
        }
        Ok(state
            .logs
            .iter()
            .filter(|log| log.block_number >= from_block && filter.matches(log))
            .cloned()
            .collect())
    }
}
