//! Mock collaborators and fixture builders for subscriber tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use crate::chain::{
    Address, ApplyUpdate, Block, BlockId, ChainIndex, ChainManager, ChainState, CoinElement,
    CoinElementDiff, CoinOutput, CoinOutputId, FileContract, FileContractElement, FileContractId,
    FileContractUpdate, HostAnnouncement, PublicKey, ReorgCallback, RevertUpdate, Unsubscribe,
    V2ContractResolution, V2FileContract, V2FileContractElement, V2FileContractUpdate,
};
use crate::store::{
    ChainStore, ChainUpdateTx, ContractState, ContractStore, ContractStoreSubscriber, WalletEvent,
    WalletUpdateTx,
};

/// Error returned by all mock collaborators.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct MockError(pub &'static str);

fn id_bytes(n: u64) -> [u8; 32] {
    let mut bytes = [0; 32];
    bytes[..8].copy_from_slice(&n.to_le_bytes());
    bytes
}

pub fn block_id(n: u64) -> BlockId {
    BlockId(id_bytes(n))
}

pub fn chain_index(height: u64) -> ChainIndex {
    ChainIndex {
        height,
        id: block_id(height),
    }
}

pub fn fcid(n: u64) -> FileContractId {
    FileContractId(id_bytes(n))
}

pub fn public_key(n: u64) -> PublicKey {
    PublicKey(id_bytes(n))
}

pub fn address(n: u64) -> Address {
    Address(id_bytes(n))
}

pub fn coin_output_id(n: u64) -> CoinOutputId {
    CoinOutputId(id_bytes(n))
}

pub fn v1_contract(id: FileContractId, revision_number: u64, file_size: u64) -> FileContractElement {
    FileContractElement {
        id,
        contract: FileContract {
            revision_number,
            file_size,
        },
    }
}

pub fn v2_contract(
    id: FileContractId,
    revision_number: u64,
    file_size: u64,
) -> V2FileContractElement {
    V2FileContractElement {
        id,
        contract: V2FileContract {
            revision_number,
            file_size,
        },
    }
}

// ===== update builders =====

pub struct ApplyUpdateBuilder {
    update: ApplyUpdate,
}

pub fn apply_update(height: u64, timestamp: SystemTime) -> ApplyUpdateBuilder {
    let index = chain_index(height);
    ApplyUpdateBuilder {
        update: ApplyUpdate {
            state: ChainState { index },
            block: Block {
                id: index.id,
                timestamp,
                announcements: Vec::new(),
            },
            file_contracts: Vec::new(),
            v2_file_contracts: Vec::new(),
            coin_elements: Vec::new(),
        },
    }
}

impl ApplyUpdateBuilder {
    pub fn v1_contract(
        mut self,
        element: FileContractElement,
        revision: Option<FileContractElement>,
        resolved: bool,
        valid: bool,
    ) -> Self {
        self.update.file_contracts.push(FileContractUpdate {
            element,
            revision,
            resolved,
            valid,
        });
        self
    }

    pub fn v2_contract(
        mut self,
        element: V2FileContractElement,
        revision: Option<V2FileContractElement>,
        resolution: Option<V2ContractResolution>,
    ) -> Self {
        self.update.v2_file_contracts.push(V2FileContractUpdate {
            element,
            revision,
            resolution,
        });
        self
    }

    pub fn announcement(mut self, public_key: PublicKey, net_address: &str) -> Self {
        self.update.block.announcements.push(HostAnnouncement {
            public_key,
            net_address: net_address.to_string(),
        });
        self
    }

    pub fn created_output(mut self, id: CoinOutputId, address: Address, value: u128) -> Self {
        self.update.coin_elements.push(CoinElementDiff {
            element: CoinElement {
                id,
                coin_output: CoinOutput { address, value },
            },
            created: true,
            spent: false,
        });
        self
    }

    pub fn spent_output(mut self, id: CoinOutputId, address: Address, value: u128) -> Self {
        self.update.coin_elements.push(CoinElementDiff {
            element: CoinElement {
                id,
                coin_output: CoinOutput { address, value },
            },
            created: false,
            spent: true,
        });
        self
    }

    pub fn build(self) -> ApplyUpdate {
        self.update
    }
}

pub struct RevertUpdateBuilder {
    update: RevertUpdate,
}

/// Builds a revert update unwinding the block at `unwound_height`, returning
/// the chain to `to_height`.
pub fn revert_update(
    to_height: u64,
    unwound_height: u64,
    timestamp: SystemTime,
) -> RevertUpdateBuilder {
    RevertUpdateBuilder {
        update: RevertUpdate {
            state: ChainState {
                index: chain_index(to_height),
            },
            block: Block {
                id: block_id(unwound_height),
                timestamp,
                announcements: Vec::new(),
            },
            file_contracts: Vec::new(),
            v2_file_contracts: Vec::new(),
            coin_elements: Vec::new(),
        },
    }
}

impl RevertUpdateBuilder {
    pub fn v1_contract(
        mut self,
        element: FileContractElement,
        revision: Option<FileContractElement>,
        resolved: bool,
        valid: bool,
    ) -> Self {
        self.update.file_contracts.push(FileContractUpdate {
            element,
            revision,
            resolved,
            valid,
        });
        self
    }

    pub fn v2_contract(
        mut self,
        element: V2FileContractElement,
        revision: Option<V2FileContractElement>,
        resolution: Option<V2ContractResolution>,
    ) -> Self {
        self.update.v2_file_contracts.push(V2FileContractUpdate {
            element,
            revision,
            resolution,
        });
        self
    }

    pub fn build(self) -> RevertUpdate {
        self.update
    }
}

/// Builds the revert of `apply` for wallet purposes, returning the chain to
/// `to_index`.
pub fn revert_of(apply: &ApplyUpdate, to_index: ChainIndex) -> RevertUpdate {
    RevertUpdate {
        state: ChainState { index: to_index },
        block: apply.block.clone(),
        file_contracts: apply.file_contracts.clone(),
        v2_file_contracts: apply.v2_file_contracts.clone(),
        coin_elements: apply.coin_elements.clone(),
    }
}

// ===== chain manager =====

#[derive(Default)]
struct MockChainState {
    tip: ChainIndex,
    batches: VecDeque<(Vec<RevertUpdate>, Vec<ApplyUpdate>)>,
    fail_next_updates: bool,
    callbacks: Vec<(usize, ReorgCallback)>,
    next_callback_id: usize,
}

/// Chain manager whose update stream is scripted by the test.
#[derive(Default)]
pub struct MockChainManager {
    state: Arc<Mutex<MockChainState>>,
}

impl MockChainManager {
    pub fn new(tip: ChainIndex) -> Self {
        let manager = Self::default();
        manager.state.lock().unwrap().tip = tip;
        manager
    }

    /// Scripts the next batch returned by `updates_since` and advances the
    /// reported tip to `new_tip`.
    pub fn push_batch(
        &self,
        reverts: Vec<RevertUpdate>,
        applies: Vec<ApplyUpdate>,
        new_tip: ChainIndex,
    ) {
        let mut state = self.state.lock().unwrap();
        state.batches.push_back((reverts, applies));
        state.tip = new_tip;
    }

    /// Fails the next `updates_since` call.
    pub fn fail_next_updates(&self) {
        self.state.lock().unwrap().fail_next_updates = true;
    }

    /// Invokes all registered reorg callbacks.
    pub fn notify_reorg(&self) {
        let state = self.state.lock().unwrap();
        let tip = state.tip;
        for (_, callback) in &state.callbacks {
            callback(tip);
        }
    }

    pub fn callback_count(&self) -> usize {
        self.state.lock().unwrap().callbacks.len()
    }
}

impl ChainManager for MockChainManager {
    type Error = MockError;

    fn tip(&self) -> ChainIndex {
        self.state.lock().unwrap().tip
    }

    fn updates_since(
        &self,
        _index: ChainIndex,
        _max: usize,
    ) -> Result<(Vec<RevertUpdate>, Vec<ApplyUpdate>), Self::Error> {
        let mut state = self.state.lock().unwrap();
        if state.fail_next_updates {
            state.fail_next_updates = false;
            return Err(MockError("updates unavailable"));
        }
        state
            .batches
            .pop_front()
            .ok_or(MockError("no scripted updates"))
    }

    fn on_reorg(&self, callback: ReorgCallback) -> Unsubscribe {
        let mut state = self.state.lock().unwrap();
        let id = state.next_callback_id;
        state.next_callback_id += 1;
        state.callbacks.push((id, callback));
        let shared = self.state.clone();
        Box::new(move || {
            shared
                .lock()
                .unwrap()
                .callbacks
                .retain(|(callback_id, _)| *callback_id != id);
        })
    }
}

// ===== chain store =====

/// Everything a chain update transaction staged, as observable calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    UpdateChainIndex(ChainIndex),
    UpdateContract(FileContractId, u64, u64, u64),
    UpdateContractState(FileContractId, ContractState),
    UpdateContractProofHeight(FileContractId, u64),
    UpdateFailedContracts(u64),
    UpdateHost(PublicKey, String),
    AddWalletOutputs(usize),
    RemoveWalletOutputs(usize),
    AddWalletEvents(usize),
    RevertWalletEvents(BlockId),
    Commit,
}

impl StoreOp {
    /// Whether the op names the given contract.
    pub fn names_contract(&self, id: FileContractId) -> bool {
        match self {
            Self::UpdateContract(op_id, ..)
            | Self::UpdateContractState(op_id, _)
            | Self::UpdateContractProofHeight(op_id, _) => *op_id == id,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContractRecord {
    pub state: ContractState,
    pub revision_height: u64,
    pub revision_number: u64,
    pub file_size: u64,
    pub proof_height: Option<u64>,
    /// End of the proof window; contracts past it without a proof are swept
    /// to failed.
    pub proof_window_end: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRecord {
    pub net_address: String,
    pub block_height: u64,
    pub block_id: BlockId,
    pub last_announcement: SystemTime,
}

/// Committed store contents.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryState {
    pub tip: ChainIndex,
    pub contracts: HashMap<FileContractId, ContractRecord>,
    pub hosts: HashMap<PublicKey, HostRecord>,
    pub wallet_outputs: HashMap<CoinOutputId, CoinElement>,
    pub wallet_events: Vec<WalletEvent>,
}

#[derive(Default)]
struct MemoryStoreInner {
    state: MemoryState,
    op_log: Vec<StoreOp>,
    fail_commits: usize,
    fail_ops: usize,
    commit_attempts: usize,
}

/// In-memory chain store with staged-write transactions, an op log and
/// injectable failures.
#[derive(Default)]
pub struct MemoryChainStore {
    inner: Arc<Mutex<MemoryStoreInner>>,
}

impl MemoryChainStore {
    pub fn state(&self) -> MemoryState {
        self.inner.lock().unwrap().state.clone()
    }

    pub fn op_log(&self) -> Vec<StoreOp> {
        self.inner.lock().unwrap().op_log.clone()
    }

    pub fn commit_attempts(&self) -> usize {
        self.inner.lock().unwrap().commit_attempts
    }

    /// Fails the next `n` commits.
    pub fn fail_commits(&self, n: usize) {
        self.inner.lock().unwrap().fail_commits = n;
    }

    /// Fails the next `n` staged operations.
    pub fn fail_ops(&self, n: usize) {
        self.inner.lock().unwrap().fail_ops = n;
    }

    /// Seeds a contract record, bypassing any transaction.
    pub fn set_contract(&self, id: FileContractId, record: ContractRecord) {
        self.inner
            .lock()
            .unwrap()
            .state
            .contracts
            .insert(id, record);
    }

    /// Seeds the persisted tip, bypassing any transaction.
    pub fn set_chain_index(&self, index: ChainIndex) {
        self.inner.lock().unwrap().state.tip = index;
    }
}

impl ChainStore for MemoryChainStore {
    type Error = MockError;
    type UpdateTx = MemoryChainUpdateTx;

    fn begin_chain_update_tx(&self) -> Self::UpdateTx {
        let inner = self.inner.lock().unwrap();
        MemoryChainUpdateTx {
            store: self.inner.clone(),
            staged: inner.state.clone(),
            ops: Vec::new(),
        }
    }

    fn chain_index(&self) -> Result<ChainIndex, Self::Error> {
        Ok(self.inner.lock().unwrap().state.tip)
    }
}

/// Transaction over a [`MemoryChainStore`]. Writes stage against a copy of
/// the store's state and replace it wholesale on commit.
pub struct MemoryChainUpdateTx {
    store: Arc<Mutex<MemoryStoreInner>>,
    staged: MemoryState,
    ops: Vec<StoreOp>,
}

impl MemoryChainUpdateTx {
    fn record(&mut self, op: StoreOp) -> Result<(), MockError> {
        let mut store = self.store.lock().unwrap();
        if store.fail_ops > 0 {
            store.fail_ops -= 1;
            return Err(MockError("op failed"));
        }
        self.ops.push(op);
        Ok(())
    }
}

impl ChainUpdateTx for MemoryChainUpdateTx {
    type Error = MockError;

    fn contract_state(&self, id: FileContractId) -> Result<ContractState, Self::Error> {
        Ok(self
            .staged
            .contracts
            .get(&id)
            .map(|record| record.state)
            .unwrap_or_default())
    }

    fn update_chain_index(&mut self, index: ChainIndex) -> Result<(), Self::Error> {
        self.record(StoreOp::UpdateChainIndex(index))?;
        self.staged.tip = index;
        Ok(())
    }

    fn update_contract(
        &mut self,
        id: FileContractId,
        revision_height: u64,
        revision_number: u64,
        file_size: u64,
    ) -> Result<(), Self::Error> {
        self.record(StoreOp::UpdateContract(
            id,
            revision_height,
            revision_number,
            file_size,
        ))?;
        let record = self.staged.contracts.entry(id).or_default();
        record.revision_height = revision_height;
        record.revision_number = revision_number;
        record.file_size = file_size;
        Ok(())
    }

    fn update_contract_state(
        &mut self,
        id: FileContractId,
        state: ContractState,
    ) -> Result<(), Self::Error> {
        self.record(StoreOp::UpdateContractState(id, state))?;
        self.staged.contracts.entry(id).or_default().state = state;
        Ok(())
    }

    fn update_contract_proof_height(
        &mut self,
        id: FileContractId,
        proof_height: u64,
    ) -> Result<(), Self::Error> {
        self.record(StoreOp::UpdateContractProofHeight(id, proof_height))?;
        self.staged.contracts.entry(id).or_default().proof_height = Some(proof_height);
        Ok(())
    }

    fn update_failed_contracts(&mut self, block_height: u64) -> Result<(), Self::Error> {
        self.record(StoreOp::UpdateFailedContracts(block_height))?;
        for record in self.staged.contracts.values_mut() {
            let expired = record
                .proof_window_end
                .is_some_and(|end| end < block_height);
            if record.state == ContractState::Active && record.proof_height.is_none() && expired {
                record.state = ContractState::Failed;
            }
        }
        Ok(())
    }

    fn update_host(
        &mut self,
        public_key: PublicKey,
        announcement: &HostAnnouncement,
        block_height: u64,
        block_id: BlockId,
        timestamp: SystemTime,
    ) -> Result<(), Self::Error> {
        self.record(StoreOp::UpdateHost(
            public_key,
            announcement.net_address.clone(),
        ))?;
        self.staged.hosts.insert(
            public_key,
            HostRecord {
                net_address: announcement.net_address.clone(),
                block_height,
                block_id,
                last_announcement: timestamp,
            },
        );
        Ok(())
    }

    fn commit(mut self) -> Result<(), Self::Error> {
        let mut store = self.store.lock().unwrap();
        store.commit_attempts += 1;
        if store.fail_commits > 0 {
            store.fail_commits -= 1;
            return Err(MockError("commit failed"));
        }
        self.ops.push(StoreOp::Commit);
        store.op_log.append(&mut self.ops);
        store.state = self.staged;
        Ok(())
    }
}

impl WalletUpdateTx for MemoryChainUpdateTx {
    fn add_wallet_outputs(&mut self, outputs: Vec<CoinElement>) -> Result<(), Self::Error> {
        self.record(StoreOp::AddWalletOutputs(outputs.len()))?;
        for output in outputs {
            self.staged.wallet_outputs.insert(output.id, output);
        }
        Ok(())
    }

    fn remove_wallet_outputs(&mut self, ids: Vec<CoinOutputId>) -> Result<(), Self::Error> {
        self.record(StoreOp::RemoveWalletOutputs(ids.len()))?;
        for id in ids {
            self.staged.wallet_outputs.remove(&id);
        }
        Ok(())
    }

    fn add_wallet_events(&mut self, events: Vec<WalletEvent>) -> Result<(), Self::Error> {
        self.record(StoreOp::AddWalletEvents(events.len()))?;
        self.staged.wallet_events.extend(events);
        Ok(())
    }

    fn revert_wallet_events(&mut self, block_id: BlockId) -> Result<(), Self::Error> {
        self.record(StoreOp::RevertWalletEvents(block_id))?;
        self.staged
            .wallet_events
            .retain(|event| event.index.id != block_id);
        Ok(())
    }
}

// ===== contract store =====

#[derive(Default)]
struct ContractStoreInner {
    ids: HashSet<FileContractId>,
    subscribers: Vec<(usize, Arc<dyn ContractStoreSubscriber>)>,
    next_subscriber_id: usize,
}

/// In-memory contract registry feeding subscribers live.
#[derive(Default)]
pub struct MemoryContractStore {
    inner: Arc<Mutex<ContractStoreInner>>,
}

impl MemoryContractStore {
    pub fn with_contracts(ids: impl IntoIterator<Item = FileContractId>) -> Self {
        let store = Self::default();
        store.inner.lock().unwrap().ids = ids.into_iter().collect();
        store
    }

    /// Adds a contract and notifies all subscribers.
    pub fn add_contract(&self, id: FileContractId) {
        let mut inner = self.inner.lock().unwrap();
        inner.ids.insert(id);
        for (_, subscriber) in &inner.subscribers {
            subscriber.add_contract_id(id);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().unwrap().subscribers.len()
    }
}

impl ContractStore for MemoryContractStore {
    type Error = MockError;

    fn subscribe(
        &self,
        subscriber: Arc<dyn ContractStoreSubscriber>,
    ) -> impl std::future::Future<Output = Result<(HashSet<FileContractId>, Unsubscribe), Self::Error>>
           + Send {
        let shared = self.inner.clone();
        async move {
            let mut inner = shared.lock().unwrap();
            let id = inner.next_subscriber_id;
            inner.next_subscriber_id += 1;
            inner.subscribers.push((id, subscriber));
            let snapshot = inner.ids.clone();
            drop(inner);

            let unsubscribe_shared = shared.clone();
            let unsubscribe: Unsubscribe = Box::new(move || {
                unsubscribe_shared
                    .lock()
                    .unwrap()
                    .subscribers
                    .retain(|(subscriber_id, _)| *subscriber_id != id);
            });
            Ok((snapshot, unsubscribe))
        }
    }
}
