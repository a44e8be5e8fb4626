//! Traits for interfacing the subscriber with persistent storage.
//!
//! A store exposes a scoped transaction, [`ChainUpdateTx`], through which all
//! state derived from one batch of chain updates is written: contract state,
//! host records, the wallet's output set and the chain tip. Nothing is
//! observable until [`ChainUpdateTx::commit`]; a transaction that is dropped
//! without committing leaves the store untouched.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::SystemTime;

use crate::chain::{
    BlockId, ChainIndex, CoinElement, CoinOutputId, Currency, FileContractId, HostAnnouncement,
    PublicKey, Unsubscribe,
};

/// Derived lifecycle state of a file contract.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ContractState {
    /// The contract has never been seen on chain.
    #[default]
    Unknown,
    /// The contract was formed but its formation is not yet confirmed, or its
    /// formation was reverted.
    Pending,
    /// The contract is confirmed and running.
    Active,
    /// The contract ended successfully: renewed, finalized or proven.
    Complete,
    /// The contract ended with a missed storage proof.
    Failed,
}

impl std::fmt::Display for ContractState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Pending => write!(f, "pending"),
            Self::Active => write!(f, "active"),
            Self::Complete => write!(f, "complete"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// A wallet-relevant balance change confirmed by a single block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletEvent {
    /// Index of the block the event was confirmed at.
    pub index: ChainIndex,
    /// Timestamp of that block.
    pub timestamp: SystemTime,
    /// Total value of outputs the block created for the wallet.
    pub inflow: Currency,
    /// Total value of outputs the block spent from the wallet.
    pub outflow: Currency,
}

/// Scoped transaction over all state the subscriber derives from chain
/// updates.
///
/// All operations stage writes; [`commit`](Self::commit) publishes them
/// atomically. Operations are idempotent so a batch that failed to commit can
/// be replayed in full.
pub trait ChainUpdateTx {
    /// Errors returned by the store.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Returns the derived state of a contract. Ids that have never been
    /// written return [`ContractState::Unknown`].
    fn contract_state(&self, id: FileContractId) -> Result<ContractState, Self::Error>;

    /// Writes the chain tip.
    fn update_chain_index(&mut self, index: ChainIndex) -> Result<(), Self::Error>;

    /// Writes the latest known revision of a contract.
    fn update_contract(
        &mut self,
        id: FileContractId,
        revision_height: u64,
        revision_number: u64,
        file_size: u64,
    ) -> Result<(), Self::Error>;

    /// Writes the derived state of a contract.
    fn update_contract_state(
        &mut self,
        id: FileContractId,
        state: ContractState,
    ) -> Result<(), Self::Error>;

    /// Records the height a storage proof for the contract was observed at.
    fn update_contract_proof_height(
        &mut self,
        id: FileContractId,
        proof_height: u64,
    ) -> Result<(), Self::Error>;

    /// Marks all contracts whose proof window has passed by `block_height`
    /// without a proof as [`ContractState::Failed`]. Called once per batch
    /// after all other contract writes.
    fn update_failed_contracts(&mut self, block_height: u64) -> Result<(), Self::Error>;

    /// Upserts a host record from an announcement.
    fn update_host(
        &mut self,
        public_key: PublicKey,
        announcement: &HostAnnouncement,
        block_height: u64,
        block_id: BlockId,
        timestamp: SystemTime,
    ) -> Result<(), Self::Error>;

    /// Publishes all staged writes atomically.
    fn commit(self) -> Result<(), Self::Error>;
}

/// Wallet capability of a chain update transaction.
///
/// The wallet helper writes through the same transaction as the contract
/// deriver so that wallet deltas commit together with the tip they were
/// derived from.
pub trait WalletUpdateTx: ChainUpdateTx {
    /// Adds outputs the chain created for the wallet.
    fn add_wallet_outputs(&mut self, outputs: Vec<CoinElement>) -> Result<(), Self::Error>;

    /// Removes outputs the chain spent from the wallet.
    fn remove_wallet_outputs(&mut self, ids: Vec<CoinOutputId>) -> Result<(), Self::Error>;

    /// Records wallet events.
    fn add_wallet_events(&mut self, events: Vec<WalletEvent>) -> Result<(), Self::Error>;

    /// Removes all wallet events confirmed by the given block.
    fn revert_wallet_events(&mut self, block_id: BlockId) -> Result<(), Self::Error>;
}

/// The store the subscriber persists its derived view into.
pub trait ChainStore: Send + Sync {
    /// Errors returned by the store.
    type Error: std::error::Error + Send + Sync + 'static;
    /// Transaction type carrying one batch of writes.
    type UpdateTx: WalletUpdateTx + ChainUpdateTx<Error = Self::Error>;

    /// Begins a new chain update transaction.
    fn begin_chain_update_tx(&self) -> Self::UpdateTx;

    /// Returns the persisted chain tip.
    fn chain_index(&self) -> Result<ChainIndex, Self::Error>;
}

/// Receiver of new contract ids from a contract store.
pub trait ContractStoreSubscriber: Send + Sync {
    /// Called for every contract id added to the store after subscription.
    fn add_contract_id(&self, id: FileContractId);
}

/// The registry of contracts the renter has formed.
///
/// The subscriber only mirrors the store's id set; contract metadata stays
/// with the store.
pub trait ContractStore: Send + Sync {
    /// Errors returned when subscribing.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Registers `subscriber` to receive new contract ids and returns a
    /// snapshot of the ids known so far along with an unsubscribe handle.
    fn subscribe(
        &self,
        subscriber: Arc<dyn ContractStoreSubscriber>,
    ) -> impl std::future::Future<Output = Result<(HashSet<FileContractId>, Unsubscribe), Self::Error>>
           + Send;
}
