//! Chain-facing types and the consensus source interface.
//!
//! Everything in this module is produced by the consensus layer and consumed
//! read-only by the subscriber: positions on the canonical chain, blocks with
//! their embedded host announcements, file-contract elements in both on-chain
//! formats, and the apply/revert update records emitted by the chain manager.

use std::fmt;
use std::time::SystemTime;

/// Maximum number of updates requested from the chain manager in a single
/// call to [`ChainManager::updates_since`].
pub const UPDATES_BATCH_SIZE: usize = 1000;

/// Revision number of a file contract's final revision after it has been
/// superseded by a renewal.
pub const MAX_REVISION_NUMBER: u64 = u64::MAX;

/// Currency amount in the chain's smallest unit.
pub type Currency = u128;

fn fmt_hex(bytes: &[u8; 32], f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for byte in bytes {
        write!(f, "{byte:02x}")?;
    }
    Ok(())
}

/// Unique identifier of a block.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub [u8; 32]);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_hex(&self.0, f)
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({self})")
    }
}

/// Unique identifier of a file contract.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileContractId(pub [u8; 32]);

impl fmt::Display for FileContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_hex(&self.0, f)
    }
}

impl fmt::Debug for FileContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileContractId({self})")
    }
}

/// Ed25519 public key identifying a host.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey(pub [u8; 32]);

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ed25519:")?;
        fmt_hex(&self.0, f)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({self})")
    }
}

/// Address spendable by a wallet.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub [u8; 32]);

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_hex(&self.0, f)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

/// Unique identifier of a coin output.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CoinOutputId(pub [u8; 32]);

impl fmt::Display for CoinOutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_hex(&self.0, f)
    }
}

impl fmt::Debug for CoinOutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CoinOutputId({self})")
    }
}

/// A position on the canonical chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ChainIndex {
    /// Block height.
    pub height: u64,
    /// Id of the block at that height.
    pub id: BlockId,
}

impl fmt::Display for ChainIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.height, self.id)
    }
}

/// Consensus state an update was derived at. Only the index is consumed by
/// the subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainState {
    /// Index of the block the state was derived at.
    pub index: ChainIndex,
}

/// A host announcement embedded in a block, advertising the address a host
/// can be reached at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostAnnouncement {
    /// Public key the host signs with.
    pub public_key: PublicKey,
    /// Network address the host listens on. May be empty in malformed
    /// announcements, which are ignored.
    pub net_address: String,
}

/// The subset of a block consumed by the subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Id of the block.
    pub id: BlockId,
    /// Timestamp the block was mined at.
    pub timestamp: SystemTime,
    /// Host announcements embedded in the block's transactions.
    pub announcements: Vec<HostAnnouncement>,
}

/// A v1 file contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileContract {
    /// Latest revision number.
    pub revision_number: u64,
    /// Size of the contracted data in bytes.
    pub file_size: u64,
}

/// A v1 file contract together with its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileContractElement {
    /// Id of the contract.
    pub id: FileContractId,
    /// The contract at its base revision within the update.
    pub contract: FileContract,
}

/// A v2 file contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct V2FileContract {
    /// Latest revision number.
    pub revision_number: u64,
    /// Size of the contracted data in bytes.
    pub file_size: u64,
}

/// A v2 file contract together with its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct V2FileContractElement {
    /// Id of the contract.
    pub id: FileContractId,
    /// The contract at its base revision within the update.
    pub contract: V2FileContract,
}

/// The ways a v2 file contract can leave the active set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum V2ContractResolution {
    /// The contract was finalized by both parties.
    Finalization,
    /// The contract was renewed.
    Renewal,
    /// The host submitted a valid storage proof.
    StorageProof,
    /// The proof window expired without a proof.
    Expiration,
}

/// The effect of a block on a v1 file contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContractUpdate {
    /// The contract element as of the parent block.
    pub element: FileContractElement,
    /// The revision confirmed by this block, if any.
    pub revision: Option<FileContractElement>,
    /// Whether the block resolved the contract.
    pub resolved: bool,
    /// Whether the resolution was a valid storage proof. Meaningless unless
    /// `resolved` is set.
    pub valid: bool,
}

/// The effect of a block on a v2 file contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct V2FileContractUpdate {
    /// The contract element as of the parent block.
    pub element: V2FileContractElement,
    /// The revision confirmed by this block, if any.
    pub revision: Option<V2FileContractElement>,
    /// The resolution confirmed by this block, if any.
    pub resolution: Option<V2ContractResolution>,
}

/// A coin output and its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinElement {
    /// Id of the output.
    pub id: CoinOutputId,
    /// The output itself.
    pub coin_output: CoinOutput,
}

/// A coin output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinOutput {
    /// Address the output is spendable by.
    pub address: Address,
    /// Amount the output is worth.
    pub value: Currency,
}

/// The effect of a block on a coin output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinElementDiff {
    /// The output element.
    pub element: CoinElement,
    /// Whether the block created the output.
    pub created: bool,
    /// Whether the block spent the output.
    pub spent: bool,
}

/// Derived effects of a newly canonical block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyUpdate {
    /// Consensus state as of this block.
    pub state: ChainState,
    /// The block itself.
    pub block: Block,
    /// Effects on v1 file contracts.
    pub file_contracts: Vec<FileContractUpdate>,
    /// Effects on v2 file contracts.
    pub v2_file_contracts: Vec<V2FileContractUpdate>,
    /// Effects on coin outputs.
    pub coin_elements: Vec<CoinElementDiff>,
}

/// Derived effects of unwinding a previously canonical block.
///
/// Field meanings match [`ApplyUpdate`]; the state carried is the state the
/// chain returns to once the block is unwound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevertUpdate {
    /// Consensus state the chain reverts to.
    pub state: ChainState,
    /// The block being unwound.
    pub block: Block,
    /// Effects on v1 file contracts.
    pub file_contracts: Vec<FileContractUpdate>,
    /// Effects on v2 file contracts.
    pub v2_file_contracts: Vec<V2FileContractUpdate>,
    /// Effects on coin outputs.
    pub coin_elements: Vec<CoinElementDiff>,
}

/// Handle releasing a callback registration. Invoke to unsubscribe.
pub type Unsubscribe = Box<dyn FnOnce() + Send>;

/// Callback invoked by the chain manager on every tip change.
pub type ReorgCallback = Box<dyn Fn(ChainIndex) + Send + Sync>;

/// The consensus source the subscriber reconciles against.
///
/// Implementations own block download and validation; the subscriber only
/// consumes the derived update stream.
pub trait ChainManager: Send + Sync {
    /// Errors returned when fetching updates.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Returns the current tip of the canonical chain.
    fn tip(&self) -> ChainIndex;

    /// Returns the updates between `index` and the current tip, at most `max`
    /// of them, reverts first.
    fn updates_since(
        &self,
        index: ChainIndex,
        max: usize,
    ) -> Result<(Vec<RevertUpdate>, Vec<ApplyUpdate>), Self::Error>;

    /// Registers `callback` to be invoked on every tip change. The callback
    /// may be invoked from a foreign thread.
    fn on_reorg(&self, callback: ReorgCallback) -> Unsubscribe;
}
