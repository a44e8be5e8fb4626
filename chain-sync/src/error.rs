//! Subscriber error module

use crate::chain::FileContractId;

/// Top level error enumerating any error that may occur while subscribing to
/// the chain.
#[derive(Debug, thiserror::Error)]
pub enum SubscriberError<CE, SE>
where
    CE: std::fmt::Debug + std::fmt::Display,
    SE: std::fmt::Debug + std::fmt::Display,
{
    /// Announcement max age was configured as zero.
    #[error("announcement max age must be non-zero")]
    InvalidAnnouncementMaxAge,
    /// The contract store did not answer the subscription request in time.
    #[error("timed out subscribing to contract store")]
    SubscribeTimeout,
    /// The contract store rejected the subscription request.
    #[error("contract store error. {0}")]
    ContractStore(Box<dyn std::error::Error + Send + Sync>),
    /// The chain manager failed to produce updates.
    #[error("failed to fetch updates. {0}")]
    Chain(CE),
    /// The store failed to report the persisted chain tip.
    #[error("failed to get chain index. {0}")]
    ChainIndex(SE),
    /// Processing a batch of updates failed on every attempt.
    #[error("failed to process updates after {attempts} attempts. {error}")]
    Tx {
        /// Number of attempts made, `retry_tx_intervals.len() + 1`.
        attempts: usize,
        /// The error returned by the final attempt.
        error: UpdateError<SE>,
    },
}

/// Errors failing a single chain update transaction.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError<SE>
where
    SE: std::fmt::Debug + std::fmt::Display,
{
    /// A store operation or the commit failed.
    #[error("store error. {0}")]
    Store(SE),
    /// The contract deriver was invoked without a previous or a current
    /// revision.
    #[error("both previous and current revisions are absent for contract {0}")]
    EmptyRevisions(FileContractId),
}
