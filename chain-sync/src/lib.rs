#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![doc = r#"
# Chain Sync

## Overview
Chain-sync is the chain subscriber of a decentralized-storage renter daemon.
It keeps the daemon's persistent view of on-chain state, file-contract
lifecycle, host announcements, wallet-relevant outputs and the chain tip,
reconciled with a consensus source that reports block applies and reverts,
and provides the following guarantees:
- Atomic batches, all writes derived from one batch of updates commit
  together with the tip they were derived from, or not at all.
- Reorg safety, a revert batch followed by apply batches rewrites history
  without the persisted tip ever being observable at an intermediate value.
- Bounded retries, transient storage failures are retried on a configured
  schedule before the batch's error is surfaced.
- Live contract filtering, updates are reduced to the contracts the renter
  actually formed, fed concurrently by the contract store.

## Terminology
- Chain index - `(height, block id)` pair locating a position on the
  canonical chain.
- Tip - the most recently processed chain index, persisted alongside the
  state derived from it.
- Apply update - derived effects of a newly canonical block.
- Revert update - derived effects of unwinding a previously canonical block.
- Renewal marker - a final contract revision with the maximum revision
  number and a file size of zero, marking the contract as superseded by a
  renewal.
- Storage proof - a host's on-chain proof that it still holds contracted
  data; resolves a contract as valid or invalid.

## Flow
1. [`Subscriber::new`] registers with the contract store and bulk-loads the
   set of known contract ids.
2. [`Subscriber::run`] syncs from the persisted tip to the chain manager's
   tip, then spawns a background worker and registers a reorg hook that
   wakes it.
3. On every wake the worker re-reads the persisted tip and fetches bounded
   batches of updates until it reaches the chain manager's tip.
4. Each batch is processed inside one store transaction: reverts first, then
   applies, each walking host announcements and v1/v2 file-contract elements
   and driving the wallet helper, followed by the tip write and the
   failed-contract sweep.
5. [`Subscriber::close`] signals shutdown, releases the contract store
   subscription and waits for the worker to exit.
"#]

pub mod chain;
pub mod config;
pub mod error;
pub mod store;
pub mod subscriber;
pub mod wallet;

#[cfg(test)]
pub(crate) mod mocks;

pub use config::SubscriberConfig;
pub use subscriber::Subscriber;
