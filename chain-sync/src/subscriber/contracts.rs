//! Contract and host processing for a batch of chain updates.
//!
//! The walker iterates the file-contract elements and host announcements of
//! each update; the deriver turns a single element's before/after revisions
//! and resolution into writes on the chain update transaction. Both operate
//! on known contracts only; updates naming contracts the renter never formed
//! are skipped.

use crate::chain::{
    ApplyUpdate, ChainIndex, ChainManager, FileContractElement, FileContractId, RevertUpdate,
    V2ContractResolution, V2FileContractElement, MAX_REVISION_NUMBER,
};
use crate::error::UpdateError;
use crate::store::{ChainStore, ChainUpdateTx, ContractState};

use super::SyncDriver;

/// Projection of a file contract revision, common to both contract formats.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Revision {
    revision_number: u64,
    file_size: u64,
}

impl From<&FileContractElement> for Revision {
    fn from(element: &FileContractElement) -> Self {
        Self {
            revision_number: element.contract.revision_number,
            file_size: element.contract.file_size,
        }
    }
}

impl From<&V2FileContractElement> for Revision {
    fn from(element: &V2FileContractElement) -> Self {
        Self {
            revision_number: element.contract.revision_number,
            file_size: element.contract.file_size,
        }
    }
}

/// Derives `(resolved, valid)` from a v2 contract's resolution.
///
/// An expiration only resolves a contract as valid when it stored no data;
/// everything else that resolves a contract does so validly.
pub(crate) fn classify_resolution(
    element: &V2FileContractElement,
    resolution: Option<V2ContractResolution>,
) -> (bool, bool) {
    match resolution {
        None => (false, false),
        Some(V2ContractResolution::Finalization)
        | Some(V2ContractResolution::Renewal)
        | Some(V2ContractResolution::StorageProof) => (true, true),
        Some(V2ContractResolution::Expiration) => (true, element.contract.file_size == 0),
    }
}

impl<C, S> SyncDriver<C, S>
where
    C: ChainManager,
    S: ChainStore,
{
    /// Applies the contract and host effects of a batch of apply updates.
    pub(crate) fn apply_chain_updates(
        &self,
        tx: &mut S::UpdateTx,
        updates: &[ApplyUpdate],
    ) -> Result<(), UpdateError<S::Error>> {
        for update in updates {
            let index = update.state.index;
            let block = &update.block;

            // ignore announcements from blocks that predate the max age
            let stale = block
                .timestamp
                .elapsed()
                .is_ok_and(|age| age > self.announcement_max_age);
            if !stale {
                for announcement in &block.announcements {
                    if announcement.net_address.is_empty() {
                        continue;
                    }
                    tx.update_host(
                        announcement.public_key,
                        announcement,
                        index.height,
                        block.id,
                        block.timestamp,
                    )
                    .map_err(UpdateError::Store)?;
                }
            }

            for fc in &update.file_contracts {
                let curr = fc
                    .revision
                    .as_ref()
                    .map_or_else(|| Revision::from(&fc.element), Revision::from);
                self.update_contract(
                    tx,
                    index,
                    fc.element.id,
                    None,
                    Some(curr),
                    fc.resolved,
                    fc.valid,
                )?;
            }

            for fc in &update.v2_file_contracts {
                let curr = fc
                    .revision
                    .as_ref()
                    .map_or_else(|| Revision::from(&fc.element), Revision::from);
                let (resolved, valid) = classify_resolution(&fc.element, fc.resolution);
                self.update_contract(tx, index, fc.element.id, None, Some(curr), resolved, valid)?;
            }
        }
        Ok(())
    }

    /// Reverts the contract effects of a single revert update.
    ///
    /// Host records are not reverted; the freshness filter and the idempotent
    /// upsert make re-application the only correction path.
    pub(crate) fn revert_chain_update(
        &self,
        tx: &mut S::UpdateTx,
        update: &RevertUpdate,
    ) -> Result<(), UpdateError<S::Error>> {
        let index = update.state.index;

        for fc in &update.file_contracts {
            let prev = Revision::from(&fc.element);
            let curr = fc.revision.as_ref().map(Revision::from);
            self.update_contract(
                tx,
                index,
                fc.element.id,
                Some(prev),
                curr,
                fc.resolved,
                fc.valid,
            )?;
        }

        for fc in &update.v2_file_contracts {
            let prev = Revision::from(&fc.element);
            let curr = fc.revision.as_ref().map(Revision::from);
            let (resolved, valid) = classify_resolution(&fc.element, fc.resolution);
            self.update_contract(tx, index, fc.element.id, Some(prev), curr, resolved, valid)?;
        }

        Ok(())
    }

    /// Derives the writes for a single contract from its revisions before and
    /// after the update.
    ///
    /// `prev` is present when reverting, `curr` when the update carries a
    /// revision; at least one must be present. `valid` is meaningless unless
    /// `resolved` is set.
    fn update_contract(
        &self,
        tx: &mut S::UpdateTx,
        index: ChainIndex,
        id: FileContractId,
        prev: Option<Revision>,
        curr: Option<Revision>,
        resolved: bool,
        valid: bool,
    ) -> Result<(), UpdateError<S::Error>> {
        if prev.is_none() && curr.is_none() {
            return Err(UpdateError::EmptyRevisions(id));
        }

        // ignore unknown contracts
        if !self.known_contracts.contains(id) {
            return Ok(());
        }

        let state = tx.contract_state(id).map_err(UpdateError::Store)?;

        // handle reverts
        if let Some(prev) = prev {
            // reverted formation: back to 'pending'
            if curr.is_none() {
                tx.update_contract_state(id, ContractState::Pending)
                    .map_err(UpdateError::Store)?;
            }

            // reverted renewal: 'complete' -> 'active'
            if curr.is_some() {
                tx.update_contract(id, index.height, prev.revision_number, prev.file_size)
                    .map_err(UpdateError::Store)?;
                if state == ContractState::Complete {
                    tx.update_contract_state(id, ContractState::Active)
                        .map_err(UpdateError::Store)?;
                    tracing::info!(
                        "contract state changed: complete -> active. contract: {id}, reason: final revision reverted"
                    );
                }
            }

            // reverted storage proof: 'complete/failed' -> 'active'
            if resolved {
                tx.update_contract_state(id, ContractState::Active)
                    .map_err(UpdateError::Store)?;
                if valid {
                    tracing::info!(
                        "contract state changed: complete -> active. contract: {id}, reason: storage proof reverted"
                    );
                } else {
                    tracing::info!(
                        "contract state changed: failed -> active. contract: {id}, reason: storage proof reverted"
                    );
                }
            }

            return Ok(());
        }

        // handle apply
        let curr = curr.expect("at least one revision is present");
        tx.update_contract(id, index.height, curr.revision_number, curr.file_size)
            .map_err(UpdateError::Store)?;

        // confirmed: 'pending' -> 'active'
        if state == ContractState::Pending || state == ContractState::Unknown {
            tx.update_contract_state(id, ContractState::Active)
                .map_err(UpdateError::Store)?;
            tracing::info!(
                "contract state changed: pending -> active. contract: {id}, reason: contract confirmed"
            );
        }

        // renewed: 'active' -> 'complete'
        if curr.revision_number == MAX_REVISION_NUMBER && curr.file_size == 0 {
            tx.update_contract_state(id, ContractState::Complete)
                .map_err(UpdateError::Store)?;
            tracing::info!(
                "contract state changed: active -> complete. contract: {id}, reason: final revision confirmed"
            );
        }

        // storage proof: 'active' -> 'complete/failed'
        if resolved {
            tx.update_contract_proof_height(id, index.height)
                .map_err(UpdateError::Store)?;
            if valid {
                tx.update_contract_state(id, ContractState::Complete)
                    .map_err(UpdateError::Store)?;
                tracing::info!(
                    "contract state changed: active -> complete. contract: {id}, reason: storage proof valid"
                );
            } else {
                tx.update_contract_state(id, ContractState::Failed)
                    .map_err(UpdateError::Store)?;
                tracing::info!(
                    "contract state changed: active -> failed. contract: {id}, reason: storage proof missed"
                );
            }
        }

        Ok(())
    }
}
