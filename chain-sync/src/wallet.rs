//! Wallet-update helper.
//!
//! Projects the wallet-relevant portion of chain updates, outputs addressed
//! to the wallet and the balance events they imply, through the same
//! transaction handle the contract deriver writes through. Balance and UTXO
//! accounting stay with the store; this module only decides which elements
//! belong to the wallet.

use crate::chain::{Address, ApplyUpdate, CoinElement, CoinOutputId, RevertUpdate};
use crate::store::{WalletEvent, WalletUpdateTx};

/// Applies the wallet-relevant effects of a batch of apply updates.
pub fn apply_chain_updates<T>(
    tx: &mut T,
    wallet_address: Address,
    updates: &[ApplyUpdate],
) -> Result<(), T::Error>
where
    T: WalletUpdateTx,
{
    for update in updates {
        let mut created = Vec::new();
        let mut spent = Vec::new();
        let mut inflow = 0;
        let mut outflow = 0;
        for diff in &update.coin_elements {
            if diff.element.coin_output.address != wallet_address {
                continue;
            }
            if diff.created && diff.spent {
                continue; // created and spent within the same batch
            }
            if diff.created {
                inflow += diff.element.coin_output.value;
                created.push(diff.element.clone());
            } else if diff.spent {
                outflow += diff.element.coin_output.value;
                spent.push(diff.element.id);
            }
        }
        if created.is_empty() && spent.is_empty() {
            continue;
        }

        tx.add_wallet_outputs(created)?;
        tx.remove_wallet_outputs(spent)?;
        tx.add_wallet_events(vec![WalletEvent {
            index: update.state.index,
            timestamp: update.block.timestamp,
            inflow,
            outflow,
        }])?;
    }
    Ok(())
}

/// Reverts the wallet-relevant effects of a single revert update.
pub fn revert_chain_update<T>(
    tx: &mut T,
    wallet_address: Address,
    update: &RevertUpdate,
) -> Result<(), T::Error>
where
    T: WalletUpdateTx,
{
    let mut restored: Vec<CoinElement> = Vec::new();
    let mut removed: Vec<CoinOutputId> = Vec::new();
    for diff in &update.coin_elements {
        if diff.element.coin_output.address != wallet_address {
            continue;
        }
        if diff.created && diff.spent {
            continue;
        }
        if diff.created {
            removed.push(diff.element.id);
        } else if diff.spent {
            restored.push(diff.element.clone());
        }
    }
    if !restored.is_empty() || !removed.is_empty() {
        tx.add_wallet_outputs(restored)?;
        tx.remove_wallet_outputs(removed)?;
    }

    // events are keyed by block, drop them even when no outputs changed
    tx.revert_wallet_events(update.block.id)?;
    Ok(())
}
