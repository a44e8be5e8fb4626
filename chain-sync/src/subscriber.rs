//! Chain subscriber.
//!
//! Reconciles the store's derived view of the chain, contract lifecycle
//! state, host records, wallet outputs and the tip, with the chain manager's
//! stream of apply and revert updates. One background worker performs all
//! reconciliation; reorg notifications and new contract ids arrive from
//! foreign threads and only nudge or feed it.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::chain::{
    Address, ApplyUpdate, ChainIndex, ChainManager, FileContractId, RevertUpdate, Unsubscribe,
    UPDATES_BATCH_SIZE,
};
use crate::config::SubscriberConfig;
use crate::error::{SubscriberError, UpdateError};
use crate::store::{ChainStore, ChainUpdateTx, ContractStore, ContractStoreSubscriber};
use crate::wallet;

mod contracts;


/// Deadline for the initial contract store subscription.
const CONTRACT_STORE_SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// The set of contracts the renter has formed, mirrored from the contract
/// store.
///
/// Bulk-loaded once at construction and extended by store callbacks
/// thereafter; ids are never removed. Contract closure is tracked by state,
/// not by membership.
#[derive(Clone, Default)]
pub(crate) struct KnownContracts(Arc<Mutex<HashSet<FileContractId>>>);

impl KnownContracts {
    fn replace(&self, ids: HashSet<FileContractId>) {
        *self.0.lock().expect("known contracts lock poisoned") = ids;
    }

    fn insert(&self, id: FileContractId) {
        self.0
            .lock()
            .expect("known contracts lock poisoned")
            .insert(id);
    }

    pub(crate) fn contains(&self, id: FileContractId) -> bool {
        self.0
            .lock()
            .expect("known contracts lock poisoned")
            .contains(&id)
    }
}

impl ContractStoreSubscriber for KnownContracts {
    fn add_contract_id(&self, id: FileContractId) {
        self.insert(id);
    }
}

/// The reconciliation core shared between the subscriber and its worker
/// task.
pub(crate) struct SyncDriver<C, S> {
    chain_manager: Arc<C>,
    chain_store: Arc<S>,
    wallet_address: Address,
    announcement_max_age: Duration,
    retry_tx_intervals: Vec<Duration>,
    known_contracts: KnownContracts,
    shutdown: watch::Sender<bool>,
}

impl<C, S> SyncDriver<C, S>
where
    C: ChainManager,
    S: ChainStore,
{
    /// Advances the store's tip from `index` to the chain manager's tip,
    /// batch by batch.
    ///
    /// Each batch is attempted `retry_tx_intervals.len() + 1` times before
    /// its error is surfaced. Shutdown is observed between batches.
    pub(crate) async fn sync(
        &self,
        mut index: ChainIndex,
    ) -> Result<(), SubscriberError<C::Error, S::Error>> {
        while index != self.chain_manager.tip() {
            if *self.shutdown.borrow() {
                break;
            }

            let (reverts, applies) = self
                .chain_manager
                .updates_since(index, UPDATES_BATCH_SIZE)
                .map_err(SubscriberError::Chain)?;

            let attempts = self.retry_tx_intervals.len() + 1;
            for attempt in 1..=attempts {
                match self.process_updates(&reverts, &applies) {
                    Ok(new_index) => {
                        index = new_index;
                        break;
                    }
                    Err(error) => {
                        if attempt == attempts {
                            tracing::error!(
                                "transaction attempt {attempt}/{attempts} failed. {error}"
                            );
                            return Err(SubscriberError::Tx { attempts, error });
                        }
                        let interval = self.retry_tx_intervals[attempt - 1];
                        tracing::warn!(
                            "transaction attempt {attempt}/{attempts} failed, retrying in {interval:?}. {error}"
                        );
                        tokio::time::sleep(interval).await;
                    }
                }
            }
        }
        Ok(())
    }

    /// Processes one batch of updates within a single transaction.
    ///
    /// Reverts are processed strictly before applies, in the order supplied
    /// by the chain manager. The tip and the failed-contract sweep are the
    /// last writes before commit. Returns the index the tip was advanced to.
    fn process_updates(
        &self,
        reverts: &[RevertUpdate],
        applies: &[ApplyUpdate],
    ) -> Result<ChainIndex, UpdateError<S::Error>> {
        let mut tx = self.chain_store.begin_chain_update_tx();
        let mut index = ChainIndex::default();

        for revert in reverts {
            self.revert_chain_update(&mut tx, revert)?;
            wallet::revert_chain_update(&mut tx, self.wallet_address, revert)
                .map_err(UpdateError::Store)?;
            index = revert.state.index;
        }

        self.apply_chain_updates(&mut tx, applies)?;
        wallet::apply_chain_updates(&mut tx, self.wallet_address, applies)
            .map_err(UpdateError::Store)?;
        if let Some(last) = applies.last() {
            index = last.state.index;
        }

        tx.update_chain_index(index).map_err(UpdateError::Store)?;
        tx.update_failed_contracts(index.height)
            .map_err(UpdateError::Store)?;
        tx.commit().map_err(UpdateError::Store)?;

        Ok(index)
    }
}

/// Subscribes the store to the chain manager's update stream.
///
/// See the crate documentation for the overall flow. Construct with
/// [`Subscriber::new`], start with [`Subscriber::run`] and stop with
/// [`Subscriber::close`].
pub struct Subscriber<C, S>
where
    C: ChainManager,
    S: ChainStore,
{
    driver: Arc<SyncDriver<C, S>>,
    sync_sender: mpsc::Sender<()>,
    sync_receiver: Mutex<Option<mpsc::Receiver<()>>>,
    contracts_unsubscribe: Mutex<Option<Unsubscribe>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<C, S> Subscriber<C, S>
where
    C: ChainManager + 'static,
    S: ChainStore + 'static,
{
    /// Creates a new subscriber and registers it with the contract store.
    ///
    /// Fails if `announcement_max_age` is zero or the contract store does not
    /// answer within five minutes.
    pub async fn new<N>(
        chain_manager: Arc<C>,
        chain_store: Arc<S>,
        contract_store: &N,
        config: SubscriberConfig,
    ) -> Result<Self, SubscriberError<C::Error, S::Error>>
    where
        N: ContractStore,
    {
        if config.announcement_max_age.is_zero() {
            return Err(SubscriberError::InvalidAnnouncementMaxAge);
        }

        let known_contracts = KnownContracts::default();

        // subscribe ourselves to receive new contract ids
        let (ids, contracts_unsubscribe) = tokio::time::timeout(
            CONTRACT_STORE_SUBSCRIBE_TIMEOUT,
            contract_store.subscribe(Arc::new(known_contracts.clone())),
        )
        .await
        .map_err(|_| SubscriberError::SubscribeTimeout)?
        .map_err(|e| SubscriberError::ContractStore(Box::new(e)))?;
        known_contracts.replace(ids);

        let (sync_sender, sync_receiver) = mpsc::channel(1);
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            driver: Arc::new(SyncDriver {
                chain_manager,
                chain_store,
                wallet_address: config.wallet_address,
                announcement_max_age: config.announcement_max_age,
                retry_tx_intervals: config.retry_tx_intervals,
                known_contracts,
                shutdown,
            }),
            sync_sender,
            sync_receiver: Mutex::new(Some(sync_receiver)),
            contracts_unsubscribe: Mutex::new(Some(contracts_unsubscribe)),
            worker: Mutex::new(None),
        })
    }

    /// Performs an initial sync from the persisted tip, spawns the background
    /// worker and hooks it up to the chain manager's reorg notifications.
    ///
    /// Returns the handle releasing the reorg hook. Panics if called more
    /// than once.
    pub async fn run(&self) -> Result<Unsubscribe, SubscriberError<C::Error, S::Error>> {
        // perform an initial sync
        let index = self
            .driver
            .chain_store
            .chain_index()
            .map_err(SubscriberError::ChainIndex)?;
        self.driver.sync(index).await?;

        // start the sync worker
        let mut sync_receiver = self
            .sync_receiver
            .lock()
            .expect("sync receiver lock poisoned")
            .take()
            .expect("run may only be called once");
        let mut shutdown = self.driver.shutdown.subscribe();
        let driver = self.driver.clone();
        let worker = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => return,
                    signal = sync_receiver.recv() => {
                        if signal.is_none() {
                            return;
                        }
                    }
                }

                let index = match driver.chain_store.chain_index() {
                    Ok(index) => index,
                    Err(e) => {
                        tracing::error!("failed to get chain index. {e}");
                        continue;
                    }
                };
                if let Err(e) = driver.sync(index).await {
                    tracing::error!("failed to sync. {e}");
                }
            }
        });
        *self.worker.lock().expect("worker lock poisoned") = Some(worker);

        // trigger a sync on reorgs
        let sync_sender = self.sync_sender.clone();
        Ok(self.driver.chain_manager.on_reorg(Box::new(move |_| {
            // wake the worker; a full signal already guarantees a pass
            let _ = sync_sender.try_send(());
        })))
    }

    /// Signals shutdown, releases the contract store subscription and waits
    /// for the background worker to exit.
    pub async fn close(&self) {
        let _ = self.driver.shutdown.send(true);

        if let Some(unsubscribe) = self
            .contracts_unsubscribe
            .lock()
            .expect("unsubscribe lock poisoned")
            .take()
        {
            unsubscribe();
        }

        let worker = self.worker.lock().expect("worker lock poisoned").take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::error!("sync worker panicked. {e}");
            }
        }
    }
}
