//! Account family (ETH) with two-step confirmation.
//!
//! Seeing a transaction only means the node accepted it. Confirmation needs
//! a second call for the receipt, and the block time needs a third. Remote
//! calls go through coalescing queues keyed `transaction:<hash>`,
//! `transactionReceipt:<hash>` and `block:<n>`, sharing one concurrency
//! budget.

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use ledgerlink_core::{ChainFamily, ChainId, CursorKind, Timestamp, Transaction, TransactionUpdate, TxStatus};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::chains::{reschedule, start_module};
use crate::coalesce::RequestQueue;
use crate::error::SyncError;
use crate::module::{ChainSync, GetTxOptions, Lookup, ModuleCore, ModuleDeps, TransferRequest, confirmed_when_in_block};
use crate::ports::{Receipt, Session};

/// Where a transaction is in the see-then-receipt protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationStage {
    /// The node does not know the hash yet.
    AwaitingTransaction,
    /// Seen by the node, receipt not available yet.
    AwaitingReceipt,
    /// Receipt with a block number.
    Confirmed,
    /// Receipt reports a failed execution, or retries ran out.
    Failed,
}

struct AccountQueues {
    transactions: RequestQueue<Option<TransactionUpdate>>,
    receipts: RequestQueue<Option<Receipt>>,
    blocks: RequestQueue<Option<Timestamp>>,
}

impl AccountQueues {
    fn new(max_concurrent: usize) -> Self {
        let permits = Arc::new(Semaphore::new(max_concurrent.max(1)));
        Self {
            transactions: RequestQueue::with_permits(Arc::clone(&permits)),
            receipts: RequestQueue::with_permits(Arc::clone(&permits)),
            blocks: RequestQueue::with_permits(permits),
        }
    }

    fn start(&self) {
        self.transactions.start();
        self.receipts.start();
        self.blocks.start();
    }

    fn stop(&self) {
        self.transactions.stop();
        self.receipts.stop();
        self.blocks.stop();
    }
}

#[derive(Clone)]
pub struct AccountModule {
    core: Arc<ModuleCore>,
    queues: Arc<AccountQueues>,
    stages: Arc<Mutex<HashMap<String, ConfirmationStage>>>,
    /// Set for tokens carried by this chain.
    contract: Option<&'static str>,
}

impl AccountModule {
    /// Module for ETH itself or for a token it carries.
    pub fn new(chain: ChainId, deps: ModuleDeps) -> Result<Self, SyncError> {
        if !matches!(chain.family(), ChainFamily::Account | ChainFamily::Token) {
            return Err(SyncError::InvalidData(format!("{} is not an account chain", chain)));
        }
        let queues = AccountQueues::new(deps.max_concurrent_requests);
        Ok(Self {
            core: Arc::new(ModuleCore::new(chain, CursorKind::Height, deps, confirmed_when_in_block)),
            queues: Arc::new(queues),
            stages: Arc::new(Mutex::new(HashMap::new())),
            contract: chain.token_contract(),
        })
    }

    pub fn contract(&self) -> Option<&'static str> {
        self.contract
    }

    /// Stage of a transaction still in the protocol; settled records report
    /// their final stage from their status.
    pub fn confirmation_stage(&self, id: &str) -> Option<ConfirmationStage> {
        if let Some(stage) = self.stages.lock().get(id).copied() {
            return Some(stage);
        }
        match self.core.transaction(id)?.status {
            TxStatus::Confirmed => Some(ConfirmationStage::Confirmed),
            TxStatus::Rejected | TxStatus::Invalid => Some(ConfirmationStage::Failed),
            _ => None,
        }
    }

    /// Only in-progress stages are kept.
    fn set_stage(&self, id: &str, stage: ConfirmationStage) {
        let mut stages = self.stages.lock();
        match stage {
            ConfirmationStage::AwaitingTransaction | ConfirmationStage::AwaitingReceipt => {
                stages.insert(id.to_string(), stage);
            }
            ConfirmationStage::Confirmed | ConfirmationStage::Failed => {
                stages.remove(id);
            }
        }
    }

    async fn fetch_transaction(&self, id: String) -> Result<Option<TransactionUpdate>, SyncError> {
        let rpc = Arc::clone(&self.core.rpc);
        let key = format!("transaction:{}", id);
        self.queues
            .transactions
            .request(key, move || async move { rpc.get_transaction(&id).await })
            .await
    }

    /// Second step: ask for the receipt until it shows up or the record settles.
    fn poll_receipt(&self, id: String, options: GetTxOptions) -> BoxFuture<'static, ()> {
        let this = self.clone();
        async move {
            let rpc = Arc::clone(&this.core.rpc);
            let key = format!("transactionReceipt:{}", id);
            let receipt_id = id.clone();
            let receipt = this
                .queues
                .receipts
                .request(key, move || async move { rpc.get_receipt(&receipt_id).await })
                .await;

            match receipt {
                Ok(Some(receipt)) if !receipt.success => {
                    tracing::info!("{} transaction {} failed on chain", this.core.chain, id);
                    this.core.merge_one(TransactionUpdate::status(&id, TxStatus::Rejected));
                    this.set_stage(&id, ConfirmationStage::Failed);
                }
                Ok(Some(Receipt {
                    block_number: Some(block),
                    gas_used,
                    ..
                })) => {
                    let gas_price = this.core.transaction(&id).and_then(|t| t.gas_price);
                    this.core.merge_one(TransactionUpdate {
                        id: id.clone(),
                        height: Some(block),
                        status: Some(TxStatus::Confirmed),
                        fee: gas_used.zip(gas_price).map(|(g, p)| g.saturating_mul(p)),
                        ..Default::default()
                    });
                    this.set_stage(&id, ConfirmationStage::Confirmed);
                    this.stamp_block_time(&id, block).await;
                }
                other => {
                    if let Err(e) = other {
                        tracing::warn!("{} receipt of {} failed: {}", this.core.chain, id, e);
                    }
                    if options.update_only {
                        return;
                    }
                    if let Some(tx) = this.core.transaction(&id)
                        && !tx.status.is_settled()
                    {
                        let delay = this.core.registered_delay(&tx);
                        let next = this.clone();
                        let next_id = id.clone();
                        let next_options = options.retry(options.attempt);
                        this.core.schedule_retry(&id, delay, async move {
                            next.poll_receipt(next_id, next_options).await;
                        });
                    }
                }
            }
        }
        .boxed()
    }

    async fn stamp_block_time(&self, id: &str, block: u64) {
        let rpc = Arc::clone(&self.core.rpc);
        let key = format!("block:{}", block);
        let time = self
            .queues
            .blocks
            .request(key, move || async move { rpc.get_block_time(block).await })
            .await;
        match time {
            Ok(Some(timestamp)) => {
                self.core.merge_one(TransactionUpdate {
                    id: id.to_string(),
                    timestamp: Some(timestamp),
                    ..Default::default()
                });
            }
            Ok(None) => tracing::debug!("{} block {} has no time yet", self.core.chain, block),
            Err(e) => tracing::warn!("{} block {} lookup failed: {}", self.core.chain, block, e),
        }
    }
}

#[async_trait]
impl ChainSync for AccountModule {
    fn core(&self) -> &ModuleCore {
        &self.core
    }

    async fn start(&self, session: &Session) -> Result<(), SyncError> {
        self.queues.start();
        start_module(self, &self.core, session).await
    }

    fn stop(&self) {
        self.core.stop();
        self.queues.stop();
    }

    fn reset(&self) {
        self.core.reset();
        self.queues.stop();
        self.stages.lock().clear();
    }

    async fn get_transaction(&self, id: &str, options: GetTxOptions) -> Result<Option<Transaction>, SyncError> {
        let lookup = self
            .core
            .lookup(id, &options, |id| self.fetch_transaction(id))
            .await?;

        match lookup {
            Lookup::Cached(tx) => return Ok(Some(tx)),
            Lookup::Found(mut update) => {
                let local = self.core.transaction(id).map(|t| t.status);
                let reported_terminal = update.status.is_some_and(|s| s.is_terminal());
                if !reported_terminal {
                    // Being seen is only the first step; the receipt decides.
                    update.status = match local {
                        Some(status) if status.is_settled() => None,
                        _ => Some(TxStatus::Registered),
                    };
                }
                let merged = self.core.merge_one(update);

                match merged.map(|t| t.status) {
                    Some(TxStatus::Confirmed) => self.set_stage(id, ConfirmationStage::Confirmed),
                    Some(status) if status.is_settled() => self.set_stage(id, ConfirmationStage::Failed),
                    _ => {
                        self.set_stage(id, ConfirmationStage::AwaitingReceipt);
                        self.poll_receipt(id.to_string(), options.clone()).await;
                    }
                }
            }
            Lookup::Missing => {
                if self.core.transaction(id).is_some_and(|t| t.status == TxStatus::Pending) {
                    self.set_stage(id, ConfirmationStage::AwaitingTransaction);
                }
                match self.core.pending_retry(id, &options) {
                    Some(delay) => reschedule(self, &self.core, id, delay, options.retry(options.attempt + 1)),
                    None => {
                        if self.core.transaction(id).is_some_and(|t| t.status == TxStatus::Rejected) {
                            self.set_stage(id, ConfirmationStage::Failed);
                        }
                    }
                }
            }
            Lookup::Failed(_) => {}
        }
        Ok(self.core.transaction(id))
    }

    async fn send_tokens(&self, request: TransferRequest) -> Result<String, SyncError> {
        let id = self.core.send(&request, self.contract).await?;
        self.get_transaction(&id, GetTxOptions::forced()).await?;
        Ok(id)
    }
}
