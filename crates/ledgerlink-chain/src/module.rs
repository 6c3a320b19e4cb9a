//! The chain synchronization capability set and the context every chain
//! module is built on.
//!
//! A module context owns one chain's session, transaction store, and timers.
//! All store mutations go through the context's mutex, which is never held
//! across an `.await`.

use async_trait::async_trait;
use ledgerlink_core::{
    Amount, ChainId, Clock, CursorKind, Extremes, FetchStatus, MergeOrigin, StoreSnapshot,
    Timestamp, Transaction, TransactionStore, TransactionUpdate, TxStatus, pending_retry_count,
    pending_retry_timeout, registered_retry_timeout,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::SyncError;
use crate::ports::{ChainRpc, IntentSink, PageRequest, Session, Signer, SortOrder, UnsignedTransfer};
use crate::scheduler::TaskScheduler;

/// Options for [`ChainSync::get_transaction`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetTxOptions {
    /// Query the node even when a local copy exists.
    pub force: bool,
    /// Put the record back to `Pending` before querying (explicit resubmission).
    pub drop_status: bool,
    /// Query once, schedule nothing.
    pub update_only: bool,
    /// Broadcast time known to the caller; seeds the placeholder.
    pub timestamp: Option<Timestamp>,
    /// Declared amount; seeds the placeholder.
    pub amount: Option<Amount>,
    /// Pending-phase attempts already made.
    pub attempt: u32,
}

impl GetTxOptions {
    pub fn forced() -> Self {
        Self {
            force: true,
            ..Default::default()
        }
    }

    /// Options for the next scheduled poll.
    pub(crate) fn retry(&self, next_attempt: u32) -> Self {
        Self {
            force: true,
            drop_status: false,
            update_only: false,
            timestamp: self.timestamp,
            amount: self.amount,
            attempt: next_attempt,
        }
    }
}

/// A transfer to sign and broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransferRequest {
    pub to: String,
    pub amount: Amount,
    pub comment: Option<String>,
    /// Home-chain contact to notify with a transfer-intent message before broadcasting.
    pub intent_recipient: Option<String>,
}

/// Read-only view of a module's state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ModuleState {
    pub chain: Option<ChainId>,
    pub address: Option<String>,
    pub balance: Option<Amount>,
    pub balance_status: FetchStatus,
    pub are_recent_loading: bool,
    pub are_older_loading: bool,
    pub bottom_reached: bool,
    pub transactions_count: usize,
    pub extremes: Extremes,
    pub started: bool,
    /// Transactions with a live retry loop.
    pub polling_count: usize,
}

/// The capability set shared by every chain family.
///
/// Families implement the lifecycle entry points; everything else defaults
/// to the shared [`ModuleCore`].
#[async_trait]
pub trait ChainSync: Send + Sync {
    fn core(&self) -> &ModuleCore;

    fn chain(&self) -> ChainId {
        self.core().chain
    }

    /// Derive the address, fetch the balance, start polling. Calling it again
    /// while started does nothing.
    async fn start(&self, session: &Session) -> Result<(), SyncError>;

    /// Cancel every timer and drop key material. Transactions stay cached.
    fn stop(&self) {
        self.core().stop();
    }

    /// `stop` plus dropping all transactions, cursors, and the address.
    fn reset(&self) {
        self.core().reset();
    }

    /// Fetch history newer than the newest known record. Returns records merged.
    async fn fetch_recent(&self) -> Result<usize, SyncError> {
        self.core().fetch_recent().await
    }

    /// Fetch history older than the oldest known record. Returns records merged;
    /// once the bottom is reached, returns 0 without a network call.
    async fn fetch_older(&self) -> Result<usize, SyncError> {
        self.core().fetch_older().await
    }

    /// Fetch or refresh one transaction and keep polling it until it settles.
    /// Returns the local record after the call.
    async fn get_transaction(&self, id: &str, options: GetTxOptions) -> Result<Option<Transaction>, SyncError>;

    async fn update_balance(&self) -> Result<Amount, SyncError> {
        self.core().update_balance().await
    }

    /// Sign and broadcast. Never retried by this path.
    async fn send_tokens(&self, request: TransferRequest) -> Result<String, SyncError>;

    fn transaction(&self, id: &str) -> Option<Transaction> {
        self.core().transaction(id)
    }

    /// Every cached transaction, newest first.
    fn transactions(&self) -> Vec<Transaction> {
        self.core().sorted()
    }

    fn partner_transactions(&self, partner: &str) -> Vec<Transaction> {
        self.core().partner_transactions(partner)
    }

    fn state(&self) -> ModuleState {
        self.core().view()
    }

    fn snapshot(&self) -> StoreSnapshot {
        self.core().snapshot()
    }

    fn restore(&self, snapshot: StoreSnapshot) {
        self.core().restore(snapshot);
    }
}

/// Collaborators and settings handed to a module by the factory.
#[derive(Clone)]
pub struct ModuleDeps {
    pub rpc: Arc<dyn ChainRpc>,
    pub signer: Arc<dyn Signer>,
    pub clock: Arc<dyn Clock>,
    pub intents: Option<Arc<dyn IntentSink>>,
    pub page_size: u32,
    pub balance_poll: Duration,
    pub max_concurrent_requests: usize,
}

pub(crate) struct CoreState {
    pub store: TransactionStore,
    pub session: Option<Session>,
    pub balance: Option<Amount>,
    pub balance_status: FetchStatus,
    pub recent_loading: bool,
    pub older_loading: bool,
    pub started: bool,
    /// Newest retry loop per transaction id; older loops stop on wake-up.
    /// Settled ids are dropped.
    pub retry_epochs: HashMap<String, u64>,
    pub next_epoch: u64,
}

/// What the shared head of `get_transaction` found.
pub(crate) enum Lookup {
    /// Local copy exists and the call was not forced.
    Cached(Transaction),
    /// The node answered with a record, as reported.
    Found(TransactionUpdate),
    /// The node does not know the id, or a transient failure hid it.
    Missing,
    /// The call failed in a way another poll will not fix.
    Failed(SyncError),
}

pub(crate) type Normalize = fn(TransactionUpdate) -> TransactionUpdate;

/// Per-module context: session, store, timers.
pub struct ModuleCore {
    pub(crate) chain: ChainId,
    pub(crate) rpc: Arc<dyn ChainRpc>,
    pub(crate) signer: Arc<dyn Signer>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) intents: Option<Arc<dyn IntentSink>>,
    pub(crate) scheduler: TaskScheduler,
    pub(crate) page_size: u32,
    pub(crate) balance_poll: Duration,
    pub(crate) normalize: Normalize,
    pub(crate) state: Mutex<CoreState>,
}

/// Resets a loading flag when dropped, even if the fetch was cancelled.
struct LoadingGuard<'a> {
    core: &'a ModuleCore,
    older: bool,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.core.state.lock();
        if self.older {
            state.older_loading = false;
        } else {
            state.recent_loading = false;
        }
    }
}

impl ModuleCore {
    pub(crate) fn new(chain: ChainId, cursor: CursorKind, deps: ModuleDeps, normalize: Normalize) -> Self {
        Self {
            chain,
            rpc: deps.rpc,
            signer: deps.signer,
            clock: deps.clock,
            intents: deps.intents,
            scheduler: TaskScheduler::new(),
            page_size: deps.page_size.max(1),
            balance_poll: deps.balance_poll,
            normalize,
            state: Mutex::new(CoreState {
                store: TransactionStore::new(chain, cursor),
                session: None,
                balance: None,
                balance_status: FetchStatus::Idle,
                recent_loading: false,
                older_loading: false,
                started: false,
                retry_epochs: HashMap::new(),
                next_epoch: 0,
            }),
        }
    }

    pub(crate) fn now(&self) -> Timestamp {
        self.clock.now_ms()
    }

    pub(crate) fn address(&self) -> Option<String> {
        self.state.lock().store.address().map(str::to_string)
    }

    fn require_address(&self) -> Result<String, SyncError> {
        self.address().ok_or(SyncError::NotStarted(self.chain))
    }

    // ==================== Lifecycle ====================

    /// Take the session. Returns false when already started.
    pub(crate) fn begin(&self, session: &Session) -> Result<bool, SyncError> {
        let address = self.signer.derive_address(session, self.chain)?;

        let mut state = self.state.lock();
        if state.started {
            tracing::debug!("{} already started, ignoring start", self.chain);
            return Ok(false);
        }
        match state.store.address() {
            Some(known) if self.chain.same_address(known, &address) => {}
            Some(_) => {
                tracing::info!("{} address changed, dropping cached transactions", self.chain);
                state.store.reset();
                state.store.set_address(Some(address.clone()));
            }
            None => state.store.set_address(Some(address.clone())),
        }
        state.session = Some(session.clone());
        state.started = true;
        tracing::info!("{} module started for {}", self.chain, address);
        Ok(true)
    }

    /// Periodic balance refresh.
    pub(crate) fn schedule_balance_poll(self: &Arc<Self>) {
        let core = Arc::clone(self);
        self.scheduler.schedule_every(self.balance_poll, move || {
            let core = Arc::clone(&core);
            async move {
                if let Err(e) = core.update_balance().await {
                    tracing::warn!("{} balance refresh failed: {}", core.chain, e);
                }
            }
        });
    }

    /// Ids of cached records that still need polling, with their timestamps.
    pub(crate) fn unsettled(&self) -> Vec<(String, Option<Timestamp>)> {
        self.state
            .lock()
            .store
            .sorted()
            .into_iter()
            .filter(|tx| !tx.status.is_settled())
            .map(|tx| (tx.id, tx.timestamp))
            .collect()
    }

    pub(crate) fn stop(&self) {
        self.scheduler.cancel_all();
        let mut state = self.state.lock();
        state.session = None;
        state.started = false;
        state.retry_epochs.clear();
        tracing::info!("{} module stopped", self.chain);
    }

    pub(crate) fn reset(&self) {
        self.stop();
        let mut state = self.state.lock();
        state.store.reset();
        state.store.set_address(None);
        state.balance = None;
        state.balance_status = FetchStatus::Idle;
        tracing::info!("{} module reset", self.chain);
    }

    // ==================== Store access ====================

    pub(crate) fn transaction(&self, id: &str) -> Option<Transaction> {
        self.state.lock().store.get(id).cloned()
    }

    /// Merge one update and return the resulting record. A record that
    /// settles here ends its retry loop.
    pub(crate) fn merge_one(&self, update: TransactionUpdate) -> Option<Transaction> {
        let id = update.id.clone();
        let mut state = self.state.lock();
        state.store.merge([update], MergeOrigin::Update);
        let merged = state.store.get(&id).cloned();
        if merged.as_ref().is_some_and(|t| t.status.is_settled()) {
            state.retry_epochs.remove(&id);
        }
        merged
    }


    pub(crate) fn view(&self) -> ModuleState {
        let state = self.state.lock();
        ModuleState {
            chain: Some(self.chain),
            address: state.store.address().map(str::to_string),
            balance: state.balance,
            balance_status: state.balance_status,
            are_recent_loading: state.recent_loading,
            are_older_loading: state.older_loading,
            bottom_reached: state.store.bottom_reached(),
            transactions_count: state.store.transactions_count(),
            extremes: state.store.extremes(),
            started: state.started,
            polling_count: state.retry_epochs.len(),
        }
    }

    pub(crate) fn sorted(&self) -> Vec<Transaction> {
        self.state.lock().store.sorted()
    }

    pub(crate) fn partner_transactions(&self, partner: &str) -> Vec<Transaction> {
        self.state.lock().store.partner_transactions(partner)
    }

    pub(crate) fn snapshot(&self) -> StoreSnapshot {
        self.state.lock().store.snapshot()
    }

    pub(crate) fn restore(&self, snapshot: StoreSnapshot) {
        self.state.lock().store.restore(snapshot);
    }

    // ==================== Balance ====================

    pub(crate) async fn update_balance(&self) -> Result<Amount, SyncError> {
        let address = self.require_address()?;
        self.state.lock().balance_status = FetchStatus::Loading;

        match self.rpc.get_balance(&address).await {
            Ok(balance) => {
                let mut state = self.state.lock();
                state.balance = Some(balance);
                state.balance_status = FetchStatus::Success;
                Ok(balance)
            }
            Err(e) => {
                self.state.lock().balance_status = FetchStatus::Error;
                Err(e)
            }
        }
    }

    // ==================== History ====================

    pub(crate) async fn fetch_recent(&self) -> Result<usize, SyncError> {
        let address = self.require_address()?;

        let (mut newest, shrunk) = {
            let mut state = self.state.lock();
            if state.recent_loading {
                return Ok(0);
            }
            state.recent_loading = true;
            let shrunk = state.store.reset_window_if_shrunk();
            (state.store.extremes().max, shrunk)
        };
        let _guard = LoadingGuard { core: self, older: false };
        if shrunk {
            newest = None;
        }

        let mut merged = 0;
        loop {
            let request = PageRequest {
                address: address.clone(),
                after: newest,
                before: None,
                order: if newest.is_some() { SortOrder::Asc } else { SortOrder::Desc },
                limit: self.page_size,
            };
            let page = self.rpc.get_transactions_page(&request).await?;
            let count = page.len();
            merged += count;

            let max = {
                let mut state = self.state.lock();
                state
                    .store
                    .merge(page.into_iter().map(self.normalize), MergeOrigin::Page);
                state.store.extremes().max
            };

            tracing::debug!("{} fetched {} recent transactions", self.chain, count);

            // Keep walking forward while ascending pages come back full.
            if request.order == SortOrder::Asc && count as u32 >= self.page_size && max > newest {
                newest = max;
            } else {
                break;
            }
        }
        Ok(merged)
    }

    pub(crate) async fn fetch_older(&self) -> Result<usize, SyncError> {
        let address = self.require_address()?;

        let oldest = {
            let mut state = self.state.lock();
            if state.store.bottom_reached() || state.older_loading {
                return Ok(0);
            }
            state.older_loading = true;
            state.store.extremes().min
        };
        let _guard = LoadingGuard { core: self, older: true };

        let request = PageRequest {
            address,
            after: None,
            before: oldest,
            order: SortOrder::Desc,
            limit: self.page_size,
        };
        let page = self.rpc.get_transactions_page(&request).await?;
        let count = page.len();

        let mut state = self.state.lock();
        if count == 0 {
            tracing::info!("{} reached the bottom of history", self.chain);
            state.store.set_bottom_reached(true);
        } else {
            state
                .store
                .merge(page.into_iter().map(self.normalize), MergeOrigin::Page);
        }
        Ok(count)
    }

    // ==================== Single transaction lifecycle ====================

    /// Cache check, placeholder, and remote lookup through `fetch`.
    /// Transient failures are logged and reported as `Missing`.
    pub(crate) async fn lookup<F, Fut>(&self, id: &str, options: &GetTxOptions, fetch: F) -> Result<Lookup, SyncError>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<Option<TransactionUpdate>, SyncError>>,
    {
        if id.trim().is_empty() {
            return Err(SyncError::InvalidData("empty transaction id".to_string()));
        }

        {
            let mut state = self.state.lock();
            let existing = state.store.get(id).cloned();
            if let Some(tx) = &existing
                && !options.force
            {
                return Ok(Lookup::Cached(tx.clone()));
            }
            if existing.is_none() || options.drop_status {
                let placeholder = TransactionUpdate {
                    id: id.to_string(),
                    timestamp: options
                        .timestamp
                        .or_else(|| existing.as_ref().and_then(|t| t.timestamp))
                        .or(Some(self.now())),
                    amount: options.amount,
                    status: Some(TxStatus::Pending),
                    ..Default::default()
                };
                state.store.merge([placeholder], MergeOrigin::Update);
            }
        }

        match fetch(id.to_string()).await {
            Ok(Some(update)) => Ok(Lookup::Found(update)),
            Ok(None) => {
                tracing::debug!("{} transaction {} not found yet", self.chain, id);
                Ok(Lookup::Missing)
            }
            Err(e) if e.is_transient() => {
                tracing::warn!("{} lookup of {} failed: {}", self.chain, id, e);
                Ok(Lookup::Missing)
            }
            Err(e) => {
                tracing::warn!("{} lookup of {} stopped: {}", self.chain, id, e);
                Ok(Lookup::Failed(e))
            }
        }
    }

    /// Bookkeeping for a lookup that found nothing. Returns the delay before
    /// the next attempt, or marks the record `Rejected` once the pending
    /// budget is spent. A `Registered` record keeps polling on the registered
    /// interval and never spends the budget.
    pub(crate) fn pending_retry(&self, id: &str, options: &GetTxOptions) -> Option<Duration> {
        if options.update_only {
            return None;
        }
        let current = self.transaction(id);
        match &current {
            Some(tx) if tx.status.is_settled() => return None,
            Some(tx) if tx.status == TxStatus::Registered => return Some(self.registered_delay(tx)),
            _ => {}
        }
        let now = self.now();
        let timestamp = current.and_then(|t| t.timestamp).or(options.timestamp);
        let budget = pending_retry_count(timestamp, self.chain, now);

        if options.attempt < budget {
            Some(pending_retry_timeout(timestamp, self.chain, now))
        } else {
            let exhausted = SyncError::RetryExhausted(id.to_string());
            tracing::info!("{} {}, marking rejected", self.chain, exhausted);
            self.merge_one(TransactionUpdate::status(id, TxStatus::Rejected));
            None
        }
    }

    /// Delay before re-polling a record that is accepted but unconfirmed.
    pub(crate) fn registered_delay(&self, tx: &Transaction) -> Duration {
        let fast = self.chain.reports_fast_settlement() && tx.is_instant_send();
        registered_retry_timeout(tx.timestamp, self.chain, fast, self.now())
    }

    /// Schedule `task` as the only live retry loop for `id`.
    pub(crate) fn schedule_retry<F>(self: &Arc<Self>, id: &str, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let epoch = {
            let mut state = self.state.lock();
            if !state.started {
                tracing::debug!("{} stopped, not polling {}", self.chain, id);
                return;
            }
            state.next_epoch += 1;
            let epoch = state.next_epoch;
            state.retry_epochs.insert(id.to_string(), epoch);
            epoch
        };

        let core = Arc::clone(self);
        let id = id.to_string();
        tracing::debug!("{} polling {} again in {:?}", self.chain, id, delay);
        self.scheduler.schedule(delay, async move {
            let current = core.state.lock().retry_epochs.get(&id).copied();
            if current == Some(epoch) {
                task.await;
            }
        });
    }

    // ==================== Sending ====================

    /// Sign, publish the transfer intent if asked, broadcast, and record the
    /// outcome. The caller starts polling the returned id.
    pub(crate) async fn send(&self, request: &TransferRequest, contract: Option<&'static str>) -> Result<String, SyncError> {
        let (from, session) = {
            let state = self.state.lock();
            match (&state.session, state.store.address()) {
                (Some(session), Some(address)) => (address.to_string(), session.clone()),
                _ => return Err(SyncError::NotStarted(self.chain)),
            }
        };

        if !self.signer.is_valid_address(self.chain, &request.to) {
            return Err(SyncError::InvalidAddress(request.to.clone()));
        }
        if request.amount == 0 {
            return Err(SyncError::InvalidData("amount must be positive".to_string()));
        }

        let transfer = UnsignedTransfer {
            chain: self.chain,
            from: from.clone(),
            to: request.to.clone(),
            amount: request.amount,
            contract,
            data: request.comment.clone(),
        };
        let signed = self.signer.sign(&transfer, &session)?;
        drop(session);

        if let Some(partner) = &request.intent_recipient {
            let sink = self
                .intents
                .as_ref()
                .ok_or_else(|| SyncError::IntentRejected("no message transport".to_string()))?;
            let intent = ledgerlink_core::TransferIntent {
                asset: self.chain.symbol().to_string(),
                hash: signed.id.clone(),
                amount: ledgerlink_core::format_amount(request.amount, self.chain.decimals()),
                comment: request.comment.clone(),
            };
            sink.push_transfer_intent(partner, intent)
                .await
                .map_err(|e| SyncError::IntentRejected(e.to_string()))?;
        }

        let now = self.now();
        let record = |id: String, status: TxStatus| TransactionUpdate {
            id,
            sender_id: Some(from.clone()),
            recipient_id: Some(request.to.clone()),
            amount: Some(request.amount),
            timestamp: Some(now),
            status: Some(status),
            data: request.comment.clone(),
            ..Default::default()
        };

        match self.rpc.send_transaction(&signed).await {
            Ok(id) => {
                tracing::info!("{} broadcast {}", self.chain, id);
                self.merge_one(record(id.clone(), TxStatus::Pending));
                Ok(id)
            }
            Err(e) => {
                tracing::warn!("{} broadcast of {} failed: {}", self.chain, signed.id, e);
                self.merge_one(record(signed.id.clone(), TxStatus::Rejected));
                Err(e)
            }
        }
    }
}

/// Normalization for families where inclusion in a block means confirmed.
pub(crate) fn confirmed_when_in_block(mut update: TransactionUpdate) -> TransactionUpdate {
    let in_block = update.height.is_some() || update.confirmations.is_some_and(|c| c > 0);
    let terminal = update.status.is_some_and(|s| s.is_terminal());
    if in_block && !terminal {
        update.status = Some(TxStatus::Confirmed);
    } else if update.status.is_none() || update.status == Some(TxStatus::Pending) {
        update.status = Some(TxStatus::Registered);
    }
    update
}
