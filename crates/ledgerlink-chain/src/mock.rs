//! In-memory implementations of the outbound ports, for tests and dry runs.

use async_trait::async_trait;
use ledgerlink_core::{
    Amount, ChainId, ChatMessage, CursorKind, MessageKind, StoredRecord, Timestamp,
    TransactionUpdate,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::SyncError;
use crate::ports::{
    ChainRpc, KeyValueStore, MessageTransport, PageRequest, Receipt, SentMessage, Session,
    SignedPayload, Signer, SortOrder, UnsignedTransfer,
};

#[derive(Default)]
struct RpcData {
    balances: HashMap<String, Amount>,
    /// What `get_transaction` answers.
    known: HashMap<String, TransactionUpdate>,
    /// What history pages are cut from.
    history: Vec<TransactionUpdate>,
    receipts: HashMap<String, Receipt>,
    block_times: HashMap<u64, Timestamp>,
    broadcast: Vec<SignedPayload>,
    pages: Vec<PageRequest>,
}

/// Scriptable chain node.
pub struct MockRpc {
    cursor: CursorKind,
    data: Mutex<RpcData>,
    latency: Mutex<Duration>,
    /// Every call fails with a network error.
    pub fail: AtomicBool,
    /// `send_transaction` fails with a network error.
    pub fail_send: AtomicBool,
    pub balance_calls: AtomicUsize,
    pub transaction_calls: AtomicUsize,
    pub page_calls: AtomicUsize,
    pub receipt_calls: AtomicUsize,
    pub block_calls: AtomicUsize,
}

impl MockRpc {
    pub fn new(cursor: CursorKind) -> Self {
        Self {
            cursor,
            data: Mutex::new(RpcData::default()),
            latency: Mutex::new(Duration::ZERO),
            fail: AtomicBool::new(false),
            fail_send: AtomicBool::new(false),
            balance_calls: AtomicUsize::new(0),
            transaction_calls: AtomicUsize::new(0),
            page_calls: AtomicUsize::new(0),
            receipt_calls: AtomicUsize::new(0),
            block_calls: AtomicUsize::new(0),
        }
    }

    /// Delay every answer, so concurrent callers overlap.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_balance(&self, address: &str, balance: Amount) {
        self.data.lock().balances.insert(address.to_string(), balance);
    }

    /// Make a transaction visible to `get_transaction`.
    pub fn put_transaction(&self, update: TransactionUpdate) {
        self.data.lock().known.insert(update.id.clone(), update);
    }

    pub fn remove_transaction(&self, id: &str) {
        self.data.lock().known.remove(id);
    }

    /// Add a transaction to the address history (and make it visible).
    pub fn push_history(&self, update: TransactionUpdate) {
        let mut data = self.data.lock();
        data.known.insert(update.id.clone(), update.clone());
        data.history.push(update);
    }

    pub fn put_receipt(&self, id: &str, receipt: Receipt) {
        self.data.lock().receipts.insert(id.to_string(), receipt);
    }

    pub fn put_block_time(&self, height: u64, timestamp: Timestamp) {
        self.data.lock().block_times.insert(height, timestamp);
    }

    pub fn broadcast(&self) -> Vec<SignedPayload> {
        self.data.lock().broadcast.clone()
    }

    /// Page requests received so far.
    pub fn page_requests(&self) -> Vec<PageRequest> {
        self.data.lock().pages.clone()
    }

    fn cursor_of(&self, tx: &TransactionUpdate) -> Option<i64> {
        match self.cursor {
            CursorKind::Height => tx.height.and_then(|h| i64::try_from(h).ok()),
            CursorKind::Timestamp => tx.timestamp,
        }
    }

    async fn answer(&self) -> Result<(), SyncError> {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(SyncError::Network("mock failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainRpc for MockRpc {
    async fn get_balance(&self, address: &str) -> Result<Amount, SyncError> {
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
        self.answer().await?;
        self.data
            .lock()
            .balances
            .get(address)
            .copied()
            .ok_or_else(|| SyncError::AccountNotFound(address.to_string()))
    }

    async fn get_transaction(&self, id: &str) -> Result<Option<TransactionUpdate>, SyncError> {
        self.transaction_calls.fetch_add(1, Ordering::SeqCst);
        self.answer().await?;
        Ok(self.data.lock().known.get(id).cloned())
    }

    async fn get_transactions_page(
        &self,
        request: &PageRequest,
    ) -> Result<Vec<TransactionUpdate>, SyncError> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        self.data.lock().pages.push(request.clone());
        self.answer().await?;

        let data = self.data.lock();
        let mut page: Vec<(i64, TransactionUpdate)> = data
            .history
            .iter()
            .filter_map(|tx| self.cursor_of(tx).map(|c| (c, tx.clone())))
            .filter(|(c, _)| request.after.is_none_or(|a| *c > a))
            .filter(|(c, _)| request.before.is_none_or(|b| *c < b))
            .collect();
        match request.order {
            SortOrder::Asc => page.sort_by_key(|(c, _)| *c),
            SortOrder::Desc => page.sort_by_key(|(c, _)| std::cmp::Reverse(*c)),
        }
        Ok(page
            .into_iter()
            .take(request.limit as usize)
            .map(|(_, tx)| tx)
            .collect())
    }

    async fn send_transaction(&self, payload: &SignedPayload) -> Result<String, SyncError> {
        self.answer().await?;
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(SyncError::Network("broadcast refused".to_string()));
        }
        self.data.lock().broadcast.push(payload.clone());
        Ok(payload.id.clone())
    }

    async fn get_receipt(&self, id: &str) -> Result<Option<Receipt>, SyncError> {
        self.receipt_calls.fetch_add(1, Ordering::SeqCst);
        self.answer().await?;
        Ok(self.data.lock().receipts.get(id).cloned())
    }

    async fn get_block_time(&self, height: u64) -> Result<Option<Timestamp>, SyncError> {
        self.block_calls.fetch_add(1, Ordering::SeqCst);
        self.answer().await?;
        Ok(self.data.lock().block_times.get(&height).copied())
    }
}

/// Key-value store keyed by `(key, owner)`.
#[derive(Default)]
pub struct MockKeyValueStore {
    records: Mutex<HashMap<(String, String), Vec<StoredRecord>>>,
    owner: Mutex<String>,
    pub fail: AtomicBool,
    /// `store_value` answers `Ok(false)`.
    pub refuse_store: AtomicBool,
    pub get_calls: AtomicUsize,
    pub store_calls: AtomicUsize,
}

impl MockKeyValueStore {
    pub fn new(owner: &str) -> Self {
        let store = Self::default();
        *store.owner.lock() = owner.to_string();
        store
    }

    pub fn put(&self, key: &str, owner: &str, value: &str, timestamp: Timestamp) {
        self.records
            .lock()
            .entry((key.to_string(), owner.to_string()))
            .or_default()
            .push(StoredRecord {
                value: value.to_string(),
                timestamp: Some(timestamp),
            });
    }

    /// Newest value stored under `key` by `owner`.
    pub fn latest(&self, key: &str, owner: &str) -> Option<String> {
        self.records
            .lock()
            .get(&(key.to_string(), owner.to_string()))?
            .iter()
            .max_by_key(|r| r.timestamp.unwrap_or(0))
            .map(|r| r.value.clone())
    }
}

#[async_trait]
impl KeyValueStore for MockKeyValueStore {
    async fn get_stored(
        &self,
        key: &str,
        owner: &str,
        max_records: u32,
    ) -> Result<Vec<StoredRecord>, SyncError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(SyncError::Network("mock failure".to_string()));
        }
        let mut records = self
            .records
            .lock()
            .get(&(key.to_string(), owner.to_string()))
            .cloned()
            .unwrap_or_default();
        records.sort_by_key(|r| std::cmp::Reverse(r.timestamp.unwrap_or(0)));
        records.truncate(max_records as usize);
        Ok(records)
    }

    async fn store_value(&self, key: &str, value: &str) -> Result<bool, SyncError> {
        self.store_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(SyncError::Network("mock failure".to_string()));
        }
        if self.refuse_store.load(Ordering::SeqCst) {
            return Ok(false);
        }
        let owner = self.owner.lock().clone();
        let next = self
            .records
            .lock()
            .get(&(key.to_string(), owner.clone()))
            .map_or(1, |r| r.len() as i64 + 1);
        self.put(key, &owner, value, next);
        Ok(true)
    }
}

/// Deterministic signer: addresses are `<symbol>-<user>` (the user id itself
/// on the home chain), ids are an FNV digest of the transfer fields.
#[derive(Default)]
pub struct MockSigner {
    addresses: Mutex<HashMap<ChainId, String>>,
    pub fail: AtomicBool,
    nonce: AtomicU64,
}

impl MockSigner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fix the address derived for a chain.
    pub fn set_address(&self, chain: ChainId, address: &str) {
        self.addresses.lock().insert(chain, address.to_string());
    }
}

impl Signer for MockSigner {
    fn derive_address(&self, session: &Session, chain: ChainId) -> Result<String, SyncError> {
        if let Some(address) = self.addresses.lock().get(&chain.binding_chain()) {
            return Ok(address.clone());
        }
        Ok(match chain.binding_chain() {
            ChainId::Adm => session.user_id().to_string(),
            other => format!("{}-{}", other.symbol().to_lowercase(), session.user_id()),
        })
    }

    fn sign(&self, transfer: &UnsignedTransfer, session: &Session) -> Result<SignedPayload, SyncError> {
        if session.is_watch_only() {
            return Err(SyncError::Signing("watch-only session".to_string()));
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(SyncError::Signing("mock signer failure".to_string()));
        }
        let nonce = self.nonce.fetch_add(1, Ordering::SeqCst);
        let raw = format!(
            "{}|{}|{}|{}|{}",
            transfer.chain, transfer.from, transfer.to, transfer.amount, nonce
        )
        .into_bytes();
        let digest: u64 = raw
            .iter()
            .fold(0xcbf2_9ce4_8422_2325, |h, b| (h ^ u64::from(*b)).wrapping_mul(0x0100_0000_01b3));
        let id = match transfer.chain.family() {
            ledgerlink_core::ChainFamily::Account | ledgerlink_core::ChainFamily::Token => {
                format!("0x{}", hex::encode(digest.to_be_bytes()))
            }
            _ => hex::encode(digest.to_be_bytes()),
        };
        Ok(SignedPayload { id, raw })
    }
}

/// Home-chain message transport that assigns sequential ids.
#[derive(Default)]
pub struct MockTransport {
    sent: Mutex<Vec<(String, MessageKind)>>,
    inbox: Mutex<Vec<ChatMessage>>,
    next_id: AtomicU64,
    pub fail: AtomicBool,
    pub send_calls: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1000),
            ..Default::default()
        }
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<(String, MessageKind)> {
        self.sent.lock().clone()
    }

    /// Queue a message for `get_messages`.
    pub fn deliver(&self, message: ChatMessage) {
        self.inbox.lock().push(message);
    }
}

#[async_trait]
impl MessageTransport for MockTransport {
    async fn send_message(&self, recipient: &str, kind: &MessageKind) -> Result<SentMessage, SyncError> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(SyncError::Network("mock transport failure".to_string()));
        }
        self.sent.lock().push((recipient.to_string(), kind.clone()));
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(SentMessage {
            id: id.to_string(),
            timestamp: None,
        })
    }

    async fn get_messages(&self, user_id: &str, after_height: u64) -> Result<Vec<ChatMessage>, SyncError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SyncError::Network("mock transport failure".to_string()));
        }
        Ok(self
            .inbox
            .lock()
            .iter()
            .filter(|m| m.sender_id == user_id || m.recipient_id == user_id)
            .filter(|m| m.height.is_none_or(|h| h > after_height))
            .cloned()
            .collect())
    }
}
