//! Outbound ports: the collaborators the engine talks to.
//!
//! Wire formats belong to the implementations. The engine only sees the
//! shapes below, and every failure comes back as a [`SyncError`].

use async_trait::async_trait;
use ledgerlink_core::{
    Amount, ChainId, MessageKind, StoredRecord, Timestamp, TransactionUpdate, TransferIntent,
};
use zeroize::Zeroizing;

use crate::error::SyncError;

/// Authenticated session. The secret is wiped when the last copy is dropped.
#[derive(Clone)]
pub struct Session {
    user_id: String,
    secret: Zeroizing<Vec<u8>>,
}

impl Session {
    pub fn new(user_id: impl Into<String>, secret: Vec<u8>) -> Self {
        Self {
            user_id: user_id.into(),
            secret: Zeroizing::new(secret),
        }
    }

    /// A session that can read but never sign.
    pub fn watch_only(user_id: impl Into<String>) -> Self {
        Self::new(user_id, Vec::new())
    }

    /// Home-chain address of the logged-in user.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn secret(&self) -> &[u8] {
        &self.secret
    }

    pub fn is_watch_only(&self) -> bool {
        self.secret.is_empty()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("secret", &"***")
            .finish()
    }
}

/// Page ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Oldest first, walking forward.
    Asc,
    /// Newest first, walking backward.
    Desc,
}

/// One history page request. Bounds are exclusive and expressed in the
/// module's cursor unit (height or millisecond timestamp).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub address: String,
    pub after: Option<i64>,
    pub before: Option<i64>,
    pub order: SortOrder,
    pub limit: u32,
}

/// Execution receipt of an account-chain transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub success: bool,
    pub block_number: Option<u64>,
    pub gas_used: Option<Amount>,
}

/// Transfer ready to be signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTransfer {
    pub chain: ChainId,
    pub from: String,
    pub to: String,
    pub amount: Amount,
    /// Token contract for token transfers.
    pub contract: Option<&'static str>,
    pub data: Option<String>,
}

/// Signed transaction. The id is known before broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedPayload {
    pub id: String,
    pub raw: Vec<u8>,
}

/// Per-chain node access.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn get_balance(&self, address: &str) -> Result<Amount, SyncError>;

    /// `Ok(None)` when the node does not know the id (yet).
    async fn get_transaction(&self, id: &str) -> Result<Option<TransactionUpdate>, SyncError>;

    async fn get_transactions_page(
        &self,
        request: &PageRequest,
    ) -> Result<Vec<TransactionUpdate>, SyncError>;

    /// Broadcast, returning the id the node assigned.
    async fn send_transaction(&self, payload: &SignedPayload) -> Result<String, SyncError>;

    /// Receipt lookup for chains that confirm in a second step.
    async fn get_receipt(&self, _id: &str) -> Result<Option<Receipt>, SyncError> {
        Ok(None)
    }

    async fn get_block_time(&self, _height: u64) -> Result<Option<Timestamp>, SyncError> {
        Ok(None)
    }
}

/// Home-chain key-value store (address bindings, contact list).
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Records stored under `key` by `owner`, at most `max_records`.
    async fn get_stored(
        &self,
        key: &str,
        owner: &str,
        max_records: u32,
    ) -> Result<Vec<StoredRecord>, SyncError>;

    /// Store a value for the session user. `Ok(false)` when the node refused it.
    async fn store_value(&self, key: &str, value: &str) -> Result<bool, SyncError>;
}

/// Address derivation and signing.
pub trait Signer: Send + Sync {
    fn derive_address(&self, session: &Session, chain: ChainId) -> Result<String, SyncError>;

    fn sign(&self, transfer: &UnsignedTransfer, session: &Session) -> Result<SignedPayload, SyncError>;

    fn is_valid_address(&self, _chain: ChainId, address: &str) -> bool {
        !address.trim().is_empty()
    }
}

/// A message accepted by the home chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub id: String,
    pub timestamp: Option<Timestamp>,
}

/// Home-chain message I/O. Encryption and encoding live behind it.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    async fn send_message(&self, recipient: &str, kind: &MessageKind) -> Result<SentMessage, SyncError>;

    /// Messages to or from `user_id` above `after_height`.
    async fn get_messages(
        &self,
        user_id: &str,
        after_height: u64,
    ) -> Result<Vec<ledgerlink_core::ChatMessage>, SyncError>;
}

/// Where chain modules publish transfer-intent messages before broadcasting.
#[async_trait]
pub trait IntentSink: Send + Sync {
    async fn push_transfer_intent(&self, partner: &str, intent: TransferIntent) -> Result<String, SyncError>;
}
