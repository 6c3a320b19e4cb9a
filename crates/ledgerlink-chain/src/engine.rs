//! Session-level entry points: one engine owns every chain module, the
//! contact directory, the chat, and the reconciler.

use ledgerlink_core::{AppConfig, ChainId, ChatMessage, Clock, MessageKey, MessageKind, TransferStatus, TxStatus};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use crate::chat_sync::ChatSync;
use crate::contacts::ContactDirectory;
use crate::error::SyncError;
use crate::factory::create_module;
use crate::module::{ChainSync, GetTxOptions, ModuleDeps, TransferRequest};
use crate::ports::{ChainRpc, IntentSink, KeyValueStore, MessageTransport, Session, Signer};
use crate::reconciler::Reconciler;

/// Collaborators for [`SyncEngine::new`]. Chains without an RPC client get no module.
pub struct EngineDeps {
    pub rpcs: HashMap<ChainId, Arc<dyn ChainRpc>>,
    pub kvs: Arc<dyn KeyValueStore>,
    pub signer: Arc<dyn Signer>,
    pub transport: Arc<dyn MessageTransport>,
    pub clock: Arc<dyn Clock>,
    pub config: AppConfig,
}

/// One chat item with its reconciled status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityItem {
    pub message: ChatMessage,
    pub status: TransferStatus,
}

pub struct SyncEngine {
    modules: BTreeMap<ChainId, Arc<dyn ChainSync>>,
    contacts: Arc<ContactDirectory>,
    chat: Arc<ChatSync>,
    reconciler: Reconciler,
    config: AppConfig,
    session: Mutex<Option<Session>>,
}

impl SyncEngine {
    pub fn new(deps: EngineDeps) -> Result<Self, SyncError> {
        let EngineDeps {
            rpcs,
            kvs,
            signer,
            transport,
            clock,
            config,
        } = deps;

        let chat = Arc::new(ChatSync::new(transport, Arc::clone(&clock)));
        let contacts = Arc::new(ContactDirectory::new(kvs, Arc::clone(&clock), config.max_concurrent_requests));
        let intents: Arc<dyn IntentSink> = chat.clone();

        let mut modules = BTreeMap::new();
        for (chain, rpc) in rpcs {
            let module_deps = ModuleDeps {
                rpc,
                signer: Arc::clone(&signer),
                clock: Arc::clone(&clock),
                intents: Some(Arc::clone(&intents)),
                page_size: config.page_size,
                balance_poll: Duration::from_secs(config.balance_poll_secs),
                max_concurrent_requests: config.max_concurrent_requests,
            };
            modules.insert(chain, create_module(chain, module_deps)?);
        }
        tracing::info!("Sync engine ready with {} chain modules", modules.len());

        Ok(Self {
            modules,
            reconciler: Reconciler::new(Arc::clone(&contacts), Arc::clone(&chat), clock),
            contacts,
            chat,
            config,
            session: Mutex::new(None),
        })
    }

    // ==================== Session lifecycle ====================

    /// Fresh login. A different user than the cached one drops all state first.
    pub async fn after_login(&self, session: Session) -> Result<(), SyncError> {
        let previous = self.chat.with_store(|s| s.user_id().to_string());
        if !previous.is_empty() && previous != session.user_id() {
            tracing::info!("User changed, resetting cached state");
            self.reset();
        }
        self.resume(session).await
    }

    /// Session restored without re-authentication. Cached transactions are kept;
    /// modules already running are left alone.
    pub async fn rehydrate(&self, session: Session) -> Result<(), SyncError> {
        self.resume(session).await
    }

    async fn resume(&self, session: Session) -> Result<(), SyncError> {
        self.chat.begin_session(session.user_id());
        self.contacts.start(session.user_id(), self.config.contact_sync);

        for module in self.modules.values() {
            if let Err(e) = module.start(&session).await {
                tracing::warn!("{} failed to start: {}", module.chain(), e);
            }
        }
        *self.session.lock() = Some(session);
        Ok(())
    }

    /// Stop every timer and drop key material, keeping cached state.
    pub fn pause(&self) {
        for module in self.modules.values() {
            module.stop();
        }
        self.contacts.stop();
        self.reconciler.cancel();
        *self.session.lock() = None;
        tracing::info!("Sync engine paused");
    }

    /// Logout: pause, then drop every cache.
    pub fn reset(&self) {
        self.pause();
        for module in self.modules.values() {
            module.reset();
        }
        self.contacts.reset();
        self.chat.reset();
        tracing::info!("Sync engine reset");
    }

    pub fn is_active(&self) -> bool {
        self.session.lock().is_some()
    }

    // ==================== Queries ====================

    pub fn module(&self, chain: ChainId) -> Option<Arc<dyn ChainSync>> {
        self.modules.get(&chain).cloned()
    }

    pub fn chains(&self) -> Vec<ChainId> {
        self.modules.keys().copied().collect()
    }

    pub fn contacts(&self) -> &Arc<ContactDirectory> {
        &self.contacts
    }

    pub fn chat(&self) -> &Arc<ChatSync> {
        &self.chat
    }

    fn module_for(&self, message: &ChatMessage) -> Option<Arc<dyn ChainSync>> {
        let chain = message.transfer()?.chain()?;
        self.module(chain)
    }

    /// Reconciled status of one chat item.
    pub fn item_status(&self, message: &ChatMessage) -> TransferStatus {
        let module = self.module_for(message);
        self.reconciler.status(message, module.as_ref())
    }

    /// The contact's chat, each item with its reconciled status, by time.
    pub fn partner_activity(&self, partner: &str) -> Vec<ActivityItem> {
        let mut items: Vec<ActivityItem> = self
            .chat
            .messages(partner)
            .into_iter()
            .map(|message| {
                let status = self.item_status(&message);
                ActivityItem { message, status }
            })
            .collect();
        items.sort_by_key(|item| item.message.timestamp.unwrap_or(i64::MAX));
        items
    }

    /// Check one transfer intent against its transaction and the bindings.
    pub fn verify_transfer(&self, partner: &str, key: &MessageKey) -> Result<TransferStatus, SyncError> {
        let message = self
            .chat
            .find(partner, key)
            .ok_or_else(|| SyncError::NotFound(key.to_string()))?;
        let status = self.item_status(&message);
        match (status.status, status.inconsistent_reason) {
            (TxStatus::Invalid, Some(reason)) => Err(SyncError::InconsistentTransfer {
                id: message.transfer().map_or_else(|| key.to_string(), |t| t.hash.clone()),
                reason: reason.as_str().to_string(),
            }),
            _ => Ok(status),
        }
    }

    // ==================== Commands ====================

    pub async fn send_message(&self, partner: &str, kind: MessageKind) -> Result<ChatMessage, SyncError> {
        self.chat.send_message(partner, kind).await
    }

    /// Explicit resubmission. For a transfer intent the referenced
    /// transaction goes back to `Pending` and its polling restarts.
    pub async fn resend_message(&self, partner: &str, key: &MessageKey) -> Result<ChatMessage, SyncError> {
        let message = self.chat.resend_message(partner, key).await?;
        if let Some(module) = self.module_for(&message)
            && let Some(intent) = message.transfer()
        {
            let options = GetTxOptions {
                force: true,
                drop_status: true,
                timestamp: message.timestamp,
                ..Default::default()
            };
            module.get_transaction(&intent.hash, options).await?;
        }
        Ok(message)
    }

    pub async fn send_tokens(&self, chain: ChainId, request: TransferRequest) -> Result<String, SyncError> {
        let module = self.module(chain).ok_or(SyncError::NotStarted(chain))?;
        module.send_tokens(request).await
    }

    /// Pull new chat messages and the newest history page of every module.
    pub async fn refresh(&self) -> Result<usize, SyncError> {
        let mut merged = self.chat.fetch_new_messages().await?;
        for module in self.modules.values() {
            match module.fetch_recent().await {
                Ok(count) => merged += count,
                Err(e) => tracing::warn!("{} history refresh failed: {}", module.chain(), e),
            }
        }
        Ok(merged)
    }
}
