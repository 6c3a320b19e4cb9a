//! Home-chain chat: sending with optimistic local records, explicit resend,
//! and polling for new messages.

use async_trait::async_trait;
use ledgerlink_core::{ChainId, ChatMessage, ChatStore, Clock, MessageKey, MessageKind, TransferIntent, TxStatus};
use parking_lot::Mutex;
use std::sync::Arc;

use crate::error::SyncError;
use crate::ports::{IntentSink, MessageTransport};

pub struct ChatSync {
    transport: Arc<dyn MessageTransport>,
    clock: Arc<dyn Clock>,
    store: Mutex<ChatStore>,
}

impl ChatSync {
    pub fn new(transport: Arc<dyn MessageTransport>, clock: Arc<dyn Clock>) -> Self {
        Self {
            transport,
            clock,
            store: Mutex::new(ChatStore::new("")),
        }
    }

    /// Attach to `user_id`. Chats of a different previous user are dropped.
    pub fn begin_session(&self, user_id: &str) {
        let mut store = self.store.lock();
        if store.user_id() != user_id {
            *store = ChatStore::new(user_id);
        }
    }

    pub fn reset(&self) {
        *self.store.lock() = ChatStore::new("");
    }

    fn require_user(&self) -> Result<String, SyncError> {
        let store = self.store.lock();
        if store.user_id().is_empty() {
            return Err(SyncError::NotStarted(ChainId::Adm));
        }
        Ok(store.user_id().to_string())
    }

    pub fn with_store<R>(&self, f: impl FnOnce(&ChatStore) -> R) -> R {
        f(&self.store.lock())
    }

    /// Messages with `partner`, oldest first.
    pub fn messages(&self, partner: &str) -> Vec<ChatMessage> {
        self.store.lock().messages(partner).into_iter().cloned().collect()
    }

    pub fn find(&self, partner: &str, key: &MessageKey) -> Option<ChatMessage> {
        self.store.lock().find(partner, key).cloned()
    }

    pub fn set_status(&self, partner: &str, key: &MessageKey, status: TxStatus) -> bool {
        self.store.lock().update_message(partner, key, None, Some(status))
    }

    /// Record locally as `Pending`, then hand to the transport. The record
    /// ends `Registered` under its real id, or `Rejected`.
    pub async fn send_message(&self, recipient: &str, kind: MessageKind) -> Result<ChatMessage, SyncError> {
        self.require_user()?;
        let now = self.clock.now_ms();
        let key = {
            let mut store = self.store.lock();
            let message = store.create_local(recipient, kind.clone(), now);
            let key = message.key();
            store.push_message(message);
            key
        };
        self.deliver(recipient, key, &kind).await
    }

    /// Explicit resubmission of a rejected message.
    pub async fn resend_message(&self, partner: &str, key: &MessageKey) -> Result<ChatMessage, SyncError> {
        let kind = {
            let mut store = self.store.lock();
            let message = store
                .find(partner, key)
                .ok_or_else(|| SyncError::NotFound(key.to_string()))?;
            if message.status != TxStatus::Rejected {
                return Err(SyncError::InvalidData(format!(
                    "message {} is {}, only rejected messages are resent",
                    key,
                    message.status.label()
                )));
            }
            let kind = message.kind.clone();
            store.update_message(partner, key, None, Some(TxStatus::Pending));
            kind
        };
        tracing::info!("Resending message {} to {}", key, partner);
        self.deliver(partner, key.clone(), &kind).await
    }

    async fn deliver(&self, recipient: &str, key: MessageKey, kind: &MessageKind) -> Result<ChatMessage, SyncError> {
        match self.transport.send_message(recipient, kind).await {
            Ok(sent) => {
                let mut store = self.store.lock();
                store.update_message(recipient, &key, Some(sent.id.clone()), Some(TxStatus::Registered));
                tracing::debug!("Message {} to {} accepted as {}", key, recipient, sent.id);
                store
                    .find(recipient, &MessageKey::Real(sent.id.clone()))
                    .cloned()
                    .ok_or(SyncError::NotFound(sent.id))
            }
            Err(e) => {
                tracing::warn!("Message {} to {} failed: {}", key, recipient, e);
                self.store
                    .lock()
                    .update_message(recipient, &key, None, Some(TxStatus::Rejected));
                Err(e)
            }
        }
    }

    /// Pull messages above the last seen height. Returns how many were new.
    pub async fn fetch_new_messages(&self) -> Result<usize, SyncError> {
        let user = self.require_user()?;
        let after = self.store.lock().last_message_height();
        let messages = self.transport.get_messages(&user, after).await?;

        let mut store = self.store.lock();
        let mut inserted = 0;
        let mut highest = after;
        for message in messages {
            highest = highest.max(message.height.unwrap_or(0));
            if store.push_message(message) {
                inserted += 1;
            }
        }
        store.set_last_message_height(highest);
        if inserted > 0 {
            tracing::debug!("Received {} new messages", inserted);
        }
        Ok(inserted)
    }
}

#[async_trait]
impl IntentSink for ChatSync {
    async fn push_transfer_intent(&self, partner: &str, intent: TransferIntent) -> Result<String, SyncError> {
        let message = self.send_message(partner, MessageKind::Transfer(intent)).await?;
        Ok(message.key().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;
    use ledgerlink_core::ManualClock;

    fn chat() -> (ChatSync, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::new());
        let chat = ChatSync::new(transport.clone(), Arc::new(ManualClock::new(1_000)));
        chat.begin_session("U1");
        (chat, transport)
    }

    fn text(s: &str) -> MessageKind {
        MessageKind::Text {
            text: s.into(),
            reply_to: None,
        }
    }

    #[tokio::test]
    async fn test_send_assigns_real_id() {
        let (chat, transport) = chat();
        let message = chat.send_message("U2", text("hi")).await.unwrap();
        assert_eq!(message.real_id.as_deref(), Some("1000"));
        assert_eq!(message.status, TxStatus::Registered);
        // The provisional key is retired once the real one is known.
        assert!(chat.find("U2", &MessageKey::Local(message.local_id)).is_none());
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_send_can_be_resent() {
        let (chat, transport) = chat();
        transport.set_fail(true);
        assert!(chat.send_message("U2", text("hi")).await.is_err());

        let rejected = chat.messages("U2").remove(0);
        assert_eq!(rejected.status, TxStatus::Rejected);
        let key = rejected.key();

        transport.set_fail(false);
        let resent = chat.resend_message("U2", &key).await.unwrap();
        assert_eq!(resent.status, TxStatus::Registered);
        assert_eq!(chat.messages("U2").len(), 1);

        let again = chat.resend_message("U2", &resent.key()).await;
        assert!(matches!(again, Err(SyncError::InvalidData(_))));
    }

    #[tokio::test]
    async fn test_fetch_new_messages_advances_height() {
        let (chat, transport) = chat();
        let mut incoming = ChatMessage::remote("7", "U2", "U1", text("yo"));
        incoming.height = Some(10);
        transport.deliver(incoming.clone());

        assert_eq!(chat.fetch_new_messages().await.unwrap(), 1);
        assert_eq!(chat.with_store(|s| s.last_message_height()), 10);
        assert_eq!(chat.fetch_new_messages().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_requires_session() {
        let chat = ChatSync::new(Arc::new(MockTransport::new()), Arc::new(ManualClock::new(0)));
        assert!(matches!(
            chat.send_message("U2", text("x")).await,
            Err(SyncError::NotStarted(ChainId::Adm))
        ));
    }
}
