//! Reconciliation with side effects: gathers what the pure [`reconcile`]
//! needs, kicks off fetches for whatever is missing, and persists `Invalid`
//! onto the message once a transfer fails its consistency check.

use ledgerlink_core::{
    AddressBinding, ChainId, ChatMessage, Clock, ReconcileInput, TransferStatus, TxStatus, reconcile,
};
use std::sync::Arc;

use crate::chat_sync::ChatSync;
use crate::contacts::ContactDirectory;
use crate::module::{ChainSync, GetTxOptions};
use crate::scheduler::TaskScheduler;

pub struct Reconciler {
    contacts: Arc<ContactDirectory>,
    chat: Arc<ChatSync>,
    clock: Arc<dyn Clock>,
    scheduler: TaskScheduler,
}

impl Reconciler {
    pub fn new(contacts: Arc<ContactDirectory>, chat: Arc<ChatSync>, clock: Arc<dyn Clock>) -> Self {
        Self {
            contacts,
            chat,
            clock,
            scheduler: TaskScheduler::new(),
        }
    }

    /// Drop fetches still in flight.
    pub fn cancel(&self) {
        self.scheduler.cancel_all();
    }

    /// Binding for one party: the local module address for the user, the
    /// contact directory for anyone else.
    fn binding_for(&self, party: &str, user: &str, chain: ChainId, module: &dyn ChainSync) -> Option<AddressBinding> {
        if party == user {
            return module.state().address.map(|address| AddressBinding {
                address,
                verify_timestamp: self.clock.now_ms(),
                inconsistent: Vec::new(),
            });
        }
        self.contacts.valid_binding(party, chain)
    }

    /// Status of one chat item. `module` is the module of the asset the item
    /// refers to, if any. Never waits on the network.
    pub fn status(&self, message: &ChatMessage, module: Option<&Arc<dyn ChainSync>>) -> TransferStatus {
        let now = self.clock.now_ms();
        let Some(intent) = message.transfer() else {
            return reconcile(&ReconcileInput {
                message: Some(message),
                now,
                ..Default::default()
            });
        };
        let (Some(chain), Some(module)) = (intent.chain(), module) else {
            return reconcile(&ReconcileInput {
                message: Some(message),
                now,
                ..Default::default()
            });
        };

        let user = self.chat.with_store(|s| s.user_id().to_string());
        let transaction = module.transaction(&intent.hash);
        let sender = self.binding_for(&message.sender_id, &user, chain, module.as_ref());
        let recipient = self.binding_for(&message.recipient_id, &user, chain, module.as_ref());

        let status = reconcile(&ReconcileInput {
            message: Some(message),
            transaction: transaction.as_ref(),
            sender_binding: sender.as_ref(),
            recipient_binding: recipient.as_ref(),
            now,
        });

        if status.missing.transaction && transaction.is_none() {
            let module = Arc::clone(module);
            let hash = intent.hash.clone();
            let options = GetTxOptions {
                timestamp: message.timestamp,
                ..Default::default()
            };
            self.scheduler.spawn(async move {
                if let Err(e) = module.get_transaction(&hash, options).await {
                    tracing::warn!("{} fetch of {} failed: {}", module.chain(), hash, e);
                }
            });
        }
        if chain != ChainId::Adm {
            for (party, missing) in [
                (&message.sender_id, status.missing.sender_binding),
                (&message.recipient_id, status.missing.recipient_binding),
            ] {
                if missing && *party != user {
                    let contacts = Arc::clone(&self.contacts);
                    let party = party.clone();
                    self.scheduler.spawn(async move {
                        contacts.fetch_address(&party, chain).await;
                    });
                }
            }
        }

        if status.status == TxStatus::Invalid && message.status != TxStatus::Invalid {
            if let Some(reason) = &status.inconsistent_reason {
                tracing::warn!("Transfer {} is inconsistent: {}", intent.hash, reason);
            }
            let partner = message.partner(&user);
            self.chat.set_status(partner, &message.key(), TxStatus::Invalid);
        }

        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockKeyValueStore, MockRpc, MockSigner, MockTransport};
    use crate::module::ModuleDeps;
    use crate::ports::Session;
    use ledgerlink_core::{CursorKind, ManualClock, MessageKind, TransactionUpdate, TransferIntent};
    use std::time::Duration;

    const NOW: i64 = 1_700_000_000_000;

    #[tokio::test(start_paused = true)]
    async fn test_text_message_needs_no_module() {
        let clock = Arc::new(ManualClock::new(NOW));
        let contacts = Arc::new(ContactDirectory::new(Arc::new(MockKeyValueStore::new("U1")), clock.clone(), 2));
        let chat = Arc::new(ChatSync::new(Arc::new(MockTransport::new()), clock.clone()));
        chat.begin_session("U1");
        let reconciler = Reconciler::new(contacts, chat, clock);

        let message = ChatMessage::remote(
            "5",
            "U2",
            "U1",
            MessageKind::Text {
                text: "hi".into(),
                reply_to: None,
            },
        );
        let status = reconciler.status(&message, None);
        assert_eq!(status.status, TxStatus::Registered);
        assert_eq!(status.virtual_status, TxStatus::Confirmed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_data_is_fetched_in_background() {
        let clock = Arc::new(ManualClock::new(NOW));
        let kvs = Arc::new(MockKeyValueStore::new("U1"));
        kvs.put("btc:address", "U2", "btc-U2", NOW);
        let contacts = Arc::new(ContactDirectory::new(kvs.clone(), clock.clone(), 2));
        let chat = Arc::new(ChatSync::new(Arc::new(MockTransport::new()), clock.clone()));
        chat.begin_session("U1");

        let rpc = Arc::new(MockRpc::new(CursorKind::Height));
        rpc.set_balance("btc-U1", 0);
        rpc.put_transaction(TransactionUpdate {
            id: "ff".into(),
            sender_id: Some("btc-U2".into()),
            recipient_id: Some("btc-U1".into()),
            amount: Some(150_000_000),
            height: Some(10),
            timestamp: Some(NOW),
            ..Default::default()
        });
        let deps = ModuleDeps {
            rpc,
            signer: Arc::new(MockSigner::new()),
            clock: clock.clone(),
            intents: None,
            page_size: 25,
            balance_poll: Duration::from_secs(600),
            max_concurrent_requests: 2,
        };
        let module: Arc<dyn ChainSync> = Arc::new(crate::chains::UtxoModule::new(ChainId::Btc, deps).unwrap());
        module.start(&Session::watch_only("U1")).await.unwrap();

        let mut message = ChatMessage::remote(
            "9",
            "U2",
            "U1",
            MessageKind::Transfer(TransferIntent {
                asset: "BTC".into(),
                hash: "ff".into(),
                amount: "1.5".into(),
                comment: None,
            }),
        );
        message.timestamp = Some(NOW);

        let reconciler = Reconciler::new(contacts, chat, clock);
        let first = reconciler.status(&message, Some(&module));
        assert_eq!(first.status, TxStatus::Pending);
        assert!(first.missing.transaction);
        assert!(first.missing.sender_binding);

        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = reconciler.status(&message, Some(&module));
        assert_eq!(second.status, TxStatus::Confirmed);
        assert_eq!(second.inconsistent_reason, None);
        module.stop();
    }
}
