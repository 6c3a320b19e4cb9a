//! Home chain (ADM) module.
//!
//! The node answers with height and confirmations in one call, so a record
//! is `Confirmed` as soon as it is in a block.

use async_trait::async_trait;
use ledgerlink_core::{ChainId, CursorKind, Transaction};
use std::sync::Arc;

use crate::chains::{one_step_get, start_module};
use crate::error::SyncError;
use crate::module::{ChainSync, GetTxOptions, ModuleCore, ModuleDeps, TransferRequest, confirmed_when_in_block};
use crate::ports::Session;

#[derive(Clone)]
pub struct HomeModule {
    core: Arc<ModuleCore>,
}

impl HomeModule {
    pub fn new(deps: ModuleDeps) -> Self {
        Self {
            core: Arc::new(ModuleCore::new(ChainId::Adm, CursorKind::Height, deps, confirmed_when_in_block)),
        }
    }
}

#[async_trait]
impl ChainSync for HomeModule {
    fn core(&self) -> &ModuleCore {
        &self.core
    }

    async fn start(&self, session: &Session) -> Result<(), SyncError> {
        start_module(self, &self.core, session).await
    }

    async fn get_transaction(&self, id: &str, options: GetTxOptions) -> Result<Option<Transaction>, SyncError> {
        one_step_get(self, &self.core, id, options).await
    }

    async fn send_tokens(&self, mut request: TransferRequest) -> Result<String, SyncError> {
        // A native transfer already carries its comment; no separate intent message.
        request.intent_recipient = None;
        let id = self.core.send(&request, None).await?;
        self.get_transaction(&id, GetTxOptions::forced()).await?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockRpc, MockSigner};
    use ledgerlink_core::{Direction, ManualClock, TransactionUpdate, TxStatus};
    use std::time::Duration;

    fn deps(rpc: Arc<MockRpc>) -> ModuleDeps {
        ModuleDeps {
            rpc,
            signer: Arc::new(MockSigner::new()),
            clock: Arc::new(ManualClock::new(1_700_000_000_000)),
            intents: None,
            page_size: 25,
            balance_poll: Duration::from_secs(60),
            max_concurrent_requests: 4,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetched_transaction_in_block_is_confirmed() {
        let rpc = Arc::new(MockRpc::new(CursorKind::Height));
        rpc.set_balance("U1", 5);
        rpc.put_transaction(TransactionUpdate {
            id: "100".into(),
            sender_id: Some("U2".into()),
            recipient_id: Some("U1".into()),
            amount: Some(10),
            height: Some(42),
            ..Default::default()
        });

        let module = HomeModule::new(deps(rpc.clone()));
        module.start(&Session::watch_only("U1")).await.unwrap();

        let tx = module
            .get_transaction("100", GetTxOptions::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tx.status, TxStatus::Confirmed);
        assert_eq!(tx.direction, Some(Direction::To));
        assert_eq!(tx.partner.as_deref(), Some("U2"));
        module.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_is_a_no_op() {
        let rpc = Arc::new(MockRpc::new(CursorKind::Height));
        rpc.set_balance("U1", 5);
        let module = HomeModule::new(deps(rpc.clone()));
        let session = Session::watch_only("U1");

        module.start(&session).await.unwrap();
        module.start(&session).await.unwrap();
        assert_eq!(rpc.balance_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(module.state().balance, Some(5));
        module.stop();
    }
}
