//! UTXO family (BTC, DOGE, DASH).
//!
//! Confirmation is reported with the transaction itself. DASH additionally
//! reports InstantSend locks, which shorten the registered-phase polling
//! interval.

use async_trait::async_trait;
use ledgerlink_core::{ChainFamily, ChainId, CursorKind, Transaction};
use std::sync::Arc;

use crate::chains::{one_step_get, start_module};
use crate::error::SyncError;
use crate::module::{ChainSync, GetTxOptions, ModuleCore, ModuleDeps, TransferRequest, confirmed_when_in_block};
use crate::ports::Session;

#[derive(Clone)]
pub struct UtxoModule {
    core: Arc<ModuleCore>,
}

impl UtxoModule {
    pub fn new(chain: ChainId, deps: ModuleDeps) -> Result<Self, SyncError> {
        if chain.family() != ChainFamily::Utxo {
            return Err(SyncError::InvalidData(format!("{} is not a UTXO chain", chain)));
        }
        Ok(Self {
            core: Arc::new(ModuleCore::new(chain, CursorKind::Height, deps, confirmed_when_in_block)),
        })
    }
}

#[async_trait]
impl ChainSync for UtxoModule {
    fn core(&self) -> &ModuleCore {
        &self.core
    }

    async fn start(&self, session: &Session) -> Result<(), SyncError> {
        start_module(self, &self.core, session).await
    }

    async fn get_transaction(&self, id: &str, options: GetTxOptions) -> Result<Option<Transaction>, SyncError> {
        one_step_get(self, &self.core, id, options).await
    }

    async fn send_tokens(&self, request: TransferRequest) -> Result<String, SyncError> {
        let id = self.core.send(&request, None).await?;
        self.get_transaction(&id, GetTxOptions::forced()).await?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockRpc, MockSigner};
    use ledgerlink_core::{ManualClock, TransactionUpdate, TxStatus};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn module(chain: ChainId, rpc: Arc<MockRpc>) -> UtxoModule {
        let deps = ModuleDeps {
            rpc,
            signer: Arc::new(MockSigner::new()),
            clock: Arc::new(ManualClock::new(1_700_000_000_000)),
            intents: None,
            page_size: 25,
            balance_poll: Duration::from_secs(600),
            max_concurrent_requests: 4,
        };
        UtxoModule::new(chain, deps).unwrap()
    }

    #[test]
    fn test_rejects_non_utxo_chain() {
        let rpc = Arc::new(MockRpc::new(CursorKind::Height));
        let deps = ModuleDeps {
            rpc,
            signer: Arc::new(MockSigner::new()),
            clock: Arc::new(ManualClock::new(0)),
            intents: None,
            page_size: 25,
            balance_poll: Duration::from_secs(60),
            max_concurrent_requests: 4,
        };
        assert!(UtxoModule::new(ChainId::Eth, deps).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_instant_send_polls_on_fast_interval() {
        let rpc = Arc::new(MockRpc::new(CursorKind::Height));
        rpc.set_balance("dash-U1", 0);
        rpc.put_transaction(TransactionUpdate {
            id: "ab".into(),
            instant_send: Some(true),
            ..Default::default()
        });
        let dash = module(ChainId::Dash, rpc.clone());
        dash.start(&Session::watch_only("U1")).await.unwrap();

        let tx = dash.get_transaction("ab", GetTxOptions::default()).await.unwrap().unwrap();
        assert_eq!(tx.status, TxStatus::Registered);
        assert_eq!(dash.state().polling_count, 1);

        rpc.put_transaction(TransactionUpdate {
            id: "ab".into(),
            height: Some(900),
            ..Default::default()
        });
        // The fast interval is 5 s; the regular one 30 s.
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(dash.transaction("ab").unwrap().status, TxStatus::Confirmed);
        assert_eq!(rpc.transaction_calls.load(Ordering::SeqCst), 2);
        assert_eq!(dash.state().polling_count, 0);
        dash.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_records_pending_and_broadcasts_once() {
        let rpc = Arc::new(MockRpc::new(CursorKind::Height));
        rpc.set_balance("btc-U1", 1_000);
        let btc = module(ChainId::Btc, rpc.clone());
        btc.start(&Session::new("U1", vec![1, 2, 3])).await.unwrap();

        let id = btc
            .send_tokens(TransferRequest {
                to: "btc-U2".into(),
                amount: 500,
                ..Default::default()
            })
            .await
            .unwrap();

        let tx = btc.transaction(&id).unwrap();
        assert_eq!(tx.status, TxStatus::Pending);
        assert_eq!(tx.amount, Some(500));
        assert_eq!(rpc.broadcast().len(), 1);
        btc.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_broadcast_failure_records_rejected() {
        let rpc = Arc::new(MockRpc::new(CursorKind::Height));
        rpc.set_balance("doge-U1", 1_000);
        rpc.fail_send.store(true, Ordering::SeqCst);
        let doge = module(ChainId::Doge, rpc.clone());
        doge.start(&Session::new("U1", vec![1])).await.unwrap();

        let result = doge
            .send_tokens(TransferRequest {
                to: "doge-U2".into(),
                amount: 1,
                ..Default::default()
            })
            .await;
        assert!(matches!(result, Err(SyncError::Network(_))));

        let rejected: Vec<_> = doge
            .transactions()
            .into_iter()
            .filter(|t| t.status == TxStatus::Rejected)
            .collect();
        assert_eq!(rejected.len(), 1);
        assert!(rpc.broadcast().is_empty());
        doge.stop();
    }
}
