//! Tokens carried by the account chain (USDT, USDC, DAI).
//!
//! Same protocol as the carrier chain; transfers name the token contract and
//! the address is the carrier's.

use async_trait::async_trait;
use ledgerlink_core::{ChainFamily, ChainId, Transaction};

use crate::chains::account::{AccountModule, ConfirmationStage};
use crate::error::SyncError;
use crate::module::{ChainSync, GetTxOptions, ModuleCore, ModuleDeps, TransferRequest};
use crate::ports::Session;

#[derive(Clone)]
pub struct TokenModule {
    inner: AccountModule,
}

impl TokenModule {
    pub fn new(chain: ChainId, deps: ModuleDeps) -> Result<Self, SyncError> {
        if chain.family() != ChainFamily::Token {
            return Err(SyncError::InvalidData(format!("{} is not a token", chain)));
        }
        Ok(Self {
            inner: AccountModule::new(chain, deps)?,
        })
    }

    pub fn contract(&self) -> &'static str {
        self.inner.contract().unwrap_or_default()
    }

    pub fn confirmation_stage(&self, id: &str) -> Option<ConfirmationStage> {
        self.inner.confirmation_stage(id)
    }
}

#[async_trait]
impl ChainSync for TokenModule {
    fn core(&self) -> &ModuleCore {
        self.inner.core()
    }

    async fn start(&self, session: &Session) -> Result<(), SyncError> {
        self.inner.start(session).await
    }

    fn stop(&self) {
        self.inner.stop();
    }

    fn reset(&self) {
        self.inner.reset();
    }

    async fn get_transaction(&self, id: &str, options: GetTxOptions) -> Result<Option<Transaction>, SyncError> {
        self.inner.get_transaction(id, options).await
    }

    async fn send_tokens(&self, request: TransferRequest) -> Result<String, SyncError> {
        self.inner.send_tokens(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockRpc, MockSigner};
    use ledgerlink_core::{CursorKind, ManualClock, TxStatus};
    use std::sync::Arc;
    use std::time::Duration;

    fn deps(rpc: Arc<MockRpc>) -> ModuleDeps {
        ModuleDeps {
            rpc,
            signer: Arc::new(MockSigner::new()),
            clock: Arc::new(ManualClock::new(1_700_000_000_000)),
            intents: None,
            page_size: 25,
            balance_poll: Duration::from_secs(600),
            max_concurrent_requests: 2,
        }
    }

    #[test]
    fn test_only_tokens_accepted() {
        let rpc = Arc::new(MockRpc::new(CursorKind::Height));
        assert!(TokenModule::new(ChainId::Eth, deps(rpc.clone())).is_err());
        let usdt = TokenModule::new(ChainId::Usdt, deps(rpc)).unwrap();
        assert_eq!(usdt.contract(), "0xdac17f958d2ee523a2206206994597c13d831ec7");
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_uses_carrier_address_and_contract() {
        let rpc = Arc::new(MockRpc::new(CursorKind::Height));
        rpc.set_balance("eth-U1", 50);
        let usdc = TokenModule::new(ChainId::Usdc, deps(rpc.clone())).unwrap();
        usdc.start(&Session::new("U1", vec![7])).await.unwrap();
        assert_eq!(usdc.state().address.as_deref(), Some("eth-U1"));
        assert_eq!(usdc.state().balance, Some(50));

        let id = usdc
            .send_tokens(TransferRequest {
                to: "eth-U2".into(),
                amount: 1_000_000,
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(id.starts_with("0x"));
        assert_eq!(usdc.transaction(&id).unwrap().status, TxStatus::Pending);
        assert_eq!(rpc.broadcast().len(), 1);
        usdc.stop();
    }
}
