//! Second account family (LSK). History is paginated by timestamp rather
//! than height.

use async_trait::async_trait;
use ledgerlink_core::{ChainId, CursorKind, Transaction};
use std::sync::Arc;

use crate::chains::{one_step_get, start_module};
use crate::error::SyncError;
use crate::module::{ChainSync, GetTxOptions, ModuleCore, ModuleDeps, TransferRequest, confirmed_when_in_block};
use crate::ports::Session;

#[derive(Clone)]
pub struct NonceAccountModule {
    core: Arc<ModuleCore>,
}

impl NonceAccountModule {
    pub fn new(deps: ModuleDeps) -> Self {
        Self {
            core: Arc::new(ModuleCore::new(ChainId::Lsk, CursorKind::Timestamp, deps, confirmed_when_in_block)),
        }
    }
}

#[async_trait]
impl ChainSync for NonceAccountModule {
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
