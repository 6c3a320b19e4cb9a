//! Picks the module variant for a chain.

use ledgerlink_core::{ChainFamily, ChainId};
use std::sync::Arc;

use crate::chains::{AccountModule, HomeModule, NonceAccountModule, TokenModule, UtxoModule};
use crate::error::SyncError;
use crate::module::{ChainSync, ModuleDeps};

pub fn create_module(chain: ChainId, deps: ModuleDeps) -> Result<Arc<dyn ChainSync>, SyncError> {
    let module: Arc<dyn ChainSync> = match chain.family() {
        ChainFamily::Home => Arc::new(HomeModule::new(deps)),
        ChainFamily::Utxo => Arc::new(UtxoModule::new(chain, deps)?),
        ChainFamily::Account => Arc::new(AccountModule::new(chain, deps)?),
        ChainFamily::Token => Arc::new(TokenModule::new(chain, deps)?),
        ChainFamily::NonceAccount => Arc::new(NonceAccountModule::new(deps)),
    };
    tracing::debug!("Created {:?} module for {}", chain.family(), chain);
    Ok(module)
}
