//! Gateway defaults and wiring from [`AppConfig`].

use ledgerlink_core::{AppConfig, ChainId};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::error::SyncError;
use crate::ports::{ChainRpc, Session, SignedPayload, Signer, UnsignedTransfer};
use crate::rpc::{HomeGateway, HttpGateway};

/// Local gateway all chains default to.
pub const DEFAULT_GATEWAY_BASE: &str = "http://127.0.0.1:36667";

/// Built-in gateway URL for a chain.
pub fn default_gateway(chain: ChainId) -> String {
    format!("{}/{}", DEFAULT_GATEWAY_BASE, chain.symbol().to_lowercase())
}

/// Configured gateway URL, falling back to the built-in one.
pub fn gateway_url(config: &AppConfig, chain: ChainId) -> String {
    config
        .gateway(chain)
        .map(str::to_string)
        .unwrap_or_else(|| default_gateway(chain))
}

/// One HTTP client per requested chain.
pub fn build_rpcs(config: &AppConfig, chains: &[ChainId]) -> HashMap<ChainId, Arc<dyn ChainRpc>> {
    chains
        .iter()
        .map(|&chain| {
            let rpc: Arc<dyn ChainRpc> = Arc::new(HttpGateway::new(chain, &gateway_url(config, chain)));
            (chain, rpc)
        })
        .collect()
}

pub fn home_gateway(config: &AppConfig) -> HomeGateway {
    HomeGateway::new(&gateway_url(config, ChainId::Adm))
}

/// Signer for watch-only use: addresses come from configuration and nothing
/// can be signed.
#[derive(Debug, Clone, Default)]
pub struct WatchOnlySigner {
    addresses: BTreeMap<ChainId, String>,
}

impl WatchOnlySigner {
    pub fn new(addresses: BTreeMap<ChainId, String>) -> Self {
        Self { addresses }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.watched.clone())
    }
}

impl Signer for WatchOnlySigner {
    fn derive_address(&self, session: &Session, chain: ChainId) -> Result<String, SyncError> {
        if let Some(address) = self
            .addresses
            .get(&chain)
            .or_else(|| self.addresses.get(&chain.binding_chain()))
        {
            return Ok(address.clone());
        }
        if chain == ChainId::Adm && !session.user_id().is_empty() {
            return Ok(session.user_id().to_string());
        }
        Err(SyncError::AccountNotFound(format!("no watched {} address", chain)))
    }

    fn sign(&self, transfer: &UnsignedTransfer, _session: &Session) -> Result<SignedPayload, SyncError> {
        Err(SyncError::Signing(format!("watch-only, cannot sign {} transfer", transfer.chain)))
    }
}
