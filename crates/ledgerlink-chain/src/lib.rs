//! Cross-chain transaction synchronization engine.
//!
//! This crate provides:
//! - Ports for chain nodes, the home-chain store, signing and messaging (`ports` module)
//! - HTTP gateway clients (`rpc` module)
//! - Per-family chain synchronization modules and their factory (`chains`, `factory`)
//! - Request coalescing and cancellable timers (`coalesce`, `scheduler`)
//! - Contact address bindings, chat sync and reconciliation (`contacts`, `chat_sync`, `reconciler`)
//! - The session-level engine (`engine` module)
//! - In-memory port implementations for tests (`mock` module, behind the `mock` feature)

pub mod chains;
pub mod chat_sync;
pub mod coalesce;
pub mod config;
pub mod contacts;
pub mod engine;
pub mod error;
pub mod factory;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod module;
pub mod ports;
pub mod reconciler;
pub mod rpc;
pub mod scheduler;

pub use chains::{AccountModule, ConfirmationStage, HomeModule, NonceAccountModule, TokenModule, UtxoModule};
pub use chat_sync::ChatSync;
pub use coalesce::RequestQueue;
pub use config::{WatchOnlySigner, build_rpcs, default_gateway, gateway_url, home_gateway};
pub use contacts::ContactDirectory;
pub use engine::{ActivityItem, EngineDeps, SyncEngine};
pub use error::SyncError;
pub use factory::create_module;
pub use module::{ChainSync, GetTxOptions, ModuleCore, ModuleDeps, ModuleState, TransferRequest};
pub use ports::{
    ChainRpc, IntentSink, KeyValueStore, MessageTransport, PageRequest, Receipt, SentMessage, Session, SignedPayload,
    Signer, SortOrder, UnsignedTransfer,
};
pub use reconciler::Reconciler;
pub use rpc::{HomeGateway, HttpGateway};
pub use scheduler::TaskScheduler;
