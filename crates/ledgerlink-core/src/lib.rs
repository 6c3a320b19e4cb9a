//! Core domain logic for cross-chain transaction synchronization.
//!
//! This crate provides:
//! - Chain identities and shared types (`types` module)
//! - Exact decimal amount handling (`amount` module)
//! - Retry/backoff policy for unconfirmed transactions (`retry` module)
//! - Per-chain transaction store with merge semantics (`store` module)
//! - Contact address bindings (`bindings` module)
//! - Home-chain chat store with two-phase message keys (`chat` module)
//! - Message/transaction status reconciliation (`reconcile` module)
//! - Application configuration (`config` module)
//!
//! Nothing here performs network I/O.

pub mod amount;
pub mod bindings;
pub mod chat;
pub mod clock;
pub mod config;
pub mod reconcile;
pub mod retry;
pub mod store;
pub mod transaction;
pub mod types;

pub use amount::{AmountError, format_amount, parse_amount};
pub use bindings::{
    ADDRESS_VALID_TIMEOUT_MS, AddressBinding, ContactBook, ContactEntry, MAXIMUM_ADDRESSES,
    StoredAddresses, StoredRecord, parse_stored_addresses,
};
pub use chat::{ChatMessage, ChatStore, MessageKey, MessageKind, TransferIntent};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AppConfig, ConfigError};
pub use reconcile::{
    AdditionalStatus, InconsistentReason, Missing, ReconcileInput, TransferStatus, reconcile,
    verify_transfer,
};
pub use retry::{
    RetryProfile, pending_retry_count, pending_retry_timeout, registered_retry_timeout,
    retry_profile,
};
pub use store::{CursorKind, Extremes, MergeOrigin, StoreSnapshot, TransactionStore};
pub use transaction::{Transaction, TransactionUpdate};
pub use types::*;
