//! Transaction records and partial updates.

use serde::{Deserialize, Serialize};

use crate::types::{Amount, Direction, Timestamp, TxStatus};

/// A transaction as known locally, keyed by its chain-native id/hash.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub sender_id: Option<String>,
    pub recipient_id: Option<String>,
    pub amount: Option<Amount>,
    pub fee: Option<Amount>,
    /// Broadcast time until the node reports block time.
    pub timestamp: Option<Timestamp>,
    /// Block height / block number. Absent while unconfirmed.
    pub height: Option<u64>,
    pub confirmations: Option<u64>,
    pub status: TxStatus,
    /// Derived relative to the local address.
    pub direction: Option<Direction>,
    /// Counterparty address, derived like `direction`.
    pub partner: Option<String>,
    /// Expedited settlement reported by the node (DASH InstantSend).
    pub instant_send: Option<bool>,
    pub gas_price: Option<Amount>,
    /// Free-form data attached to the transfer.
    pub data: Option<String>,
}

/// Partial update for a transaction. `None` fields never overwrite existing data.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransactionUpdate {
    pub id: String,
    #[serde(default)]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub recipient_id: Option<String>,
    #[serde(default)]
    pub amount: Option<Amount>,
    #[serde(default)]
    pub fee: Option<Amount>,
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
    #[serde(default)]
    pub height: Option<u64>,
    #[serde(default)]
    pub confirmations: Option<u64>,
    #[serde(default)]
    pub status: Option<TxStatus>,
    #[serde(default)]
    pub instant_send: Option<bool>,
    #[serde(default)]
    pub gas_price: Option<Amount>,
    #[serde(default)]
    pub data: Option<String>,
}

impl TransactionUpdate {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Status-only update.
    pub fn status(id: impl Into<String>, status: TxStatus) -> Self {
        Self {
            id: id.into(),
            status: Some(status),
            ..Default::default()
        }
    }
}

fn overwrite<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
    if let Some(v) = value {
        *slot = Some(v.clone());
    }
}

impl Transaction {
    /// Shallow-merge an update onto this record.
    pub fn apply(&mut self, update: &TransactionUpdate) {
        overwrite(&mut self.sender_id, &update.sender_id);
        overwrite(&mut self.recipient_id, &update.recipient_id);
        overwrite(&mut self.amount, &update.amount);
        overwrite(&mut self.fee, &update.fee);
        overwrite(&mut self.timestamp, &update.timestamp);
        overwrite(&mut self.height, &update.height);
        overwrite(&mut self.confirmations, &update.confirmations);
        overwrite(&mut self.instant_send, &update.instant_send);
        overwrite(&mut self.gas_price, &update.gas_price);
        overwrite(&mut self.data, &update.data);
        if let Some(status) = update.status {
            self.status = status;
        }
    }

    pub fn from_update(update: &TransactionUpdate) -> Self {
        let mut tx = Transaction {
            id: update.id.clone(),
            ..Default::default()
        };
        tx.apply(update);
        tx
    }

    /// Whether the node reports the transaction as included in a block.
    pub fn is_in_block(&self) -> bool {
        self.height.is_some() || self.confirmations.is_some_and(|c| c > 0)
    }

    pub fn is_instant_send(&self) -> bool {
        self.instant_send.unwrap_or(false)
    }
}
