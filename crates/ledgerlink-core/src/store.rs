//! Per-module transaction store with merge semantics and pagination cursors.
//!
//! The store does no locking of its own. Owners serialize access to it
//! (one writer per chain module).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::transaction::{Transaction, TransactionUpdate};
use crate::types::{ChainId, Direction};

/// Which field drives the pagination window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CursorKind {
    Height,
    Timestamp,
}

/// Where a merged batch came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOrigin {
    /// Single-transaction refresh, send, or placeholder. Does not move cursors.
    Update,
    /// A history page. Definitive heights/timestamps tighten the cursors.
    Page,
}

/// Lowest and highest cursor value seen in fetched pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Extremes {
    pub min: Option<i64>,
    pub max: Option<i64>,
}

impl Extremes {
    fn fold(&mut self, value: i64) {
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
    }
}

/// Serializable copy of a store, used to carry state across sessions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub transactions: Vec<Transaction>,
    pub transactions_count: usize,
    pub extremes: Extremes,
    pub bottom_reached: bool,
}

#[derive(Debug, Clone)]
pub struct TransactionStore {
    chain: ChainId,
    cursor: CursorKind,
    address: Option<String>,
    transactions: HashMap<String, Transaction>,
    extremes: Extremes,
    /// High-water mark of `transactions.len()`.
    transactions_count: usize,
    bottom_reached: bool,
}

impl TransactionStore {
    pub fn new(chain: ChainId, cursor: CursorKind) -> Self {
        Self {
            chain,
            cursor,
            address: None,
            transactions: HashMap::new(),
            extremes: Extremes::default(),
            transactions_count: 0,
            bottom_reached: false,
        }
    }

    pub fn chain(&self) -> ChainId {
        self.chain
    }

    pub fn cursor_kind(&self) -> CursorKind {
        self.cursor
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    /// Set the local address and re-derive direction for every record.
    pub fn set_address(&mut self, address: Option<String>) {
        self.address = address;
        let chain = self.chain;
        let address = self.address.clone();
        for tx in self.transactions.values_mut() {
            derive_direction(chain, address.as_deref(), tx);
        }
    }

    /// Merge a batch of partial records.
    ///
    /// Absent fields never erase existing values. For pages, a record's
    /// definitive height (or timestamp) tightens the cursor extremes.
    pub fn merge<I>(&mut self, batch: I, origin: MergeOrigin)
    where
        I: IntoIterator<Item = TransactionUpdate>,
    {
        let mut page = Extremes::default();

        for update in batch {
            if update.id.is_empty() {
                continue;
            }

            let cursor_value = match self.cursor {
                CursorKind::Height => update.height.and_then(|h| i64::try_from(h).ok()),
                CursorKind::Timestamp => update.timestamp,
            };

            let tx = self
                .transactions
                .entry(update.id.clone())
                .and_modify(|tx| tx.apply(&update))
                .or_insert_with(|| Transaction::from_update(&update));
            derive_direction(self.chain, self.address.as_deref(), tx);

            if origin == MergeOrigin::Page
                && let Some(value) = cursor_value
            {
                page.fold(value);
            }
        }

        if let Some(min) = page.min {
            self.extremes.min = Some(self.extremes.min.map_or(min, |m| m.min(min)));
        }
        if let Some(max) = page.max {
            self.extremes.max = Some(self.extremes.max.map_or(max, |m| m.max(max)));
        }

        self.transactions_count = self.transactions_count.max(self.transactions.len());
    }

    /// If the cache holds fewer records than previously observed, reopen the
    /// pagination window. Returns true when the window was reset.
    pub fn reset_window_if_shrunk(&mut self) -> bool {
        if self.transactions.len() < self.transactions_count {
            tracing::info!(
                "{} cache shrank ({} < {}), resetting pagination window",
                self.chain,
                self.transactions.len(),
                self.transactions_count
            );
            self.transactions_count = 0;
            self.extremes = Extremes::default();
            self.bottom_reached = false;
            true
        } else {
            false
        }
    }

    /// Drop every record and cursor.
    pub fn reset(&mut self) {
        self.transactions.clear();
        self.extremes = Extremes::default();
        self.transactions_count = 0;
        self.bottom_reached = false;
    }

    pub fn get(&self, id: &str) -> Option<&Transaction> {
        self.transactions.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.transactions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn extremes(&self) -> Extremes {
        self.extremes
    }

    pub fn transactions_count(&self) -> usize {
        self.transactions_count
    }

    pub fn bottom_reached(&self) -> bool {
        self.bottom_reached
    }

    pub fn set_bottom_reached(&mut self, value: bool) {
        self.bottom_reached = value;
    }

    /// Newest first; records without a timestamp sort last.
    pub fn sorted(&self) -> Vec<Transaction> {
        let mut txs: Vec<Transaction> = self.transactions.values().cloned().collect();
        txs.sort_by(|a, b| {
            b.timestamp
                .unwrap_or(0)
                .cmp(&a.timestamp.unwrap_or(0))
                .then_with(|| a.id.cmp(&b.id))
        });
        txs
    }

    /// Transactions exchanged with one counterparty, newest first.
    pub fn partner_transactions(&self, partner: &str) -> Vec<Transaction> {
        self.sorted()
            .into_iter()
            .filter(|tx| {
                tx.partner
                    .as_deref()
                    .is_some_and(|p| self.chain.same_address(p, partner))
            })
            .collect()
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            transactions: self.transactions.values().cloned().collect(),
            transactions_count: self.transactions_count,
            extremes: self.extremes,
            bottom_reached: self.bottom_reached,
        }
    }

    /// Replace contents with a snapshot.
    pub fn restore(&mut self, snapshot: StoreSnapshot) {
        self.transactions = snapshot
            .transactions
            .into_iter()
            .map(|tx| (tx.id.clone(), tx))
            .collect();
        self.transactions_count = snapshot.transactions_count;
        self.extremes = snapshot.extremes;
        self.bottom_reached = snapshot.bottom_reached;
        let address = self.address.clone();
        self.set_address(address);
    }
}

fn derive_direction(chain: ChainId, address: Option<&str>, tx: &mut Transaction) {
    let Some(address) = address else {
        return;
    };
    let incoming = tx
        .recipient_id
        .as_deref()
        .is_some_and(|r| chain.same_address(r, address));

    if incoming {
        tx.direction = Some(Direction::To);
        tx.partner = tx.sender_id.clone();
    } else if tx.sender_id.is_some() || tx.recipient_id.is_some() {
        tx.direction = Some(Direction::From);
        tx.partner = tx.recipient_id.clone();
    }
}
