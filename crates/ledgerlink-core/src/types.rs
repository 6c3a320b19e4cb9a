//! Core domain types shared by every chain module.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Amount in the chain's smallest native unit.
pub type Amount = u128;
/// Unix time in milliseconds.
pub type Timestamp = i64;

/// Chain families. Each family has its own synchronization module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChainFamily {
    /// The messaging ledger.
    Home,
    /// UTXO chains (BTC-like).
    Utxo,
    /// Account chains with receipts (ETH-like).
    Account,
    /// Tokens carried by an account chain.
    Token,
    /// Second account chain family, paginated by timestamp.
    NonceAccount,
}

/// Supported chains - exhaustive match required (no default case).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChainId {
    Adm,
    Btc,
    Doge,
    Dash,
    Eth,
    Usdt,
    Usdc,
    Dai,
    Lsk,
}

impl ChainId {
    pub fn symbol(&self) -> &'static str {
        match self {
            ChainId::Adm => "ADM",
            ChainId::Btc => "BTC",
            ChainId::Doge => "DOGE",
            ChainId::Dash => "DASH",
            ChainId::Eth => "ETH",
            ChainId::Usdt => "USDT",
            ChainId::Usdc => "USDC",
            ChainId::Dai => "DAI",
            ChainId::Lsk => "LSK",
        }
    }

    pub fn decimals(&self) -> u8 {
        match self {
            ChainId::Adm => 8,
            ChainId::Btc | ChainId::Doge | ChainId::Dash => 8,
            ChainId::Eth | ChainId::Dai => 18,
            ChainId::Usdt | ChainId::Usdc => 6,
            ChainId::Lsk => 8,
        }
    }

    pub fn family(&self) -> ChainFamily {
        match self {
            ChainId::Adm => ChainFamily::Home,
            ChainId::Btc | ChainId::Doge | ChainId::Dash => ChainFamily::Utxo,
            ChainId::Eth => ChainFamily::Account,
            ChainId::Usdt | ChainId::Usdc | ChainId::Dai => ChainFamily::Token,
            ChainId::Lsk => ChainFamily::NonceAccount,
        }
    }

    /// Chain whose address identifies a contact for this asset.
    /// Tokens live at their carrier chain's address.
    pub fn binding_chain(&self) -> ChainId {
        match self.family() {
            ChainFamily::Token => ChainId::Eth,
            _ => *self,
        }
    }

    /// Hex addresses compare case-insensitively; base58/base32 ones do not.
    pub fn addresses_case_insensitive(&self) -> bool {
        matches!(self.family(), ChainFamily::Account | ChainFamily::Token)
    }

    /// Whether the chain reports an expedited-settlement flag (DASH InstantSend).
    pub fn reports_fast_settlement(&self) -> bool {
        matches!(self, ChainId::Dash)
    }

    /// Contract address for token chains.
    pub fn token_contract(&self) -> Option<&'static str> {
        match self {
            ChainId::Usdt => Some("0xdac17f958d2ee523a2206206994597c13d831ec7"),
            ChainId::Usdc => Some("0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48"),
            ChainId::Dai => Some("0x6b175474e89094c44da98b954eedeac495271d0f"),
            _ => None,
        }
    }

    /// Compare two addresses on this chain.
    pub fn same_address(&self, a: &str, b: &str) -> bool {
        if self.addresses_case_insensitive() {
            a.trim().eq_ignore_ascii_case(b.trim())
        } else {
            a.trim() == b.trim()
        }
    }

    /// Returns all known chains.
    pub fn all() -> &'static [ChainId] {
        &[
            ChainId::Adm,
            ChainId::Btc,
            ChainId::Doge,
            ChainId::Dash,
            ChainId::Eth,
            ChainId::Usdt,
            ChainId::Usdc,
            ChainId::Dai,
            ChainId::Lsk,
        ]
    }
}

impl std::fmt::Display for ChainId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for ChainId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChainId::all()
            .iter()
            .copied()
            .find(|c| c.symbol().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Unknown chain '{}'", s))
    }
}

/// Transaction and message status vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TxStatus {
    /// Created locally, not yet seen by the network.
    #[default]
    Pending,
    /// Accepted by the network, not yet confirmed.
    Registered,
    Confirmed,
    Rejected,
    /// Confirmed on chain but inconsistent with the transfer it claims to be.
    Invalid,
    Unknown,
}

impl TxStatus {
    /// `Rejected` and `Invalid` never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TxStatus::Rejected | TxStatus::Invalid)
    }

    /// Whether polling should stop for this status.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            TxStatus::Confirmed | TxStatus::Rejected | TxStatus::Invalid
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            TxStatus::Pending => "PENDING",
            TxStatus::Registered => "REGISTERED",
            TxStatus::Confirmed => "CONFIRMED",
            TxStatus::Rejected => "REJECTED",
            TxStatus::Invalid => "INVALID",
            TxStatus::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for TxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Direction relative to the local account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Incoming: the local account is the recipient.
    To,
    /// Outgoing.
    From,
}

/// Progress of a user-visible fetch (balance refresh).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FetchStatus {
    #[default]
    Idle,
    Loading,
    Success,
    Error,
}
