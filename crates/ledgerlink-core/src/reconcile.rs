//! Status derivation for activity items that pair a chat message with an
//! on-chain transaction.
//!
//! Everything here is a pure function of already-fetched data. What is still
//! missing is reported back in [`Missing`] so the caller can fetch it and ask
//! again.

use serde::{Deserialize, Serialize};

use crate::amount::parse_amount;
use crate::bindings::AddressBinding;
use crate::chat::{ChatMessage, MessageKind, TransferIntent};
use crate::retry::retry_profile;
use crate::transaction::Transaction;
use crate::types::{ChainId, Timestamp, TxStatus};

/// Informational tag explaining a virtual status promotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AdditionalStatus {
    #[default]
    None,
    /// Message accepted by the home chain; it has no further confirmation stage.
    HomeRegistered,
    /// Expedited settlement reported by the chain.
    InstantSend,
}

/// Why a confirmed transaction does not match the transfer it is claimed to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InconsistentReason {
    WrongTxHash,
    SenderAddressMismatch,
    RecipientAddressMismatch,
    SenderAddressInconsistent,
    RecipientAddressInconsistent,
    WrongAmount,
    WrongTimestamp,
}

impl InconsistentReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            InconsistentReason::WrongTxHash => "wrong_tx_hash",
            InconsistentReason::SenderAddressMismatch => "sender_crypto_address_mismatch",
            InconsistentReason::RecipientAddressMismatch => "recipient_crypto_address_mismatch",
            InconsistentReason::SenderAddressInconsistent => "sender_crypto_address_inconsistent",
            InconsistentReason::RecipientAddressInconsistent => {
                "recipient_crypto_address_inconsistent"
            }
            InconsistentReason::WrongAmount => "wrong_amount",
            InconsistentReason::WrongTimestamp => "wrong_timestamp",
        }
    }
}

impl std::fmt::Display for InconsistentReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Data the caller still has to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Missing {
    pub transaction: bool,
    pub sender_binding: bool,
    pub recipient_binding: bool,
}

impl Missing {
    pub fn any(&self) -> bool {
        self.transaction || self.sender_binding || self.recipient_binding
    }
}

/// Authoritative status of one activity item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferStatus {
    /// Persisted status.
    pub status: TxStatus,
    /// Status shown to the user; may be more optimistic than `status`.
    pub virtual_status: TxStatus,
    pub add_status: AdditionalStatus,
    pub inconsistent_reason: Option<InconsistentReason>,
    pub missing: Missing,
}

impl TransferStatus {
    fn with(status: TxStatus) -> Self {
        Self {
            status,
            virtual_status: status,
            add_status: AdditionalStatus::None,
            inconsistent_reason: None,
            missing: Missing::default(),
        }
    }

    fn set(&mut self, status: TxStatus) {
        self.status = status;
        self.virtual_status = status;
    }
}

impl Default for TransferStatus {
    fn default() -> Self {
        Self::with(TxStatus::Pending)
    }
}

/// Inputs for [`reconcile`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ReconcileInput<'a> {
    pub message: Option<&'a ChatMessage>,
    /// The transaction the item refers to (home-chain transfer or native one).
    pub transaction: Option<&'a Transaction>,
    pub sender_binding: Option<&'a AddressBinding>,
    pub recipient_binding: Option<&'a AddressBinding>,
    /// Evaluation time for binding validity.
    pub now: Timestamp,
}

/// Derive the status of an activity item.
pub fn reconcile(input: &ReconcileInput<'_>) -> TransferStatus {
    let Some(message) = input.message else {
        return match input.transaction {
            Some(tx) => promote_fast(TransferStatus::with(tx.status), tx),
            None => TransferStatus::default(),
        };
    };

    let intent = match &message.kind {
        MessageKind::Text { .. } | MessageKind::Reaction { .. } => {
            let mut result = TransferStatus::with(message.status);
            if message.status == TxStatus::Registered {
                result.virtual_status = TxStatus::Confirmed;
                result.add_status = AdditionalStatus::HomeRegistered;
            }
            return result;
        }
        MessageKind::Transfer(intent) => intent,
    };

    let Some(chain) = intent.chain() else {
        return TransferStatus::with(TxStatus::Unknown);
    };

    if chain == ChainId::Adm {
        return reconcile_home_transfer(message, input.transaction);
    }

    let mut result = TransferStatus::with(input.transaction.map_or(TxStatus::Pending, |tx| tx.status));

    let sender = input.sender_binding.filter(|b| b.is_valid_at(input.now));
    let recipient = input.recipient_binding.filter(|b| b.is_valid_at(input.now));
    result.missing = Missing {
        transaction: input.transaction.is_none(),
        sender_binding: sender.is_none(),
        recipient_binding: recipient.is_none(),
    };

    let (Some(tx), Some(sender), Some(recipient)) = (input.transaction, sender, recipient) else {
        result.set(TxStatus::Pending);
        return result;
    };

    if result.status == TxStatus::Confirmed
        && let Err(reason) = verify_transfer(chain, tx, intent, message.timestamp, sender, recipient)
    {
        result.set(TxStatus::Invalid);
        result.inconsistent_reason = Some(reason);
        return result;
    }

    promote_fast(result, tx)
}

fn reconcile_home_transfer(message: &ChatMessage, transfer: Option<&Transaction>) -> TransferStatus {
    let mut result = TransferStatus::with(message.status);
    if message.status == TxStatus::Registered {
        match transfer {
            Some(tx) if tx.is_in_block() => result.set(TxStatus::Confirmed),
            _ => result.missing.transaction = true,
        }
    }
    result
}

fn promote_fast(mut result: TransferStatus, tx: &Transaction) -> TransferStatus {
    if result.status == TxStatus::Registered && tx.is_instant_send() {
        result.virtual_status = TxStatus::Confirmed;
        result.add_status = AdditionalStatus::InstantSend;
    }
    result
}

/// Check a confirmed transaction against the transfer intent and the
/// contact bindings of both parties.
pub fn verify_transfer(
    chain: ChainId,
    tx: &Transaction,
    intent: &TransferIntent,
    message_timestamp: Option<Timestamp>,
    sender: &AddressBinding,
    recipient: &AddressBinding,
) -> Result<(), InconsistentReason> {
    if !chain.same_address(&tx.id, &intent.hash) {
        return Err(InconsistentReason::WrongTxHash);
    }

    if sender.is_inconsistent() {
        return Err(InconsistentReason::SenderAddressInconsistent);
    }
    if recipient.is_inconsistent() {
        return Err(InconsistentReason::RecipientAddressInconsistent);
    }

    let sender_ok = tx
        .sender_id
        .as_deref()
        .is_some_and(|s| chain.same_address(s, &sender.address));
    if !sender_ok {
        return Err(InconsistentReason::SenderAddressMismatch);
    }

    let recipient_ok = tx
        .recipient_id
        .as_deref()
        .is_some_and(|r| chain.same_address(r, &recipient.address));
    if !recipient_ok {
        return Err(InconsistentReason::RecipientAddressMismatch);
    }

    let declared = parse_amount(&intent.amount, chain.decimals()).map_err(|e| {
        tracing::debug!("Unparseable declared amount for {}: {}", intent.hash, e);
        InconsistentReason::WrongAmount
    })?;
    if tx.amount != Some(declared) {
        return Err(InconsistentReason::WrongAmount);
    }

    if let (Some(tx_ts), Some(msg_ts)) = (tx.timestamp, message_timestamp)
        && (tx_ts - msg_ts).abs() > retry_profile(chain).consistency_window_ms
    {
        return Err(InconsistentReason::WrongTimestamp);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindings::ADDRESS_VALID_TIMEOUT_MS;

    const NOW: Timestamp = 1_700_000_000_000;

    fn binding(address: &str) -> AddressBinding {
        AddressBinding {
            address: address.into(),
            verify_timestamp: NOW - 1_000,
            inconsistent: Vec::new(),
        }
    }

    fn intent_message(asset: &str, hash: &str, amount: &str) -> ChatMessage {
        let mut msg = ChatMessage::remote(
            "m1",
            "U1",
            "U2",
            MessageKind::Transfer(TransferIntent {
                asset: asset.into(),
                hash: hash.into(),
                amount: amount.into(),
                comment: None,
            }),
        );
        msg.timestamp = Some(NOW - 60_000);
        msg
    }

    fn btc_tx(status: TxStatus, amount: u128) -> Transaction {
        Transaction {
            id: "h1".into(),
            sender_id: Some("1Sender".into()),
            recipient_id: Some("1Recipient".into()),
            amount: Some(amount),
            timestamp: Some(NOW - 30_000),
            status,
            ..Default::default()
        }
    }

    fn input<'a>(
        msg: &'a ChatMessage,
        tx: Option<&'a Transaction>,
        s: &'a AddressBinding,
        r: &'a AddressBinding,
    ) -> ReconcileInput<'a> {
        ReconcileInput {
            message: Some(msg),
            transaction: tx,
            sender_binding: Some(s),
            recipient_binding: Some(r),
            now: NOW,
        }
    }

    #[test]
    fn test_pending_until_transaction_known() {
        let msg = intent_message("BTC", "h1", "0.5");
        let (s, r) = (binding("1Sender"), binding("1Recipient"));
        let status = reconcile(&input(&msg, None, &s, &r));
        assert_eq!(status.status, TxStatus::Pending);
        assert!(status.missing.transaction);
        assert!(!status.missing.sender_binding);
    }

    #[test]
    fn test_confirmed_when_consistent() {
        let msg = intent_message("BTC", "h1", "0.5");
        let tx = btc_tx(TxStatus::Confirmed, 50_000_000);
        let (s, r) = (binding("1Sender"), binding("1Recipient"));
        let status = reconcile(&input(&msg, Some(&tx), &s, &r));
        assert_eq!(status.status, TxStatus::Confirmed);
        assert_eq!(status.virtual_status, TxStatus::Confirmed);
        assert_eq!(status.inconsistent_reason, None);
        assert!(!status.missing.any());
    }

    #[test]
    fn test_amount_mismatch_is_invalid() {
        let msg = intent_message("BTC", "h1", "0.5");
        let tx = btc_tx(TxStatus::Confirmed, 50_000_001);
        let (s, r) = (binding("1Sender"), binding("1Recipient"));
        let status = reconcile(&input(&msg, Some(&tx), &s, &r));
        assert_eq!(status.status, TxStatus::Invalid);
        assert_eq!(status.inconsistent_reason, Some(InconsistentReason::WrongAmount));
        assert!(!status.inconsistent_reason.unwrap().as_str().is_empty());
    }

    #[test]
    fn test_recipient_mismatch_is_invalid() {
        let msg = intent_message("BTC", "h1", "0.5");
        let tx = btc_tx(TxStatus::Confirmed, 50_000_000);
        let (s, r) = (binding("1Sender"), binding("1Someone"));
        let status = reconcile(&input(&msg, Some(&tx), &s, &r));
        assert_eq!(
            status.inconsistent_reason,
            Some(InconsistentReason::RecipientAddressMismatch)
        );
    }

    #[test]
    fn test_inconsistent_binding_is_invalid() {
        let msg = intent_message("BTC", "h1", "0.5");
        let tx = btc_tx(TxStatus::Confirmed, 50_000_000);
        let mut s = binding("1Sender");
        s.inconsistent = vec!["1Sender".into(), "1Other".into()];
        let r = binding("1Recipient");
        let status = reconcile(&input(&msg, Some(&tx), &s, &r));
        assert_eq!(
            status.inconsistent_reason,
            Some(InconsistentReason::SenderAddressInconsistent)
        );
    }

    #[test]
    fn test_timestamp_far_from_message_is_invalid() {
        let msg = intent_message("ETH", "0xh1", "1");
        let tx = Transaction {
            id: "0xH1".into(),
            sender_id: Some("0xaa".into()),
            recipient_id: Some("0xbb".into()),
            amount: Some(1_000_000_000_000_000_000),
            timestamp: Some(NOW + 2 * 60 * 60 * 1000),
            status: TxStatus::Confirmed,
            ..Default::default()
        };
        let (s, r) = (binding("0xAA"), binding("0xBB"));
        let status = reconcile(&input(&msg, Some(&tx), &s, &r));
        assert_eq!(status.inconsistent_reason, Some(InconsistentReason::WrongTimestamp));
    }

    #[test]
    fn test_expired_binding_forces_pending() {
        let msg = intent_message("BTC", "h1", "0.5");
        let tx = btc_tx(TxStatus::Confirmed, 50_000_000);
        let mut s = binding("1Sender");
        s.verify_timestamp = NOW - ADDRESS_VALID_TIMEOUT_MS - 1;
        let r = binding("1Recipient");
        let status = reconcile(&input(&msg, Some(&tx), &s, &r));
        assert_eq!(status.status, TxStatus::Pending);
        assert!(status.missing.sender_binding);
    }

    #[test]
    fn test_pending_regardless_of_message_status() {
        let mut msg = intent_message("BTC", "h1", "0.5");
        msg.status = TxStatus::Confirmed;
        let tx = btc_tx(TxStatus::Confirmed, 50_000_000);
        let status = reconcile(&ReconcileInput {
            message: Some(&msg),
            transaction: Some(&tx),
            sender_binding: None,
            recipient_binding: None,
            now: NOW,
        });
        assert_eq!(status.status, TxStatus::Pending);
    }

    #[test]
    fn test_instant_send_promotes_virtual_status() {
        let msg = intent_message("DASH", "h1", "0.5");
        let mut tx = btc_tx(TxStatus::Registered, 50_000_000);
        tx.instant_send = Some(true);
        let (s, r) = (binding("1Sender"), binding("1Recipient"));
        let status = reconcile(&input(&msg, Some(&tx), &s, &r));
        assert_eq!(status.status, TxStatus::Registered);
        assert_eq!(status.virtual_status, TxStatus::Confirmed);
        assert_eq!(status.add_status, AdditionalStatus::InstantSend);
    }

    #[test]
    fn test_plain_message_registered_is_virtually_confirmed() {
        let msg = ChatMessage::remote(
            "1",
            "U1",
            "U2",
            MessageKind::Text {
                text: "hi".into(),
                reply_to: None,
            },
        );
        let status = reconcile(&ReconcileInput {
            message: Some(&msg),
            now: NOW,
            ..Default::default()
        });
        assert_eq!(status.status, TxStatus::Registered);
        assert_eq!(status.virtual_status, TxStatus::Confirmed);
        assert_eq!(status.add_status, AdditionalStatus::HomeRegistered);
    }

    #[test]
    fn test_home_transfer_confirmed_by_height() {
        let msg = intent_message("ADM", "m1", "1");
        let tx = Transaction {
            id: "m1".into(),
            height: Some(10),
            status: TxStatus::Registered,
            ..Default::default()
        };
        let status = reconcile(&ReconcileInput {
            message: Some(&msg),
            transaction: Some(&tx),
            now: NOW,
            ..Default::default()
        });
        assert_eq!(status.status, TxStatus::Confirmed);

        let status = reconcile(&ReconcileInput {
            message: Some(&msg),
            now: NOW,
            ..Default::default()
        });
        assert_eq!(status.status, TxStatus::Registered);
        assert!(status.missing.transaction);
    }

    #[test]
    fn test_unsupported_asset_is_unknown() {
        let msg = intent_message("XYZ", "h", "1");
        let status = reconcile(&ReconcileInput {
            message: Some(&msg),
            now: NOW,
            ..Default::default()
        });
        assert_eq!(status.status, TxStatus::Unknown);
    }

    #[test]
    fn test_transaction_without_message() {
        let tx = btc_tx(TxStatus::Registered, 1);
        let status = reconcile(&ReconcileInput {
            transaction: Some(&tx),
            now: NOW,
            ..Default::default()
        });
        assert_eq!(status.status, TxStatus::Registered);
        assert_eq!(reconcile(&ReconcileInput::default()).status, TxStatus::Pending);
    }

    #[test]
    fn test_reconcile_is_deterministic() {
        let msg = intent_message("BTC", "h1", "0.5");
        let tx = btc_tx(TxStatus::Confirmed, 49_999_999);
        let (s, r) = (binding("1Sender"), binding("1Recipient"));
        let first = reconcile(&input(&msg, Some(&tx), &s, &r));
        for _ in 0..5 {
            assert_eq!(reconcile(&input(&msg, Some(&tx), &s, &r)), first);
        }
    }
}
