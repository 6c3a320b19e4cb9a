//! Home-chain chat messages with provisional and network-assigned ids.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{ChainId, Timestamp, TxStatus};

/// Claim that a transfer happened, carried by a chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferIntent {
    /// Asset symbol as written by the sender.
    pub asset: String,
    /// Transaction hash/id on the asset's chain.
    pub hash: String,
    /// Declared amount as a decimal string.
    pub amount: String,
    #[serde(default)]
    pub comment: Option<String>,
}

impl TransferIntent {
    /// Supported chain for the declared asset, if any.
    pub fn chain(&self) -> Option<ChainId> {
        self.asset.parse().ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageKind {
    Text {
        text: String,
        #[serde(default)]
        reply_to: Option<String>,
    },
    Reaction {
        react_to: String,
        emoji: String,
    },
    Transfer(TransferIntent),
}

/// Reference to a message by either of its keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageKey {
    /// Provisional id, valid until the network assigns one.
    Local(u64),
    /// Network-assigned id.
    Real(String),
}

impl std::fmt::Display for MessageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageKey::Local(id) => write!(f, "local:{}", id),
            MessageKey::Real(id) => f.write_str(id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub local_id: u64,
    pub real_id: Option<String>,
    pub sender_id: String,
    pub recipient_id: String,
    pub timestamp: Option<Timestamp>,
    pub height: Option<u64>,
    pub status: TxStatus,
    pub kind: MessageKind,
}

impl ChatMessage {
    /// A message received from the network (already has its real id).
    pub fn remote(
        real_id: impl Into<String>,
        sender_id: impl Into<String>,
        recipient_id: impl Into<String>,
        kind: MessageKind,
    ) -> Self {
        Self {
            local_id: 0,
            real_id: Some(real_id.into()),
            sender_id: sender_id.into(),
            recipient_id: recipient_id.into(),
            timestamp: None,
            height: None,
            status: TxStatus::Registered,
            kind,
        }
    }

    /// Current key: the real id once assigned, the provisional one before.
    pub fn key(&self) -> MessageKey {
        match &self.real_id {
            Some(id) => MessageKey::Real(id.clone()),
            None => MessageKey::Local(self.local_id),
        }
    }

    /// A provisional key stops matching once the real id is assigned.
    pub fn matches(&self, key: &MessageKey) -> bool {
        match key {
            MessageKey::Local(id) => self.real_id.is_none() && self.local_id == *id,
            MessageKey::Real(id) => self.real_id.as_deref() == Some(id.as_str()),
        }
    }

    pub fn transfer(&self) -> Option<&TransferIntent> {
        match &self.kind {
            MessageKind::Transfer(intent) => Some(intent),
            _ => None,
        }
    }

    pub fn partner<'a>(&'a self, user_id: &str) -> &'a str {
        if self.sender_id == user_id {
            &self.recipient_id
        } else {
            &self.sender_id
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Chat {
    messages: Vec<ChatMessage>,
    unread: u32,
}

impl Chat {
    pub fn unread(&self) -> u32 {
        self.unread
    }
}

/// Messages grouped per contact.
#[derive(Debug, Clone, Default)]
pub struct ChatStore {
    user_id: String,
    chats: BTreeMap<String, Chat>,
    last_message_height: u64,
    next_local_id: u64,
}

impl ChatStore {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            chats: BTreeMap::new(),
            last_message_height: 0,
            next_local_id: 1,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Create an outgoing message with a fresh provisional id (not yet pushed).
    pub fn create_local(&mut self, recipient_id: &str, kind: MessageKind, now: Timestamp) -> ChatMessage {
        let local_id = self.next_local_id;
        self.next_local_id += 1;
        ChatMessage {
            local_id,
            real_id: None,
            sender_id: self.user_id.clone(),
            recipient_id: recipient_id.to_string(),
            timestamp: Some(now),
            height: None,
            status: TxStatus::Pending,
            kind,
        }
    }

    /// Add a message, or refresh status/height of a known one.
    /// Returns true when a new message was inserted.
    pub fn push_message(&mut self, mut message: ChatMessage) -> bool {
        let partner = message.partner(&self.user_id).to_string();
        let chat = self.chats.entry(partner).or_default();

        let key = message.key();
        if let Some(local) = chat.messages.iter_mut().find(|m| m.matches(&key)) {
            local.status = message.status;
            if message.height.is_some() {
                local.height = message.height;
            }
            return false;
        }

        if let Some(intent) = message.transfer()
            && chat
                .messages
                .iter()
                .any(|m| m.transfer().is_some_and(|t| t.hash == intent.hash))
        {
            return false;
        }

        if message.real_id.is_some() && message.local_id == 0 {
            message.local_id = self.next_local_id;
            self.next_local_id += 1;
        }

        let incoming = message.sender_id != self.user_id;
        let fresh = match message.height {
            None => true,
            Some(h) => self.last_message_height > 0 && h > self.last_message_height,
        };
        if incoming && fresh {
            chat.unread += 1;
        }

        chat.messages.push(message);
        true
    }

    /// Assign the real id and/or status of a message found by either key.
    pub fn update_message(
        &mut self,
        partner: &str,
        key: &MessageKey,
        real_id: Option<String>,
        status: Option<TxStatus>,
    ) -> bool {
        let Some(message) = self
            .chats
            .get_mut(partner)
            .and_then(|c| c.messages.iter_mut().find(|m| m.matches(key)))
        else {
            return false;
        };

        if let Some(real_id) = real_id {
            message.real_id = Some(real_id);
        }
        if let Some(status) = status {
            message.status = status;
        }
        true
    }

    pub fn find(&self, partner: &str, key: &MessageKey) -> Option<&ChatMessage> {
        self.chats.get(partner)?.messages.iter().find(|m| m.matches(key))
    }

    /// Search every chat.
    pub fn find_any(&self, key: &MessageKey) -> Option<&ChatMessage> {
        self.chats
            .values()
            .flat_map(|c| c.messages.iter())
            .find(|m| m.matches(key))
    }

    /// Messages with one contact, oldest first.
    pub fn messages(&self, partner: &str) -> Vec<&ChatMessage> {
        let Some(chat) = self.chats.get(partner) else {
            return Vec::new();
        };
        let mut messages: Vec<&ChatMessage> = chat.messages.iter().collect();
        messages.sort_by_key(|m| (m.timestamp.unwrap_or(i64::MAX), m.local_id));
        messages
    }

    pub fn partners(&self) -> Vec<&str> {
        self.chats.keys().map(String::as_str).collect()
    }

    /// Reactions to a message.
    pub fn reactions(&self, partner: &str, message_id: &str) -> Vec<&ChatMessage> {
        self.messages(partner)
            .into_iter()
            .filter(|m| matches!(&m.kind, MessageKind::Reaction { react_to, .. } if react_to == message_id))
            .collect()
    }

    pub fn last_reaction(&self, partner: &str, message_id: &str, sender_id: &str) -> Option<&ChatMessage> {
        self.reactions(partner, message_id)
            .into_iter()
            .rev()
            .find(|m| m.sender_id == sender_id)
    }

    pub fn unread(&self, partner: &str) -> u32 {
        self.chats.get(partner).map_or(0, Chat::unread)
    }

    pub fn mark_as_read(&mut self, partner: &str) {
        if let Some(chat) = self.chats.get_mut(partner) {
            chat.unread = 0;
        }
    }

    pub fn mark_all_as_read(&mut self) {
        for chat in self.chats.values_mut() {
            chat.unread = 0;
        }
    }

    pub fn last_message_height(&self) -> u64 {
        self.last_message_height
    }

    pub fn set_last_message_height(&mut self, height: u64) {
        self.last_message_height = self.last_message_height.max(height);
    }

    pub fn reset(&mut self) {
        let user_id = std::mem::take(&mut self.user_id);
        *self = Self::new(user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> MessageKind {
        MessageKind::Text {
            text: s.into(),
            reply_to: None,
        }
    }

    fn transfer(hash: &str) -> MessageKind {
        MessageKind::Transfer(TransferIntent {
            asset: "BTC".into(),
            hash: hash.into(),
            amount: "0.1".into(),
            comment: None,
        })
    }

    #[test]
    fn test_provisional_key_retired_after_real_id() {
        let mut store = ChatStore::new("U1");
        let msg = store.create_local("U2", text("hi"), 100);
        let local = msg.key();
        store.push_message(msg);

        assert!(store.find("U2", &local).is_some());
        assert!(store.update_message("U2", &local, Some("777".into()), Some(TxStatus::Registered)));

        assert!(store.find("U2", &local).is_none());
        let found = store.find("U2", &MessageKey::Real("777".into())).unwrap();
        assert_eq!(found.status, TxStatus::Registered);
        assert!(store.find_any(&MessageKey::Real("777".into())).is_some());
    }

    #[test]
    fn test_push_existing_updates_status() {
        let mut store = ChatStore::new("U1");
        let mut msg = ChatMessage::remote("9", "U2", "U1", text("yo"));
        assert!(store.push_message(msg.clone()));
        msg.status = TxStatus::Confirmed;
        msg.height = Some(50);
        assert!(!store.push_message(msg));
        let found = store.find("U2", &MessageKey::Real("9".into())).unwrap();
        assert_eq!(found.status, TxStatus::Confirmed);
        assert_eq!(found.height, Some(50));
    }

    #[test]
    fn test_transfer_deduplicated_by_hash() {
        let mut store = ChatStore::new("U1");
        let local = store.create_local("U2", transfer("abc"), 1);
        assert!(store.push_message(local));
        let remote = ChatMessage::remote("55", "U1", "U2", transfer("abc"));
        assert!(!store.push_message(remote));
        assert_eq!(store.messages("U2").len(), 1);
    }

    #[test]
    fn test_unread_counts_incoming_only() {
        let mut store = ChatStore::new("U1");
        store.push_message(ChatMessage::remote("1", "U2", "U1", text("a")));
        let own = store.create_local("U2", text("b"), 5);
        store.push_message(own);
        assert_eq!(store.unread("U2"), 1);

        store.set_last_message_height(100);
        let mut old = ChatMessage::remote("2", "U2", "U1", text("c"));
        old.height = Some(90);
        store.push_message(old);
        assert_eq!(store.unread("U2"), 1);

        store.mark_as_read("U2");
        assert_eq!(store.unread("U2"), 0);
    }

    #[test]
    fn test_reactions() {
        let mut store = ChatStore::new("U1");
        store.push_message(ChatMessage::remote("1", "U2", "U1", text("a")));
        let mut r1 = ChatMessage::remote(
            "2",
            "U2",
            "U1",
            MessageKind::Reaction {
                react_to: "1".into(),
                emoji: "👍".into(),
            },
        );
        r1.timestamp = Some(10);
        let mut r2 = r1.clone();
        r2.real_id = Some("3".into());
        r2.timestamp = Some(20);
        r2.kind = MessageKind::Reaction {
            react_to: "1".into(),
            emoji: "🔥".into(),
        };
        store.push_message(r1);
        store.push_message(r2);

        assert_eq!(store.reactions("U2", "1").len(), 2);
        let last = store.last_reaction("U2", "1", "U2").unwrap();
        assert_eq!(last.real_id.as_deref(), Some("3"));
    }

    #[test]
    fn test_transfer_intent_chain() {
        let intent = TransferIntent {
            asset: "usdt".into(),
            hash: "h".into(),
            amount: "1".into(),
            comment: None,
        };
        assert_eq!(intent.chain(), Some(ChainId::Usdt));
        let unknown = TransferIntent {
            asset: "XYZ".into(),
            ..intent
        };
        assert_eq!(unknown.chain(), None);
    }

    #[test]
    fn test_reset_keeps_user() {
        let mut store = ChatStore::new("U1");
        store.push_message(ChatMessage::remote("1", "U2", "U1", text("a")));
        store.reset();
        assert!(store.partners().is_empty());
        assert_eq!(store.user_id(), "U1");
    }
}
