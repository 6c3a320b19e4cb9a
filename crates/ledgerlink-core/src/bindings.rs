//! Contact address bindings discovered through the home chain's key-value store.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::types::{ChainId, Timestamp};

/// How long a verified binding is trusted (3 hours).
pub const ADDRESS_VALID_TIMEOUT_MS: i64 = 3 * 60 * 60 * 1000;

/// Maximum number of stored address records read per lookup.
pub const MAXIMUM_ADDRESSES: u32 = 20;

/// A contact's verified address on one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressBinding {
    pub address: String,
    pub verify_timestamp: Timestamp,
    /// Every distinct address found when more than one binding was stored.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inconsistent: Vec<String>,
}

impl AddressBinding {
    pub fn is_valid_at(&self, now: Timestamp) -> bool {
        now - self.verify_timestamp < ADDRESS_VALID_TIMEOUT_MS
    }

    pub fn is_inconsistent(&self) -> bool {
        self.inconsistent.len() > 1
    }
}

/// One key-value record as returned by the home chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub value: String,
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
}

/// Addresses parsed from stored records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAddresses {
    /// Newest stored address.
    pub main_address: String,
    /// Distinct addresses, newest first.
    pub stored_addresses: Vec<String>,
}

impl StoredAddresses {
    pub fn addresses_count(&self) -> usize {
        self.stored_addresses.len()
    }
}

/// Parse address records for `chain`. Blank values are skipped; duplicates
/// (per the chain's address comparison) collapse onto their newest record.
pub fn parse_stored_addresses(records: &[StoredRecord], chain: ChainId) -> Option<StoredAddresses> {
    let mut sorted: Vec<&StoredRecord> = records.iter().collect();
    sorted.sort_by(|a, b| b.timestamp.unwrap_or(0).cmp(&a.timestamp.unwrap_or(0)));

    let mut distinct: Vec<String> = Vec::new();
    for record in sorted {
        let value = record.value.trim();
        if value.is_empty() {
            continue;
        }
        if !distinct.iter().any(|d| chain.same_address(d, value)) {
            distinct.push(value.to_string());
        }
    }

    let main_address = distinct.first()?.clone();
    Some(StoredAddresses {
        main_address,
        stored_addresses: distinct,
    })
}

/// A contact entry as persisted in the contact list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactEntry {
    #[serde(default, rename = "displayName", skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub bindings: BTreeMap<ChainId, AddressBinding>,
}

/// All known contacts, keyed by home-chain address.
#[derive(Debug, Clone, Default)]
pub struct ContactBook {
    list: HashMap<String, ContactEntry>,
    /// Time of the last local change not yet saved.
    last_change: Option<Timestamp>,
    /// Time of the last contact list fetch.
    last_update: Option<Timestamp>,
}

impl ContactBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contact(&self, partner: &str) -> Option<&ContactEntry> {
        self.list.get(partner)
    }

    pub fn display_name(&self, partner: &str) -> Option<&str> {
        self.list.get(partner)?.display_name.as_deref()
    }

    pub fn set_display_name(&mut self, partner: &str, name: String, now: Timestamp) {
        self.list.entry(partner.to_string()).or_default().display_name = Some(name);
        self.last_change = Some(now);
    }

    /// Any binding for the contact, verified or stale.
    pub fn binding(&self, partner: &str, chain: ChainId) -> Option<&AddressBinding> {
        self.list.get(partner)?.bindings.get(&chain.binding_chain())
    }

    /// A binding still inside its validity window.
    pub fn valid_binding(&self, partner: &str, chain: ChainId, now: Timestamp) -> Option<&AddressBinding> {
        self.binding(partner, chain).filter(|b| b.is_valid_at(now))
    }

    /// Record a freshly verified address. Clears any previous inconsistency.
    pub fn set_address(&mut self, partner: &str, chain: ChainId, address: String, now: Timestamp) {
        let entry = self.list.entry(partner.to_string()).or_default();
        entry.bindings.insert(
            chain.binding_chain(),
            AddressBinding {
                address,
                verify_timestamp: now,
                inconsistent: Vec::new(),
            },
        );
    }

    pub fn set_inconsistency(&mut self, partner: &str, chain: ChainId, addresses: Vec<String>) {
        if let Some(binding) = self
            .list
            .get_mut(partner)
            .and_then(|e| e.bindings.get_mut(&chain.binding_chain()))
        {
            binding.inconsistent = addresses;
        }
    }

    /// Merge a fetched contact list. Fetched entries overwrite local fields they carry.
    pub fn merge_contact_list(&mut self, contacts: HashMap<String, ContactEntry>, now: Timestamp) {
        for (uid, fetched) in contacts {
            let entry = self.list.entry(uid).or_default();
            if fetched.display_name.is_some() {
                entry.display_name = fetched.display_name;
            }
            entry.bindings.extend(fetched.bindings);
        }
        self.last_update = Some(now);
    }

    /// Contact list in its persisted form.
    pub fn export(&self) -> HashMap<String, ContactEntry> {
        self.list.clone()
    }

    pub fn last_change(&self) -> Option<Timestamp> {
        self.last_change
    }

    pub fn set_last_change(&mut self, value: Option<Timestamp>) {
        self.last_change = value;
    }

    pub fn last_update(&self) -> Option<Timestamp> {
        self.last_update
    }

    pub fn mark_updated(&mut self, now: Timestamp) {
        self.last_update = Some(now);
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
