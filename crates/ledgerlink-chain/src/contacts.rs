//! Contact directory: verified address bindings and the persisted contact
//! list, both read from and written to the home-chain key-value store.

use ledgerlink_core::{
    AddressBinding, ChainId, Clock, ContactBook, ContactEntry, MAXIMUM_ADDRESSES, StoredRecord, Timestamp,
    parse_stored_addresses,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::coalesce::RequestQueue;
use crate::error::SyncError;
use crate::ports::KeyValueStore;
use crate::scheduler::TaskScheduler;

pub const CONTACT_LIST_KEY: &str = "contact_list";
/// Minimum time between two contact list fetches.
pub const CONTACT_LIST_REFRESH_MS: i64 = 3 * 60 * 1000;
/// Quiet period after a local change before the list is saved.
pub const CONTACT_LIST_SAVE_DELAY_MS: i64 = 30 * 1000;
const TICK: Duration = Duration::from_secs(1);

/// Key-value store key under which a contact publishes its address for `chain`.
pub fn address_key(chain: ChainId) -> String {
    format!("{}:address", chain.binding_chain().symbol().to_lowercase())
}

#[derive(Default)]
struct DirectoryState {
    user: Option<String>,
    started: bool,
}

pub struct ContactDirectory {
    kvs: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    book: Mutex<ContactBook>,
    state: Mutex<DirectoryState>,
    scheduler: TaskScheduler,
    lookups: RequestQueue<Vec<StoredRecord>>,
}

impl ContactDirectory {
    pub fn new(kvs: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, max_concurrent: usize) -> Self {
        Self {
            kvs,
            clock,
            book: Mutex::new(ContactBook::new()),
            state: Mutex::new(DirectoryState::default()),
            scheduler: TaskScheduler::new(),
            lookups: RequestQueue::new(max_concurrent),
        }
    }

    fn now(&self) -> Timestamp {
        self.clock.now_ms()
    }

    fn user(&self) -> Option<String> {
        self.state.lock().user.clone()
    }

    /// Begin the background sync tick for `user`. A different user drops the
    /// cached book first.
    pub fn start(self: &Arc<Self>, user: &str, sync_contact_list: bool) {
        {
            let mut state = self.state.lock();
            if state.user.as_deref() != Some(user) {
                self.book.lock().reset();
                state.user = Some(user.to_string());
            }
            if state.started {
                return;
            }
            state.started = true;
        }
        self.lookups.start();

        if sync_contact_list {
            let directory = Arc::clone(self);
            self.scheduler.schedule_every(TICK, move || {
                let directory = Arc::clone(&directory);
                async move { directory.tick().await }
            });
        }
        tracing::info!("Contact directory started for {}", user);
    }

    pub fn stop(&self) {
        self.scheduler.cancel_all();
        self.lookups.stop();
        self.state.lock().started = false;
    }

    pub fn reset(&self) {
        self.stop();
        self.book.lock().reset();
        self.state.lock().user = None;
    }

    async fn tick(&self) {
        if let Err(e) = self.fetch_contact_list().await {
            tracing::warn!("Contact list fetch failed: {}", e);
        }
        if let Err(e) = self.save_contact_list().await {
            tracing::warn!("Contact list save failed: {}", e);
        }
    }

    /// Read access to the cached book.
    pub fn with_book<R>(&self, f: impl FnOnce(&ContactBook) -> R) -> R {
        f(&self.book.lock())
    }

    pub fn binding(&self, partner: &str, chain: ChainId) -> Option<AddressBinding> {
        self.book.lock().binding(partner, chain).cloned()
    }

    /// A binding still inside its validity window.
    pub fn valid_binding(&self, partner: &str, chain: ChainId) -> Option<AddressBinding> {
        let now = self.now();
        self.book.lock().valid_binding(partner, chain, now).cloned()
    }

    pub fn set_display_name(&self, partner: &str, name: &str) {
        let now = self.now();
        self.book.lock().set_display_name(partner, name.to_string(), now);
    }

    /// Verified address of `partner` on `chain`, from cache while the binding
    /// is valid, otherwise from the key-value store. `None` when the contact
    /// published nothing or the store could not be read.
    pub async fn fetch_address(&self, partner: &str, chain: ChainId) -> Option<String> {
        if let Some(binding) = self.valid_binding(partner, chain) {
            return Some(binding.address);
        }

        let key = address_key(chain);
        let kvs = Arc::clone(&self.kvs);
        let owner = partner.to_string();
        let store_key = key.clone();
        let records = self
            .lookups
            .request(format!("{}:{}", key, partner), move || async move {
                kvs.get_stored(&store_key, &owner, MAXIMUM_ADDRESSES).await
            })
            .await;

        let records = match records {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!("Address lookup {} for {} failed: {}", key, partner, e);
                return None;
            }
        };

        let Some(parsed) = parse_stored_addresses(&records, chain.binding_chain()) else {
            tracing::debug!("{} has no {} address", partner, chain);
            return None;
        };

        let now = self.now();
        let mut book = self.book.lock();
        book.set_address(partner, chain, parsed.main_address.clone(), now);
        if parsed.addresses_count() > 1 {
            tracing::warn!(
                "{} has {} different {} addresses",
                partner,
                parsed.addresses_count(),
                chain
            );
            book.set_inconsistency(partner, chain, parsed.stored_addresses);
        }
        Some(parsed.main_address)
    }

    /// Merge the stored contact list. Skipped when fetched recently.
    /// Returns the number of contacts merged.
    pub async fn fetch_contact_list(&self) -> Result<usize, SyncError> {
        let Some(user) = self.user() else {
            return Ok(0);
        };
        let now = self.now();
        if self
            .book
            .lock()
            .last_update()
            .is_some_and(|t| now - t < CONTACT_LIST_REFRESH_MS)
        {
            return Ok(0);
        }

        let records = self.kvs.get_stored(CONTACT_LIST_KEY, &user, 1).await?;
        let newest = records.into_iter().max_by_key(|r| r.timestamp.unwrap_or(0));

        let contacts: HashMap<String, ContactEntry> = match newest {
            Some(record) if !record.value.trim().is_empty() => serde_json::from_str(&record.value)?,
            _ => HashMap::new(),
        };
        let count = contacts.len();
        self.book.lock().merge_contact_list(contacts, self.now());
        tracing::debug!("Merged {} contacts", count);
        Ok(count)
    }

    /// Store the contact list if it changed and has been quiet long enough.
    /// Returns true when a save went through.
    pub async fn save_contact_list(&self) -> Result<bool, SyncError> {
        if self.user().is_none() {
            return Ok(false);
        }
        let now = self.now();
        let (change, payload) = {
            let mut book = self.book.lock();
            let Some(change) = book.last_change() else {
                return Ok(false);
            };
            if now - change < CONTACT_LIST_SAVE_DELAY_MS {
                return Ok(false);
            }
            book.set_last_change(None);
            (change, serde_json::to_string(&book.export()))
        };

        let result = match payload {
            Ok(payload) => self.kvs.store_value(CONTACT_LIST_KEY, &payload).await,
            Err(e) => Err(SyncError::from(e)),
        };

        match result {
            Ok(true) => {
                tracing::info!("Contact list saved");
                Ok(true)
            }
            other => {
                let mut book = self.book.lock();
                if book.last_change().is_none() {
                    book.set_last_change(Some(change));
                }
                other.map(|_| false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockKeyValueStore;
    use ledgerlink_core::{ADDRESS_VALID_TIMEOUT_MS, ManualClock};
    use std::sync::atomic::Ordering;

    const NOW: i64 = 1_700_000_000_000;

    fn directory() -> (Arc<ContactDirectory>, Arc<MockKeyValueStore>, Arc<ManualClock>) {
        let kvs = Arc::new(MockKeyValueStore::new("U1"));
        let clock = Arc::new(ManualClock::new(NOW));
        let dir = Arc::new(ContactDirectory::new(kvs.clone(), clock.clone(), 4));
        (dir, kvs, clock)
    }

    #[test]
    fn test_address_key_uses_binding_chain() {
        assert_eq!(address_key(ChainId::Eth), "eth:address");
        assert_eq!(address_key(ChainId::Usdt), "eth:address");
        assert_eq!(address_key(ChainId::Btc), "btc:address");
    }

    #[tokio::test]
    async fn test_fetch_address_caches_while_valid() {
        let (dir, kvs, clock) = directory();
        kvs.put("btc:address", "U2", "1Abc", NOW - 10);

        assert_eq!(dir.fetch_address("U2", ChainId::Btc).await.as_deref(), Some("1Abc"));
        assert_eq!(dir.fetch_address("U2", ChainId::Btc).await.as_deref(), Some("1Abc"));
        assert_eq!(kvs.get_calls.load(Ordering::SeqCst), 1);

        clock.advance(ADDRESS_VALID_TIMEOUT_MS + 1);
        assert!(dir.valid_binding("U2", ChainId::Btc).is_none());
        dir.fetch_address("U2", ChainId::Btc).await;
        assert_eq!(kvs.get_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_multiple_addresses_mark_inconsistency() {
        let (dir, kvs, _) = directory();
        kvs.put("eth:address", "U2", "0xAAA", NOW - 20);
        kvs.put("eth:address", "U2", "0xbbb", NOW - 10);
        kvs.put("eth:address", "U2", "0xaaa", NOW - 30);

        assert_eq!(dir.fetch_address("U2", ChainId::Dai).await.as_deref(), Some("0xbbb"));
        let binding = dir.binding("U2", ChainId::Eth).unwrap();
        assert!(binding.is_inconsistent());
        assert_eq!(binding.inconsistent.len(), 2);
    }

    #[tokio::test]
    async fn test_store_failure_caches_nothing() {
        let (dir, kvs, _) = directory();
        kvs.put("btc:address", "U2", "1Abc", NOW);
        kvs.fail.store(true, Ordering::SeqCst);
        assert_eq!(dir.fetch_address("U2", ChainId::Btc).await, None);
        assert!(dir.binding("U2", ChainId::Btc).is_none());
    }

    #[tokio::test]
    async fn test_contact_list_save_waits_and_restores_marker() {
        let (dir, kvs, clock) = directory();
        dir.start("U1", false);
        dir.set_display_name("U2", "Alice");

        assert!(!dir.save_contact_list().await.unwrap());
        clock.advance(CONTACT_LIST_SAVE_DELAY_MS);

        kvs.refuse_store.store(true, Ordering::SeqCst);
        assert!(!dir.save_contact_list().await.unwrap());
        assert!(dir.with_book(|b| b.last_change().is_some()));

        kvs.refuse_store.store(false, Ordering::SeqCst);
        assert!(dir.save_contact_list().await.unwrap());
        assert!(dir.with_book(|b| b.last_change().is_none()));
        assert!(kvs.latest(CONTACT_LIST_KEY, "U1").unwrap().contains("Alice"));
        dir.stop();
    }

    #[tokio::test]
    async fn test_contact_list_fetch_is_throttled() {
        let (dir, kvs, clock) = directory();
        kvs.put(CONTACT_LIST_KEY, "U1", r#"{"U3":{"displayName":"Bob"}}"#, NOW);
        dir.start("U1", false);

        assert_eq!(dir.fetch_contact_list().await.unwrap(), 1);
        assert_eq!(dir.with_book(|b| b.display_name("U3").map(str::to_string)).as_deref(), Some("Bob"));
        assert_eq!(dir.fetch_contact_list().await.unwrap(), 0);
        assert_eq!(kvs.get_calls.load(Ordering::SeqCst), 1);

        clock.advance(CONTACT_LIST_REFRESH_MS);
        dir.fetch_contact_list().await.unwrap();
        assert_eq!(kvs.get_calls.load(Ordering::SeqCst), 2);
        dir.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_tick_saves_changes() {
        let (dir, kvs, clock) = directory();
        dir.start("U1", true);
        dir.set_display_name("U2", "Alice");
        clock.advance(CONTACT_LIST_SAVE_DELAY_MS);

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert!(kvs.latest(CONTACT_LIST_KEY, "U1").is_some());
        dir.stop();
    }
}
