//! Consent store: the single source of truth for consent state.
//!
//! Seeded from the decoded cookies, reconciled against the vendor and purpose
//! catalogs as they arrive, and mutated by the UI and the command API. Every
//! mutation builds the next record, persists it, and only then swaps it in and
//! notifies listeners, so a listener never observes a half-applied change.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Duration;
use tokio::sync::Mutex;

use crate::cookie::{
    ConsentCookieCodec, DecodedConsent, EncodedConsent, PUBLISHER_COOKIE_NAME,
    VENDOR_COOKIE_NAME,
};
use crate::db::CookieStorage;
use crate::errors::CmpError;
use crate::models::{
    now_millis, CmpSchema, ConsentKey, ConsentRecord, PurposeCatalog, VendorCatalog,
};
use crate::notify::{
    CatalogKind, CmpEvent, Listener, Notifier, SubscriptionId, CMP_READY, IS_LOADED,
};

/// Store shared between the command processor and the boot sequence.
pub type SharedStore = Arc<Mutex<ConsentStore>>;

/// Store settings taken from configuration.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub schema: CmpSchema,
    pub publisher_name: String,
    pub publisher_purpose_ids: Vec<u16>,
    pub cookie_max_age: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            schema: CmpSchema::default(),
            publisher_name: String::new(),
            publisher_purpose_ids: Vec::new(),
            cookie_max_age: Duration::days(390),
        }
    }
}

pub struct ConsentStore {
    record: ConsentRecord,
    options: StoreOptions,
    vendor_catalog: Option<VendorCatalog>,
    purpose_catalog: Option<PurposeCatalog>,
    storage: Arc<dyn CookieStorage>,
    notifier: Notifier<ConsentStore>,
    loaded: bool,
    ready: bool,
}

impl std::fmt::Debug for ConsentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsentStore")
            .field("record", &self.record)
            .field("loaded", &self.loaded)
            .field("ready", &self.ready)
            .finish_non_exhaustive()
    }
}

impl ConsentStore {
    /// Build the store from decoded cookie data, or a fresh record on first
    /// visit and on undecodable cookies.
    pub fn new(
        options: StoreOptions,
        decoded: DecodedConsent,
        storage: Arc<dyn CookieStorage>,
    ) -> Self {
        let record = match decoded {
            DecodedConsent::Record(record) => record.with_schema(options.schema),
            DecodedConsent::Absent | DecodedConsent::Empty => {
                ConsentRecord::empty(options.schema, now_millis())
            }
        };

        let mut store = Self {
            record,
            options,
            vendor_catalog: None,
            purpose_catalog: None,
            storage,
            notifier: Notifier::new(),
            loaded: false,
            ready: false,
        };

        if !store.options.publisher_purpose_ids.is_empty() {
            let ids = store.options.publisher_purpose_ids.clone();
            store.record.publisher_consent =
                reconcile(&store.record.publisher_consent, ids.into_iter(), false);
        }

        store
    }

    pub fn into_shared(self) -> SharedStore {
        Arc::new(Mutex::new(self))
    }

    // ==================== QUERIES ====================

    pub fn record(&self) -> &ConsentRecord {
        &self.record
    }

    pub fn publisher_name(&self) -> &str {
        &self.options.publisher_name
    }

    pub fn vendor_catalog(&self) -> Option<&VendorCatalog> {
        self.vendor_catalog.as_ref()
    }

    pub fn purpose_catalog(&self) -> Option<&PurposeCatalog> {
        self.purpose_catalog.as_ref()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn has_global_consent(&self) -> bool {
        self.record.global_consent
    }

    /// Consent for a vendor; ids without an entry have none.
    /// Lookups are O(log n) over at most 2^16 ids.
    pub fn has_vendor_consent(&self, vendor_id: u16) -> bool {
        self.record
            .vendor_consent
            .get(&vendor_id)
            .copied()
            .unwrap_or(false)
    }

    pub fn has_purpose_consent(&self, purpose_id: u16) -> bool {
        self.record
            .purpose_consent
            .get(&purpose_id)
            .copied()
            .unwrap_or(false)
    }

    pub fn has_publisher_consent(&self, purpose_id: u16) -> bool {
        self.record
            .publisher_consent
            .get(&purpose_id)
            .copied()
            .unwrap_or(false)
    }

    /// Both cookie values for the current record.
    pub fn encoded_consent(&self) -> EncodedConsent {
        ConsentCookieCodec::encode(&self.record)
    }

    // ==================== MUTATIONS ====================

    /// Set the "consent to all" flag. Existing per-id entries are untouched.
    pub async fn set_global_consent(&mut self, consent: bool) -> Result<bool, CmpError> {
        let mut next = self.record.clone();
        next.global_consent = consent;
        self.commit(next, ConsentKey::Global).await?;
        Ok(true)
    }

    /// Returns `Ok(false)` without persisting when the vendor is unknown.
    pub async fn set_vendor_consent(
        &mut self,
        vendor_id: u16,
        consent: bool,
    ) -> Result<bool, CmpError> {
        if !self.record.vendor_consent.contains_key(&vendor_id) {
            tracing::debug!("Ignoring consent for unknown vendor {}", vendor_id);
            return Ok(false);
        }
        let mut next = self.record.clone();
        next.vendor_consent.insert(vendor_id, consent);
        self.commit(next, ConsentKey::Vendor(vendor_id)).await?;
        Ok(true)
    }

    /// Returns `Ok(false)` without persisting when the purpose is unknown.
    pub async fn set_purpose_consent(
        &mut self,
        purpose_id: u16,
        consent: bool,
    ) -> Result<bool, CmpError> {
        if !self.record.purpose_consent.contains_key(&purpose_id) {
            tracing::debug!("Ignoring consent for unknown purpose {}", purpose_id);
            return Ok(false);
        }
        let mut next = self.record.clone();
        next.purpose_consent.insert(purpose_id, consent);
        self.commit(next, ConsentKey::Purpose(purpose_id)).await?;
        Ok(true)
    }

    /// Returns `Ok(false)` without persisting when the publisher purpose is unknown.
    pub async fn set_publisher_consent(
        &mut self,
        purpose_id: u16,
        consent: bool,
    ) -> Result<bool, CmpError> {
        if !self.record.publisher_consent.contains_key(&purpose_id) {
            tracing::debug!("Ignoring consent for unknown publisher purpose {}", purpose_id);
            return Ok(false);
        }
        let mut next = self.record.clone();
        next.publisher_consent.insert(purpose_id, consent);
        self.commit(next, ConsentKey::Publisher(purpose_id)).await?;
        Ok(true)
    }

    /// Set every known vendor at once.
    pub async fn select_all_vendors(&mut self, consent: bool) -> Result<bool, CmpError> {
        let mut next = self.record.clone();
        next.vendor_consent.values_mut().for_each(|v| *v = consent);
        self.commit(next, ConsentKey::AllVendors).await?;
        Ok(true)
    }

    /// Set every known purpose at once.
    pub async fn select_all_purposes(&mut self, consent: bool) -> Result<bool, CmpError> {
        let mut next = self.record.clone();
        next.purpose_consent.values_mut().for_each(|v| *v = consent);
        self.commit(next, ConsentKey::AllPurposes).await?;
        Ok(true)
    }

    /// Stamp, persist, swap in, notify.
    async fn commit(&mut self, mut next: ConsentRecord, key: ConsentKey) -> Result<(), CmpError> {
        next.touch(now_millis());

        let (name, value) = if key.is_publisher() {
            (PUBLISHER_COOKIE_NAME, ConsentCookieCodec::encode_publisher(&next))
        } else {
            (VENDOR_COOKIE_NAME, ConsentCookieCodec::encode_vendor(&next))
        };

        if let Err(e) = self
            .storage
            .write(name, &value, self.options.cookie_max_age)
            .await
        {
            tracing::error!("Failed to persist {} after {:?}: {}", name, key, e);
            return Err(e);
        }

        self.record = next;
        self.notify(CmpEvent::ConsentChanged(key));
        Ok(())
    }

    // ==================== RECONCILIATION ====================

    /// Reconcile vendor consent against a freshly fetched vendor list.
    ///
    /// Known vendors keep their decision, new vendors take the current global
    /// consent, vendors no longer listed are dropped. Nothing is persisted.
    pub fn update_vendor_list(&mut self, catalog: VendorCatalog) {
        let default = self.record.global_consent;
        self.record.vendor_consent =
            reconcile(&self.record.vendor_consent, catalog.vendor_ids(), default);
        self.record.vendor_list_version = catalog.vendor_list_version;
        self.vendor_catalog = Some(catalog);
        self.notify(CmpEvent::CatalogUpdated(CatalogKind::Vendors));
    }

    /// Reconcile purpose consent against the purpose list and publisher
    /// consent against the publisher's declared purposes.
    pub fn update_purpose_list(&mut self, catalog: PurposeCatalog) {
        let default = self.record.global_consent;
        self.record.purpose_consent =
            reconcile(&self.record.purpose_consent, catalog.purpose_ids(), default);

        let publisher_ids = if self.options.publisher_purpose_ids.is_empty() {
            catalog.publisher_purpose_ids.clone().unwrap_or_default()
        } else {
            self.options.publisher_purpose_ids.clone()
        };
        self.record.publisher_consent = reconcile(
            &self.record.publisher_consent,
            publisher_ids.into_iter(),
            false,
        );

        self.purpose_catalog = Some(catalog);
        self.notify(CmpEvent::CatalogUpdated(CatalogKind::Purposes));
    }

    // ==================== LIFECYCLE & EVENTS ====================

    /// Fire `isLoaded` the first time the store is handed to callers.
    pub fn mark_loaded(&mut self) {
        if !self.loaded {
            self.loaded = true;
            self.notify(CmpEvent::IsLoaded);
        }
    }

    /// Fire `cmpReady` once both catalogs are in.
    pub fn mark_ready(&mut self) {
        if !self.ready {
            self.ready = true;
            self.notify(CmpEvent::CmpReady);
        }
    }

    /// Subscribe to an event. Subscribing to `isLoaded` or `cmpReady` after it
    /// fired invokes the listener once immediately.
    pub fn add_event_listener(
        &mut self,
        event: &str,
        listener: Listener<ConsentStore>,
    ) -> SubscriptionId {
        let replay = match event {
            IS_LOADED if self.loaded => Some(CmpEvent::IsLoaded),
            CMP_READY if self.ready => Some(CmpEvent::CmpReady),
            _ => None,
        };
        if let Some(event) = replay {
            listener(&event, self);
        }
        self.notifier.subscribe(event, listener)
    }

    pub fn remove_event_listener(&mut self, id: SubscriptionId) -> bool {
        self.notifier.unsubscribe(id)
    }

    fn notify(&self, event: CmpEvent) {
        self.notifier.notify(&event, self);
    }
}

/// Carry over prior decisions for ids still listed, default the rest, drop stale ids.
fn reconcile(
    prior: &BTreeMap<u16, bool>,
    ids: impl Iterator<Item = u16>,
    default: bool,
) -> BTreeMap<u16, bool> {
    ids.map(|id| (id, prior.get(&id).copied().unwrap_or(default)))
        .collect()
}
