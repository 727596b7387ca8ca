//! Consent record model: the authoritative, persisted consent decisions.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Version of this CMP implementation.
pub const CMP_VERSION: u16 = 1;
/// Registered CMP id.
pub const CMP_ID: u16 = 1;
/// Version of the consent cookie layout.
pub const COOKIE_VERSION: u8 = 1;

/// Current time truncated to the millisecond precision the cookie stores.
pub fn now_millis() -> DateTime<Utc> {
    truncate_millis(Utc::now())
}

/// Drop sub-millisecond precision from a timestamp.
pub fn truncate_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ts.timestamp_millis()).unwrap_or(ts)
}

/// Schema identifiers stamped on every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CmpSchema {
    pub cmp_version: u16,
    pub cmp_id: u16,
    pub cookie_version: u8,
}

impl Default for CmpSchema {
    fn default() -> Self {
        Self {
            cmp_version: CMP_VERSION,
            cmp_id: CMP_ID,
            cookie_version: COOKIE_VERSION,
        }
    }
}

/// The consent decisions of one user.
///
/// Map keys are the ids known at the last catalog sync. An id without an
/// entry never carries consent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentRecord {
    pub cmp_version: u16,
    pub cmp_id: u16,
    pub cookie_version: u8,
    /// Version of the vendor list the vendor map was last reconciled against
    pub vendor_list_version: u16,
    pub created: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub global_consent: bool,
    pub vendor_consent: BTreeMap<u16, bool>,
    pub purpose_consent: BTreeMap<u16, bool>,
    pub publisher_consent: BTreeMap<u16, bool>,
}

impl ConsentRecord {
    /// A "no data yet" record for a first visit.
    pub fn empty(schema: CmpSchema, now: DateTime<Utc>) -> Self {
        let now = truncate_millis(now);
        Self {
            cmp_version: schema.cmp_version,
            cmp_id: schema.cmp_id,
            cookie_version: schema.cookie_version,
            vendor_list_version: 0,
            created: now,
            last_updated: now,
            global_consent: false,
            vendor_consent: BTreeMap::new(),
            purpose_consent: BTreeMap::new(),
            publisher_consent: BTreeMap::new(),
        }
    }

    /// Restamp schema identifiers with the running implementation's.
    pub fn with_schema(mut self, schema: CmpSchema) -> Self {
        self.cmp_version = schema.cmp_version;
        self.cmp_id = schema.cmp_id;
        self.cookie_version = schema.cookie_version;
        self
    }

    /// Mark the record as modified now.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_updated = truncate_millis(now);
    }
}

/// Which part of the record a mutation changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "id", rename_all = "camelCase")]
pub enum ConsentKey {
    Global,
    Vendor(u16),
    Purpose(u16),
    Publisher(u16),
    AllVendors,
    AllPurposes,
}

impl ConsentKey {
    /// Whether the change lives in the publisher cookie rather than the vendor cookie.
    pub fn is_publisher(&self) -> bool {
        matches!(self, ConsentKey::Publisher(_))
    }
}
