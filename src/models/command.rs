//! Command payloads and results exchanged with third-party callers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Request body for the command entry point.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRequest {
    pub command: String,
    #[serde(default)]
    pub parameter: serde_json::Value,
}

/// Argument of the per-id consent mutations.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetConsentParameter {
    pub id: u16,
    pub consent: bool,
}

/// Result of `ping`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PingResult {
    pub gdpr_applies_globally: bool,
    pub cmp_loaded: bool,
    pub cmp_ready: bool,
}

/// Result of `getVendorConsents`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VendorConsents {
    /// Encoded vendor consent cookie
    pub metadata: String,
    pub has_global_consent: bool,
    pub purpose_consents: BTreeMap<u16, bool>,
    pub vendor_consents: BTreeMap<u16, bool>,
}

/// Result of `getPublisherConsents`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PublisherConsents {
    /// Encoded publisher consent cookie
    pub metadata: String,
    pub publisher_name: String,
    pub publisher_consents: BTreeMap<u16, bool>,
}

/// Result of `getConsentData`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConsentData {
    pub consent_data: String,
    pub has_global_scope: bool,
}
