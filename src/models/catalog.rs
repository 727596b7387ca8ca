//! Vendor and purpose catalogs matching the remote JSON documents.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// A declared reason data may be processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Purpose {
    pub id: u16,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A third party eligible to receive consent-gated data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vendor {
    pub id: u16,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub purpose_ids: BTreeSet<u16>,
    #[serde(default)]
    pub leg_int_purpose_ids: BTreeSet<u16>,
    #[serde(default)]
    pub feature_ids: BTreeSet<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_url: Option<String>,
}

/// The global vendor list. Replaced wholesale on refetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorCatalog {
    pub vendor_list_version: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
    /// Standard purposes listed alongside the vendors
    #[serde(default)]
    pub purposes: Vec<Purpose>,
    pub vendors: Vec<Vendor>,
}

impl VendorCatalog {
    pub fn vendor_ids(&self) -> impl Iterator<Item = u16> + '_ {
        self.vendors.iter().map(|v| v.id)
    }
}

/// The custom purpose list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurposeCatalog {
    #[serde(default)]
    pub version: u16,
    pub purposes: Vec<Purpose>,
    /// Publisher subset declared by the document itself, used when the
    /// configuration declares none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher_purpose_ids: Option<Vec<u16>>,
}

impl PurposeCatalog {
    pub fn purpose_ids(&self) -> impl Iterator<Item = u16> + '_ {
        self.purposes.iter().map(|p| p.id)
    }
}
