//! Remote vendor and purpose catalog client.
//!
//! Each fetch resolves to a parsed catalog or to a `Network`/`Parse` error;
//! the boot sequence runs both fetches concurrently.

use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;

use crate::errors::CmpError;
use crate::models::{PurposeCatalog, VendorCatalog};

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Fetches the vendor list and the purpose list.
#[derive(Debug, Clone)]
pub struct CatalogClient {
    client: Client,
    vendor_list_url: String,
    purpose_list_url: String,
}

impl CatalogClient {
    pub fn new(
        vendor_list_url: impl Into<String>,
        purpose_list_url: impl Into<String>,
    ) -> Result<Self, CmpError> {
        let client = Client::builder().timeout(FETCH_TIMEOUT).build()?;
        Ok(Self::with_client(client, vendor_list_url, purpose_list_url))
    }

    pub fn with_client(
        client: Client,
        vendor_list_url: impl Into<String>,
        purpose_list_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            vendor_list_url: vendor_list_url.into(),
            purpose_list_url: purpose_list_url.into(),
        }
    }

    pub async fn fetch_vendor_list(&self) -> Result<VendorCatalog, CmpError> {
        let catalog: VendorCatalog = self.fetch_json(&self.vendor_list_url).await?;
        tracing::info!(
            "Fetched vendor list version {} with {} vendors",
            catalog.vendor_list_version,
            catalog.vendors.len()
        );
        Ok(catalog)
    }

    pub async fn fetch_purpose_list(&self) -> Result<PurposeCatalog, CmpError> {
        let catalog: PurposeCatalog = self.fetch_json(&self.purpose_list_url).await?;
        tracing::info!(
            "Fetched purpose list version {} with {} purposes",
            catalog.version,
            catalog.purposes.len()
        );
        Ok(catalog)
    }

    async fn fetch_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, CmpError> {
        tracing::debug!("Fetching {}", url);

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CmpError::Network(format!(
                "Fetching {} failed with status {}",
                url, status
            )));
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body)
            .map_err(|e| CmpError::Parse(format!("Malformed document at {}: {}", url, e)))
    }
}
