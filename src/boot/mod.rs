//! Boot sequence.
//!
//! Each stage consumes the previous stage's context and returns the next one:
//! read cookies, construct the store (announcing `isLoaded` and draining the
//! command queue), then fetch both catalogs concurrently and announce
//! `cmpReady` once both have been reconciled.

use std::sync::{Arc, OnceLock};

use serde::Serialize;

use crate::catalog::CatalogClient;
use crate::cmp::{CmpHandle, CommandProcessor};
use crate::config::{Config, DEFAULT_COLOR};
use crate::cookie::{
    ConsentCookieCodec, DecodedConsent, PUBLISHER_COOKIE_NAME, VENDOR_COOKIE_NAME,
};
use crate::db::CookieStorage;
use crate::errors::{BootError, BootStage, CmpError};
use crate::models::CmpSchema;
use crate::store::{ConsentStore, SharedStore, StoreOptions};

/// What the UI collaborator should do after boot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UiDecision {
    pub show_ui: bool,
    /// Theme color to inject, when it differs from the default
    pub custom_color: Option<String>,
}

/// Decide whether the consent UI is shown.
///
/// An explicit `forceShowUI: true` always shows it. Otherwise (unset or
/// `false`) the UI is shown only when neither consent cookie exists.
pub fn decide_ui(force_show_ui: Option<bool>, cookie_present: bool, color: &str) -> UiDecision {
    let show_ui = force_show_ui == Some(true) || !cookie_present;
    let custom_color = Some(color)
        .filter(|c| !c.is_empty() && !c.eq_ignore_ascii_case(DEFAULT_COLOR))
        .map(str::to_string);
    UiDecision {
        show_ui,
        custom_color,
    }
}

/// Everything boot needs; passed by value through the stages.
#[derive(Clone)]
pub struct BootContext {
    pub config: Arc<Config>,
    pub storage: Arc<dyn CookieStorage>,
    pub catalogs: CatalogClient,
    pub handle: CmpHandle,
    /// Published as soon as the store exists, even if the catalogs never load
    pub ui: Arc<OnceLock<UiDecision>>,
}

/// Output of the cookie stage.
pub struct CookiesRead {
    ctx: BootContext,
    decoded: DecodedConsent,
}

/// Output of the store stage.
pub struct StoreBuilt {
    ctx: BootContext,
    store: SharedStore,
    ui: UiDecision,
}

/// Fully booted CMP.
pub struct Booted {
    pub store: SharedStore,
    pub ui: UiDecision,
}

impl BootContext {
    pub async fn read_cookies(self) -> Result<CookiesRead, BootError> {
        self.handle.begin_boot().await;

        let vendor = self
            .storage
            .read(VENDOR_COOKIE_NAME)
            .await
            .map_err(|e| BootError::new(BootStage::ReadCookies, e))?;
        let publisher = self
            .storage
            .read(PUBLISHER_COOKIE_NAME)
            .await
            .map_err(|e| BootError::new(BootStage::ReadCookies, e))?;

        let decoded = ConsentCookieCodec::decode(vendor.as_deref(), publisher.as_deref());
        match &decoded {
            DecodedConsent::Absent => tracing::info!("No consent cookies found (first visit)"),
            DecodedConsent::Empty => {
                tracing::warn!("Consent cookies present but unreadable; discarding them");
                for name in [VENDOR_COOKIE_NAME, PUBLISHER_COOKIE_NAME] {
                    if let Err(e) = self.storage.remove(name).await {
                        tracing::warn!("Failed to remove cookie {}: {}", name, e);
                    }
                }
            }
            DecodedConsent::Record(record) => tracing::info!(
                "Loaded consent cookies last updated {}",
                record.last_updated
            ),
        }

        Ok(CookiesRead { ctx: self, decoded })
    }
}

impl CookiesRead {
    pub async fn construct_store(self) -> Result<StoreBuilt, BootError> {
        let CookiesRead { ctx, decoded } = self;
        let config = &ctx.config;

        let ui = decide_ui(config.force_show_ui, decoded.cookie_present(), &config.color);
        if ctx.ui.set(ui.clone()).is_err() {
            tracing::warn!("UI decision already published; keeping the first one");
        }

        let options = StoreOptions {
            schema: CmpSchema::default(),
            publisher_name: config.publisher_name.clone(),
            publisher_purpose_ids: config.publisher_purpose_ids.clone(),
            cookie_max_age: config.cookie_max_age(),
        };
        let store = ConsentStore::new(options, decoded, Arc::clone(&ctx.storage)).into_shared();

        tracing::info!(
            "Successfully loaded CMP version {}",
            env!("CARGO_PKG_VERSION")
        );
        store.lock().await.mark_loaded();

        ctx.handle
            .install(CommandProcessor::new(Arc::clone(&store)))
            .await
            .map_err(|e| BootError::new(BootStage::ConstructStore, e))?;

        Ok(StoreBuilt { ctx, store, ui })
    }
}

impl StoreBuilt {
    /// Fetch both lists concurrently; each reconciles as soon as it arrives.
    pub async fn fetch_catalogs(self) -> Result<Booted, BootError> {
        let StoreBuilt { ctx, store, ui } = self;

        let vendors = async {
            let catalog = ctx.catalogs.fetch_vendor_list().await?;
            store.lock().await.update_vendor_list(catalog);
            Ok::<(), CmpError>(())
        };
        let purposes = async {
            let catalog = ctx.catalogs.fetch_purpose_list().await?;
            store.lock().await.update_purpose_list(catalog);
            Ok::<(), CmpError>(())
        };

        let (vendors, purposes) = tokio::join!(vendors, purposes);

        if let Err(e) = &vendors {
            tracing::error!("Failed to load vendor list: {}", e);
        }
        if let Err(e) = &purposes {
            tracing::error!("Failed to load purpose list: {}", e);
        }
        vendors
            .and(purposes)
            .map_err(|e| BootError::new(BootStage::FetchCatalogs, e))?;

        store.lock().await.mark_ready();
        tracing::info!("CMP ready");

        Ok(Booted { store, ui })
    }
}

/// Run the whole boot sequence.
///
/// A failure before the store exists rejects every queued command. A catalog
/// failure leaves the store usable but never fires `cmpReady`.
pub async fn boot(ctx: BootContext) -> Result<Booted, BootError> {
    let handle = ctx.handle.clone();
    tracing::debug!("Using configuration: {:?}", ctx.config);

    let store_built = match ctx.read_cookies().await {
        Ok(cookies) => cookies.construct_store().await,
        Err(e) => Err(e),
    };

    let store_built = match store_built {
        Ok(built) => built,
        Err(e) => {
            tracing::error!("Failed to load CMP: {}", e);
            handle.fail_pending(&e.source).await;
            return Err(e);
        }
    };

    store_built.fetch_catalogs().await.map_err(|e| {
        tracing::error!("Failed to load lists. CMP not ready: {}", e);
        e
    })
}
