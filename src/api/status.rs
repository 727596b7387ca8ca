//! Status endpoint.

use axum::extract::State;
use serde::Serialize;

use super::{success, ApiResult};
use crate::boot::UiDecision;
use crate::cmp::ProcessorState;
use crate::AppState;

/// Snapshot of the CMP lifecycle.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CmpStatus {
    pub state: ProcessorState,
    pub queued_commands: usize,
    pub cmp_loaded: bool,
    pub cmp_ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor_list_version: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purpose_list_version: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ui: Option<UiDecision>,
}

/// GET /api/status - Report processor state and readiness.
pub async fn get_status(State(state): State<AppState>) -> ApiResult<CmpStatus> {
    let mut status = CmpStatus {
        state: state.handle.state().await,
        queued_commands: state.handle.queued().await,
        cmp_loaded: false,
        cmp_ready: false,
        vendor_list_version: None,
        purpose_list_version: None,
        ui: state.ui.get().cloned(),
    };

    if let Some(store) = state.handle.store().await {
        let store = store.lock().await;
        status.cmp_loaded = store.is_loaded();
        status.cmp_ready = store.is_ready();
        status.vendor_list_version = store.vendor_catalog().map(|c| c.vendor_list_version);
        status.purpose_list_version = store.purpose_catalog().map(|c| c.version);
    }

    success(status)
}
