//! Command entry point.

use axum::{extract::State, Json};
use serde_json::Value;
use tokio::sync::oneshot;

use super::{success, ApiResult};
use crate::cmp::Command;
use crate::errors::CmpError;
use crate::models::CommandRequest;
use crate::AppState;

/// POST /api/cmp - Run one CMP command.
///
/// Commands sent before the CMP has loaded wait in the queue; the response is
/// written when the command's callback fires.
pub async fn run_command(
    State(state): State<AppState>,
    Json(request): Json<CommandRequest>,
) -> ApiResult<Value> {
    let (tx, rx) = oneshot::channel();
    let command = Command::new(request.command, request.parameter).with_callback(move |result| {
        // The client may have disconnected; nothing to report to.
        let _ = tx.send(result);
    });

    state.handle.call(command).await;

    match rx.await {
        Ok(Ok(value)) => success(value),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(CmpError::Internal(
            "Command finished without a result".to_string(),
        )),
    }
}
