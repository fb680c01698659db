use serde_json::{json, Value};

use crate::{diagnostics, lock, AppState};

pub async fn system_about(_state: &AppState, _payload: Option<Value>) -> Result<Value, String> {
    Ok(diagnostics::get_about_info())
}

/// Backend, catalog and local database status for the health screen.
pub async fn system_health(state: &AppState, _payload: Option<Value>) -> Result<Value, String> {
    let db = diagnostics::get_db_health(&state.db)?;
    let pending_corrections = lock(&state.corrections).len();
    Ok(json!({
        "backend": state.backend.kind(),
        "catalogItems": state.catalog.len(),
        "catalogLoadedAt": state.catalog.loaded_at(),
        "pendingStockCorrections": pending_corrections,
        "refreshVersion": state.refresh.version(),
        "database": db,
    }))
}
