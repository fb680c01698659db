use serde::Deserialize;
use serde_json::{json, Value};

use crate::catalog::ItemSort;
use crate::commands::parse_payload;
use crate::settings::InventorySettings;
use crate::{lock, payload_id, value_str, AppState};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListPayload {
    #[serde(default, alias = "search")]
    query: Option<String>,
    #[serde(default, alias = "filter")]
    sort: Option<ItemSort>,
    /// The sale screen only lists items with stock left.
    #[serde(default, alias = "available_only")]
    available_only: bool,
}

pub async fn catalog_refresh(state: &AppState, _payload: Option<Value>) -> Result<Value, String> {
    let count = state
        .catalog
        .refresh(&state.backend)
        .await
        .map_err(|e| e.to_string())?;
    Ok(json!({
        "count": count,
        "loadedAt": state.catalog.loaded_at(),
    }))
}

pub async fn catalog_list(state: &AppState, payload: Option<Value>) -> Result<Value, String> {
    let p: ListPayload = parse_payload(payload)?;
    let query = p.query.unwrap_or_default();
    let mut items = state.catalog.filtered(&query, p.sort.unwrap_or_default());
    if p.available_only {
        items.retain(|i| i.stock > 0);
    }
    serde_json::to_value(items).map_err(|e| e.to_string())
}

pub async fn catalog_get(state: &AppState, payload: Option<Value>) -> Result<Value, String> {
    let id = payload_id(payload.as_ref(), &["id", "itemId", "item_id"])
        .ok_or("Missing item id")?;
    let item = state.catalog.get(id).ok_or("Barang tidak ditemukan")?;
    serde_json::to_value(item).map_err(|e| e.to_string())
}

pub async fn catalog_find_by_barcode(
    state: &AppState,
    payload: Option<Value>,
) -> Result<Value, String> {
    let code = match payload {
        Some(Value::String(s)) => s,
        Some(v) => value_str(&v, &["barcode", "code"]).unwrap_or_default(),
        None => String::new(),
    };
    Ok(state
        .catalog
        .find_by_barcode(&code)
        .map(|item| json!(item))
        .unwrap_or(Value::Null))
}

/// Low-stock warnings for the inventory badge, using the stored threshold.
pub async fn catalog_low_stock(state: &AppState, _payload: Option<Value>) -> Result<Value, String> {
    let settings = {
        let conn = lock(&state.db.conn);
        InventorySettings::load(&conn)
    };
    if !settings.enable_low_stock_alerts {
        return Ok(json!({
            "enabled": false,
            "threshold": settings.low_stock_threshold,
            "low": [],
            "out": [],
            "warningCount": 0,
        }));
    }
    let report = state.catalog.low_stock(settings.low_stock_threshold);
    Ok(json!({
        "enabled": true,
        "threshold": settings.low_stock_threshold,
        "warningCount": report.warning_count(),
        "low": report.low,
        "out": report.out,
    }))
}
