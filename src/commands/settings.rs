use serde_json::{json, Value};

use crate::receipt_renderer::ShopHeader;
use crate::settings::{InventorySettings, ReceiptSettings};
use crate::{lock, storage, value_i64, value_str, AppState};

pub async fn settings_get_inventory(
    state: &AppState,
    _payload: Option<Value>,
) -> Result<Value, String> {
    let conn = lock(&state.db.conn);
    serde_json::to_value(InventorySettings::load(&conn)).map_err(|e| e.to_string())
}

/// Partial update: `{ "lowStockThreshold": "5", "autoUpdateStock": false }`.
pub async fn settings_update_inventory(
    state: &AppState,
    payload: Option<Value>,
) -> Result<Value, String> {
    let patch = payload.unwrap_or_else(|| json!({}));
    let conn = lock(&state.db.conn);
    let next = InventorySettings::load(&conn).merged(&patch)?;
    next.save(&conn)?;
    serde_json::to_value(next).map_err(|e| e.to_string())
}

pub async fn settings_get_receipt(
    state: &AppState,
    _payload: Option<Value>,
) -> Result<Value, String> {
    let conn = lock(&state.db.conn);
    serde_json::to_value(ReceiptSettings::load(&conn)).map_err(|e| e.to_string())
}

/// `{ "shopName", "shopAddress", "paperWidth" }`; absent keys keep their value.
pub async fn settings_update_receipt(
    state: &AppState,
    payload: Option<Value>,
) -> Result<Value, String> {
    let v = payload.unwrap_or_else(|| json!({}));
    let conn = lock(&state.db.conn);
    let current = ReceiptSettings::load(&conn);

    let name = value_str(&v, &["shopName", "shop_name"]).unwrap_or(current.shop.name);
    let address = match v.get("shopAddress").or_else(|| v.get("shop_address")) {
        Some(raw) => raw
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        None => current.shop.address,
    };
    let paper_width_mm = match value_i64(&v, &["paperWidth", "paper_width"]) {
        Some(mm) => i32::try_from(mm).map_err(|_| "Lebar kertas tidak valid".to_string())?,
        None => current.paper_width_mm,
    };

    let next = ReceiptSettings {
        shop: ShopHeader { name, address },
        paper_width_mm,
    };
    next.save(&conn)?;
    serde_json::to_value(next).map_err(|e| e.to_string())
}

/// Which backend is configured, without secrets.
pub async fn settings_get_connection(
    state: &AppState,
    _payload: Option<Value>,
) -> Result<Value, String> {
    let mut described = storage::describe_config();
    described["active"] = json!(state.backend.kind());
    Ok(described)
}

/// Store new Supabase credentials. The running backend is kept until restart.
pub async fn settings_update_connection(
    _state: &AppState,
    payload: Option<Value>,
) -> Result<Value, String> {
    let payload = payload.ok_or("Missing credentials")?;
    let mut out = storage::update_supabase_credentials(&payload)?;
    out["restartRequired"] = json!(true);
    Ok(out)
}

pub async fn settings_factory_reset(
    _state: &AppState,
    _payload: Option<Value>,
) -> Result<Value, String> {
    storage::factory_reset()
}
