//! JSON command layer.
//!
//! Every command has the shape
//! `async fn(&AppState, Option<Value>) -> Result<Value, String>`: loosely
//! typed JSON in, JSON out, errors as user-facing strings. [`dispatch`]
//! routes a command name to its handler for hosts that invoke by name.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{lock, AppState};

pub mod cart;
pub mod catalog;
pub mod checkout;
pub mod inventory;
pub mod quick_stock;
pub mod receipt;
pub mod reports;
pub mod settings;
pub mod system;

/// Deserialize a payload into a typed struct; a missing payload is `{}`.
pub(crate) fn parse_payload<T: DeserializeOwned>(payload: Option<Value>) -> Result<T, String> {
    let value = match payload {
        None | Some(Value::Null) => Value::Object(Default::default()),
        Some(v) => v,
    };
    serde_json::from_value(value).map_err(|e| format!("Data tidak valid: {e}"))
}

/// Reload the catalog after a backend mutation, re-sync cart lines against
/// it and notify subscribers. A failed reload keeps the old snapshot.
pub(crate) async fn refresh_after_mutation(state: &AppState) {
    match state.catalog.refresh(&state.backend).await {
        Ok(_) => {
            let items = state.catalog.items();
            let adjusted = lock(&state.cart).sync_with_catalog(&items);
            if !adjusted.is_empty() {
                debug!(?adjusted, "Cart lines adjusted to refreshed catalog");
            }
        }
        Err(e) => warn!(error = %e, "Catalog reload after mutation failed"),
    }
    state.refresh.trigger();
}

/// Route a command by name.
pub async fn dispatch(
    state: &AppState,
    command: &str,
    payload: Option<Value>,
) -> Result<Value, String> {
    debug!(command, "Dispatching command");
    match command {
        "catalog_refresh" => catalog::catalog_refresh(state, payload).await,
        "catalog_list" => catalog::catalog_list(state, payload).await,
        "catalog_get" => catalog::catalog_get(state, payload).await,
        "catalog_find_by_barcode" => catalog::catalog_find_by_barcode(state, payload).await,
        "catalog_low_stock" => catalog::catalog_low_stock(state, payload).await,

        "inventory_create_item" => inventory::inventory_create_item(state, payload).await,
        "inventory_update_item" => inventory::inventory_update_item(state, payload).await,
        "inventory_delete_item" => inventory::inventory_delete_item(state, payload).await,

        "cart_get" => cart::cart_get(state, payload).await,
        "cart_add" => cart::cart_add(state, payload).await,
        "cart_add_barcode" => cart::cart_add_barcode(state, payload).await,
        "cart_remove" => cart::cart_remove(state, payload).await,
        "cart_update_quantity" => cart::cart_update_quantity(state, payload).await,
        "cart_remove_line" => cart::cart_remove_line(state, payload).await,
        "cart_clear" => cart::cart_clear(state, payload).await,

        "checkout_open" => checkout::checkout_open(state, payload).await,
        "checkout_get" => checkout::checkout_get(state, payload).await,
        "checkout_set_method" => checkout::checkout_set_method(state, payload).await,
        "checkout_set_payment" => checkout::checkout_set_payment(state, payload).await,
        "checkout_submit" => checkout::checkout_submit(state, payload).await,
        "checkout_cancel" => checkout::checkout_cancel(state, payload).await,
        "checkout_reset" => checkout::checkout_reset(state, payload).await,
        "stock_corrections_list" => checkout::stock_corrections_list(state, payload).await,
        "stock_corrections_retry" => checkout::stock_corrections_retry(state, payload).await,

        "quick_stock_open" => quick_stock::quick_stock_open(state, payload).await,
        "quick_stock_get" => quick_stock::quick_stock_get(state, payload).await,
        "quick_stock_apply" => quick_stock::quick_stock_apply(state, payload).await,
        "quick_stock_undo" => quick_stock::quick_stock_undo(state, payload).await,
        "quick_stock_reset" => quick_stock::quick_stock_reset(state, payload).await,
        "quick_stock_commit" => quick_stock::quick_stock_commit(state, payload).await,
        "quick_stock_close" => quick_stock::quick_stock_close(state, payload).await,

        "receipt_render" => receipt::receipt_render(state, payload).await,
        "receipt_for_transaction" => receipt::receipt_for_transaction(state, payload).await,

        "reports_get" => reports::reports_get(state, payload).await,
        "reports_dashboard" => reports::reports_dashboard(state, payload).await,
        "transactions_list" => reports::transactions_list(state, payload).await,

        "settings_get_inventory" => settings::settings_get_inventory(state, payload).await,
        "settings_update_inventory" => settings::settings_update_inventory(state, payload).await,
        "settings_get_receipt" => settings::settings_get_receipt(state, payload).await,
        "settings_update_receipt" => settings::settings_update_receipt(state, payload).await,
        "settings_get_connection" => settings::settings_get_connection(state, payload).await,
        "settings_update_connection" => {
            settings::settings_update_connection(state, payload).await
        }
        "settings_factory_reset" => settings::settings_factory_reset(state, payload).await,

        "system_about" => system::system_about(state, payload).await,
        "system_health" => system::system_health(state, payload).await,

        other => Err(format!("Unknown command: {other}")),
    }
}
