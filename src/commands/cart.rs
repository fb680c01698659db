use std::sync::MutexGuard;

use serde_json::{json, Value};

use crate::cart::Cart;
use crate::checkout::{CheckoutError, CheckoutState};
use crate::models::Item;
use crate::{lock, payload_id, value_i64, value_str, AppState};

const ITEM_ID_KEYS: &[&str] = &["itemId", "item_id", "id"];

/// What the cart panel renders.
pub(crate) fn cart_snapshot(cart: &Cart) -> Value {
    json!({
        "lines": cart.lines().iter().map(|l| json!({
            "item": l.item,
            "quantity": l.quantity,
            "subtotal": l.subtotal(),
        })).collect::<Vec<_>>(),
        "subtotal": cart.subtotal(),
        "total": cart.total(),
        "totalItems": cart.total_items(),
        "isEmpty": cart.is_empty(),
    })
}

fn catalog_item(state: &AppState, payload: Option<&Value>) -> Result<Item, String> {
    let id = payload_id(payload, ITEM_ID_KEYS).ok_or("Missing item id")?;
    state.catalog.get(id).ok_or_else(|| "Barang tidak ditemukan".to_string())
}

/// The cart, unless a sale built from it is still in flight.
fn editable_cart(state: &AppState) -> Result<MutexGuard<'_, Cart>, String> {
    let cart = lock(&state.cart);
    if lock(&state.checkout).state() == CheckoutState::Processing {
        return Err(CheckoutError::AlreadyProcessing.to_string());
    }
    Ok(cart)
}

fn add_item(state: &AppState, item: &Item) -> Result<Value, String> {
    let mut cart = editable_cart(state)?;
    cart.add_to_cart(item).map_err(|e| e.to_string())?;
    Ok(cart_snapshot(&cart))
}

pub async fn cart_get(state: &AppState, _payload: Option<Value>) -> Result<Value, String> {
    Ok(cart_snapshot(&lock(&state.cart)))
}

pub async fn cart_add(state: &AppState, payload: Option<Value>) -> Result<Value, String> {
    let item = catalog_item(state, payload.as_ref())?;
    add_item(state, &item)
}

/// Scanner input: add one unit of the item carrying this barcode.
pub async fn cart_add_barcode(state: &AppState, payload: Option<Value>) -> Result<Value, String> {
    let code = match &payload {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(v) => value_str(v, &["barcode", "code"]).unwrap_or_default(),
        None => String::new(),
    };
    if code.is_empty() {
        return Err("Barcode kosong".into());
    }
    let item = state
        .catalog
        .find_by_barcode(&code)
        .ok_or_else(|| format!("Barang dengan barcode {code} tidak ditemukan"))?;
    add_item(state, &item)
}

pub async fn cart_remove(state: &AppState, payload: Option<Value>) -> Result<Value, String> {
    let id = payload_id(payload.as_ref(), ITEM_ID_KEYS).ok_or("Missing item id")?;
    let mut cart = editable_cart(state)?;
    cart.remove_from_cart(id);
    Ok(cart_snapshot(&cart))
}

pub async fn cart_update_quantity(
    state: &AppState,
    payload: Option<Value>,
) -> Result<Value, String> {
    let v = payload.unwrap_or_else(|| json!({}));
    let id = value_i64(&v, ITEM_ID_KEYS).ok_or("Missing item id")?;
    let quantity = value_i64(&v, &["quantity", "qty"]).ok_or("Jumlah tidak valid")?;
    let mut cart = editable_cart(state)?;
    cart.update_quantity(id, quantity).map_err(|e| e.to_string())?;
    Ok(cart_snapshot(&cart))
}

pub async fn cart_remove_line(state: &AppState, payload: Option<Value>) -> Result<Value, String> {
    let id = payload_id(payload.as_ref(), ITEM_ID_KEYS).ok_or("Missing item id")?;
    let mut cart = editable_cart(state)?;
    cart.remove_line(id);
    Ok(cart_snapshot(&cart))
}

pub async fn cart_clear(state: &AppState, _payload: Option<Value>) -> Result<Value, String> {
    let mut cart = editable_cart(state)?;
    cart.clear();
    Ok(cart_snapshot(&cart))
}
