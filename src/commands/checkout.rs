//! Payment step and sale submission.
//!
//! Cart and engine are locked together (cart first) only for the
//! synchronous parts; the backend calls run with both locks released.

use std::str::FromStr;

use serde_json::{json, Value};
use tracing::info;

use crate::checkout::{process_sale, retry_stock_corrections, CheckoutEngine};
use crate::commands::receipt::rendered_receipt;
use crate::commands::refresh_after_mutation;
use crate::models::PaymentMethod;
use crate::settings::{InventorySettings, ReceiptSettings};
use crate::{lock, value_str, AppState};

fn checkout_snapshot(engine: &CheckoutEngine) -> Value {
    json!({
        "state": engine.state(),
        "method": engine.method(),
        "total": engine.total(),
        "paymentInput": engine.payment_input(),
        "payment": engine.parsed_payment(),
        "quickAmounts": engine.quick_amounts(),
        "change": engine.change_preview(),
        "lastError": engine.last_error(),
    })
}

fn method_from(v: &Value) -> Option<Result<PaymentMethod, String>> {
    let raw = match v {
        Value::String(s) => Some(s.clone()),
        obj => value_str(obj, &["method", "paymentMethod", "payment_method"]),
    }?;
    Some(PaymentMethod::from_str(&raw))
}

fn payment_text_from(v: &Value) -> Option<String> {
    let raw = ["amount", "payment", "paymentAmount"]
        .iter()
        .find_map(|k| v.get(*k))?;
    match raw {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

/// Apply a method and/or payment text carried by a payload.
fn apply_inputs(engine: &mut CheckoutEngine, v: &Value) -> Result<(), String> {
    if let Some(method) = method_from(v) {
        engine
            .set_payment_method(method?)
            .map_err(|e| e.to_string())?;
    }
    if let Some(text) = payment_text_from(v) {
        engine.set_payment_input(&text).map_err(|e| e.to_string())?;
    }
    Ok(())
}

pub async fn checkout_open(state: &AppState, _payload: Option<Value>) -> Result<Value, String> {
    let cart = lock(&state.cart);
    let mut engine = lock(&state.checkout);
    engine.open_payment(&cart).map_err(|e| e.to_string())?;
    Ok(checkout_snapshot(&engine))
}

pub async fn checkout_get(state: &AppState, _payload: Option<Value>) -> Result<Value, String> {
    Ok(checkout_snapshot(&lock(&state.checkout)))
}

pub async fn checkout_set_method(
    state: &AppState,
    payload: Option<Value>,
) -> Result<Value, String> {
    let method = payload
        .as_ref()
        .and_then(method_from)
        .ok_or("Missing payment method")??;
    let mut engine = lock(&state.checkout);
    engine
        .set_payment_method(method)
        .map_err(|e| e.to_string())?;
    Ok(checkout_snapshot(&engine))
}

pub async fn checkout_set_payment(
    state: &AppState,
    payload: Option<Value>,
) -> Result<Value, String> {
    let text = match &payload {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(v) => payment_text_from(v).unwrap_or_default(),
        None => String::new(),
    };
    let mut engine = lock(&state.checkout);
    engine.set_payment_input(&text).map_err(|e| e.to_string())?;
    Ok(checkout_snapshot(&engine))
}

/// Submit the sale. The payload may carry a final method/amount.
pub async fn checkout_submit(state: &AppState, payload: Option<Value>) -> Result<Value, String> {
    let (inventory, receipt) = {
        let conn = lock(&state.db.conn);
        (InventorySettings::load(&conn), ReceiptSettings::load(&conn))
    };

    let request = {
        let cart = lock(&state.cart);
        let mut engine = lock(&state.checkout);
        if let Some(v) = &payload {
            apply_inputs(&mut engine, v)?;
        }
        engine.begin(&cart).map_err(|e| e.to_string())?
    };

    let result = process_sale(&state.backend, &request, inventory.auto_update_stock).await;

    let sale = {
        let mut cart = lock(&state.cart);
        let mut engine = lock(&state.checkout);
        engine.finish(result, &mut cart, receipt.shop.clone())
    }
    .map_err(|e| e.to_string())?;

    if !sale.corrections.is_empty() {
        lock(&state.corrections).extend(sale.corrections.iter().cloned());
    }
    refresh_after_mutation(state).await;

    Ok(json!({
        "transaction": sale.record,
        "lines": sale.lines,
        "corrections": sale.corrections,
        "receipt": rendered_receipt(&sale.receipt, receipt.paper()),
    }))
}

pub async fn checkout_cancel(state: &AppState, _payload: Option<Value>) -> Result<Value, String> {
    let mut engine = lock(&state.checkout);
    engine.cancel().map_err(|e| e.to_string())?;
    Ok(checkout_snapshot(&engine))
}

/// Acknowledge a completed sale and go back to `idle`.
pub async fn checkout_reset(state: &AppState, _payload: Option<Value>) -> Result<Value, String> {
    let mut engine = lock(&state.checkout);
    engine.reset_after_completion();
    Ok(checkout_snapshot(&engine))
}

pub async fn stock_corrections_list(
    state: &AppState,
    _payload: Option<Value>,
) -> Result<Value, String> {
    let corrections = lock(&state.corrections).clone();
    Ok(json!({ "count": corrections.len(), "corrections": corrections }))
}

/// Replay pending stock corrections. Ones that still fail stay queued.
pub async fn stock_corrections_retry(
    state: &AppState,
    _payload: Option<Value>,
) -> Result<Value, String> {
    let pending = std::mem::take(&mut *lock(&state.corrections));
    if pending.is_empty() {
        return Ok(json!({ "applied": 0, "remaining": 0, "corrections": [] }));
    }
    let attempted = pending.len();
    let remaining = retry_stock_corrections(&state.backend, pending).await;
    let cleared = attempted - remaining.len();

    let queued = {
        let mut queue = lock(&state.corrections);
        // corrections queued while retrying go after the older ones
        let newer = std::mem::replace(&mut *queue, remaining);
        queue.extend(newer);
        queue.clone()
    };
    info!(attempted, cleared, remaining = queued.len(), "Stock corrections retried");
    if cleared > 0 {
        refresh_after_mutation(state).await;
    }
    Ok(json!({
        "applied": cleared,
        "remaining": queued.len(),
        "corrections": queued,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::cart::cart_add;
    use crate::commands::inventory::inventory_create_item;
    use crate::commands::settings::settings_update_inventory;
    use crate::store::PosBackend;

    async fn seeded() -> AppState {
        let state = AppState::in_memory().unwrap();
        inventory_create_item(&state, Some(json!({ "name": "Kopi", "price": 12000, "stock": 10 })))
            .await
            .unwrap();
        inventory_create_item(&state, Some(json!({ "name": "Roti", "price": 5000, "stock": 5 })))
            .await
            .unwrap();
        state
    }

    #[tokio::test]
    async fn test_cash_sale_end_to_end() {
        let state = seeded().await;
        cart_add(&state, Some(json!(1))).await.unwrap();
        cart_add(&state, Some(json!(1))).await.unwrap();
        cart_add(&state, Some(json!(2))).await.unwrap();

        let snap = checkout_open(&state, None).await.unwrap();
        assert_eq!(snap["state"], json!("awaiting_payment_input"));
        assert_eq!(snap["total"], json!(29000));
        assert_eq!(snap["quickAmounts"], json!([30000, 50000]));

        let snap = checkout_set_payment(&state, Some(json!({ "amount": "Rp 30.000" })))
            .await
            .unwrap();
        assert_eq!(snap["change"], json!(1000));

        let version = state.refresh.version();
        let sale = checkout_submit(&state, None).await.unwrap();
        assert_eq!(sale["transaction"]["change"], json!(1000));
        assert_eq!(sale["corrections"], json!([]));
        assert!(sale["receipt"]["text"]
            .as_str()
            .unwrap()
            .contains("*** TERIMA KASIH ***"));

        assert!(lock(&state.cart).is_empty());
        assert_eq!(state.catalog.get(1).unwrap().stock, 8);
        assert_eq!(state.catalog.get(2).unwrap().stock, 4);
        assert!(state.refresh.version() > version);

        let snap = checkout_reset(&state, None).await.unwrap();
        assert_eq!(snap["state"], json!("idle"));
    }

    #[tokio::test]
    async fn test_qris_sale_pins_payment() {
        let state = seeded().await;
        cart_add(&state, Some(json!(2))).await.unwrap();
        checkout_open(&state, None).await.unwrap();
        checkout_set_payment(&state, Some(json!("1000"))).await.unwrap();
        let snap = checkout_set_method(&state, Some(json!("qris"))).await.unwrap();
        assert_eq!(snap["paymentInput"], json!("5000"));
        assert_eq!(snap["quickAmounts"], json!([]));
        assert_eq!(snap["change"], json!(0));

        let sale = checkout_submit(&state, None).await.unwrap();
        assert_eq!(sale["transaction"]["payment_method"], json!("Qris"));
        assert_eq!(sale["transaction"]["payment"], json!(5000));
    }

    #[tokio::test]
    async fn test_insufficient_payment_keeps_cart_and_state() {
        let state = seeded().await;
        cart_add(&state, Some(json!(1))).await.unwrap();
        checkout_open(&state, None).await.unwrap();
        let err = checkout_submit(&state, Some(json!({ "amount": 10000 })))
            .await
            .unwrap_err();
        assert_eq!(err, "Jumlah pembayaran kurang dari total");
        assert_eq!(lock(&state.cart).total_items(), 1);
        let snap = checkout_get(&state, None).await.unwrap();
        assert_eq!(snap["state"], json!("awaiting_payment_input"));

        let snap = checkout_cancel(&state, None).await.unwrap();
        assert_eq!(snap["state"], json!("idle"));
    }

    #[tokio::test]
    async fn test_auto_update_stock_off_leaves_stock() {
        let state = seeded().await;
        settings_update_inventory(&state, Some(json!({ "autoUpdateStock": false })))
            .await
            .unwrap();
        cart_add(&state, Some(json!(1))).await.unwrap();
        checkout_open(&state, None).await.unwrap();
        checkout_submit(&state, None).await.unwrap();
        assert_eq!(state.catalog.get(1).unwrap().stock, 10);
    }

    #[tokio::test]
    async fn test_failed_decrement_is_queued_then_dropped_for_missing_item() {
        let state = seeded().await;
        cart_add(&state, Some(json!(2))).await.unwrap();
        // item disappears behind the snapshot's back
        state.backend.delete_item(2).await.unwrap();

        checkout_open(&state, None).await.unwrap();
        let sale = checkout_submit(&state, None).await.unwrap();
        assert_eq!(sale["corrections"].as_array().unwrap().len(), 1);

        let listed = stock_corrections_list(&state, None).await.unwrap();
        assert_eq!(listed["count"], json!(1));
        assert_eq!(listed["corrections"][0]["delta"], json!(-1));

        let retried = stock_corrections_retry(&state, None).await.unwrap();
        assert_eq!(retried["remaining"], json!(0));
        assert!(lock(&state.corrections).is_empty());
    }

    #[tokio::test]
    async fn test_open_with_empty_cart_fails() {
        let state = seeded().await;
        assert_eq!(
            checkout_open(&state, None).await.unwrap_err(),
            "Keranjang masih kosong"
        );
        assert!(checkout_set_method(&state, Some(json!({ "method": "card" })))
            .await
            .is_err());
    }
}
