use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::{json, Value};

use crate::escpos::PaperWidth;
use crate::receipt_renderer::{render_escpos, render_text, ReceiptDoc};
use crate::settings::ReceiptSettings;
use crate::store::{PosBackend, DEFAULT_TRANSACTION_LIMIT};
use crate::{lock, payload_id, value_i64, AppState};

/// Receipt document plus both printable outputs.
pub(crate) fn rendered_receipt(doc: &ReceiptDoc, paper: PaperWidth) -> Value {
    json!({
        "document": doc,
        "text": render_text(doc, paper),
        "escposBase64": BASE64.encode(render_escpos(doc, paper)),
        "paperChars": paper.chars(),
    })
}

fn receipt_settings(state: &AppState) -> ReceiptSettings {
    let conn = lock(&state.db.conn);
    ReceiptSettings::load(&conn)
}

/// Render a receipt document supplied by the caller
/// (`{ "receipt": {...}, "paperWidth": 80 }`).
pub async fn receipt_render(state: &AppState, payload: Option<Value>) -> Result<Value, String> {
    let v = payload.ok_or("Missing receipt")?;
    let doc_value = v.get("receipt").cloned().unwrap_or_else(|| v.clone());
    let doc: ReceiptDoc =
        serde_json::from_value(doc_value).map_err(|e| format!("Struk tidak valid: {e}"))?;
    let paper = match value_i64(&v, &["paperWidth", "paper_width"]) {
        Some(mm) => PaperWidth::from_mm(mm as i32),
        None => receipt_settings(state).paper(),
    };
    Ok(rendered_receipt(&doc, paper))
}

/// Re-print a receipt from the recent transaction history.
pub async fn receipt_for_transaction(
    state: &AppState,
    payload: Option<Value>,
) -> Result<Value, String> {
    let id = payload_id(payload.as_ref(), &["transactionId", "transaction_id", "id"])
        .ok_or("Missing transaction id")?;
    let settings = receipt_settings(state);
    let history = state
        .backend
        .list_transactions(DEFAULT_TRANSACTION_LIMIT)
        .await
        .map_err(|e| e.to_string())?;
    let record = history
        .iter()
        .find(|t| t.id == id)
        .ok_or_else(|| format!("Transaksi {id} tidak ditemukan"))?;
    let doc = ReceiptDoc::from_record(record, settings.shop.clone());
    Ok(rendered_receipt(&doc, settings.paper()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::cart::cart_add;
    use crate::commands::checkout::{checkout_open, checkout_submit};
    use crate::commands::inventory::inventory_create_item;
    use crate::commands::settings::settings_update_receipt;

    #[tokio::test]
    async fn test_reprint_uses_receipt_settings() {
        let state = AppState::in_memory().unwrap();
        inventory_create_item(&state, Some(json!({ "name": "Kopi", "price": 12000, "stock": 3 })))
            .await
            .unwrap();
        cart_add(&state, Some(json!(1))).await.unwrap();
        checkout_open(&state, None).await.unwrap();
        let sale = checkout_submit(&state, None).await.unwrap();
        let tx_id = sale["transaction"]["id"].as_i64().unwrap();

        settings_update_receipt(
            &state,
            Some(json!({ "shopName": "Warung Sri", "shopAddress": "", "paperWidth": 80 })),
        )
        .await
        .unwrap();

        let out = receipt_for_transaction(&state, Some(json!({ "transactionId": tx_id })))
            .await
            .unwrap();
        assert_eq!(out["paperChars"], json!(48));
        let text = out["text"].as_str().unwrap();
        assert!(text.lines().next().unwrap().trim() == "Warung Sri");
        assert!(text.contains("Kopi"));

        let bytes = BASE64
            .decode(out["escposBase64"].as_str().unwrap())
            .unwrap();
        assert_eq!(&bytes[..2], &[0x1B, 0x40]);

        assert!(receipt_for_transaction(&state, Some(json!(999))).await.is_err());
    }

    #[tokio::test]
    async fn test_render_supplied_document() {
        let state = AppState::in_memory().unwrap();
        let doc = json!({
            "transaction_id": 5,
            "date": "01/03/2025 10:00",
            "lines": [{ "name": "Teh", "quantity": 1, "price": 3000, "subtotal": 3000 }],
            "total": 3000,
            "payment": 5000,
            "change": 2000,
            "method": "Cash"
        });
        let out = receipt_render(&state, Some(json!({ "receipt": doc }))).await.unwrap();
        assert_eq!(out["paperChars"], json!(32));
        assert!(out["text"].as_str().unwrap().contains("Rp. 2.000"));
        assert!(receipt_render(&state, None).await.is_err());
    }
}
