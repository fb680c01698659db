//! Quick-stock sheet.
//!
//! The open adjustment lives in `AppState::quick_stock`. Commit clones it
//! out of the lock, awaits the backend, then writes the outcome back so no
//! lock spans the call. Steps tapped while the commit was in flight are kept
//! on top of the new stock.

use serde_json::{json, Value};

use crate::commands::refresh_after_mutation;
use crate::models::Item;
use crate::quick_stock::{PendingStockDelta, QuickStockError, STOCK_PRESETS};
use crate::{lock, payload_id, value_i64, AppState};

fn sheet_snapshot(pending: Option<&PendingStockDelta>) -> Value {
    let Some(p) = pending else {
        return json!({ "open": false });
    };
    let presets: Vec<Value> = STOCK_PRESETS
        .iter()
        .flat_map(|n| [-*n, *n])
        .map(|amount| {
            json!({
                "amount": amount,
                "enabled": p.can_apply(amount),
                "count": p.preset_count(amount),
            })
        })
        .collect();
    json!({
        "open": true,
        "item": p.item(),
        "stock": p.item().stock,
        "pending": p.pending(),
        "preview": p.preview(),
        "history": p.history(),
        "historyLabel": p.history_label(),
        "presets": presets,
    })
}

fn with_open<F>(state: &AppState, f: F) -> Result<Value, String>
where
    F: FnOnce(&mut PendingStockDelta) -> Result<(), QuickStockError>,
{
    let mut slot = lock(&state.quick_stock);
    let pending = slot.as_mut().ok_or_else(|| QuickStockError::NotOpen.to_string())?;
    f(pending).map_err(|e| e.to_string())?;
    Ok(sheet_snapshot(Some(pending)))
}

/// Open the sheet for an item, discarding any adjustment on another item.
pub async fn quick_stock_open(state: &AppState, payload: Option<Value>) -> Result<Value, String> {
    let id = payload_id(payload.as_ref(), &["itemId", "item_id", "id"]).ok_or("Missing item id")?;
    let item = state.catalog.get(id).ok_or("Barang tidak ditemukan")?;
    let mut slot = lock(&state.quick_stock);
    *slot = Some(PendingStockDelta::open(item));
    Ok(sheet_snapshot(slot.as_ref()))
}

pub async fn quick_stock_get(state: &AppState, _payload: Option<Value>) -> Result<Value, String> {
    Ok(sheet_snapshot(lock(&state.quick_stock).as_ref()))
}

pub async fn quick_stock_apply(state: &AppState, payload: Option<Value>) -> Result<Value, String> {
    let delta = match &payload {
        Some(Value::Number(n)) => n.as_i64(),
        Some(v) => value_i64(v, &["delta", "amount"]),
        None => None,
    }
    .ok_or("Missing delta")?;
    with_open(state, |p| p.apply_delta(delta))
}

pub async fn quick_stock_undo(state: &AppState, _payload: Option<Value>) -> Result<Value, String> {
    with_open(state, |p| {
        p.undo_last();
        Ok(())
    })
}

pub async fn quick_stock_reset(state: &AppState, _payload: Option<Value>) -> Result<Value, String> {
    with_open(state, |p| {
        p.reset();
        Ok(())
    })
}

/// Slot contents once `committed` (taken as `snapshot`) went through.
/// Unchanged sheets close; sheets that grew meanwhile keep their new steps.
fn settle_after_commit(
    slot: &mut Option<PendingStockDelta>,
    snapshot: &PendingStockDelta,
    committed: &Item,
) {
    *slot = match slot.take() {
        Some(current) if current == *snapshot => None,
        Some(current) => current
            .rebased(snapshot, committed.clone())
            .or(Some(current)),
        None => None,
    };
}

/// Send the net delta. Success closes the sheet; failure keeps it as it was.
pub async fn quick_stock_commit(state: &AppState, _payload: Option<Value>) -> Result<Value, String> {
    let snapshot = lock(&state.quick_stock)
        .clone()
        .ok_or_else(|| QuickStockError::NotOpen.to_string())?;
    let mut working = snapshot.clone();

    let updated = working
        .commit(&state.backend)
        .await
        .map_err(|e| format!("Gagal memperbarui stok: {e}"))?;

    let sheet = {
        let mut slot = lock(&state.quick_stock);
        settle_after_commit(&mut slot, &snapshot, working.item());
        sheet_snapshot(slot.as_ref())
    };

    match updated {
        Some(item) => {
            refresh_after_mutation(state).await;
            Ok(json!({ "committed": true, "item": item, "sheet": sheet }))
        }
        None => Ok(json!({ "committed": false, "item": working.item(), "sheet": sheet })),
    }
}

pub async fn quick_stock_close(state: &AppState, _payload: Option<Value>) -> Result<Value, String> {
    *lock(&state.quick_stock) = None;
    Ok(sheet_snapshot(None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::inventory::inventory_create_item;

    async fn seeded() -> AppState {
        let state = AppState::in_memory().unwrap();
        inventory_create_item(&state, Some(json!({ "name": "Gula", "price": 15000, "stock": 3 })))
            .await
            .unwrap();
        state
    }

    #[tokio::test]
    async fn test_stack_undo_and_commit() {
        let state = seeded().await;
        let sheet = quick_stock_open(&state, Some(json!(1))).await.unwrap();
        assert_eq!(sheet["presets"][0], json!({ "amount": -1, "enabled": true, "count": 0 }));
        // -5 is not possible with 3 in stock
        assert_eq!(sheet["presets"][2]["enabled"], json!(false));

        quick_stock_apply(&state, Some(json!(5))).await.unwrap();
        quick_stock_apply(&state, Some(json!({ "delta": 5 }))).await.unwrap();
        let sheet = quick_stock_apply(&state, Some(json!(-1))).await.unwrap();
        assert_eq!(sheet["historyLabel"], json!("+5 +5 -1"));
        assert_eq!(sheet["preview"], json!(12));

        let sheet = quick_stock_undo(&state, None).await.unwrap();
        assert_eq!(sheet["pending"], json!(10));

        let version = state.refresh.version();
        let out = quick_stock_commit(&state, None).await.unwrap();
        assert_eq!(out["committed"], json!(true));
        assert_eq!(out["item"]["stock"], json!(13));
        assert_eq!(state.catalog.get(1).unwrap().stock, 13);
        assert_eq!(state.refresh.version(), version + 1);
        assert_eq!(quick_stock_get(&state, None).await.unwrap()["open"], json!(false));
    }

    #[tokio::test]
    async fn test_negative_rejected_without_change() {
        let state = seeded().await;
        quick_stock_open(&state, Some(json!({ "itemId": 1 }))).await.unwrap();
        let err = quick_stock_apply(&state, Some(json!(-5))).await.unwrap_err();
        assert_eq!(err, "Stok Gula tidak boleh kurang dari 0");
        let sheet = quick_stock_get(&state, None).await.unwrap();
        assert_eq!(sheet["pending"], json!(0));
    }

    #[tokio::test]
    async fn test_commit_with_nothing_pending_closes_without_refresh() {
        let state = seeded().await;
        quick_stock_open(&state, Some(json!(1))).await.unwrap();
        quick_stock_apply(&state, Some(json!(1))).await.unwrap();
        quick_stock_reset(&state, None).await.unwrap();
        let version = state.refresh.version();
        let out = quick_stock_commit(&state, None).await.unwrap();
        assert_eq!(out["committed"], json!(false));
        assert_eq!(state.refresh.version(), version);
    }

    #[tokio::test]
    async fn test_commands_need_an_open_sheet() {
        let state = seeded().await;
        assert_eq!(
            quick_stock_apply(&state, Some(json!(1))).await.unwrap_err(),
            "Tidak ada barang yang dipilih"
        );
        assert!(quick_stock_commit(&state, None).await.is_err());
        quick_stock_open(&state, Some(json!(1))).await.unwrap();
        let closed = quick_stock_close(&state, None).await.unwrap();
        assert_eq!(closed["open"], json!(false));
    }

    #[test]
    fn test_steps_tapped_during_commit_survive() {
        let gula = |stock| crate::store::testing::item(1, "Gula", 15000, stock);
        let mut snapshot = PendingStockDelta::open(gula(3));
        snapshot.apply_delta(5).unwrap();

        let mut slot = Some(snapshot.clone());
        slot.as_mut().unwrap().apply_delta(1).unwrap();
        settle_after_commit(&mut slot, &snapshot, &gula(8));
        let open = slot.expect("sheet stays open");
        assert_eq!(open.item().stock, 8);
        assert_eq!(open.pending(), 1);
        assert_eq!(open.history_label(), "+1");

        let mut slot = Some(snapshot.clone());
        settle_after_commit(&mut slot, &snapshot, &gula(8));
        assert!(slot.is_none());

        let mut slot = Some(PendingStockDelta::open(crate::store::testing::item(2, "Teh", 3000, 4)));
        settle_after_commit(&mut slot, &snapshot, &gula(8));
        assert_eq!(slot.unwrap().item_id(), 2);
    }
}
