use chrono::{Local, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::commands::parse_payload;
use crate::reports::{self, Period};
use crate::store::{PosBackend, DEFAULT_TRANSACTION_LIMIT};
use crate::AppState;

const DEFAULT_TOP_LIMIT: usize = 10;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReportPayload {
    #[serde(default)]
    period: Period,
    /// `YYYY-MM-DD` in local time; today when absent.
    #[serde(default)]
    date: Option<String>,
    #[serde(default, alias = "top_limit")]
    top_limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct ListPayload {
    #[serde(default)]
    limit: Option<usize>,
}

fn parse_date(raw: Option<&str>) -> Result<NaiveDate, String> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map_err(|_| format!("Tanggal tidak valid: {s}")),
        None => Ok(Local::now().date_naive()),
    }
}

pub async fn reports_get(state: &AppState, payload: Option<Value>) -> Result<Value, String> {
    let p: ReportPayload = parse_payload(payload)?;
    let date = match p.period {
        // all-time always runs up to today
        Period::AllTime => Local::now().date_naive(),
        _ => parse_date(p.date.as_deref())?,
    };
    let report = reports::report(
        &state.backend,
        date,
        p.period,
        &Local,
        p.top_limit.unwrap_or(DEFAULT_TOP_LIMIT),
    )
    .await
    .map_err(|e| format!("Gagal memuat laporan: {e}"))?;
    serde_json::to_value(report).map_err(|e| e.to_string())
}

pub async fn reports_dashboard(state: &AppState, _payload: Option<Value>) -> Result<Value, String> {
    let dashboard = reports::dashboard(&state.backend, Utc::now(), &Local)
        .await
        .map_err(|e| format!("Gagal memuat dashboard: {e}"))?;
    serde_json::to_value(dashboard).map_err(|e| e.to_string())
}

/// Recent transactions, newest first.
pub async fn transactions_list(state: &AppState, payload: Option<Value>) -> Result<Value, String> {
    let p: ListPayload = parse_payload(payload)?;
    let limit = p.limit.unwrap_or(DEFAULT_TRANSACTION_LIMIT).max(1);
    let txs = state
        .backend
        .list_transactions(limit)
        .await
        .map_err(|e| format!("Gagal memuat transaksi: {e}"))?;
    Ok(json!({ "count": txs.len(), "transactions": txs }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::cart::cart_add;
    use crate::commands::checkout::{checkout_open, checkout_reset, checkout_submit};
    use crate::commands::inventory::inventory_create_item;

    async fn with_two_sales() -> AppState {
        let state = AppState::in_memory().unwrap();
        inventory_create_item(&state, Some(json!({ "name": "Kopi", "price": 12000, "stock": 10 })))
            .await
            .unwrap();
        inventory_create_item(&state, Some(json!({ "name": "Roti", "price": 5000, "stock": 10 })))
            .await
            .unwrap();
        for ids in [vec![1, 1, 2], vec![2]] {
            for id in ids {
                cart_add(&state, Some(json!(id))).await.unwrap();
            }
            checkout_open(&state, None).await.unwrap();
            checkout_submit(&state, None).await.unwrap();
            checkout_reset(&state, None).await.unwrap();
        }
        state
    }

    #[tokio::test]
    async fn test_dashboard_covers_today() {
        let state = with_two_sales().await;
        let dash = reports_dashboard(&state, None).await.unwrap();
        assert_eq!(dash["summary"]["total_revenue"], json!(34000));
        assert_eq!(dash["summary"]["total_transactions"], json!(2));
        assert_eq!(dash["summary"]["total_items_sold"], json!(4));
    }

    #[tokio::test]
    async fn test_period_report_and_top_items() {
        let state = with_two_sales().await;
        let report = reports_get(&state, Some(json!({ "period": "week" }))).await.unwrap();
        assert_eq!(report["chart"]["labels"].as_array().unwrap().len(), 7);
        assert_eq!(report["top_items"][0]["item_id"], json!(1));
        assert_eq!(report["top_items"][0]["total_quantity"], json!(2));
        assert_eq!(report["top_items"][1]["total_revenue"], json!(10000));

        let all = reports_get(&state, Some(json!({ "period": "all-time" }))).await.unwrap();
        assert_eq!(all["chart"]["labels"][0], json!("2020"));
        assert_eq!(all["summary"]["total_transactions"], json!(2));

        let day = reports_get(&state, Some(json!({ "period": "day", "date": "2001-01-01" })))
            .await
            .unwrap();
        assert_eq!(day["summary"]["total_transactions"], json!(0));
        assert!(day["chart"].is_null());

        assert!(reports_get(&state, Some(json!({ "date": "kemarin" }))).await.is_err());
    }

    #[tokio::test]
    async fn test_transactions_list_newest_first() {
        let state = with_two_sales().await;
        let out = transactions_list(&state, Some(json!({ "limit": 1 }))).await.unwrap();
        assert_eq!(out["count"], json!(1));
        assert_eq!(out["transactions"][0]["total"], json!(5000));
    }
}
