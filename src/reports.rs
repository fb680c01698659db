//! Sales reports and the today dashboard.
//!
//! Ranges and chart buckets are computed in the shop's time zone; the
//! backend is queried with the equivalent UTC instants. All periods are
//! inclusive at both ends, ending one millisecond before the next local
//! midnight.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::{ItemId, TransactionRecord};
use crate::store::{PosBackend, StoreError};

/// First year of the all-time range.
pub const ALL_TIME_START_YEAR: i32 = 2020;

const WEEKDAY_LABELS: [&str; 7] = ["Min", "Sen", "Sel", "Rab", "Kam", "Jum", "Sab"];
const MONTH_LABELS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "Mei", "Jun", "Jul", "Agu", "Sep", "Okt", "Nov", "Des",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    #[default]
    Day,
    Week,
    Month,
    Year,
    #[serde(alias = "all-time")]
    AllTime,
}

impl Period {
    pub fn as_str(self) -> &'static str {
        match self {
            Period::Day => "day",
            Period::Week => "week",
            Period::Month => "month",
            Period::Year => "year",
            Period::AllTime => "all_time",
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" => Ok(Period::Day),
            "week" => Ok(Period::Week),
            "month" => Ok(Period::Month),
            "year" => Ok(Period::Year),
            "all_time" | "all-time" | "alltime" => Ok(Period::AllTime),
            other => Err(format!("Unknown report period: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total_revenue: i64,
    pub total_transactions: usize,
    pub total_items_sold: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChartData {
    pub labels: Vec<String>,
    pub values: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopSeller {
    pub item_id: ItemId,
    pub name: String,
    pub total_quantity: i64,
    pub total_revenue: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub period: Period,
    pub range: DateRange,
    pub summary: Summary,
    pub chart: Option<ChartData>,
    pub top_items: Vec<TopSeller>,
    pub transactions: Vec<TransactionRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub date: NaiveDate,
    pub summary: Summary,
    pub transactions: Vec<TransactionRecord>,
}

// ---------------------------------------------------------------------------
// Ranges
// ---------------------------------------------------------------------------

/// Local midnight at the start of `date` as a UTC instant. A midnight that
/// falls in a DST gap resolves to one hour later.
fn local_midnight<Tz: TimeZone>(date: NaiveDate, tz: &Tz) -> DateTime<Utc> {
    let naive = date.and_hms_opt(0, 0, 0).unwrap_or_default();
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => dt.with_timezone(&Utc),
        LocalResult::None => tz
            .from_local_datetime(&(naive + Duration::hours(1)))
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| Utc.from_utc_datetime(&naive)),
    }
}

fn first_of_month(year: i32, month: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or_default()
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let next = if month == 12 {
        first_of_month(year + 1, 1)
    } else {
        first_of_month(year, month + 1)
    };
    next.pred_opt().map(|d| d.day()).unwrap_or(28)
}

/// First and last local day of the period containing `date`. The week runs
/// Sunday to Saturday; all-time runs from 2020-01-01 through `date`.
pub fn period_days(date: NaiveDate, period: Period) -> (NaiveDate, NaiveDate) {
    match period {
        Period::Day => (date, date),
        Period::Week => {
            let start = date - Duration::days(i64::from(date.weekday().num_days_from_sunday()));
            (start, start + Duration::days(6))
        }
        Period::Month => {
            let start = first_of_month(date.year(), date.month());
            let end = start + Duration::days(i64::from(days_in_month(date.year(), date.month())) - 1);
            (start, end)
        }
        Period::Year => (
            first_of_month(date.year(), 1),
            NaiveDate::from_ymd_opt(date.year(), 12, 31).unwrap_or(date),
        ),
        Period::AllTime => (first_of_month(ALL_TIME_START_YEAR, 1).min(date), date),
    }
}

pub fn date_range<Tz: TimeZone>(date: NaiveDate, period: Period, tz: &Tz) -> DateRange {
    let (first, last) = period_days(date, period);
    let start = local_midnight(first, tz);
    let end = local_midnight(last + Duration::days(1), tz) - Duration::milliseconds(1);
    DateRange { start, end }
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

pub fn summarize(transactions: &[TransactionRecord]) -> Summary {
    Summary {
        total_revenue: transactions.iter().map(|t| t.total).sum(),
        total_transactions: transactions.len(),
        total_items_sold: transactions.iter().map(TransactionRecord::items_sold).sum(),
    }
}

/// Revenue buckets for the period containing `date`. `None` for a single day.
pub fn chart<Tz: TimeZone>(
    transactions: &[TransactionRecord],
    period: Period,
    date: NaiveDate,
    tz: &Tz,
) -> Option<ChartData> {
    let (first, last) = period_days(date, period);
    let labels: Vec<String> = match period {
        Period::Day => return None,
        Period::Week => WEEKDAY_LABELS.iter().map(|s| s.to_string()).collect(),
        Period::Month => {
            let weeks = (last.day() as usize).div_ceil(7);
            (1..=weeks).map(|i| format!("W{i}")).collect()
        }
        Period::Year => MONTH_LABELS.iter().map(|s| s.to_string()).collect(),
        Period::AllTime => (first.year()..=last.year()).map(|y| y.to_string()).collect(),
    };
    let mut values = vec![0i64; labels.len()];

    for t in transactions {
        let local = t.created_at.with_timezone(tz).date_naive();
        if local < first || local > last {
            continue;
        }
        let idx = match period {
            Period::Day => continue,
            Period::Week => (local - first).num_days() as usize,
            Period::Month => ((local.day() - 1) / 7) as usize,
            Period::Year => local.month0() as usize,
            Period::AllTime => (local.year() - first.year()) as usize,
        };
        if let Some(slot) = values.get_mut(idx) {
            *slot += t.total;
        }
    }

    Some(ChartData { labels, values })
}

/// Best sellers by quantity, ties broken by item id. Revenue uses the price
/// the line was sold at.
pub fn top_selling(transactions: &[TransactionRecord], limit: usize) -> Vec<TopSeller> {
    let mut by_item: HashMap<ItemId, TopSeller> = HashMap::new();
    for line in transactions.iter().flat_map(|t| t.items.iter()) {
        let entry = by_item.entry(line.item_id).or_insert_with(|| TopSeller {
            item_id: line.item_id,
            name: line.display_name(),
            total_quantity: 0,
            total_revenue: 0,
        });
        entry.total_quantity += line.quantity;
        entry.total_revenue += line.line_total();
    }
    let mut sellers: Vec<TopSeller> = by_item.into_values().collect();
    sellers.sort_by(|a, b| {
        b.total_quantity
            .cmp(&a.total_quantity)
            .then(a.item_id.cmp(&b.item_id))
    });
    sellers.truncate(limit);
    sellers
}

// ---------------------------------------------------------------------------
// Backend-backed reports
// ---------------------------------------------------------------------------

pub async fn report<B: PosBackend, Tz: TimeZone>(
    backend: &B,
    date: NaiveDate,
    period: Period,
    tz: &Tz,
    top_limit: usize,
) -> Result<Report, StoreError> {
    let range = date_range(date, period, tz);
    let transactions = backend.transactions_between(range.start, range.end).await?;
    debug!(%period, count = transactions.len(), "Report data loaded");
    Ok(Report {
        period,
        range,
        summary: summarize(&transactions),
        chart: chart(&transactions, period, date, tz),
        top_items: top_selling(&transactions, top_limit),
        transactions,
    })
}

/// Today's sales as of `now` in `tz`.
pub async fn dashboard<B: PosBackend, Tz: TimeZone>(
    backend: &B,
    now: DateTime<Utc>,
    tz: &Tz,
) -> Result<Dashboard, StoreError> {
    let today = now.with_timezone(tz).date_naive();
    let range = date_range(today, Period::Day, tz);
    let transactions = backend.transactions_between(range.start, range.end).await?;
    Ok(Dashboard {
        date: today,
        summary: summarize(&transactions),
        transactions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ItemSummary, PaymentMethod, TransactionItemRecord};
    use crate::store::testing::FakeBackend;
    use chrono::FixedOffset;

    fn wib() -> FixedOffset {
        FixedOffset::east_opt(7 * 3600).unwrap()
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn at(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339).unwrap().with_timezone(&Utc)
    }

    fn line(item_id: ItemId, name: Option<&str>, quantity: i64, price: i64) -> TransactionItemRecord {
        TransactionItemRecord {
            id: None,
            item_id,
            quantity,
            price_at_time: price,
            item: name.map(|n| ItemSummary {
                id: Some(item_id),
                name: n.to_string(),
                price: price + 1000,
            }),
        }
    }

    fn tx(id: i64, total: i64, created_at: &str, items: Vec<TransactionItemRecord>) -> TransactionRecord {
        TransactionRecord {
            id,
            total,
            payment: total,
            change: 0,
            payment_method: Some(PaymentMethod::Cash),
            created_at: at(created_at),
            items,
        }
    }

    #[test]
    fn test_period_parsing() {
        assert_eq!("all-time".parse::<Period>().unwrap(), Period::AllTime);
        assert_eq!("WEEK".parse::<Period>().unwrap(), Period::Week);
        assert!("decade".parse::<Period>().is_err());
        let p: Period = serde_json::from_value(serde_json::json!("all-time")).unwrap();
        assert_eq!(p, Period::AllTime);
    }

    #[test]
    fn test_day_range_in_local_time() {
        let r = date_range(d(2025, 3, 5), Period::Day, &wib());
        assert_eq!(r.start, at("2025-03-04T17:00:00Z"));
        assert_eq!(r.end, at("2025-03-05T16:59:59.999Z"));
    }

    #[test]
    fn test_week_starts_on_sunday() {
        // 2025-03-05 is a Wednesday
        assert_eq!(
            period_days(d(2025, 3, 5), Period::Week),
            (d(2025, 3, 2), d(2025, 3, 8))
        );
        // a Sunday starts its own week
        assert_eq!(
            period_days(d(2025, 3, 2), Period::Week),
            (d(2025, 3, 2), d(2025, 3, 8))
        );
    }

    #[test]
    fn test_month_year_and_all_time_days() {
        assert_eq!(
            period_days(d(2024, 2, 10), Period::Month),
            (d(2024, 2, 1), d(2024, 2, 29))
        );
        assert_eq!(
            period_days(d(2025, 12, 10), Period::Month),
            (d(2025, 12, 1), d(2025, 12, 31))
        );
        assert_eq!(
            period_days(d(2025, 6, 1), Period::Year),
            (d(2025, 1, 1), d(2025, 12, 31))
        );
        assert_eq!(
            period_days(d(2025, 6, 1), Period::AllTime),
            (d(2020, 1, 1), d(2025, 6, 1))
        );
    }

    #[test]
    fn test_summary() {
        let txs = vec![
            tx(1, 29000, "2025-03-05T02:00:00Z", vec![line(1, Some("Kopi"), 2, 12000), line(2, None, 1, 5000)]),
            tx(2, 12000, "2025-03-05T03:00:00Z", vec![line(1, Some("Kopi"), 1, 12000)]),
        ];
        assert_eq!(
            summarize(&txs),
            Summary {
                total_revenue: 41000,
                total_transactions: 2,
                total_items_sold: 4
            }
        );
        assert_eq!(summarize(&[]), Summary::default());
    }

    #[test]
    fn test_week_chart_buckets_by_local_day() {
        let txs = vec![
            // Sunday 2025-03-02 01:00 WIB
            tx(1, 10000, "2025-03-01T18:00:00Z", vec![]),
            // Wednesday 2025-03-05
            tx(2, 5000, "2025-03-05T05:00:00Z", vec![]),
            tx(3, 7000, "2025-03-05T09:00:00Z", vec![]),
        ];
        let c = chart(&txs, Period::Week, d(2025, 3, 5), &wib()).unwrap();
        assert_eq!(c.labels, vec!["Min", "Sen", "Sel", "Rab", "Kam", "Jum", "Sab"]);
        assert_eq!(c.values, vec![10000, 0, 0, 12000, 0, 0, 0]);
        assert!(chart(&txs, Period::Day, d(2025, 3, 5), &wib()).is_none());
    }

    #[test]
    fn test_month_chart_includes_last_day() {
        let txs = vec![
            tx(1, 1000, "2025-03-01T01:00:00Z", vec![]),
            tx(2, 2000, "2025-03-07T01:00:00Z", vec![]),
            tx(3, 3000, "2025-03-08T01:00:00Z", vec![]),
            // 31 March 22:00 WIB
            tx(4, 4000, "2025-03-31T15:00:00Z", vec![]),
        ];
        let c = chart(&txs, Period::Month, d(2025, 3, 15), &wib()).unwrap();
        assert_eq!(c.labels, vec!["W1", "W2", "W3", "W4", "W5"]);
        assert_eq!(c.values, vec![3000, 3000, 0, 0, 4000]);
    }

    #[test]
    fn test_year_and_all_time_charts() {
        let txs = vec![
            tx(1, 1000, "2023-05-10T01:00:00Z", vec![]),
            tx(2, 2000, "2025-01-10T01:00:00Z", vec![]),
            tx(3, 3000, "2025-12-31T10:00:00Z", vec![]),
        ];
        let year = chart(&txs, Period::Year, d(2025, 6, 1), &wib()).unwrap();
        assert_eq!(year.labels.len(), 12);
        assert_eq!(year.labels[7], "Agu");
        assert_eq!(year.values[0], 2000);
        assert_eq!(year.values[11], 3000);
        assert_eq!(year.values.iter().sum::<i64>(), 5000);

        let all = chart(&txs, Period::AllTime, d(2025, 12, 31), &wib()).unwrap();
        assert_eq!(all.labels, vec!["2020", "2021", "2022", "2023", "2024", "2025"]);
        assert_eq!(all.values, vec![0, 0, 0, 1000, 0, 5000]);
    }

    #[test]
    fn test_top_selling_uses_sold_price_and_orders_by_quantity() {
        let txs = vec![
            tx(1, 0, "2025-03-05T02:00:00Z", vec![line(1, Some("Kopi"), 2, 12000), line(2, Some("Roti"), 3, 5000)]),
            tx(2, 0, "2025-03-05T03:00:00Z", vec![line(1, Some("Kopi"), 1, 10000), line(3, None, 3, 2000)]),
        ];
        let top = top_selling(&txs, 10);
        let order: Vec<ItemId> = top.iter().map(|t| t.item_id).collect();
        assert_eq!(order, vec![1, 2, 3]);
        assert_eq!(top[0].total_quantity, 3);
        assert_eq!(top[0].total_revenue, 34000);
        assert_eq!(top[2].name, "Item 3");
        assert_eq!(top_selling(&txs, 1).len(), 1);
    }

    #[tokio::test]
    async fn test_report_and_dashboard_query_the_range() {
        let backend = FakeBackend::default();
        backend.transactions.lock().unwrap().extend([
            tx(1, 29000, "2025-03-05T02:00:00Z", vec![line(1, Some("Kopi"), 2, 12000)]),
            tx(2, 5000, "2025-03-04T02:00:00Z", vec![]),
        ]);

        let r = report(&backend, d(2025, 3, 5), Period::Day, &wib(), 5).await.unwrap();
        assert_eq!(r.summary.total_transactions, 1);
        assert_eq!(r.summary.total_revenue, 29000);
        assert!(r.chart.is_none());
        assert_eq!(r.top_items.len(), 1);

        let week = report(&backend, d(2025, 3, 5), Period::Week, &wib(), 5).await.unwrap();
        assert_eq!(week.summary.total_transactions, 2);

        let dash = dashboard(&backend, at("2025-03-05T10:00:00Z"), &wib()).await.unwrap();
        assert_eq!(dash.date, d(2025, 3, 5));
        assert_eq!(dash.summary.total_revenue, 29000);
    }
}
