//! Domain records shared by the catalog, cart, checkout and backend layers.
//!
//! Everything crossing the backend boundary is normalized here: money comes
//! back from PostgREST as integers, floats or numeric strings depending on the
//! column type, timestamps may or may not carry an offset, and the embedded
//! item on a transaction line has been called `item`, `items` and `product`
//! across schema revisions. Deserialization accepts all of those and the rest
//! of the crate only ever sees one shape.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

pub type ItemId = i64;
pub type TransactionId = i64;

// ---------------------------------------------------------------------------
// Items
// ---------------------------------------------------------------------------

/// A purchasable item as stored by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub name: String,
    #[serde(deserialize_with = "de_amount")]
    pub price: i64,
    #[serde(deserialize_with = "de_amount")]
    pub stock: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub barcode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, deserialize_with = "de_opt_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "de_opt_timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Payload for creating an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewItem {
    pub name: String,
    pub price: i64,
    pub stock: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub barcode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl NewItem {
    /// Reject what the add-item form would never submit.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Nama barang wajib diisi".into());
        }
        if self.price <= 0 {
            return Err("Harga harus lebih dari 0".into());
        }
        if self.stock < 0 {
            return Err("Stok tidak boleh negatif".into());
        }
        Ok(())
    }
}

/// Partial update. `None` leaves a column untouched; for `image_url`,
/// `Some(None)` clears the stored image reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stock: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub barcode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<Option<String>>,
}

impl ItemUpdate {
    pub fn stock(stock: i64) -> Self {
        Self {
            stock: Some(stock),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err("Nama barang wajib diisi".into());
            }
        }
        if matches!(self.price, Some(p) if p <= 0) {
            return Err("Harga harus lebih dari 0".into());
        }
        if matches!(self.stock, Some(s) if s < 0) {
            return Err("Stok tidak boleh negatif".into());
        }
        Ok(())
    }

    /// Apply this update on top of an existing item.
    pub fn apply_to(&self, item: &mut Item) {
        if let Some(name) = &self.name {
            item.name = name.trim().to_string();
        }
        if let Some(price) = self.price {
            item.price = price;
        }
        if let Some(stock) = self.stock {
            item.stock = stock;
        }
        if let Some(barcode) = &self.barcode {
            item.barcode = Some(barcode.clone()).filter(|b| !b.trim().is_empty());
        }
        if let Some(image_url) = &self.image_url {
            item.image_url = image_url.clone();
        }
    }
}

// ---------------------------------------------------------------------------
// Payment method
// ---------------------------------------------------------------------------

/// How a sale was paid. Stored as `"Cash"` / `"Qris"` to match the backend enum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub enum PaymentMethod {
    #[default]
    Cash,
    Qris,
}

impl PaymentMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentMethod::Cash => "Cash",
            PaymentMethod::Qris => "Qris",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cash" | "tunai" => Ok(PaymentMethod::Cash),
            "qris" => Ok(PaymentMethod::Qris),
            other => Err(format!("Unknown payment method: {other}")),
        }
    }
}

impl<'de> Deserialize<'de> for PaymentMethod {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

/// One sold line as sent to the backend. `price_at_time` is the unit price
/// at submission and never follows later price edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionLine {
    pub item_id: ItemId,
    pub quantity: i64,
    pub price_at_time: i64,
}

/// Transaction-creation request emitted by the checkout engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub total: i64,
    pub payment: i64,
    pub change: i64,
    pub payment_method: PaymentMethod,
    pub lines: Vec<TransactionLine>,
}

/// The subset of an item embedded in transaction lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSummary {
    #[serde(default)]
    pub id: Option<ItemId>,
    pub name: String,
    #[serde(default, deserialize_with = "de_amount")]
    pub price: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionItemRecord {
    #[serde(default)]
    pub id: Option<i64>,
    pub item_id: ItemId,
    #[serde(deserialize_with = "de_amount")]
    pub quantity: i64,
    #[serde(deserialize_with = "de_amount")]
    pub price_at_time: i64,
    #[serde(default, alias = "items", alias = "product")]
    pub item: Option<ItemSummary>,
}

impl TransactionItemRecord {
    pub fn display_name(&self) -> String {
        self.item
            .as_ref()
            .map(|i| i.name.trim())
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Item {}", self.item_id))
    }

    pub fn line_total(&self) -> i64 {
        self.quantity * self.price_at_time
    }
}

/// A persisted transaction as read back from the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: TransactionId,
    #[serde(deserialize_with = "de_amount")]
    pub total: i64,
    #[serde(deserialize_with = "de_amount")]
    pub payment: i64,
    #[serde(deserialize_with = "de_amount")]
    pub change: i64,
    #[serde(default)]
    pub payment_method: Option<PaymentMethod>,
    #[serde(deserialize_with = "de_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default, rename = "transaction_items", deserialize_with = "de_null_vec")]
    pub items: Vec<TransactionItemRecord>,
}

impl TransactionRecord {
    pub fn items_sold(&self) -> i64 {
        self.items.iter().map(|l| l.quantity).sum()
    }

    pub fn method(&self) -> PaymentMethod {
        self.payment_method.unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Lenient deserializers
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(untagged)]
enum RawAmount {
    Int(i64),
    Float(f64),
    Text(String),
}

fn amount_from_raw<E: serde::de::Error>(raw: RawAmount) -> Result<i64, E> {
    match raw {
        RawAmount::Int(v) => Ok(v),
        RawAmount::Float(v) if v.is_finite() => Ok(v.round() as i64),
        RawAmount::Float(v) => Err(E::custom(format!("non-finite amount: {v}"))),
        RawAmount::Text(s) => {
            let t = s.trim();
            t.parse::<i64>()
                .or_else(|_| t.parse::<f64>().map(|f| f.round() as i64))
                .map_err(|_| E::custom(format!("invalid amount: {t}")))
        }
    }
}

fn de_amount<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    match Option::<RawAmount>::deserialize(deserializer)? {
        Some(raw) => amount_from_raw(raw),
        None => Ok(0),
    }
}

/// Parse a backend timestamp. Columns without time zone come back without
/// an offset and are taken as UTC.
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let t = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(t) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(t, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(t, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn de_timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
}

fn de_opt_timestamp<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?
        .as_deref()
        .and_then(parse_timestamp))
}

fn de_null_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}
