//! In-memory catalog snapshot.
//!
//! Fetched wholesale from the backend and replaced after every mutation.
//! Reads clone out of the snapshot so no lock outlives a call.

use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::models::{Item, ItemId};
use crate::store::{PosBackend, StoreError};

/// Inventory list ordering. Accepts the filter values the inventory screen
/// sends (`asc`, `lowStock`, ...) as well as the variant names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemSort {
    #[default]
    #[serde(alias = "asc")]
    NameAsc,
    #[serde(alias = "desc")]
    NameDesc,
    #[serde(alias = "lowStock")]
    StockAsc,
    #[serde(alias = "highStock")]
    StockDesc,
    #[serde(alias = "lowPrice")]
    PriceAsc,
    #[serde(alias = "highPrice")]
    PriceDesc,
}

/// Items at or under the threshold, split into still-available and sold out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LowStockReport {
    pub low: Vec<Item>,
    pub out: Vec<Item>,
}

impl LowStockReport {
    pub fn warning_count(&self) -> usize {
        self.low.len() + self.out.len()
    }
}

#[derive(Default)]
struct Snapshot {
    items: Vec<Item>,
    loaded_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct Catalog {
    inner: RwLock<Snapshot>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the snapshot with `list_items()`. On failure the previous
    /// snapshot stays in place.
    pub async fn refresh<B: PosBackend>(&self, backend: &B) -> Result<usize, StoreError> {
        match backend.list_items().await {
            Ok(items) => {
                let count = items.len();
                self.replace(items);
                info!(count, "Catalog refreshed");
                Ok(count)
            }
            Err(e) => {
                warn!(error = %e, "Catalog refresh failed, keeping previous snapshot");
                Err(e)
            }
        }
    }

    pub fn replace(&self, items: Vec<Item>) {
        if let Ok(mut snap) = self.inner.write() {
            snap.items = items;
            snap.loaded_at = Some(Utc::now());
        }
    }

    fn read<T>(&self, f: impl FnOnce(&[Item]) -> T) -> T {
        match self.inner.read() {
            Ok(snap) => f(&snap.items),
            Err(poisoned) => f(&poisoned.into_inner().items),
        }
    }

    pub fn loaded_at(&self) -> Option<DateTime<Utc>> {
        self.inner.read().ok().and_then(|s| s.loaded_at)
    }

    pub fn items(&self) -> Vec<Item> {
        self.read(|items| items.to_vec())
    }

    pub fn len(&self) -> usize {
        self.read(|items| items.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: ItemId) -> Option<Item> {
        self.read(|items| items.iter().find(|i| i.id == id).cloned())
    }

    pub fn find_by_barcode(&self, code: &str) -> Option<Item> {
        let code = code.trim();
        if code.is_empty() {
            return None;
        }
        self.read(|items| {
            items
                .iter()
                .find(|i| i.barcode.as_deref().map(str::trim) == Some(code))
                .cloned()
        })
    }

    /// What the sale screen lists: everything with stock left.
    pub fn available_for_sale(&self) -> Vec<Item> {
        self.read(|items| items.iter().filter(|i| i.stock > 0).cloned().collect())
    }

    /// Case-insensitive substring match on the name. Empty query matches all.
    pub fn search(&self, query: &str) -> Vec<Item> {
        let needle = query.trim().to_lowercase();
        self.read(|items| {
            items
                .iter()
                .filter(|i| needle.is_empty() || i.name.to_lowercase().contains(&needle))
                .cloned()
                .collect()
        })
    }

    pub fn filtered(&self, query: &str, sort: ItemSort) -> Vec<Item> {
        let mut items = self.search(query);
        sort_items(&mut items, sort);
        items
    }

    pub fn low_stock(&self, threshold: i64) -> LowStockReport {
        self.read(|items| LowStockReport {
            low: items
                .iter()
                .filter(|i| i.stock > 0 && i.stock <= threshold)
                .cloned()
                .collect(),
            out: items.iter().filter(|i| i.stock == 0).cloned().collect(),
        })
    }
}

/// Stable sort, so equal keys keep the backend's name order.
pub fn sort_items(items: &mut [Item], sort: ItemSort) {
    match sort {
        ItemSort::NameAsc => items.sort_by_key(|i| i.name.to_lowercase()),
        ItemSort::NameDesc => {
            items.sort_by(|a, b| b.name.to_lowercase().cmp(&a.name.to_lowercase()))
        }
        ItemSort::StockAsc => items.sort_by_key(|i| i.stock),
        ItemSort::StockDesc => items.sort_by(|a, b| b.stock.cmp(&a.stock)),
        ItemSort::PriceAsc => items.sort_by_key(|i| i.price),
        ItemSort::PriceDesc => items.sort_by(|a, b| b.price.cmp(&a.price)),
    }
}
