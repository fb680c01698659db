//! Device-local settings stored in the `local_settings` table.
//!
//! Each field is one `(category, key)` row holding a string. Missing or
//! unparsable rows fall back to the default for that field so a bad write
//! never locks the screen out.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::db;
use crate::escpos::PaperWidth;
use crate::receipt_renderer::ShopHeader;

const INVENTORY: &str = "inventory";
const RECEIPT: &str = "receipt";

const KEY_THRESHOLD: &str = "lowStockThreshold";
const KEY_ALERTS: &str = "enableLowStockAlerts";
const KEY_AUTO_STOCK: &str = "autoUpdateStock";
const KEY_SHOP_NAME: &str = "shopName";
const KEY_SHOP_ADDRESS: &str = "shopAddress";
const KEY_PAPER: &str = "paperWidth";

pub const DEFAULT_LOW_STOCK_THRESHOLD: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventorySettings {
    pub low_stock_threshold: i64,
    pub enable_low_stock_alerts: bool,
    pub auto_update_stock: bool,
}

impl Default for InventorySettings {
    fn default() -> Self {
        Self {
            low_stock_threshold: DEFAULT_LOW_STOCK_THRESHOLD,
            enable_low_stock_alerts: true,
            auto_update_stock: true,
        }
    }
}

/// Parse a flag the way the settings screen may send it.
pub fn parse_bool(value: &Value) -> Option<bool> {
    if let Some(flag) = value.as_bool() {
        return Some(flag);
    }
    if let Some(n) = value.as_i64() {
        return Some(n == 1);
    }
    match value.as_str()?.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Threshold input: an integer, given as a number or as text, not negative.
pub fn parse_threshold(value: &Value) -> Result<i64, String> {
    let parsed = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    match parsed {
        Some(n) if n >= 0 => Ok(n),
        _ => Err("Batas stok menipis harus berupa angka 0 atau lebih".into()),
    }
}

fn read_bool(conn: &Connection, category: &str, key: &str, default: bool) -> bool {
    match db::get_setting(conn, category, key) {
        Some(raw) => parse_bool(&Value::String(raw.clone())).unwrap_or_else(|| {
            warn!(category, key, value = %raw, "Unparsable flag setting, using default");
            default
        }),
        None => default,
    }
}

impl InventorySettings {
    pub fn load(conn: &Connection) -> Self {
        let defaults = Self::default();
        let low_stock_threshold = db::get_setting(conn, INVENTORY, KEY_THRESHOLD)
            .and_then(|raw| parse_threshold(&Value::String(raw)).ok())
            .unwrap_or(defaults.low_stock_threshold);
        Self {
            low_stock_threshold,
            enable_low_stock_alerts: read_bool(
                conn,
                INVENTORY,
                KEY_ALERTS,
                defaults.enable_low_stock_alerts,
            ),
            auto_update_stock: read_bool(conn, INVENTORY, KEY_AUTO_STOCK, defaults.auto_update_stock),
        }
    }

    pub fn save(&self, conn: &Connection) -> Result<(), String> {
        if self.low_stock_threshold < 0 {
            return Err("Batas stok menipis harus berupa angka 0 atau lebih".into());
        }
        db::set_setting(conn, INVENTORY, KEY_THRESHOLD, &self.low_stock_threshold.to_string())?;
        db::set_setting(conn, INVENTORY, KEY_ALERTS, &self.enable_low_stock_alerts.to_string())?;
        db::set_setting(conn, INVENTORY, KEY_AUTO_STOCK, &self.auto_update_stock.to_string())?;
        debug!(?self, "Inventory settings saved");
        Ok(())
    }

    /// Apply a partial JSON patch (`{"lowStockThreshold": "5", ...}`).
    /// Invalid values reject the whole patch.
    pub fn merged(&self, patch: &Value) -> Result<Self, String> {
        let mut next = *self;
        let Some(obj) = patch.as_object() else {
            return Err("Pengaturan tidak valid".into());
        };
        for (key, value) in obj {
            match key.as_str() {
                KEY_THRESHOLD | "low_stock_threshold" => {
                    next.low_stock_threshold = parse_threshold(value)?;
                }
                KEY_ALERTS | "enable_low_stock_alerts" => {
                    next.enable_low_stock_alerts =
                        parse_bool(value).ok_or_else(|| format!("Nilai {key} tidak valid"))?;
                }
                KEY_AUTO_STOCK | "auto_update_stock" => {
                    next.auto_update_stock =
                        parse_bool(value).ok_or_else(|| format!("Nilai {key} tidak valid"))?;
                }
                other => debug!(key = other, "Ignoring unknown inventory setting"),
            }
        }
        Ok(next)
    }
}

/// Receipt header and paper size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptSettings {
    pub shop: ShopHeader,
    pub paper_width_mm: i32,
}

impl Default for ReceiptSettings {
    fn default() -> Self {
        Self {
            shop: ShopHeader::default(),
            paper_width_mm: 58,
        }
    }
}

impl ReceiptSettings {
    pub fn paper(&self) -> PaperWidth {
        PaperWidth::from_mm(self.paper_width_mm)
    }

    pub fn load(conn: &Connection) -> Self {
        let defaults = Self::default();
        let name = db::get_setting(conn, RECEIPT, KEY_SHOP_NAME)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.shop.name);
        // an empty stored address means "print none"
        let address = match db::get_setting(conn, RECEIPT, KEY_SHOP_ADDRESS) {
            Some(raw) => Some(raw.trim().to_string()).filter(|s| !s.is_empty()),
            None => defaults.shop.address,
        };
        let paper_width_mm = db::get_setting(conn, RECEIPT, KEY_PAPER)
            .and_then(|raw| raw.trim().parse::<i32>().ok())
            .filter(|mm| *mm == 58 || *mm == 80)
            .unwrap_or(defaults.paper_width_mm);
        Self {
            shop: ShopHeader { name, address },
            paper_width_mm,
        }
    }

    pub fn save(&self, conn: &Connection) -> Result<(), String> {
        if self.shop.name.trim().is_empty() {
            return Err("Nama toko wajib diisi".into());
        }
        if self.paper_width_mm != 58 && self.paper_width_mm != 80 {
            return Err("Lebar kertas harus 58 atau 80 mm".into());
        }
        db::set_setting(conn, RECEIPT, KEY_SHOP_NAME, self.shop.name.trim())?;
        db::set_setting(
            conn,
            RECEIPT,
            KEY_SHOP_ADDRESS,
            self.shop.address.as_deref().map(str::trim).unwrap_or(""),
        )?;
        db::set_setting(conn, RECEIPT, KEY_PAPER, &self.paper_width_mm.to_string())?;
        Ok(())
    }
}
