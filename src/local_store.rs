//! SQLite-backed implementation of the backend contract.
//!
//! Used when no Supabase project is configured (development, demo devices)
//! and by the command-layer tests. Same tables and semantics as the hosted
//! schema: `adjust_stock` clamps at zero and `create_transaction` leaves
//! stock alone.

use std::sync::{Arc, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use crate::db::DbState;
use crate::lock;
use crate::models::{
    parse_timestamp, Item, ItemId, ItemSummary, ItemUpdate, NewItem, TransactionItemRecord,
    TransactionRecord, TransactionRequest,
};
use crate::store::{PosBackend, StoreError};

pub struct LocalStore {
    db: Arc<DbState>,
}

/// Fixed-width RFC 3339 so stored timestamps compare correctly as text.
fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

const ITEM_COLUMNS: &str = "id, name, price, stock, barcode, image_url, created_at, updated_at";

fn map_item_row(row: &Row<'_>) -> rusqlite::Result<Item> {
    let created: String = row.get(6)?;
    let updated: String = row.get(7)?;
    Ok(Item {
        id: row.get(0)?,
        name: row.get(1)?,
        price: row.get(2)?,
        stock: row.get(3)?,
        barcode: row.get(4)?,
        image_url: row.get(5)?,
        created_at: parse_timestamp(&created),
        updated_at: parse_timestamp(&updated),
    })
}

fn get_item(conn: &Connection, id: ItemId) -> Result<Item, StoreError> {
    conn.query_row(
        &format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = ?1"),
        params![id],
        map_item_row,
    )
    .optional()?
    .ok_or(StoreError::NotFound { entity: "item", id })
}

fn write_item(conn: &Connection, item: &Item, now: &str) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE items SET name = ?1, price = ?2, stock = ?3, barcode = ?4, image_url = ?5,
                          updated_at = ?6
         WHERE id = ?7",
        params![
            item.name,
            item.price,
            item.stock,
            item.barcode,
            item.image_url,
            now,
            item.id
        ],
    )?;
    Ok(())
}

fn load_transaction_lines(
    conn: &Connection,
    transaction_id: i64,
) -> Result<Vec<TransactionItemRecord>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT ti.id, ti.item_id, ti.quantity, ti.price_at_time, i.id, i.name, i.price
         FROM transaction_items ti
         LEFT JOIN items i ON i.id = ti.item_id
         WHERE ti.transaction_id = ?1
         ORDER BY ti.id",
    )?;
    let rows = stmt.query_map(params![transaction_id], |row| {
        let joined_id: Option<i64> = row.get(4)?;
        let joined_name: Option<String> = row.get(5)?;
        let joined_price: Option<i64> = row.get(6)?;
        Ok(TransactionItemRecord {
            id: row.get(0)?,
            item_id: row.get(1)?,
            quantity: row.get(2)?,
            price_at_time: row.get(3)?,
            item: joined_name.map(|name| ItemSummary {
                id: joined_id,
                name,
                price: joined_price.unwrap_or(0),
            }),
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn load_transactions(
    conn: &Connection,
    sql: &str,
    args: &[&dyn rusqlite::ToSql],
) -> Result<Vec<TransactionRecord>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let headers = stmt
        .query_map(args, |row| {
            let method: String = row.get(4)?;
            let created: String = row.get(5)?;
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
                method,
                created,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    headers
        .into_iter()
        .map(|(id, total, payment, change, method, created)| {
            Ok(TransactionRecord {
                id,
                total,
                payment,
                change,
                payment_method: method.parse().ok(),
                created_at: parse_timestamp(&created).ok_or_else(|| {
                    StoreError::Decode(format!("transaction {id} has bad created_at: {created}"))
                })?,
                items: load_transaction_lines(conn, id)?,
            })
        })
        .collect()
}

impl LocalStore {
    pub fn new(db: Arc<DbState>) -> Self {
        Self { db }
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        lock(&self.db.conn)
    }
}

impl PosBackend for LocalStore {
    async fn list_items(&self) -> Result<Vec<Item>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ITEM_COLUMNS} FROM items ORDER BY name COLLATE NOCASE, id"
        ))?;
        let items = stmt
            .query_map([], map_item_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    async fn create_item(&self, item: &NewItem) -> Result<Item, StoreError> {
        item.validate().map_err(StoreError::Validation)?;
        let conn = self.conn();
        let now = ts(Utc::now());
        conn.execute(
            "INSERT INTO items (name, price, stock, barcode, image_url, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                item.name.trim(),
                item.price,
                item.stock,
                item.barcode,
                item.image_url,
                now
            ],
        )?;
        let id = conn.last_insert_rowid();
        info!(item_id = id, name = %item.name.trim(), "Item created");
        get_item(&conn, id)
    }

    async fn update_item(&self, id: ItemId, update: &ItemUpdate) -> Result<Item, StoreError> {
        update.validate().map_err(StoreError::Validation)?;
        let conn = self.conn();
        let mut item = get_item(&conn, id)?;
        update.apply_to(&mut item);
        write_item(&conn, &item, &ts(Utc::now()))?;
        get_item(&conn, id)
    }

    async fn delete_item(&self, id: ItemId) -> Result<(), StoreError> {
        let conn = self.conn();
        let affected = conn.execute("DELETE FROM items WHERE id = ?1", params![id])?;
        if affected == 0 {
            return Err(StoreError::NotFound { entity: "item", id });
        }
        info!(item_id = id, "Item deleted");
        Ok(())
    }

    async fn adjust_stock(&self, id: ItemId, delta: i64) -> Result<Item, StoreError> {
        let conn = self.conn();
        let mut item = get_item(&conn, id)?;
        let previous = item.stock;
        item.stock = (previous + delta).max(0);
        write_item(&conn, &item, &ts(Utc::now()))?;
        debug!(item_id = id, previous, delta, stock = item.stock, "Stock adjusted");
        get_item(&conn, id)
    }

    async fn create_transaction(
        &self,
        request: &TransactionRequest,
    ) -> Result<TransactionRecord, StoreError> {
        let conn = self.conn();
        let now = ts(Utc::now());

        conn.execute_batch("BEGIN IMMEDIATE")?;
        let result = (|| -> Result<i64, StoreError> {
            conn.execute(
                "INSERT INTO transactions (total, payment, change, payment_method, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    request.total,
                    request.payment,
                    request.change,
                    request.payment_method.as_str(),
                    now
                ],
            )?;
            let tx_id = conn.last_insert_rowid();
            for line in &request.lines {
                conn.execute(
                    "INSERT INTO transaction_items
                        (transaction_id, item_id, quantity, price_at_time, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![tx_id, line.item_id, line.quantity, line.price_at_time, now],
                )?;
            }
            Ok(tx_id)
        })();

        let tx_id = match result {
            Ok(id) => {
                conn.execute_batch("COMMIT")?;
                id
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK");
                return Err(e);
            }
        };

        info!(
            transaction_id = tx_id,
            total = request.total,
            method = %request.payment_method,
            lines = request.lines.len(),
            "Transaction recorded"
        );

        load_transactions(
            &conn,
            "SELECT id, total, payment, change, payment_method, created_at
             FROM transactions WHERE id = ?1",
            &[&tx_id],
        )?
        .pop()
        .ok_or(StoreError::NotFound {
            entity: "transaction",
            id: tx_id,
        })
    }

    async fn list_transactions(&self, limit: usize) -> Result<Vec<TransactionRecord>, StoreError> {
        let conn = self.conn();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        load_transactions(
            &conn,
            "SELECT id, total, payment, change, payment_method, created_at
             FROM transactions ORDER BY created_at DESC, id DESC LIMIT ?1",
            &[&limit],
        )
    }

    async fn transactions_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        let conn = self.conn();
        let (start, end) = (ts(start), ts(end));
        load_transactions(
            &conn,
            "SELECT id, total, payment, change, payment_method, created_at
             FROM transactions
             WHERE created_at >= ?1 AND created_at <= ?2
             ORDER BY created_at DESC, id DESC",
            &[&start, &end],
        )
    }
}
