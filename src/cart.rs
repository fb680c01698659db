//! Shopping cart.
//!
//! Lines keep insertion order and are unique by item id. Every mutation is
//! bounded by the stock of the item snapshot held on the line, so a rejected
//! change leaves the cart exactly as it was.

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::models::{Item, ItemId, TransactionLine};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CartError {
    #[error("Stok {name} tidak mencukupi")]
    InsufficientStock {
        item_id: ItemId,
        name: String,
        available: i64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CartLine {
    pub item: Item,
    pub quantity: i64,
}

impl CartLine {
    pub fn subtotal(&self) -> i64 {
        self.item.price * self.quantity
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cart {
    lines: Vec<CartLine>,
}

fn insufficient(item: &Item) -> CartError {
    CartError::InsufficientStock {
        item_id: item.id,
        name: item.name.clone(),
        available: item.stock,
    }
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, item_id: ItemId) -> Option<usize> {
        self.lines.iter().position(|l| l.item.id == item_id)
    }

    /// Add one unit of `item`.
    pub fn add_to_cart(&mut self, item: &Item) -> Result<(), CartError> {
        match self.position(item.id) {
            Some(idx) => {
                let line = &mut self.lines[idx];
                if line.quantity + 1 > item.stock {
                    return Err(insufficient(item));
                }
                line.quantity += 1;
                line.item = item.clone();
            }
            None => {
                if item.stock <= 0 {
                    return Err(insufficient(item));
                }
                self.lines.push(CartLine {
                    item: item.clone(),
                    quantity: 1,
                });
            }
        }
        debug!(item_id = item.id, qty = self.quantity_of(item.id), "Added to cart");
        Ok(())
    }

    /// Remove one unit; the line goes away at zero. Unknown ids are ignored.
    pub fn remove_from_cart(&mut self, item_id: ItemId) {
        if let Some(idx) = self.position(item_id) {
            if self.lines[idx].quantity <= 1 {
                self.lines.remove(idx);
            } else {
                self.lines[idx].quantity -= 1;
            }
        }
    }

    /// Set an exact quantity. `<= 0` deletes the line.
    pub fn update_quantity(&mut self, item_id: ItemId, new_quantity: i64) -> Result<(), CartError> {
        let Some(idx) = self.position(item_id) else {
            return Ok(());
        };
        if new_quantity <= 0 {
            self.lines.remove(idx);
            return Ok(());
        }
        let line = &mut self.lines[idx];
        if new_quantity > line.item.stock {
            return Err(insufficient(&line.item));
        }
        line.quantity = new_quantity;
        Ok(())
    }

    pub fn remove_line(&mut self, item_id: ItemId) {
        self.lines.retain(|l| l.item.id != item_id);
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    /// Take sold quantities out of the cart. Lines left at zero go away;
    /// anything added after the sale was built stays.
    pub fn remove_sold(&mut self, sold: &[CartLine]) {
        for s in sold {
            if let Some(idx) = self.position(s.item.id) {
                let line = &mut self.lines[idx];
                line.quantity -= s.quantity;
                if line.quantity <= 0 {
                    self.lines.remove(idx);
                }
            }
        }
    }

    /// Swap line snapshots for fresh catalog copies. Lines whose item is gone
    /// or sold out are dropped, quantities above the new stock are clamped.
    /// Returns the ids of lines that changed quantity or were dropped.
    pub fn sync_with_catalog(&mut self, catalog: &[Item]) -> Vec<ItemId> {
        let mut changed = Vec::new();
        self.lines.retain_mut(|line| {
            match catalog.iter().find(|i| i.id == line.item.id) {
                Some(fresh) if fresh.stock > 0 => {
                    if line.quantity > fresh.stock {
                        line.quantity = fresh.stock;
                        changed.push(fresh.id);
                    }
                    line.item = fresh.clone();
                    true
                }
                _ => {
                    changed.push(line.item.id);
                    false
                }
            }
        });
        if !changed.is_empty() {
            debug!(?changed, "Cart adjusted to catalog");
        }
        changed
    }

    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn quantity_of(&self, item_id: ItemId) -> i64 {
        self.position(item_id)
            .map(|idx| self.lines[idx].quantity)
            .unwrap_or(0)
    }

    pub fn subtotal(&self) -> i64 {
        self.lines.iter().map(CartLine::subtotal).sum()
    }

    /// No tax or discounts: total is the subtotal.
    pub fn total(&self) -> i64 {
        self.subtotal()
    }

    pub fn total_items(&self) -> i64 {
        self.lines.iter().map(|l| l.quantity).sum()
    }

    /// Lines priced at their current snapshot, in cart order.
    pub fn transaction_lines(&self) -> Vec<TransactionLine> {
        self.lines
            .iter()
            .map(|l| TransactionLine {
                item_id: l.item.id,
                quantity: l.quantity,
                price_at_time: l.item.price,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::item;

    #[test]
    fn test_add_bounded_by_stock() {
        let teh = item(1, "Teh", 3000, 2);
        let mut cart = Cart::new();
        cart.add_to_cart(&teh).unwrap();
        cart.add_to_cart(&teh).unwrap();
        let err = cart.add_to_cart(&teh).unwrap_err();
        assert_eq!(
            err,
            CartError::InsufficientStock {
                item_id: 1,
                name: "Teh".into(),
                available: 2
            }
        );
        assert_eq!(err.to_string(), "Stok Teh tidak mencukupi");
        assert_eq!(cart.quantity_of(1), 2);
    }

    #[test]
    fn test_sold_out_item_is_rejected() {
        let mut cart = Cart::new();
        assert!(cart.add_to_cart(&item(1, "Teh", 3000, 0)).is_err());
        assert!(cart.is_empty());
    }

    #[test]
    fn test_totals_and_order() {
        let mut cart = Cart::new();
        let kopi = item(1, "Kopi", 12000, 10);
        let roti = item(2, "Roti", 5000, 10);
        cart.add_to_cart(&kopi).unwrap();
        cart.add_to_cart(&roti).unwrap();
        cart.add_to_cart(&kopi).unwrap();
        assert_eq!(cart.subtotal(), 29000);
        assert_eq!(cart.total(), 29000);
        assert_eq!(cart.total_items(), 3);
        let ids: Vec<ItemId> = cart.lines().iter().map(|l| l.item.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_remove_decrements_then_drops() {
        let mut cart = Cart::new();
        let kopi = item(1, "Kopi", 12000, 10);
        cart.add_to_cart(&kopi).unwrap();
        cart.add_to_cart(&kopi).unwrap();
        cart.remove_from_cart(1);
        assert_eq!(cart.quantity_of(1), 1);
        cart.remove_from_cart(1);
        assert!(cart.is_empty());
        cart.remove_from_cart(99);
        assert!(cart.is_empty());
    }

    #[test]
    fn test_update_quantity() {
        let mut cart = Cart::new();
        cart.add_to_cart(&item(1, "Kopi", 12000, 5)).unwrap();
        cart.update_quantity(1, 5).unwrap();
        assert_eq!(cart.quantity_of(1), 5);
        assert!(cart.update_quantity(1, 6).is_err());
        assert_eq!(cart.quantity_of(1), 5);
        cart.update_quantity(1, 0).unwrap();
        assert!(cart.is_empty());
    }

    #[test]
    fn test_remove_line_and_clear() {
        let mut cart = Cart::new();
        cart.add_to_cart(&item(1, "Kopi", 12000, 5)).unwrap();
        cart.add_to_cart(&item(2, "Roti", 5000, 5)).unwrap();
        cart.update_quantity(1, 4).unwrap();
        cart.remove_line(1);
        assert_eq!(cart.total_items(), 1);
        cart.clear();
        assert!(cart.is_empty());
    }

    #[test]
    fn test_sync_with_catalog_clamps_and_drops() {
        let mut cart = Cart::new();
        cart.add_to_cart(&item(1, "Kopi", 12000, 5)).unwrap();
        cart.add_to_cart(&item(2, "Roti", 5000, 5)).unwrap();
        cart.add_to_cart(&item(3, "Susu", 8000, 5)).unwrap();
        cart.update_quantity(1, 4).unwrap();

        let catalog = vec![item(1, "Kopi", 13000, 2), item(2, "Roti", 5000, 0)];
        let changed = cart.sync_with_catalog(&catalog);
        assert_eq!(changed, vec![1, 2, 3]);
        assert_eq!(cart.lines().len(), 1);
        assert_eq!(cart.quantity_of(1), 2);
        assert_eq!(cart.subtotal(), 26000);
    }

    #[test]
    fn test_transaction_lines_use_snapshot_price() {
        let mut cart = Cart::new();
        cart.add_to_cart(&item(1, "Kopi", 12000, 5)).unwrap();
        cart.add_to_cart(&item(1, "Kopi", 12000, 5)).unwrap();
        assert_eq!(
            cart.transaction_lines(),
            vec![TransactionLine {
                item_id: 1,
                quantity: 2,
                price_at_time: 12000
            }]
        );
    }

    #[test]
    fn test_remove_sold_keeps_later_additions() {
        let kopi = item(1, "Kopi", 12000, 10);
        let roti = item(2, "Roti", 5000, 10);
        let mut cart = Cart::new();
        cart.add_to_cart(&kopi).unwrap();
        cart.add_to_cart(&kopi).unwrap();
        let sold = cart.lines().to_vec();

        cart.add_to_cart(&roti).unwrap();
        cart.add_to_cart(&kopi).unwrap();
        cart.remove_sold(&sold);
        assert_eq!(cart.quantity_of(1), 1);
        assert_eq!(cart.quantity_of(2), 1);

        cart.remove_line(1);
        cart.remove_sold(&sold);
        assert_eq!(cart.total_items(), 1);
    }
}
