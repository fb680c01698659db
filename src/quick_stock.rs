//! Quick-stock adjuster.
//!
//! Preset taps on one item stack into a single signed delta that can be
//! previewed, undone step by step and committed as one `adjust_stock` call.
//! The local non-negative check runs against the snapshot taken at `open`;
//! the backend clamp at zero stays authoritative.

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::{Item, ItemId};
use crate::store::{PosBackend, StoreError};

/// Preset step sizes, offered as both `+n` and `-n`.
pub const STOCK_PRESETS: [i64; 5] = [1, 5, 10, 25, 50];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuickStockError {
    #[error("Stok {name} tidak boleh kurang dari 0")]
    WouldGoNegative { name: String, stock: i64, pending: i64, delta: i64 },
    #[error("Tidak ada barang yang dipilih")]
    NotOpen,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingStockDelta {
    item: Item,
    pending: i64,
    history: Vec<i64>,
}

impl PendingStockDelta {
    pub fn open(item: Item) -> Self {
        Self {
            item,
            pending: 0,
            history: Vec::new(),
        }
    }

    pub fn item(&self) -> &Item {
        &self.item
    }

    pub fn item_id(&self) -> ItemId {
        self.item.id
    }

    pub fn pending(&self) -> i64 {
        self.pending
    }

    pub fn history(&self) -> &[i64] {
        &self.history
    }

    pub fn can_apply(&self, delta: i64) -> bool {
        self.item.stock + self.pending + delta >= 0
    }

    pub fn apply_delta(&mut self, delta: i64) -> Result<(), QuickStockError> {
        if !self.can_apply(delta) {
            return Err(QuickStockError::WouldGoNegative {
                name: self.item.name.clone(),
                stock: self.item.stock,
                pending: self.pending,
                delta,
            });
        }
        self.pending += delta;
        self.history.push(delta);
        Ok(())
    }

    /// Drop the most recent step. No-op when nothing was applied.
    pub fn undo_last(&mut self) {
        if let Some(last) = self.history.pop() {
            self.pending -= last;
        }
    }

    pub fn reset(&mut self) {
        self.pending = 0;
        self.history.clear();
    }

    pub fn preview(&self) -> i64 {
        (self.item.stock + self.pending).max(0)
    }

    /// Steps as typed: `"+5 +5 -3"`.
    pub fn history_label(&self) -> String {
        self.history
            .iter()
            .map(|d| if *d > 0 { format!("+{d}") } else { d.to_string() })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// How many times the signed preset `amount` was applied.
    pub fn preset_count(&self, amount: i64) -> usize {
        self.history.iter().filter(|d| **d == amount).count()
    }

    /// Steps applied since `earlier` was taken, replayed on a fresh state for
    /// `item`. `None` when this state did not grow out of `earlier`. Steps
    /// that no longer fit the new stock are dropped.
    pub fn rebased(&self, earlier: &PendingStockDelta, item: Item) -> Option<PendingStockDelta> {
        if self.item.id != earlier.item.id || !self.history.starts_with(&earlier.history) {
            return None;
        }
        let mut next = PendingStockDelta::open(item);
        for &d in &self.history[earlier.history.len()..] {
            if let Err(e) = next.apply_delta(d) {
                warn!(item_id = next.item.id, delta = d, error = %e, "Dropping step that no longer fits");
            }
        }
        Some(next)
    }

    /// Send the net delta as one adjustment. `Ok(None)` when nothing is
    /// pending. Resets on success; on failure the pending state is kept so
    /// the user can retry.
    pub async fn commit<B: PosBackend>(&mut self, backend: &B) -> Result<Option<Item>, StoreError> {
        if self.pending == 0 {
            debug!(item_id = self.item.id, "Nothing pending, skipping stock commit");
            return Ok(None);
        }
        let updated = backend.adjust_stock(self.item.id, self.pending).await?;
        info!(
            item_id = self.item.id,
            delta = self.pending,
            steps = self.history.len(),
            stock = updated.stock,
            "Quick stock committed"
        );
        self.reset();
        self.item = updated.clone();
        Ok(Some(updated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::{item, FakeBackend};

    #[test]
    fn test_stacking_and_preview() {
        let mut p = PendingStockDelta::open(item(1, "Teh", 3000, 3));
        p.apply_delta(5).unwrap();
        p.apply_delta(5).unwrap();
        p.apply_delta(-1).unwrap();
        assert_eq!(p.pending(), 9);
        assert_eq!(p.preview(), 12);
        assert_eq!(p.history_label(), "+5 +5 -1");
        assert_eq!(p.preset_count(5), 2);
        assert_eq!(p.preset_count(-1), 1);
        assert_eq!(p.preset_count(1), 0);
    }

    #[test]
    fn test_rejects_going_negative_without_change() {
        let mut p = PendingStockDelta::open(item(1, "Teh", 3000, 3));
        assert!(p.can_apply(-1));
        assert!(!p.can_apply(-5));
        let err = p.apply_delta(-5).unwrap_err();
        assert!(matches!(err, QuickStockError::WouldGoNegative { delta: -5, .. }));
        assert_eq!(p.pending(), 0);
        assert!(p.history().is_empty());

        p.apply_delta(-3).unwrap();
        assert_eq!(p.preview(), 0);
        assert!(!p.can_apply(-1));
    }

    #[test]
    fn test_undo_and_reset() {
        let mut p = PendingStockDelta::open(item(1, "Teh", 3000, 10));
        p.undo_last();
        assert_eq!(p.pending(), 0);

        p.apply_delta(10).unwrap();
        p.apply_delta(-5).unwrap();
        p.undo_last();
        assert_eq!(p.pending(), 10);
        assert_eq!(p.history(), &[10]);

        p.reset();
        p.reset();
        assert_eq!(p.pending(), 0);
        assert_eq!(p.history_label(), "");
    }

    #[tokio::test]
    async fn test_commit_sends_single_net_delta() {
        let backend = FakeBackend::with_items(vec![item(7, "Kopi", 12000, 4)]);
        let mut p = PendingStockDelta::open(item(7, "Kopi", 12000, 4));
        p.apply_delta(10).unwrap();
        p.apply_delta(5).unwrap();
        p.apply_delta(-1).unwrap();

        let updated = p.commit(&backend).await.unwrap().unwrap();
        assert_eq!(updated.stock, 18);
        assert_eq!(*backend.stock_calls.lock().unwrap(), vec![(7, 14)]);
        assert_eq!(p.pending(), 0);
        assert_eq!(p.item().stock, 18);
    }

    #[tokio::test]
    async fn test_commit_noop_when_nothing_pending() {
        let backend = FakeBackend::with_items(vec![item(7, "Kopi", 12000, 4)]);
        let mut p = PendingStockDelta::open(item(7, "Kopi", 12000, 4));
        p.apply_delta(5).unwrap();
        p.undo_last();
        assert_eq!(p.commit(&backend).await.unwrap(), None);
        assert!(backend.stock_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_commit_keeps_pending() {
        let backend = FakeBackend::with_items(vec![item(7, "Kopi", 12000, 4)]);
        backend.fail_stock_for.lock().unwrap().insert(7);
        let mut p = PendingStockDelta::open(item(7, "Kopi", 12000, 4));
        p.apply_delta(25).unwrap();
        assert!(p.commit(&backend).await.is_err());
        assert_eq!(p.pending(), 25);
        assert_eq!(p.history_label(), "+25");
    }

    #[test]
    fn test_stack_undo_then_reject_past_zero() {
        let mut p = PendingStockDelta::open(item(1, "Beras", 12000, 10));
        for d in [5, 5, -3] {
            p.apply_delta(d).unwrap();
        }
        assert_eq!(p.pending(), 7);
        assert_eq!(p.preview(), 17);
        assert_eq!(p.history(), &[5_i64, 5, -3]);

        p.undo_last();
        assert_eq!(p.pending(), 10);
        assert_eq!(p.history(), &[5_i64, 5]);

        p.undo_last();
        p.apply_delta(-3).unwrap();
        assert_eq!(p.pending(), 2);
        let before = p.clone();
        assert!(matches!(
            p.apply_delta(-20),
            Err(QuickStockError::WouldGoNegative { stock: 10, pending: 2, delta: -20, .. })
        ));
        assert_eq!(p, before);
    }

    #[tokio::test]
    async fn test_negative_commit_resets_state() {
        let backend = FakeBackend::with_items(vec![item(1, "Beras", 12000, 10)]);
        let mut p = PendingStockDelta::open(item(1, "Beras", 12000, 10));
        p.apply_delta(-1).unwrap();
        p.apply_delta(-5).unwrap();
        p.undo_last();
        p.apply_delta(-1).unwrap();
        p.apply_delta(-1).unwrap();
        assert_eq!(p.pending(), -3);

        let updated = p.commit(&backend).await.unwrap().unwrap();
        assert_eq!(updated.stock, 7);
        assert_eq!(*backend.stock_calls.lock().unwrap(), vec![(1, -3)]);
        assert_eq!(p.pending(), 0);
        assert!(p.history().is_empty());
        assert_eq!(p.item().stock, 7);
    }

    #[test]
    fn test_rebase_keeps_steps_after_snapshot() {
        let mut before = PendingStockDelta::open(item(1, "Beras", 12000, 10));
        before.apply_delta(5).unwrap();
        let mut now = before.clone();
        now.apply_delta(-1).unwrap();
        now.apply_delta(10).unwrap();

        let next = now.rebased(&before, item(1, "Beras", 12000, 15)).unwrap();
        assert_eq!(next.item().stock, 15);
        assert_eq!(next.history(), &[-1_i64, 10]);
        assert_eq!(next.pending(), 9);

        let mut undone = before.clone();
        undone.undo_last();
        assert!(undone.rebased(&before, item(1, "Beras", 12000, 15)).is_none());
        let other = PendingStockDelta::open(item(2, "Gula", 15000, 3));
        assert!(other.rebased(&before, item(1, "Beras", 12000, 15)).is_none());
    }
}
