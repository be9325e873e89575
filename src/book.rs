// ===============================
// src/book.rs
// ===============================
//
// Local mirror of the exchange book, rebuilt from a REST snapshot and kept
// current from the sequence-numbered diff stream.
//
// Sync protocol: a diff whose final id is behind the book is stale and
// dropped; a diff whose first id leaves a hole after `last_sequence_id`
// flips the book to unsynced so the owner can fetch a fresh snapshot.
// Everything else is applied and advances `last_sequence_id`.
//

use std::collections::BTreeMap;

use crate::domain::{DepthDiff, Px};

/// Rank-decay for the imbalance weights.
const ALPHA: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffResult {
    /// Levels applied, sequence advanced.
    Applied,
    /// Entirely behind the book; dropped without touching state.
    Stale,
    /// Sequence hole (or book not yet synced); book is now unsynced and
    /// needs a snapshot. The diff itself is dropped.
    Gap,
}

#[derive(Debug, Clone, Copy)]
pub struct BookMetrics {
    pub weighted_midprice: f64,
    pub best_bid: Px,
    pub best_ask: Px,
    pub midprice: f64,
}

#[derive(Debug)]
pub struct OrderBook {
    bids: BTreeMap<Px, f64>,
    asks: BTreeMap<Px, f64>,
    last_sequence_id: u64,
    synced: bool,
    px_scale: i64,
}

impl OrderBook {
    pub fn new(px_scale: i64) -> Self {
        Self {
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            last_sequence_id: 0,
            synced: false,
            px_scale,
        }
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn last_sequence_id(&self) -> u64 {
        self.last_sequence_id
    }

    pub fn best_bid(&self) -> Option<Px> {
        self.bids.keys().next_back().copied()
    }

    pub fn best_ask(&self) -> Option<Px> {
        self.asks.keys().next().copied()
    }

    /// Replace the whole book from a snapshot and mark it synced.
    pub fn apply_snapshot(
        &mut self,
        last_update_id: u64,
        bids: Vec<(Px, f64)>,
        asks: Vec<(Px, f64)>,
    ) {
        self.bids.clear();
        self.asks.clear();
        Self::apply_levels(&mut self.bids, &bids);
        Self::apply_levels(&mut self.asks, &asks);
        self.last_sequence_id = last_update_id;
        self.synced = true;
    }

    pub fn apply_diff(&mut self, diff: &DepthDiff) -> DiffResult {
        if !self.synced {
            return DiffResult::Gap;
        }
        if diff.final_id < self.last_sequence_id {
            return DiffResult::Stale;
        }
        if diff.first_id > self.last_sequence_id + 1 {
            self.synced = false;
            return DiffResult::Gap;
        }
        Self::apply_levels(&mut self.bids, &diff.bids);
        Self::apply_levels(&mut self.asks, &diff.asks);
        self.last_sequence_id = diff.final_id;
        DiffResult::Applied
    }

    // Levels are absolute replacements; zero (or negative) quantity deletes.
    fn apply_levels(map: &mut BTreeMap<Px, f64>, levels: &[(Px, f64)]) {
        for &(px, qty) in levels {
            if qty <= 0.0 {
                map.remove(&px);
            } else {
                map.insert(px, qty);
            }
        }
    }

    /// Imbalance-weighted mid. Pairs the top `n = min(#bids, #asks)` levels
    /// by rank, weights each rank's value imbalance by a normalized
    /// `exp(-ALPHA * rank)`, and shifts the mid toward the heavier side.
    /// `None` until both sides have at least one level.
    pub fn compute_metrics(&self) -> Option<BookMetrics> {
        let best_bid = self.best_bid()?;
        let best_ask = self.best_ask()?;
        let bb = best_bid.to_f64(self.px_scale);
        let ba = best_ask.to_f64(self.px_scale);
        let midprice = (bb + ba) / 2.0;

        let n = self.bids.len().min(self.asks.len());
        let weights: Vec<f64> = (0..n).map(|k| (-ALPHA * k as f64).exp()).collect();
        let weight_sum: f64 = weights.iter().sum();

        let mut weighted_imbalance = 0.0;
        for (k, ((bid_px, bid_qty), (ask_px, ask_qty))) in self
            .bids
            .iter()
            .rev()
            .zip(self.asks.iter())
            .take(n)
            .enumerate()
        {
            let bid_value = bid_px.to_f64(self.px_scale) * bid_qty;
            let ask_value = ask_px.to_f64(self.px_scale) * ask_qty;
            let denom = bid_value + ask_value;
            let imbalance = if denom == 0.0 { 0.0 } else { bid_value / denom };
            weighted_imbalance += weights[k] / weight_sum * imbalance;
        }

        let weighted_midprice = weighted_imbalance * ba + (1.0 - weighted_imbalance) * bb;
        Some(BookMetrics { weighted_midprice, best_bid, best_ask, midprice })
    }

    #[cfg(test)]
    pub fn level_count(&self) -> (usize, usize) {
        (self.bids.len(), self.asks.len())
    }

    #[cfg(test)]
    pub fn has_nonpositive_level(&self) -> bool {
        self.bids.values().chain(self.asks.values()).any(|&q| q <= 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn px(p: f64) -> Px {
        Px::from_f64(p, 100)
    }

    fn snapshot_book() -> OrderBook {
        let mut book = OrderBook::new(100);
        book.apply_snapshot(
            100,
            vec![(px(10.00), 1.0), (px(9.99), 2.0)],
            vec![(px(10.01), 1.0), (px(10.02), 2.0)],
        );
        book
    }

    fn diff(first_id: u64, final_id: u64) -> DepthDiff {
        DepthDiff {
            first_id,
            final_id,
            bids: vec![(px(10.00), 3.0)],
            asks: vec![],
        }
    }

    #[test]
    fn overlapping_diff_is_applied() {
        // snapshot at 100, diff spanning (95, 101) overlaps the snapshot
        let mut book = snapshot_book();
        assert_eq!(book.apply_diff(&diff(95, 101)), DiffResult::Applied);
        assert_eq!(book.last_sequence_id(), 101);
        assert!(book.is_synced());
    }

    #[test]
    fn stale_diff_is_dropped() {
        let mut book = snapshot_book();
        assert_eq!(book.apply_diff(&diff(95, 101)), DiffResult::Applied);
        assert_eq!(book.apply_diff(&diff(98, 100)), DiffResult::Stale);
        assert_eq!(book.last_sequence_id(), 101);
        assert!(book.is_synced());
    }

    #[test]
    fn gapped_diff_unsyncs_without_mutating() {
        let mut book = snapshot_book();
        assert_eq!(book.apply_diff(&diff(95, 101)), DiffResult::Applied);
        let gapped = DepthDiff {
            first_id: 110,
            final_id: 120,
            bids: vec![(px(5.0), 99.0)],
            asks: vec![],
        };
        assert_eq!(book.apply_diff(&gapped), DiffResult::Gap);
        assert!(!book.is_synced());
        assert_eq!(book.last_sequence_id(), 101);
        // the gapped diff's levels never landed
        assert_eq!(book.level_count(), (2, 2));
        // and while unsynced, further diffs are refused
        assert_eq!(book.apply_diff(&diff(102, 103)), DiffResult::Gap);
    }

    #[test]
    fn zero_quantity_prunes_levels() {
        let mut book = snapshot_book();
        let removal = DepthDiff {
            first_id: 101,
            final_id: 102,
            bids: vec![(px(9.99), 0.0)],
            asks: vec![(px(10.02), 0.0), (px(10.03), 1.5)],
        };
        assert_eq!(book.apply_diff(&removal), DiffResult::Applied);
        assert_eq!(book.level_count(), (1, 2));
        assert!(!book.has_nonpositive_level());
    }

    #[test]
    fn metrics_need_both_sides() {
        let mut book = OrderBook::new(100);
        book.apply_snapshot(1, vec![(px(10.0), 1.0)], vec![]);
        assert!(book.compute_metrics().is_none());
    }

    #[test]
    fn metrics_are_deterministic() {
        let book = snapshot_book();
        let a = book.compute_metrics().unwrap();
        let b = book.compute_metrics().unwrap();
        assert_eq!(a.weighted_midprice, b.weighted_midprice);
        assert_eq!(a.midprice, b.midprice);
        assert_eq!(a.best_bid, b.best_bid);
        assert_eq!(a.best_ask, b.best_ask);
    }

    #[test]
    fn heavier_bids_lift_the_weighted_mid() {
        let mut book = OrderBook::new(100);
        book.apply_snapshot(
            1,
            vec![(px(10.00), 5.0), (px(9.99), 5.0)],
            vec![(px(10.01), 1.0), (px(10.02), 1.0)],
        );
        let m = book.compute_metrics().unwrap();
        assert!(m.weighted_midprice > m.midprice);

        let mut book = OrderBook::new(100);
        book.apply_snapshot(
            1,
            vec![(px(10.00), 1.0), (px(9.99), 1.0)],
            vec![(px(10.01), 5.0), (px(10.02), 5.0)],
        );
        let m = book.compute_metrics().unwrap();
        assert!(m.weighted_midprice < m.midprice);
    }

    #[test]
    fn resnapshot_restores_sync_in_place() {
        let mut book = snapshot_book();
        assert_eq!(
            book.apply_diff(&DepthDiff { first_id: 200, final_id: 210, bids: vec![], asks: vec![] }),
            DiffResult::Gap
        );
        assert!(!book.is_synced());
        book.apply_snapshot(250, vec![(px(10.05), 1.0)], vec![(px(10.06), 1.0)]);
        assert!(book.is_synced());
        assert_eq!(book.last_sequence_id(), 250);
        assert_eq!(book.level_count(), (1, 1));
        assert_eq!(book.apply_diff(&diff(251, 252)), DiffResult::Applied);
    }
}
