//! Per-symbol order book state machine: bootstrap, apply, and gap detection.
//!
//! This is the heart of the reconstructor. Each symbol gets its own
//! `SymbolBook` guarded by its own `tokio::sync::Mutex`, so one symbol's
//! re-bootstrap never blocks reads or writes for any other symbol.

use std::collections::{HashMap, VecDeque};

use rust_decimal::Decimal;
use std::str::FromStr;
use tracing::{debug, warn};

use super::types::{BookView, BootstrapOutcome, DiffEvent, IngestOutcome, Snapshot};

/// Diffs buffered ahead of the most-applied `u` that aren't discarded outright,
/// bounded so a stuck bootstrap can't grow memory without limit.
const MAX_BUFFERED_DIFFS: usize = 2_000;

/// The reconstructed state for a single symbol.
///
/// Maps store price/quantity as the exact decimal strings the exchange sent;
/// `rust_decimal` is used only transiently to test for a zero quantity, never
/// to reformat or store a value.
pub struct SymbolBook {
    symbol: String,
    bids: HashMap<String, String>,
    asks: HashMap<String, String>,
    /// `lastUpdateId` from the snapshot currently applied, once bootstrapped.
    snapshot_id: Option<i64>,
    /// `u` of the most recently applied diff.
    last_u: Option<i64>,
    /// Diffs received while not yet initialized, or while a bootstrap attempt
    /// is pending a fresher snapshot; replayed against the next snapshot.
    buffer: VecDeque<DiffEvent>,
    initialized: bool,
    /// True between installing a snapshot and applying the first diff that
    /// straddles it; see the Apply rule in the bootstrap algorithm.
    first_event_after_snapshot: bool,
    /// Number of consecutive failed bootstrap attempts for this symbol.
    retry_count: u32,
}

impl SymbolBook {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            bids: HashMap::new(),
            asks: HashMap::new(),
            snapshot_id: None,
            last_u: None,
            buffer: VecDeque::new(),
            initialized: false,
            first_event_after_snapshot: false,
            retry_count: 0,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn record_bootstrap_failure(&mut self) {
        self.retry_count = self.retry_count.saturating_add(1);
    }

    /// Append a live diff to the buffer. Bounded so a long-stuck bootstrap
    /// can't grow memory without limit; unlike the optional compaction the
    /// bootstrap algorithm allows (dropping a buffered diff whose `u`
    /// precedes a later one's `U`), this keeps every buffered diff, since a
    /// normal contiguous stream has each diff's `U` immediately follow the
    /// previous one's `u` and dropping any of them would break the
    /// first-event overlap check against the next snapshot.
    pub fn buffer_diff(&mut self, event: DiffEvent) {
        if self.buffer.len() >= MAX_BUFFERED_DIFFS {
            self.buffer.pop_front();
        }
        self.buffer.push_back(event);
    }

    /// Install a snapshot and replay the buffer against it.
    ///
    /// 1. Discard every buffered event fully superseded by the snapshot
    ///    (`u < snapshot.last_update_id`).
    /// 2. If nothing remains, the symbol is trivially synchronized: the next
    ///    live diff must itself straddle the snapshot id.
    /// 3. Otherwise the first remaining event must straddle the snapshot id
    ///    (`U <= snapshot.last_update_id <= u`); if it doesn't, this snapshot
    ///    fell in a gap the buffer can't bridge and the caller must retry
    ///    with a fresher one. The buffer is left intact for that retry.
    ///
    /// `retry_count` is reset only on the two paths that return `Ready`; a
    /// `Gap` outcome leaves it untouched so the caller's backoff escalates on
    /// repeated failures instead of resetting every attempt.
    pub fn bootstrap(&mut self, snapshot: Snapshot) -> BootstrapOutcome {
        self.bids.clear();
        self.asks.clear();
        for [price, qty] in snapshot.bids {
            insert_level(&mut self.bids, price, qty);
        }
        for [price, qty] in snapshot.asks {
            insert_level(&mut self.asks, price, qty);
        }

        let snapshot_id = snapshot.last_update_id;
        self.snapshot_id = Some(snapshot_id);

        while let Some(front) = self.buffer.front() {
            if front.final_update_id < snapshot_id {
                self.buffer.pop_front();
            } else {
                break;
            }
        }

        if self.buffer.is_empty() {
            self.last_u = Some(snapshot_id);
            self.first_event_after_snapshot = true;
            self.initialized = true;
            self.retry_count = 0;
            return BootstrapOutcome::Ready;
        }

        let first = self.buffer.front().expect("just checked non-empty");
        let overlaps = first.first_update_id <= snapshot_id && snapshot_id <= first.final_update_id;
        if !overlaps {
            warn!(
                symbol = %self.symbol,
                snapshot_id,
                "snapshot does not overlap buffered diffs, re-bootstrap required"
            );
            return BootstrapOutcome::Gap;
        }

        let pending: Vec<DiffEvent> = self.buffer.drain(..).collect();
        for event in &pending {
            apply_levels(&mut self.bids, &event.bids);
            apply_levels(&mut self.asks, &event.asks);
            self.last_u = Some(event.final_update_id);
        }

        self.first_event_after_snapshot = false;
        self.initialized = true;
        self.retry_count = 0;
        BootstrapOutcome::Ready
    }

    /// Handle one live diff. Buffers it if the book isn't initialized yet,
    /// otherwise applies the bootstrap algorithm's Apply rule.
    pub fn ingest(&mut self, event: DiffEvent) -> IngestOutcome {
        if !self.initialized {
            self.buffer_diff(event);
            return IngestOutcome::Buffered;
        }

        if self.first_event_after_snapshot {
            return self.ingest_first_event_after_snapshot(event);
        }
        self.ingest_steady_state(event)
    }

    fn ingest_first_event_after_snapshot(&mut self, event: DiffEvent) -> IngestOutcome {
        let snapshot_id = self.snapshot_id.expect("initialized book always has snapshot_id");

        if event.final_update_id < snapshot_id {
            return IngestOutcome::Stale;
        }

        if !(event.first_update_id <= snapshot_id && snapshot_id <= event.final_update_id) {
            warn!(
                symbol = %self.symbol,
                snapshot_id,
                "first post-snapshot diff does not straddle the snapshot id, re-bootstrap required"
            );
            self.enter_gap(Some(event));
            return IngestOutcome::Gap;
        }

        apply_levels(&mut self.bids, &event.bids);
        apply_levels(&mut self.asks, &event.asks);
        self.last_u = Some(event.final_update_id);
        self.first_event_after_snapshot = false;

        self.finish_apply()
    }

    fn ingest_steady_state(&mut self, event: DiffEvent) -> IngestOutcome {
        let last_u = self.last_u.expect("initialized book always has last_u");

        if event.prev_final_update_id != last_u {
            warn!(
                symbol = %self.symbol,
                expected = last_u,
                got = event.prev_final_update_id,
                "sequencing gap detected, re-bootstrap required"
            );
            self.enter_gap(Some(event));
            return IngestOutcome::Gap;
        }

        apply_levels(&mut self.bids, &event.bids);
        apply_levels(&mut self.asks, &event.asks);
        self.last_u = Some(event.final_update_id);

        self.finish_apply()
    }

    /// Crossed-book sanity check run after every successful apply: if the
    /// best bid is no longer below the best ask, something upstream is
    /// inconsistent and the safest response is to treat it as a gap.
    fn finish_apply(&mut self) -> IngestOutcome {
        if let Some((best_bid, best_ask)) = self.best_bid_ask() {
            if best_bid >= best_ask {
                warn!(
                    symbol = %self.symbol,
                    %best_bid,
                    %best_ask,
                    "book crossed after applying diff, re-bootstrap required"
                );
                self.enter_gap(None);
                return IngestOutcome::Gap;
            }
        }
        debug!(symbol = %self.symbol, last_u = self.last_u, "diff applied");
        IngestOutcome::Applied
    }

    /// Transition to `Uninitialized`, seeding the buffer with the offending
    /// diff (if any) — it may still be the first valid post-snapshot event
    /// once a fresh snapshot arrives.
    fn enter_gap(&mut self, offending: Option<DiffEvent>) {
        self.initialized = false;
        self.first_event_after_snapshot = true;
        self.buffer.clear();
        if let Some(event) = offending {
            self.buffer.push_back(event);
        }
    }

    /// Best bid and best ask as decimals, for the crossed-book sanity check.
    /// Returns `None` when either side is empty (nothing to compare yet).
    fn best_bid_ask(&self) -> Option<(Decimal, Decimal)> {
        let best_bid = self
            .bids
            .keys()
            .filter_map(|p| Decimal::from_str(p).ok())
            .max()?;
        let best_ask = self
            .asks
            .keys()
            .filter_map(|p| Decimal::from_str(p).ok())
            .min()?;
        Some((best_bid, best_ask))
    }

    /// A consistent point-in-time copy, cheap to take under the lock and
    /// serialize after releasing it.
    pub fn view(&self) -> BookView {
        BookView {
            symbol: self.symbol.clone(),
            bids: self.bids.clone(),
            asks: self.asks.clone(),
            last_update_id: self.snapshot_id.unwrap_or_default(),
            last_u: self.last_u.unwrap_or_default(),
        }
    }
}

/// Insert a snapshot level verbatim; snapshots never carry a zero quantity,
/// but guard the invariant anyway rather than trust the wire.
fn insert_level(side: &mut HashMap<String, String>, price: String, qty: String) {
    if is_zero(&qty) {
        side.remove(&price);
    } else {
        side.insert(price, qty);
    }
}

/// Apply a diff's level changes: zero quantity deletes the level, anything
/// else replaces it, preserving the exact string the exchange sent.
fn apply_levels(side: &mut HashMap<String, String>, levels: &[[String; 2]]) {
    for [price, qty] in levels {
        if is_zero(qty) {
            side.remove(price);
        } else {
            side.insert(price.clone(), qty.clone());
        }
    }
}

fn is_zero(qty: &str) -> bool {
    Decimal::from_str(qty).map(|d| d.is_zero()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(last_update_id: i64, bids: &[(&str, &str)], asks: &[(&str, &str)]) -> Snapshot {
        Snapshot {
            last_update_id,
            bids: bids.iter().map(|(p, q)| [p.to_string(), q.to_string()]).collect(),
            asks: asks.iter().map(|(p, q)| [p.to_string(), q.to_string()]).collect(),
        }
    }

    fn diff(u_first: i64, u_last: i64, pu: i64, bids: &[(&str, &str)], asks: &[(&str, &str)]) -> DiffEvent {
        DiffEvent {
            first_update_id: u_first,
            final_update_id: u_last,
            prev_final_update_id: pu,
            bids: bids.iter().map(|(p, q)| [p.to_string(), q.to_string()]).collect(),
            asks: asks.iter().map(|(p, q)| [p.to_string(), q.to_string()]).collect(),
        }
    }

    #[test]
    fn fresh_snapshot_with_no_buffer_is_ready() {
        let mut book = SymbolBook::new("BTCUSDT");
        let outcome = book.bootstrap(snap(100, &[("50000.0", "1.5")], &[("50001.0", "2.0")]));
        assert_eq!(outcome, BootstrapOutcome::Ready);
        assert!(book.is_initialized());
        assert_eq!(book.view().bids.get("50000.0"), Some(&"1.5".to_string()));
        assert_eq!(book.view().last_u, 100);
    }

    #[test]
    fn happy_bootstrap_applies_buffered_diffs_in_order() {
        // Scenario 1 from the testable-properties list: buffered u=100,101,102
        // against a snapshot at lastUpdateId=100, first diff U=99,u=100.
        let mut book = SymbolBook::new("BTCUSDT");
        assert_eq!(book.ingest(diff(99, 100, 98, &[("50000.0", "3.0")], &[])), IngestOutcome::Buffered);
        assert_eq!(book.ingest(diff(101, 101, 100, &[], &[])), IngestOutcome::Buffered);
        assert_eq!(book.ingest(diff(102, 102, 101, &[], &[])), IngestOutcome::Buffered);
        let outcome = book.bootstrap(snap(100, &[("50000.0", "1.5")], &[("50001.0", "2.0")]));
        assert_eq!(outcome, BootstrapOutcome::Ready);
        assert!(book.is_initialized());
        assert_eq!(book.view().bids.get("50000.0"), Some(&"3.0".to_string()));
        assert_eq!(book.view().last_u, 102);
    }

    #[test]
    fn stale_pruning_drops_fully_superseded_diffs() {
        // Scenario 2: buffer u=95,97,100,101; snapshot lastUpdateId=100.
        let mut book = SymbolBook::new("BTCUSDT");
        assert_eq!(book.ingest(diff(90, 95, 89, &[], &[])), IngestOutcome::Buffered);
        assert_eq!(book.ingest(diff(96, 97, 95, &[], &[])), IngestOutcome::Buffered);
        assert_eq!(book.ingest(diff(98, 100, 97, &[("50000.0", "9.0")], &[])), IngestOutcome::Buffered);
        assert_eq!(book.ingest(diff(101, 101, 100, &[], &[])), IngestOutcome::Buffered);
        let outcome = book.bootstrap(snap(100, &[("50000.0", "1.5")], &[]));
        assert_eq!(outcome, BootstrapOutcome::Ready);
        assert_eq!(book.view().bids.get("50000.0"), Some(&"9.0".to_string()));
        assert_eq!(book.view().last_u, 101);
    }

    #[test]
    fn gap_on_first_event_requires_rebootstrap_and_retains_buffer_for_retry() {
        // Scenario 3: buffer [U=110,u=115]; snapshot lastUpdateId=100 doesn't
        // overlap. A second, fresher snapshot whose id falls in [110,115]
        // then succeeds using the same buffered diff.
        let mut book = SymbolBook::new("BTCUSDT");
        assert_eq!(book.ingest(diff(110, 115, 109, &[("1.0", "1.0")], &[])), IngestOutcome::Buffered);

        let outcome = book.bootstrap(snap(100, &[], &[]));
        assert_eq!(outcome, BootstrapOutcome::Gap);
        assert!(!book.is_initialized());

        let outcome = book.bootstrap(snap(112, &[], &[]));
        assert_eq!(outcome, BootstrapOutcome::Ready);
        assert!(book.is_initialized());
        assert_eq!(book.view().bids.get("1.0"), Some(&"1.0".to_string()));
        assert_eq!(book.view().last_u, 115);
    }

    #[test]
    fn mid_stream_gap_triggers_rebootstrap_with_offending_diff_seeded() {
        // Scenario 4: healthy state last_u=500, next diff has pu=498.
        let mut book = SymbolBook::new("BTCUSDT");
        book.bootstrap(snap(500, &[], &[]));
        // Clear the first-event-after-snapshot flag with a straddling diff.
        book.ingest(diff(500, 500, 0, &[], &[]));

        let outcome = book.ingest(diff(499, 505, 498, &[], &[]));
        assert_eq!(outcome, IngestOutcome::Gap);
        assert!(!book.is_initialized());

        // The offending diff is retained and can satisfy the next bootstrap.
        let outcome = book.bootstrap(snap(502, &[], &[]));
        assert_eq!(outcome, BootstrapOutcome::Ready);
        assert_eq!(book.view().last_u, 505);
    }

    #[test]
    fn zero_quantity_deletes_level() {
        // Scenario 5.
        let mut book = SymbolBook::new("BTCUSDT");
        book.bootstrap(snap(100, &[("10.25", "4.0")], &[]));
        let outcome = book.ingest(diff(100, 101, 0, &[("10.25", "0")], &[]));
        assert_eq!(outcome, IngestOutcome::Applied);
        assert!(!book.view().bids.contains_key("10.25"));
    }

    #[test]
    fn stale_first_event_after_snapshot_is_ignored() {
        let mut book = SymbolBook::new("BTCUSDT");
        book.bootstrap(snap(100, &[], &[]));
        let outcome = book.ingest(diff(90, 95, 0, &[("1.0", "1.0")], &[]));
        assert_eq!(outcome, IngestOutcome::Stale);
        assert!(book.is_initialized());
        assert!(!book.view().bids.contains_key("1.0"));
    }

    #[test]
    fn exact_decimal_strings_are_preserved_verbatim() {
        let mut book = SymbolBook::new("BTCUSDT");
        book.bootstrap(snap(100, &[("50000.00000000", "1.50000000")], &[]));
        assert_eq!(book.view().bids.get("50000.00000000"), Some(&"1.50000000".to_string()));
    }

    #[test]
    fn crossed_book_after_apply_triggers_gap() {
        let mut book = SymbolBook::new("BTCUSDT");
        book.bootstrap(snap(100, &[("50000.0", "1.0")], &[("50001.0", "1.0")]));
        book.ingest(diff(100, 100, 0, &[], &[])); // clear first-event flag
        // Push the best bid above the best ask.
        let outcome = book.ingest(diff(101, 101, 100, &[("50002.0", "1.0")], &[]));
        assert_eq!(outcome, IngestOutcome::Gap);
        assert!(!book.is_initialized());
    }

    #[test]
    fn rebootstrap_after_gap_is_idempotent_with_correct_state() {
        let mut book = SymbolBook::new("BTCUSDT");
        book.bootstrap(snap(100, &[("50000.0", "1.0")], &[("50001.0", "1.0")]));
        book.ingest(diff(100, 100, 0, &[], &[]));
        book.ingest(diff(101, 101, 100, &[("50002.0", "1.0")], &[])); // triggers gap
        assert!(!book.is_initialized());
        let outcome = book.bootstrap(snap(200, &[("49000.0", "1.0")], &[("49500.0", "1.0")]));
        assert_eq!(outcome, BootstrapOutcome::Ready);
        assert!(book.is_initialized());
        assert_eq!(book.view().last_update_id, 200);
    }

    #[test]
    fn retry_count_resets_on_successful_bootstrap() {
        let mut book = SymbolBook::new("BTCUSDT");
        book.record_bootstrap_failure();
        book.record_bootstrap_failure();
        assert_eq!(book.retry_count(), 2);
        book.bootstrap(snap(100, &[], &[]));
        assert_eq!(book.retry_count(), 0);
    }

    #[test]
    fn retry_count_survives_a_non_overlapping_bootstrap_attempt() {
        // A `Gap` outcome must not reset retry_count, otherwise the caller's
        // exponential backoff never escalates past the first failure.
        let mut book = SymbolBook::new("BTCUSDT");
        book.ingest(diff(110, 115, 109, &[], &[]));
        book.record_bootstrap_failure();
        book.record_bootstrap_failure();
        assert_eq!(book.retry_count(), 2);

        let outcome = book.bootstrap(snap(100, &[], &[]));
        assert_eq!(outcome, BootstrapOutcome::Gap);
        assert_eq!(book.retry_count(), 2, "a Gap outcome must not reset retry_count");

        book.record_bootstrap_failure();
        assert_eq!(book.retry_count(), 3);

        let outcome = book.bootstrap(snap(112, &[], &[]));
        assert_eq!(outcome, BootstrapOutcome::Ready);
        assert_eq!(book.retry_count(), 0, "a Ready outcome resets retry_count");
    }

    #[test]
    fn last_u_is_monotonic_while_initialized() {
        let mut book = SymbolBook::new("BTCUSDT");
        book.bootstrap(snap(100, &[], &[]));
        book.ingest(diff(100, 100, 0, &[], &[]));
        assert_eq!(book.view().last_u, 100);
        book.ingest(diff(101, 103, 100, &[], &[]));
        assert_eq!(book.view().last_u, 103);
    }
}
