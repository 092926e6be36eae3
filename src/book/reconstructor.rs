//! Registry of per-symbol books and the bootstrap supervisor that (re)drives
//! a symbol from nothing to a continuously reconciled book, with backoff.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{error, info, warn};

use super::state::SymbolBook;
use super::types::{BootstrapOutcome, Snapshot};
use crate::error::Result;

/// Why a bootstrap attempt is being made, purely for logging context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebootstrapReason {
    /// First bootstrap for this symbol after process startup.
    Startup,
    /// A live gap (sequencing break, crossed book, or reconnect) forced a redo.
    Gap,
}

impl RebootstrapReason {
    fn as_str(self) -> &'static str {
        match self {
            RebootstrapReason::Startup => "startup",
            RebootstrapReason::Gap => "gap",
        }
    }
}

/// Owns one `SymbolBook` per allow-listed symbol behind its own lock, so a
/// re-bootstrap of one symbol never blocks reads or writes for any other.
pub struct BookRegistry {
    books: HashMap<String, Arc<Mutex<SymbolBook>>>,
}

impl BookRegistry {
    pub fn new(symbols: &[String]) -> Self {
        let books = symbols
            .iter()
            .map(|s| (s.clone(), Arc::new(Mutex::new(SymbolBook::new(s.clone())))))
            .collect();
        Self { books }
    }

    pub fn get(&self, symbol: &str) -> Option<Arc<Mutex<SymbolBook>>> {
        self.books.get(symbol).cloned()
    }

    pub fn symbols(&self) -> impl Iterator<Item = &String> {
        self.books.keys()
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }
}

/// Drive one symbol's book to `Ready`, retrying with exponential backoff
/// (`min(base * 2^retry_count, max)`) on every failure, whether the snapshot
/// fetch itself failed or the fetched snapshot didn't overlap the buffer.
///
/// Never gives up: past `retry_critical_at` attempts it keeps retrying at the
/// capped delay and logs at `error` level instead of `warn`, on the theory
/// that a human should be paged but the process should keep trying to serve
/// the symbol rather than abandon it.
pub async fn bootstrap_with_retry<F, Fut>(
    symbol: &str,
    book: &Arc<Mutex<SymbolBook>>,
    reason: RebootstrapReason,
    retry_base: Duration,
    retry_max: Duration,
    retry_critical_at: u32,
    fetch_snapshot: F,
) where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Snapshot>>,
{
    info!(symbol, reason = reason.as_str(), "bootstrapping order book");

    loop {
        let outcome = match fetch_snapshot().await {
            Ok(snapshot) => {
                let mut guard = book.lock().await;
                guard.bootstrap(snapshot)
            }
            Err(err) if err.is_retryable() => {
                warn!(symbol, error = %err, "snapshot fetch failed during bootstrap, retrying");
                BootstrapOutcome::Gap
            }
            Err(err) => {
                error!(
                    symbol,
                    error = %err,
                    "snapshot fetch failed with a non-retryable error, retrying anyway since the symbol must still be served"
                );
                BootstrapOutcome::Gap
            }
        };

        if outcome == BootstrapOutcome::Ready {
            info!(symbol, "order book bootstrapped");
            return;
        }

        let retry_count = {
            let mut guard = book.lock().await;
            guard.record_bootstrap_failure();
            guard.retry_count()
        };

        if retry_count >= retry_critical_at {
            error!(
                symbol,
                attempt = retry_count,
                "order book has failed to bootstrap for {} consecutive attempts, still retrying",
                retry_count
            );
        }

        let exponent = retry_count.min(20);
        let delay = retry_base
            .saturating_mul(1u32.checked_shl(exponent).unwrap_or(u32::MAX))
            .min(retry_max);
        warn!(symbol, attempt = retry_count, delay_ms = delay.as_millis() as u64, "retrying bootstrap");
        sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn snap(last_update_id: i64) -> Snapshot {
        Snapshot { last_update_id, bids: vec![], asks: vec![] }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_immediately_when_snapshot_is_clean() {
        let registry = BookRegistry::new(&["BTCUSDT".to_string()]);
        let book = registry.get("BTCUSDT").unwrap();
        bootstrap_with_retry(
            "BTCUSDT",
            &book,
            RebootstrapReason::Startup,
            Duration::from_millis(1),
            Duration::from_millis(10),
            10,
            || async { Ok(snap(100)) },
        )
        .await;
        assert!(book.lock().await.is_initialized());
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_a_good_snapshot_arrives() {
        let registry = BookRegistry::new(&["ETHUSDT".to_string()]);
        let book = registry.get("ETHUSDT").unwrap();
        let attempts = AtomicU32::new(0);
        bootstrap_with_retry(
            "ETHUSDT",
            &book,
            RebootstrapReason::Gap,
            Duration::from_millis(1),
            Duration::from_millis(5),
            10,
            || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(crate::error::ReconstructError::Connection("boom".to_string()))
                    } else {
                        Ok(snap(100))
                    }
                }
            },
        )
        .await;
        assert!(book.lock().await.is_initialized());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn registry_exposes_every_symbol() {
        let registry = BookRegistry::new(&["BTCUSDT".to_string(), "ETHUSDT".to_string()]);
        assert_eq!(registry.len(), 2);
        assert!(registry.get("BTCUSDT").is_some());
        assert!(registry.get("DOGEUSDT").is_none());
    }
}
