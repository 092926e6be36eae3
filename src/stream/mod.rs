//! Combined WebSocket depth stream client.
//!
//! One connection serves up to `symbols_per_connection` symbols at once via
//! the exchange's combined-stream endpoint (`/stream?streams=a@depth@100ms/b@depth@100ms/...`).
//! Reconnecting a dropped connection uses a fixed delay, distinct from the
//! per-symbol bootstrap backoff, and forces every symbol on that connection
//! through a full re-bootstrap since diffs missed during the outage can't be
//! trusted to bridge cleanly.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::book::{BookRegistry, CombinedStreamEnvelope, DiffEvent, IngestOutcome, RebootstrapReason, SymbolBook};
use crate::config::Settings;
use crate::snapshot::SnapshotClient;

/// Fixed delay between reconnect attempts for a dropped stream connection.
/// Deliberately not exponential: a stream connection drop is routine network
/// noise, not a sign the exchange is unreachable, so backing off hurts more
/// than it helps.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Suffix the exchange appends to a symbol to form a combined-stream name.
const DEPTH_STREAM_SUFFIX: &str = "@depth@100ms";

/// Splits an allow-list into batches of at most `symbols_per_connection` and
/// runs one managed connection per batch until the process shuts down.
pub struct StreamClient {
    ws_base_url: String,
    symbols_per_connection: usize,
}

impl StreamClient {
    pub fn new(settings: &Settings) -> Self {
        Self {
            ws_base_url: settings.ws_base_url.clone(),
            symbols_per_connection: settings.symbols_per_connection,
        }
    }

    /// Spawn one supervised connection task per batch of symbols. Each task
    /// runs until the process exits; failures are handled internally via
    /// reconnect-and-rebootstrap, never by returning an error to the caller.
    pub fn spawn_all(
        &self,
        registry: Arc<BookRegistry>,
        snapshot_client: Arc<SnapshotClient>,
        settings: Arc<Settings>,
    ) {
        let symbols: Vec<String> = registry.symbols().cloned().collect();
        for batch in symbols.chunks(self.symbols_per_connection.max(1)) {
            let batch = batch.to_vec();
            let ws_base_url = self.ws_base_url.clone();
            let registry = Arc::clone(&registry);
            let snapshot_client = Arc::clone(&snapshot_client);
            let settings = Arc::clone(&settings);
            tokio::spawn(async move {
                run_connection(ws_base_url, batch, registry, snapshot_client, settings).await;
            });
        }
    }
}

fn stream_url(base: &str, symbols: &[String]) -> String {
    let streams = symbols
        .iter()
        .map(|s| format!("{}{}", s.to_lowercase(), DEPTH_STREAM_SUFFIX))
        .collect::<Vec<_>>()
        .join("/");
    format!("{base}?streams={streams}")
}

/// Extract the upper-cased symbol from a combined-stream name such as
/// `btcusdt@depth@100ms`.
fn symbol_from_stream_name(stream: &str) -> Option<String> {
    stream
        .strip_suffix(DEPTH_STREAM_SUFFIX)
        .map(|s| s.to_uppercase())
}

async fn run_connection(
    ws_base_url: String,
    symbols: Vec<String>,
    registry: Arc<BookRegistry>,
    snapshot_client: Arc<SnapshotClient>,
    settings: Arc<Settings>,
) {
    let url = stream_url(&ws_base_url, &symbols);
    let mut first_connection = true;

    loop {
        info!(symbols = ?symbols, "connecting to combined depth stream");

        // A reconnect requires every symbol on this connection to be
        // re-bootstrapped: diffs in flight during the outage can't be
        // trusted to bridge against what's already applied. The very first
        // connection skips this — the orchestrator's staggered startup pass
        // performs the initial bootstrap for every symbol, and the books
        // simply buffer diffs until that happens.
        if !first_connection {
            rebootstrap_batch(&symbols, &registry, &snapshot_client, &settings, RebootstrapReason::Gap).await;
        }
        first_connection = false;

        match tokio_tungstenite::connect_async(&url).await {
            Ok((ws_stream, _)) => {
                let (mut write, mut read) = ws_stream.split();
                info!(symbols = ?symbols, "combined depth stream connected");

                while let Some(msg) = read.next().await {
                    match msg {
                        Ok(Message::Text(text)) => {
                            handle_message(&text, &registry, &snapshot_client, &settings).await;
                        }
                        Ok(Message::Ping(payload)) => {
                            if let Err(err) = write.send(Message::Pong(payload)).await {
                                warn!(error = %err, "failed to respond to ping");
                                break;
                            }
                        }
                        Ok(Message::Close(frame)) => {
                            warn!(?frame, "combined depth stream closed by server");
                            break;
                        }
                        Ok(_) => {}
                        Err(err) => {
                            warn!(error = %err, "error reading from combined depth stream");
                            break;
                        }
                    }
                }
            }
            Err(err) => {
                error!(error = %err, symbols = ?symbols, "failed to connect to combined depth stream");
            }
        }

        warn!(symbols = ?symbols, delay_secs = RECONNECT_DELAY.as_secs(), "reconnecting combined depth stream");
        sleep(RECONNECT_DELAY).await;
    }
}

async fn handle_message(
    text: &str,
    registry: &Arc<BookRegistry>,
    snapshot_client: &Arc<SnapshotClient>,
    settings: &Arc<Settings>,
) {
    let envelope: CombinedStreamEnvelope<DiffEvent> = match serde_json::from_str(text) {
        Ok(e) => e,
        Err(err) => {
            warn!(error = %err, "malformed combined stream payload, dropping");
            return;
        }
    };

    let Some(symbol) = symbol_from_stream_name(&envelope.stream) else {
        warn!(stream = %envelope.stream, "could not parse symbol from stream name");
        return;
    };

    let Some(book) = registry.get(&symbol) else {
        debug!(symbol, "diff received for unmonitored symbol, dropping");
        return;
    };

    let outcome = {
        let mut guard = book.lock().await;
        guard.ingest(envelope.data)
    };

    if outcome == IngestOutcome::Gap {
        let registry = Arc::clone(registry);
        let snapshot_client = Arc::clone(snapshot_client);
        let settings = Arc::clone(settings);
        tokio::spawn(async move {
            if let Some(book) = registry.get(&symbol) {
                rebootstrap_one(&symbol, &book, &snapshot_client, &settings, RebootstrapReason::Gap).await;
            }
        });
    }
}

async fn rebootstrap_batch(
    symbols: &[String],
    registry: &Arc<BookRegistry>,
    snapshot_client: &Arc<SnapshotClient>,
    settings: &Arc<Settings>,
    reason: RebootstrapReason,
) {
    let mut handles = Vec::with_capacity(symbols.len());
    for symbol in symbols {
        let Some(book) = registry.get(symbol) else { continue };
        let symbol = symbol.clone();
        let snapshot_client = Arc::clone(snapshot_client);
        let settings = Arc::clone(settings);
        handles.push(tokio::spawn(async move {
            rebootstrap_one(&symbol, &book, &snapshot_client, &settings, reason).await;
        }));
    }
    for handle in handles {
        let _ = handle.await;
    }
}

async fn rebootstrap_one(
    symbol: &str,
    book: &Arc<Mutex<SymbolBook>>,
    snapshot_client: &Arc<SnapshotClient>,
    settings: &Arc<Settings>,
    reason: RebootstrapReason,
) {
    let snapshot_client = Arc::clone(snapshot_client);
    let symbol_owned = symbol.to_string();
    crate::book::bootstrap_with_retry(
        symbol,
        book,
        reason,
        settings.retry_base,
        settings.retry_max,
        settings.retry_critical_at,
        move || {
            let snapshot_client = Arc::clone(&snapshot_client);
            let symbol = symbol_owned.clone();
            async move { snapshot_client.fetch(&symbol).await }
        },
    )
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_combined_stream_url() {
        let url = stream_url(
            "wss://fstream.binance.com/stream",
            &["BTCUSDT".to_string(), "ETHUSDT".to_string()],
        );
        assert_eq!(
            url,
            "wss://fstream.binance.com/stream?streams=btcusdt@depth@100ms/ethusdt@depth@100ms"
        );
    }

    #[test]
    fn extracts_symbol_from_stream_name() {
        assert_eq!(symbol_from_stream_name("btcusdt@depth@100ms"), Some("BTCUSDT".to_string()));
        assert_eq!(symbol_from_stream_name("btcusdt@trade"), None);
    }
}
