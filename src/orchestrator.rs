//! Startup sequencing and steady-state supervision.
//!
//! Order matters here: the stream client subscribes to the combined feed
//! before any snapshot is fetched so that the pre-bootstrap buffer can
//! absorb whatever diffs arrive in the gap, then a pre-roll wait gives the
//! buffer something to work with before the staggered snapshot fetches
//! begin.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, sleep};
use tracing::info;

use crate::api;
use crate::book::{bootstrap_with_retry, BookRegistry, RebootstrapReason};
use crate::config::Settings;
use crate::error::Result;
use crate::snapshot::SnapshotClient;
use crate::stream::StreamClient;

pub async fn run(settings: Settings) -> Result<()> {
    let settings = Arc::new(settings);
    let registry = Arc::new(BookRegistry::new(&settings.symbols));
    let snapshot_client = Arc::new(SnapshotClient::new(
        settings.rest_base_url.clone(),
        settings.snapshot_timeout,
    )?);

    info!(symbols = ?settings.symbols, "subscribing to combined depth stream");
    let stream_client = StreamClient::new(&settings);
    stream_client.spawn_all(Arc::clone(&registry), Arc::clone(&snapshot_client), Arc::clone(&settings));

    info!(preroll_ms = settings.preroll.as_millis() as u64, "waiting for buffer to fill before first snapshot");
    sleep(settings.preroll).await;

    stagger_initial_bootstrap(&registry, &snapshot_client, &settings).await;

    tokio::spawn(health_summary_loop(Arc::clone(&registry), settings.health_interval));

    api::serve(settings.http_addr, registry).await.map_err(|e| {
        crate::error::ReconstructError::Connection(format!("read API server failed: {e}"))
    })
}

/// Kick off the first snapshot fetch for each symbol with a small delay
/// between *launches*, so startup doesn't burst every symbol's first request
/// at once. Each symbol's bootstrap runs as its own task — one symbol stuck
/// retrying against a persistently bad snapshot endpoint must never delay
/// another symbol's bootstrap, and must never delay the Read API from
/// binding. The stream connections are already up and buffering by this
/// point; a reconnect later in the process's life re-bootstraps its own
/// symbols independently.
async fn stagger_initial_bootstrap(
    registry: &Arc<BookRegistry>,
    snapshot_client: &Arc<SnapshotClient>,
    settings: &Arc<Settings>,
) {
    for symbol in registry.symbols().cloned().collect::<Vec<_>>() {
        let Some(book) = registry.get(&symbol) else { continue };
        if book.lock().await.is_initialized() {
            continue;
        }
        let snapshot_client = Arc::clone(snapshot_client);
        let settings = Arc::clone(settings);
        tokio::spawn(async move {
            let symbol_for_call = symbol.clone();
            bootstrap_with_retry(
                &symbol_for_call,
                &book,
                RebootstrapReason::Startup,
                settings.retry_base,
                settings.retry_max,
                settings.retry_critical_at,
                move || {
                    let snapshot_client = Arc::clone(&snapshot_client);
                    let symbol = symbol.clone();
                    async move { snapshot_client.fetch(&symbol).await }
                },
            )
            .await;
        });
        sleep(settings.stagger).await;
    }
}

async fn health_summary_loop(registry: Arc<BookRegistry>, period: Duration) {
    let mut ticker = interval(period);
    loop {
        ticker.tick().await;
        let mut initialized = 0usize;
        let mut pending = 0usize;
        for symbol in registry.symbols() {
            if let Some(book) = registry.get(symbol) {
                if book.lock().await.is_initialized() {
                    initialized += 1;
                } else {
                    pending += 1;
                }
            }
        }
        info!(
            total = registry.len(),
            initialized,
            pending,
            "order book health summary"
        );
    }
}
