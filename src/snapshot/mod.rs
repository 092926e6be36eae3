//! REST snapshot client: fetches a single point-in-time depth snapshot.
//!
//! Scoped down from the teacher's `BinanceClient`, which signs and calls
//! dozens of trading/account endpoints; this client only ever does one
//! thing, unauthenticated, on a plain `reqwest::Client`.

use std::time::Duration;

use tracing::debug;

use crate::book::Snapshot;
use crate::error::{ReconstructError, Result};

/// Maximum depth requested per snapshot; matches the deepest book level the
/// exchange will return in a single response.
const SNAPSHOT_LIMIT: u32 = 1000;

#[derive(Debug, Clone)]
pub struct SnapshotClient {
    http: reqwest::Client,
    base_url: String,
}

impl SnapshotClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ReconstructError::from)?;
        Ok(Self { http, base_url: base_url.into() })
    }

    /// Fetch the current depth snapshot for one symbol.
    pub async fn fetch(&self, symbol: &str) -> Result<Snapshot> {
        let url = format!("{}/fapi/v1/depth", self.base_url);
        debug!(symbol, url = %url, "fetching order book snapshot");

        let response = self
            .http
            .get(&url)
            .query(&[("symbol", symbol), ("limit", &SNAPSHOT_LIMIT.to_string())])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ReconstructError::HttpStatus(response.status().as_u16()));
        }

        let snapshot: Snapshot = response.json().await?;
        Ok(snapshot)
    }
}
