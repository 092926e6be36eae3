//! Response payloads for the Read API.

use serde::Serialize;
use std::collections::HashMap;

use crate::book::BookView;

/// `GET /orderbooks/{symbol}` success body.
#[derive(Debug, Serialize)]
pub struct OrderBookResponse {
    pub symbol: String,
    pub bids: HashMap<String, String>,
    pub asks: HashMap<String, String>,
    #[serde(rename = "lastUpdateId")]
    pub last_update_id: i64,
    pub last_u: i64,
}

impl From<BookView> for OrderBookResponse {
    fn from(view: BookView) -> Self {
        Self {
            symbol: view.symbol,
            bids: view.bids,
            asks: view.asks,
            last_update_id: view.last_update_id,
            last_u: view.last_u,
        }
    }
}

/// `GET /symbols` response body.
#[derive(Debug, Serialize)]
pub struct SymbolsResponse {
    pub symbols: Vec<String>,
    pub initialized: Vec<String>,
    pub pending: Vec<String>,
}

/// Shape of every error body the API returns: `{"error": "..."}`.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
