//! Wire and view types for the order book reconstructor.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One incremental depth-update event from the combined WebSocket stream.
///
/// Field names mirror the exchange's wire format (`U`, `u`, `pu`, `b`, `a`)
/// exactly, so deserialization needs no renaming beyond the derive attributes.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiffEvent {
    /// First update id carried by this event.
    #[serde(rename = "U")]
    pub first_update_id: i64,

    /// Last update id carried by this event.
    #[serde(rename = "u")]
    pub final_update_id: i64,

    /// The previous event's `u`, for continuity checking.
    #[serde(rename = "pu")]
    pub prev_final_update_id: i64,

    /// Bid level changes: `[price, quantity]` pairs, wire strings preserved verbatim.
    #[serde(rename = "b", default)]
    pub bids: Vec<[String; 2]>,

    /// Ask level changes: `[price, quantity]` pairs, wire strings preserved verbatim.
    #[serde(rename = "a", default)]
    pub asks: Vec<[String; 2]>,
}

/// Envelope wrapping a single payload in the combined-stream form
/// (`/stream?streams=...`): `{"stream": "<name>", "data": {...}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct CombinedStreamEnvelope<T> {
    pub stream: String,
    pub data: T,
}

/// A full point-in-time depth snapshot as returned by the REST endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub last_update_id: i64,
    pub bids: Vec<[String; 2]>,
    pub asks: Vec<[String; 2]>,
}

/// A consistent, serializable point-in-time view of one symbol's book,
/// produced by copying the maps under the symbol's lock and releasing the
/// lock before serialization (see `SymbolBook::view`).
#[derive(Debug, Clone, Serialize)]
pub struct BookView {
    pub symbol: String,
    pub bids: HashMap<String, String>,
    pub asks: HashMap<String, String>,
    #[serde(rename = "lastUpdateId")]
    pub last_update_id: i64,
    pub last_u: i64,
}

/// Outcome of trying to install a snapshot and replay the buffer against it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// The book is now initialized and queryable.
    Ready,
    /// The snapshot fell in a gap the buffer can't bridge; retry with a fresh snapshot.
    Gap,
}

/// Outcome of handing a live diff to a book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The book was not yet initialized; the diff was appended to the buffer.
    Buffered,
    /// The diff was stale (fully superseded) and silently dropped.
    Stale,
    /// The diff was applied to the live book.
    Applied,
    /// The diff could not be applied in sequence; the book must re-bootstrap.
    Gap,
}
