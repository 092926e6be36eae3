//! Order book reconstruction: wire types, per-symbol state, and the
//! bootstrap supervisor that drives a symbol from "unsubscribed" to
//! "continuously reconciled" and back again after a gap.

mod reconstructor;
mod state;
mod types;

pub use reconstructor::{bootstrap_with_retry, BookRegistry, RebootstrapReason};
pub use state::SymbolBook;
pub use types::{BookView, BootstrapOutcome, CombinedStreamEnvelope, DiffEvent, IngestOutcome, Snapshot};
