//! Real-time, locally-reconstructed limit order book for perpetual futures.
//!
//! Subscribes to an exchange's combined depth-diff stream, bootstraps each
//! symbol against a REST snapshot, and serves the reconciled book over a
//! small read-only HTTP API.

pub mod api;
pub mod book;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod snapshot;
pub mod stream;
