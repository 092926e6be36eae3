//! Runtime configuration.
//!
//! Everything the system needs is read from the environment at startup and
//! never persisted — there is no config file and no live-reload.

mod settings;

pub use settings::{ConfigError, Settings};
