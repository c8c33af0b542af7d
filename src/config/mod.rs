//! Configuration for the row exchange.

pub mod options;
pub use options::{DebugFlags, ExchangeOptions, DEFAULT_TAG_BASE, MAX_TAG_BASE};
