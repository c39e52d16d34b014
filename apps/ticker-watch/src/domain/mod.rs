//! Domain Layer - Core ticker types and lifecycle rules.
//!
//! This layer contains the value types and the requested-ticker set with no
//! knowledge of browsers, HTTP, or channels.

/// Ticker symbols, price parsing, and update records.
pub mod ticker;

/// The set of tickers currently requested by clients.
pub mod registry;

/// Watcher lifecycle states and status snapshots.
pub mod watcher;
