//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `TickerService`: the client operations (add, remove, list, stream)
//! - `WatcherSupervisor`: watcher start/stop with restart ordering
//! - `Watcher`: per-ticker polling loop
//! - `BrowserPool`: the shared, reference-counted browser session

pub mod backoff;
pub mod browser;
pub mod supervisor;
pub mod ticker_service;
pub mod watcher;

pub use browser::{BrowserPool, BrowserStatus};
pub use supervisor::{EnsureOutcome, SupervisorError, WatcherSupervisor};
pub use ticker_service::TickerService;
pub use watcher::{PollOutcome, Watcher, WatcherConfig};
