//! Configuration Module
//!
//! Configuration loading for the ticker watch service.

mod settings;

pub use settings::{
    BrowserKind, BrowserSettings, BroadcastSettings, ConfigError, ScrapeSettings, ServerSettings,
    WatchConfig, WatcherSettings, WebDriverSettings,
};

pub(crate) use settings::TICKER_PLACEHOLDER;
