//! WebDriver Adapter
//!
//! Implements the automation port over the W3C WebDriver HTTP protocol
//! (chromedriver, geckodriver, or a Selenium grid):
//!
//! - **error**: protocol and transport errors, mapped onto `AutomationError`
//! - **client**: sessions, tabs, navigation, and element text reads

pub mod client;
pub mod error;

pub use client::{WebDriverClient, WebDriverConfig};
pub use error::WebDriverError;
