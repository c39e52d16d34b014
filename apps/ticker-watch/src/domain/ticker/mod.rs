//! Ticker Symbols and Price Updates
//!
//! Core value types shared by every layer: the normalized ticker symbol used
//! as the identity key, the price parsed from scraped display text, and the
//! update record emitted when a watched price changes.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

// =============================================================================
// Ticker Symbol
// =============================================================================

/// A normalized ticker symbol (trimmed, uppercased, non-empty).
///
/// # Example
///
/// ```rust
/// use ticker_watch::domain::ticker::TickerSymbol;
///
/// let symbol = TickerSymbol::parse("  btcusdt ").unwrap();
/// assert_eq!(symbol.as_str(), "BTCUSDT");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TickerSymbol(String);

impl TickerSymbol {
    /// Normalize a raw symbol.
    ///
    /// Only surrounding whitespace is removed; whatever remains is kept as
    /// typed, uppercased. A symbol the quote site does not know is caught
    /// later by page validation.
    ///
    /// # Errors
    ///
    /// Returns `SymbolError::Empty` if nothing is left after trimming.
    pub fn parse(raw: &str) -> Result<Self, SymbolError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(SymbolError::Empty);
        }

        Ok(Self(trimmed.to_uppercase()))
    }

    /// Get the symbol as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the symbol and return the inner string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for TickerSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TickerSymbol {
    type Err = SymbolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for TickerSymbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for TickerSymbol {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// Symbol validation error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SymbolError {
    /// Symbol is empty after trimming.
    #[error("ticker symbol cannot be empty")]
    Empty,
}

// =============================================================================
// Price Parsing
// =============================================================================

/// Parse scraped display text into a price.
///
/// Grouping separators (commas, spaces, narrow no-break spaces) are stripped
/// and the Unicode minus sign is normalized. Returns `None` when the remaining
/// text is not a plain decimal number; `_` is never a digit separator here.
///
/// # Example
///
/// ```rust
/// use rust_decimal::Decimal;
/// use ticker_watch::domain::ticker::parse_price;
///
/// assert_eq!(parse_price("67,123.45"), Some(Decimal::new(6_712_345, 2)));
/// assert_eq!(parse_price("—"), None);
/// ```
#[must_use]
pub fn parse_price(text: &str) -> Option<Decimal> {
    let cleaned: String = text
        .trim()
        .chars()
        .filter(|c| !matches!(c, ',' | ' ' | '\u{00a0}' | '\u{202f}'))
        .map(|c| if c == '\u{2212}' { '-' } else { c })
        .collect();

    if cleaned.is_empty() || cleaned.contains('_') {
        return None;
    }

    Decimal::from_str(&cleaned)
        .or_else(|_| Decimal::from_scientific(&cleaned))
        .ok()
        .map(|d| d.normalize())
}

// =============================================================================
// Price Update
// =============================================================================

/// A detected price change for one ticker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceUpdate {
    /// Ticker the price belongs to.
    pub ticker: TickerSymbol,
    /// Parsed price.
    pub price: Decimal,
    /// When the change was observed.
    pub timestamp: DateTime<Utc>,
}

impl PriceUpdate {
    /// Create a new update record.
    #[must_use]
    pub const fn new(ticker: TickerSymbol, price: Decimal, timestamp: DateTime<Utc>) -> Self {
        Self {
            ticker,
            price,
            timestamp,
        }
    }

    /// Create an update stamped with the current time.
    #[must_use]
    pub fn now(ticker: TickerSymbol, price: Decimal) -> Self {
        Self::new(ticker, price, Utc::now())
    }

    /// Observation time as Unix milliseconds.
    #[must_use]
    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}

// =============================================================================
// Tests
// =============================================================================
