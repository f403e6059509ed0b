//! Symbol value object for instrument identifiers.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

/// Maximum accepted symbol length after normalization.
pub const MAX_SYMBOL_LEN: usize = 32;

/// A normalized instrument symbol (stock, index, FX or crypto ticker).
///
/// Symbols are case-insensitive at the boundary and stored uppercase, so
/// `"aapl"`, `" AAPL "` and `"Aapl"` all parse to the same value.
///
/// Examples: `"AAPL"`, `"BTC-USD"`, `"^GSPC"`, `"EURUSD=X"`, `"0700.HK"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Parse and normalize a raw symbol.
    ///
    /// # Errors
    ///
    /// Returns `SymbolError` if the symbol is empty after trimming, contains
    /// whitespace or control characters, or exceeds [`MAX_SYMBOL_LEN`].
    pub fn parse(raw: &str) -> Result<Self, SymbolError> {
        let trimmed = raw.trim();

        if trimmed.is_empty() {
            return Err(SymbolError::Empty);
        }

        if trimmed.chars().count() > MAX_SYMBOL_LEN {
            return Err(SymbolError::TooLong(trimmed.chars().count()));
        }

        if let Some(c) = trimmed
            .chars()
            .find(|c| c.is_whitespace() || c.is_control())
        {
            return Err(SymbolError::InvalidCharacter(c));
        }

        Ok(Self(trimmed.to_uppercase()))
    }

    /// Get the symbol string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for Symbol {
    type Err = SymbolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Reasons a raw symbol is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SymbolError {
    /// Nothing left after trimming.
    #[error("symbol cannot be empty")]
    Empty,
    /// Longer than [`MAX_SYMBOL_LEN`].
    #[error("symbol is {0} characters, maximum is {MAX_SYMBOL_LEN}")]
    TooLong(usize),
    /// Interior whitespace or a control character.
    #[error("symbol contains invalid character {0:?}")]
    InvalidCharacter(char),
}
