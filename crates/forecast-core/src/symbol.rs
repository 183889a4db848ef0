//! Symbol Codec
//!
//! Turns exchange-qualified tickers ("SH600000", "sz000001") into the bare
//! lowercase codes used as join keys across the quote and prediction tables.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Exchange prefixes recognised on raw tickers. Only the first match is stripped.
const EXCHANGE_PREFIXES: [&str; 2] = ["sh", "sz"];

/// Exchange-stripped, lowercased instrument code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalSymbol(String);

impl CanonicalSymbol {
    /// Normalize a raw ticker. Any input is accepted.
    pub fn normalize(raw: &str) -> Self {
        let lower = raw.to_lowercase();
        for prefix in EXCHANGE_PREFIXES {
            if let Some(rest) = lower.strip_prefix(prefix) {
                return Self(rest.to_string());
            }
        }
        Self(lower)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for CanonicalSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CanonicalSymbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Shorthand for [`CanonicalSymbol::normalize`].
pub fn normalize_symbol(raw: &str) -> CanonicalSymbol {
    CanonicalSymbol::normalize(raw)
}

/// Instrument class, deciding which daily-metrics table is authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentClass {
    #[default]
    Equity,
    Fund,
}

impl InstrumentClass {
    /// Source table holding names and daily quotes for this class.
    pub fn table_name(self) -> &'static str {
        match self {
            InstrumentClass::Equity => "a_stock_comment_daily",
            InstrumentClass::Fund => "etf_daily",
        }
    }

    /// Map the numeric `stock_type` used by upstream clients (2 = fund/ETF).
    pub fn from_stock_type(stock_type: i64) -> Self {
        if stock_type == 2 {
            InstrumentClass::Fund
        } else {
            InstrumentClass::Equity
        }
    }

    /// Inverse of [`InstrumentClass::from_stock_type`].
    pub fn stock_type(self) -> i64 {
        match self {
            InstrumentClass::Equity => 1,
            InstrumentClass::Fund => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InstrumentClass::Equity => "equity",
            InstrumentClass::Fund => "fund",
        }
    }
}

/// Shorthand for [`InstrumentClass::table_name`].
pub fn classify_table(class: InstrumentClass) -> &'static str {
    class.table_name()
}
