//! # Native Amounts
//!
//! An [`Amount`] is an integer count of the native asset's smallest unit
//! (18 decimals). Humans type `"0.001"`; the vault sees
//! `1_000_000_000_000_000`. Conversion happens exactly once, at the edge,
//! and never goes through a float.
//!
//! Amounts serialize as decimal strings of base units. `u128` does not fit
//! in a JSON number without precision loss in most clients, so we don't
//! pretend it does.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::config::{NATIVE_DECIMALS, NATIVE_SYMBOL, UNITS_PER_COIN};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors produced while parsing a decimal amount.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    /// The input was empty (or only whitespace).
    #[error("amount is empty")]
    Empty,

    /// The input is not a plain non-negative decimal number.
    #[error("invalid amount '{0}': expected a non-negative decimal like \"0.001\"")]
    InvalidFormat(String),

    /// More fractional digits than the asset supports.
    #[error("amount '{input}' has more than {max} decimal places")]
    TooManyDecimals {
        /// The offending input.
        input: String,
        /// Maximum supported decimal places.
        max: u32,
    },

    /// The value does not fit in 128 bits of base units.
    #[error("amount '{0}' is too large")]
    Overflow(String),
}

// ---------------------------------------------------------------------------
// Amount
// ---------------------------------------------------------------------------

/// A non-negative quantity of the native asset in base units.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(u128);

impl Amount {
    /// Zero. The balance of every vault that has been emptied.
    pub const ZERO: Amount = Amount(0);

    /// Wraps a raw base-unit count.
    pub const fn from_base_units(units: u128) -> Self {
        Self(units)
    }

    /// Returns the raw base-unit count.
    pub const fn base_units(self) -> u128 {
        self.0
    }

    /// Whole coins to base units. `None` on overflow.
    pub fn from_coins(coins: u128) -> Option<Self> {
        coins.checked_mul(UNITS_PER_COIN).map(Self)
    }

    /// Returns `true` if the amount is zero.
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    /// Parses a decimal string in whole-coin units.
    ///
    /// Accepts `"1"`, `"1.5"`, `"0.001"` and `".5"`. Rejects signs,
    /// exponents, separators and anything with more than
    /// [`NATIVE_DECIMALS`] fractional digits. Truncating a user's amount
    /// silently is how money goes missing.
    pub fn parse_decimal(input: &str) -> Result<Self, AmountError> {
        let s = input.trim();
        if s.is_empty() {
            return Err(AmountError::Empty);
        }

        let (whole, frac) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };

        let digits_only = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if !digits_only(whole) || !digits_only(frac) || (whole.is_empty() && frac.is_empty()) {
            return Err(AmountError::InvalidFormat(s.to_string()));
        }

        if frac.len() > NATIVE_DECIMALS as usize {
            return Err(AmountError::TooManyDecimals {
                input: s.to_string(),
                max: NATIVE_DECIMALS,
            });
        }

        let overflow = || AmountError::Overflow(s.to_string());

        let whole_units = if whole.is_empty() {
            0
        } else {
            whole
                .parse::<u128>()
                .map_err(|_| overflow())?
                .checked_mul(UNITS_PER_COIN)
                .ok_or_else(overflow)?
        };

        let frac_units = if frac.is_empty() {
            0
        } else {
            let padded = format!("{:0<width$}", frac, width = NATIVE_DECIMALS as usize);
            padded.parse::<u128>().map_err(|_| overflow())?
        };

        whole_units
            .checked_add(frac_units)
            .map(Amount)
            .ok_or_else(overflow)
    }

    /// Renders the amount in whole-coin units.
    ///
    /// Always has at least one fractional digit and never trailing zeros
    /// beyond it: `1.0`, `0.001`, `12.345`.
    pub fn to_decimal_string(self) -> String {
        let whole = self.0 / UNITS_PER_COIN;
        let frac = self.0 % UNITS_PER_COIN;
        if frac == 0 {
            return format!("{}.0", whole);
        }
        let frac_str = format!("{:0>width$}", frac, width = NATIVE_DECIMALS as usize);
        format!("{}.{}", whole, frac_str.trim_end_matches('0'))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.to_decimal_string(), NATIVE_SYMBOL)
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_decimal(s)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse::<u128>()
            .map(Amount)
            .map_err(|_| serde::de::Error::custom(format!("invalid base-unit amount '{}'", s)))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
