use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use thiserror::Error;

pub const DEWIES_PER_CREDIT: u64 = 100_000_000;
const DECIMALS: usize = 8;

/// An amount of credits, stored in dewies (the minimum denomination).
///
/// The chain CLI and the wallet daemon both speak decimal credits ("2.5"),
/// while the stratum protocol reports dewies (`250000000`). Keeping the
/// integer form avoids float noise such as `0.00026450000000000003` leaking
/// into CLI arguments.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(u64);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AmountError {
    #[error("`{0}` is not a decimal credit amount")]
    Malformed(String),
    #[error("`{0}` has more than {DECIMALS} decimal places")]
    TooPrecise(String),
    #[error("`{0}` overflows the dewies range")]
    Overflow(String),
}

impl Amount {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub const fn from_dewies(dewies: u64) -> Self {
        Self(dewies)
    }

    #[must_use]
    pub const fn from_credits(credits: u64) -> Self {
        Self(credits * DEWIES_PER_CREDIT)
    }

    /// Thousandths of a credit, the granularity fixture bids are drawn at.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis * (DEWIES_PER_CREDIT / 1000))
    }

    #[must_use]
    pub const fn dewies(self) -> u64 {
        self.0
    }

    /// Lossy conversion for interfaces that take JSON numbers.
    #[must_use]
    pub fn credits(self) -> f64 {
        self.0 as f64 / DEWIES_PER_CREDIT as f64
    }

    #[must_use]
    pub const fn checked_sub(self, other: Self) -> Option<Self> {
        match self.0.checked_sub(other.0) {
            Some(dewies) => Some(Self(dewies)),
            None => None,
        }
    }

    #[must_use]
    pub const fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / DEWIES_PER_CREDIT;
        let fraction = self.0 % DEWIES_PER_CREDIT;
        if fraction == 0 {
            return write!(f, "{whole}");
        }
        let digits = format!("{fraction:0DECIMALS$}");
        write!(f, "{whole}.{}", digits.trim_end_matches('0'))
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (whole, fraction) = trimmed.split_once('.').unwrap_or((trimmed, ""));
        let is_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if (whole.is_empty() && fraction.is_empty()) || !is_digits(whole) || !is_digits(fraction)
        {
            return Err(AmountError::Malformed(s.to_owned()));
        }
        if fraction.len() > DECIMALS {
            return Err(AmountError::TooPrecise(s.to_owned()));
        }

        let whole: u64 = if whole.is_empty() {
            0
        } else {
            whole
                .parse()
                .map_err(|_| AmountError::Overflow(s.to_owned()))?
        };
        let fraction: u64 = if fraction.is_empty() {
            0
        } else {
            format!("{fraction:0<DECIMALS$}")
                .parse()
                .map_err(|_| AmountError::Malformed(s.to_owned()))?
        };

        whole
            .checked_mul(DEWIES_PER_CREDIT)
            .and_then(|dewies| dewies.checked_add(fraction))
            .map(Self)
            .ok_or_else(|| AmountError::Overflow(s.to_owned()))
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // The daemon reports balances either as JSON numbers or as strings.
        let value = serde_json::Value::deserialize(deserializer)?;
        let text = match value {
            serde_json::Value::String(text) => text,
            serde_json::Value::Number(number) => number.to_string(),
            other => return Err(de::Error::custom(format!("invalid amount {other}"))),
        };
        text.parse().map_err(de::Error::custom)
    }
}
