//! Concurrency mode for request dispatch.

use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How many requests may execute at once.
///
/// Parsed from `sequential` or `pool:<N>` where `N` is at least one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Concurrency {
    /// One request at a time, in arrival order.
    #[default]
    Sequential,
    /// Up to `N` requests at once; completion order is unspecified.
    BoundedPool(NonZeroUsize),
}

impl fmt::Display for Concurrency {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequential => formatter.write_str("sequential"),
            Self::BoundedPool(size) => write!(formatter, "pool:{size}"),
        }
    }
}

impl FromStr for Concurrency {
    type Err = ConcurrencyParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim().to_ascii_lowercase();
        if trimmed == "sequential" {
            return Ok(Self::Sequential);
        }
        let Some(size) = trimmed.strip_prefix("pool:") else {
            return Err(ConcurrencyParseError::Unsupported(input.to_owned()));
        };
        size.trim()
            .parse::<NonZeroUsize>()
            .map(Self::BoundedPool)
            .map_err(|_| ConcurrencyParseError::InvalidPoolSize(size.to_owned()))
    }
}

impl TryFrom<String> for Concurrency {
    type Error = ConcurrencyParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Concurrency> for String {
    fn from(value: Concurrency) -> Self {
        value.to_string()
    }
}

/// Errors raised while parsing a [`Concurrency`] value.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConcurrencyParseError {
    /// The value was neither `sequential` nor `pool:<N>`.
    #[error("unsupported concurrency mode '{0}' (expected 'sequential' or 'pool:<N>')")]
    Unsupported(String),
    /// The pool size was missing, zero, or not a number.
    #[error("pool size must be a positive integer, got '{0}'")]
    InvalidPoolSize(String),
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("sequential", None)]
    #[case("pool:4", NonZeroUsize::new(4))]
    #[case("POOL: 2", NonZeroUsize::new(2))]
    fn parses_modes(#[case] text: &str, #[case] pool: Option<NonZeroUsize>) {
        let mode = text.parse::<Concurrency>().expect("parse concurrency");
        let expected = pool.map_or(Concurrency::Sequential, Concurrency::BoundedPool);
        assert_eq!(mode, expected);
    }

    #[rstest]
    #[case("pool:0")]
    #[case("pool:many")]
    #[case("parallel")]
    fn rejects_invalid_modes(#[case] text: &str) {
        assert!(text.parse::<Concurrency>().is_err());
    }

    #[test]
    fn display_round_trips() {
        let mode: Concurrency = "pool:8".parse().expect("parse concurrency");
        assert_eq!(mode.to_string().parse::<Concurrency>(), Ok(mode));
    }
}
