//! Fixed-point amounts in smallest units.

use crate::error::ChainError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};
use std::str::FromStr;

/// Smallest units per whole token.
pub const UNITS_PER_TOKEN: u64 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(u64);

impl Token {
    pub const ZERO: Token = Token(0);
    pub const ONE: Token = Token(UNITS_PER_TOKEN);

    pub const fn from_units(units: u64) -> Self {
        Token(units)
    }

    pub const fn from_tokens(tokens: u64) -> Self {
        Token(tokens * UNITS_PER_TOKEN)
    }

    pub const fn units(&self) -> u64 {
        self.0
    }

    pub fn checked_add(self, other: Token) -> Option<Token> {
        self.0.checked_add(other.0).map(Token)
    }

    pub fn checked_sub(self, other: Token) -> Option<Token> {
        self.0.checked_sub(other.0).map(Token)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

/// Addition saturates; ledger sums that may legitimately exceed `u64` use `u128`.
impl Add for Token {
    type Output = Token;

    fn add(self, other: Token) -> Token {
        Token(self.0.saturating_add(other.0))
    }
}

impl AddAssign for Token {
    fn add_assign(&mut self, other: Token) {
        *self = *self + other;
    }
}

impl Sum for Token {
    fn sum<I: Iterator<Item = Token>>(iter: I) -> Token {
        iter.fold(Token::ZERO, |acc, t| acc + t)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}.{:06}",
            self.0 / UNITS_PER_TOKEN,
            self.0 % UNITS_PER_TOKEN
        )
    }
}

impl FromStr for Token {
    type Err = ChainError;

    /// Parses decimal token notation such as `1`, `0.4` or `12.000001`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ChainError::WalletError(format!("Invalid token amount: {}", s));
        let (whole, frac) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(invalid());
        }
        if frac.len() > 6 || !frac.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        let whole: u64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid())?
        };
        let frac_units: u64 = if frac.is_empty() {
            0
        } else {
            format!("{:0<6}", frac).parse().map_err(|_| invalid())?
        };
        whole
            .checked_mul(UNITS_PER_TOKEN)
            .and_then(|w| w.checked_add(frac_units))
            .map(Token)
            .ok_or_else(invalid)
    }
}
