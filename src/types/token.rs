use std::fmt;
use std::ops::AddAssign;
use std::str::FromStr;

use malachite::Natural;
use malachite::base::num::arithmetic::traits::{CheckedSub, DivRem};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Non-negative arbitrary-precision token amount. Subtraction is explicit
/// and checked; underflow is surfaced to the caller, never wrapped.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct TokenAmount {
    inner: Natural,
}

impl TokenAmount {
    pub fn zero() -> Self {
        Self {
            inner: Natural::from(0u32),
        }
    }

    pub fn from_natural(inner: Natural) -> Self {
        Self { inner }
    }

    pub fn from_u64(value: u64) -> Self {
        Self {
            inner: Natural::from(value),
        }
    }

    pub fn from_u128(value: u128) -> Self {
        Self {
            inner: Natural::from(value),
        }
    }

    pub fn as_natural(&self) -> &Natural {
        &self.inner
    }

    pub fn is_zero(&self) -> bool {
        self.inner == Natural::from(0u32)
    }

    pub fn add_assign(&mut self, other: &TokenAmount) {
        self.inner.add_assign(other.inner.clone());
    }

    pub fn checked_sub(&self, other: &TokenAmount) -> Option<TokenAmount> {
        self.inner
            .clone()
            .checked_sub(other.inner.clone())
            .map(TokenAmount::from_natural)
    }

    pub fn mul_count(&self, count: u64) -> TokenAmount {
        TokenAmount::from_natural(self.inner.clone() * Natural::from(count))
    }

    /// Floor division. The divisor must be non-zero.
    pub fn div_floor(&self, other: &TokenAmount) -> TokenAmount {
        TokenAmount::from_natural(self.inner.clone() / other.inner.clone())
    }

    /// Interprets raw call-argument bytes as a big-endian unsigned integer.
    pub fn from_be_bytes(bytes: &[u8]) -> TokenAmount {
        let mut value = Natural::from(0u32);
        for byte in bytes {
            value *= Natural::from(256u32);
            value += Natural::from(*byte);
        }
        TokenAmount::from_natural(value)
    }

    /// Minimal big-endian encoding; zero encodes as the empty byte string.
    pub fn to_be_bytes(&self) -> Vec<u8> {
        let mut digits = Vec::new();
        let base = Natural::from(256u32);
        let zero = Natural::from(0u32);
        let mut current = self.inner.clone();
        while current > zero {
            let (quotient, remainder) = current.div_rem(&base);
            let digit = remainder.to_string().parse::<u16>().unwrap_or_default() as u8;
            digits.push(digit);
            current = quotient;
        }
        digits.reverse();
        digits
    }

    /// Keeps the low 64 bits, matching unsigned truncation of oversized
    /// caller-supplied counters.
    pub fn to_u64_truncating(&self) -> u64 {
        self.to_be_bytes()
            .iter()
            .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte))
    }
}

impl Default for TokenAmount {
    fn default() -> Self {
        Self::zero()
    }
}

impl FromStr for TokenAmount {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Natural::from_str(s).map(TokenAmount::from_natural)
    }
}

impl Serialize for TokenAmount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.inner.to_string())
    }
}

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Natural::from_str(&value)
            .map(TokenAmount::from_natural)
            .map_err(|_| serde::de::Error::custom("invalid token amount"))
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}
