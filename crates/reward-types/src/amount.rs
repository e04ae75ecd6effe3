use serde::{Deserialize, Serialize};
use std::fmt;

pub const USD_DECIMALS: u32 = 6;
pub const USD_BASE_UNIT: u64 = 1_000_000; // 10^6 micro-dollars

/// Non-negative monetary amount in micro-dollar base units.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct UsdAmount(u64);

impl UsdAmount {
    pub const ZERO: Self = Self(0);

    pub fn from_usd(usd: f64) -> Self {
        Self((usd * USD_BASE_UNIT as f64).round() as u64)
    }

    pub fn from_base_units(units: u64) -> Self {
        Self(units)
    }

    pub fn to_usd(&self) -> f64 {
        self.0 as f64 / USD_BASE_UNIT as f64
    }

    pub fn to_base_units(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(&self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    pub fn checked_sub(&self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }

    pub fn saturating_add(&self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(&self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    /// Signed difference, for profit where `reward < price` is allowed.
    pub fn signed_sub(&self, other: Self) -> SignedUsd {
        SignedUsd(self.0 as i64 - other.0 as i64)
    }

    /// Fractional rate applied in base units, rounded to the nearest unit.
    pub fn mul_rate(&self, rate: f64) -> Self {
        Self((self.0 as f64 * rate).round() as u64)
    }
}

impl fmt::Display for UsdAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${:.6}", self.to_usd())
    }
}

/// Signed monetary amount in micro-dollar base units.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct SignedUsd(i64);

impl SignedUsd {
    pub const ZERO: Self = Self(0);

    pub fn from_usd(usd: f64) -> Self {
        Self((usd * USD_BASE_UNIT as f64).round() as i64)
    }

    pub fn from_base_units(units: i64) -> Self {
        Self(units)
    }

    pub fn to_usd(&self) -> f64 {
        self.0 as f64 / USD_BASE_UNIT as f64
    }

    pub fn to_base_units(&self) -> i64 {
        self.0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    pub fn abs_amount(&self) -> UsdAmount {
        UsdAmount(self.0.unsigned_abs())
    }
}

impl fmt::Display for SignedUsd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${:.6}", self.to_usd())
    }
}
