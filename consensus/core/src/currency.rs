use crate::constants::COIN;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// An amount of the native currency, in base units.
///
/// Arithmetic is explicit and checked: consensus code must treat overflow as
/// a validation failure, never as a wrap or a panic.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Debug, Serialize, Deserialize)]
pub struct Currency(u128);

impl Currency {
    pub const ZERO: Currency = Currency(0);

    pub const fn new(base_units: u128) -> Self {
        Currency(base_units)
    }

    pub const fn from_coins(coins: u64) -> Self {
        Currency(coins as u128 * COIN)
    }

    pub const fn as_base_units(self) -> u128 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Currency) -> Option<Currency> {
        self.0.checked_add(other.0).map(Currency)
    }

    pub fn checked_sub(self, other: Currency) -> Option<Currency> {
        self.0.checked_sub(other.0).map(Currency)
    }

    /// Sums an iterator of amounts, `None` on overflow.
    pub fn checked_sum<'a>(amounts: impl IntoIterator<Item = &'a Currency>) -> Option<Currency> {
        amounts.into_iter().try_fold(Currency::ZERO, |acc, &x| acc.checked_add(x))
    }
}

impl From<u64> for Currency {
    fn from(base_units: u64) -> Self {
        Currency(base_units as u128)
    }
}

impl Display for Currency {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
