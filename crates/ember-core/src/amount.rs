use std::fmt;
use std::iter::Sum;

use serde::{Deserialize, Serialize};

/// Identifier of a ledger asset. Asset 0 is the native coin.
pub type AssetId = u64;

/// The native coin asset.
pub const NATIVE_ASSET: AssetId = 0;

/// A fixed-point monetary amount with 8 fractional digits.
///
/// All consensus arithmetic goes through the checked operations; overflow is
/// a storage-level failure, never silent wrap-around. Fee and reward sums
/// must be exact, so there is no floating point anywhere near this type.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Amount(i64);

impl Amount {
    /// Number of raw units in one coin.
    pub const COIN: i64 = 100_000_000;

    pub const ZERO: Amount = Amount(0);

    pub const fn from_raw(raw: i64) -> Self {
        Amount(raw)
    }

    pub const fn from_coins(coins: i64) -> Self {
        Amount(coins * Self::COIN)
    }

    pub const fn raw(self) -> i64 {
        self.0
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// `self * numerator / denominator`, rounded towards zero.
    ///
    /// Used for the proxy-forge split: the delegate share rounds DOWN and the
    /// forger receives the remainder, so the parts always sum to the whole.
    pub fn scale_down(self, numerator: u64, denominator: u64) -> Amount {
        debug_assert!(denominator != 0);
        let scaled = (self.0 as i128 * numerator as i128) / denominator as i128;
        Amount(scaled as i64)
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Amount {
        iter.fold(Amount::ZERO, |acc, a| {
            acc.checked_add(a).expect("amount sum overflow")
        })
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(
            f,
            "{}{}.{:08}",
            sign,
            abs / Self::COIN as u64,
            abs % Self::COIN as u64
        )
    }
}

impl fmt::Debug for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Amount({})", self)
    }
}
