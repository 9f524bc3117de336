//! Fixed-point currency amounts.
//!
//! Amounts are stored as a signed count of minor units (cents). There is no
//! floating point anywhere in the money path, so sums and equality checks
//! (e.g. "is the trial balance balanced?") are exact.

use core::fmt;
use core::iter::Sum;
use core::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::value_object::ValueObject;

/// Number of minor units in one major unit.
pub const MINOR_PER_MAJOR: i64 = 100;

/// A currency amount in minor units.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl ValueObject for Money {}

impl Money {
    pub const ZERO: Money = Money(0);

    /// Largest amount a single posting, debt or price may carry
    /// (one trillion major units). Keeps every ledger fold far from `i64`
    /// overflow.
    pub const MAX: Money = Money(1_000_000_000_000 * MINOR_PER_MAJOR);

    pub const fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    pub const fn from_major(major: i64) -> Self {
        Self(major * MINOR_PER_MAJOR)
    }

    pub const fn minor(self) -> i64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn abs(self) -> Self {
        Self(self.0.abs())
    }

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    pub fn checked_sub(self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Money)
    }

    /// Value of `quantity` units priced at `self` each.
    pub fn times(self, quantity: i64) -> Money {
        Money(self.0 * quantity)
    }

    pub fn checked_times(self, quantity: i64) -> Option<Money> {
        self.0.checked_mul(quantity).map(Money)
    }

    /// `self` if it is a usable transaction amount: positive and no larger
    /// than [`Money::MAX`].
    pub fn ensure_transaction_amount(self) -> Result<Money, DomainError> {
        if !self.is_positive() || self > Money::MAX {
            return Err(DomainError::InvalidAmount(self));
        }
        Ok(self)
    }

    /// Split a positive amount into `parts` nearly-equal shares.
    ///
    /// Every share gets `self / parts`; the division remainder is added to
    /// the first share so the shares always sum to exactly `self`.
    pub fn split(self, parts: u32) -> Result<Vec<Money>, DomainError> {
        if parts == 0 {
            return Err(DomainError::validation("cannot split into zero parts"));
        }
        if !self.is_positive() {
            return Err(DomainError::InvalidAmount(self));
        }
        let n = i64::from(parts);
        let base = self.0 / n;
        let remainder = self.0 % n;

        let mut shares = vec![Money(base); parts as usize];
        shares[0] = Money(base + remainder);
        Ok(shares)
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        self.0 += rhs.0;
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Money) {
        self.0 -= rhs.0;
    }
}

impl Neg for Money {
    type Output = Money;

    fn neg(self) -> Money {
        Money(-self.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Money {
        iter.copied().sum()
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let per = MINOR_PER_MAJOR as u64;
        write!(f, "{sign}{}.{:02}", abs / per, abs % per)
    }
}

impl FromStr for Money {
    type Err = DomainError;

    /// Parse `"123"`, `"123.4"`, `"123.45"` or `"-0.50"`.
    ///
    /// More than two fractional digits is rejected instead of rounded.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DomainError::validation(format!("invalid money amount: '{s}'"));

        let trimmed = s.trim();
        let (negative, digits) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };

        let (major_str, minor_str) = match digits.split_once('.') {
            Some((major, minor)) => (major, minor),
            None => (digits, ""),
        };

        if major_str.is_empty() || !major_str.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        if minor_str.len() > 2 || !minor_str.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let major: i64 = major_str.parse().map_err(|_| invalid())?;
        let minor: i64 = match minor_str.len() {
            0 => 0,
            1 => minor_str.parse::<i64>().map_err(|_| invalid())? * 10,
            _ => minor_str.parse().map_err(|_| invalid())?,
        };

        let value = major
            .checked_mul(MINOR_PER_MAJOR)
            .and_then(|m| m.checked_add(minor))
            .ok_or_else(invalid)?;

        Ok(Money(if negative { -value } else { value }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn display_pads_minor_units() {
        assert_eq!(Money::from_minor(3334).to_string(), "33.34");
        assert_eq!(Money::from_minor(5).to_string(), "0.05");
        assert_eq!(Money::from_minor(-150).to_string(), "-1.50");
        assert_eq!(Money::from_major(500).to_string(), "500.00");
    }

    #[test]
    fn parse_accepts_common_forms() {
        assert_eq!("100".parse::<Money>().unwrap(), Money::from_major(100));
        assert_eq!("33.34".parse::<Money>().unwrap(), Money::from_minor(3334));
        assert_eq!("0.5".parse::<Money>().unwrap(), Money::from_minor(50));
        assert_eq!("-2.05".parse::<Money>().unwrap(), Money::from_minor(-205));
    }

    #[test]
    fn parse_rejects_extra_precision_and_garbage() {
        assert!("1.005".parse::<Money>().is_err());
        assert!("abc".parse::<Money>().is_err());
        assert!(".50".parse::<Money>().is_err());
        assert!("1.2.3".parse::<Money>().is_err());
    }

    #[test]
    fn split_puts_remainder_on_first_share() {
        let shares = Money::from_major(100).split(3).unwrap();
        assert_eq!(
            shares,
            vec![
                Money::from_minor(3334),
                Money::from_minor(3333),
                Money::from_minor(3333)
            ]
        );
    }

    #[test]
    fn split_rejects_non_positive_amounts() {
        assert!(matches!(
            Money::ZERO.split(2),
            Err(DomainError::InvalidAmount(_))
        ));
        assert!(Money::from_major(1).split(0).is_err());
    }

    #[test]
    fn transaction_amounts_are_positive_and_capped() {
        assert_eq!(
            Money::from_major(5).ensure_transaction_amount(),
            Ok(Money::from_major(5))
        );
        assert_eq!(Money::MAX.ensure_transaction_amount(), Ok(Money::MAX));
        assert!(matches!(
            Money::ZERO.ensure_transaction_amount(),
            Err(DomainError::InvalidAmount(_))
        ));
        let too_large = Money::from_minor(i64::MAX / 2 + 1);
        assert!(matches!(
            too_large.ensure_transaction_amount(),
            Err(DomainError::InvalidAmount(m)) if m == too_large
        ));
    }

    #[test]
    fn checked_times_reports_overflow() {
        assert_eq!(Money::from_major(5).checked_times(3), Some(Money::from_major(15)));
        assert_eq!(Money::MAX.checked_times(i64::MAX), None);
    }

    #[test]
    fn serde_is_transparent_minor_units() {
        let json = serde_json::to_string(&Money::from_minor(1234)).unwrap();
        assert_eq!(json, "1234");
    }

    proptest! {
        #[test]
        fn split_shares_always_sum_to_total(minor in 1i64..10_000_000, parts in 1u32..60) {
            let total = Money::from_minor(minor);
            let shares = total.split(parts).unwrap();
            prop_assert_eq!(shares.len(), parts as usize);
            prop_assert_eq!(shares.iter().sum::<Money>(), total);

            let min = shares.iter().min().copied().unwrap();
            let max = shares.iter().max().copied().unwrap();
            prop_assert!(max.minor() - min.minor() <= minor % i64::from(parts));
        }

        #[test]
        fn display_parse_is_lossless(minor in -1_000_000_000i64..1_000_000_000) {
            let m = Money::from_minor(minor);
            prop_assert_eq!(m.to_string().parse::<Money>().unwrap(), m);
        }
    }
}
