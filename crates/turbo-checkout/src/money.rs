//! Amounts of money in minor units.
//!
//! Every operation that can mix currencies or overflow is checked and
//! returns `None` rather than a wrong total.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Currencies an order can be placed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Currency {
    #[default]
    USD,
    EUR,
    GBP,
    JPY,
}

impl Currency {
    /// ISO 4217 code.
    pub fn code(&self) -> &'static str {
        match self {
            Currency::USD => "USD",
            Currency::EUR => "EUR",
            Currency::GBP => "GBP",
            Currency::JPY => "JPY",
        }
    }

    /// Digits after the decimal point.
    pub fn minor_digits(&self) -> u32 {
        match self {
            Currency::JPY => 0,
            _ => 2,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// An amount in the smallest unit of its currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Money {
    pub amount_cents: i64,
    pub currency: Currency,
}

impl Money {
    pub fn new(amount_cents: i64, currency: Currency) -> Self {
        Self {
            amount_cents,
            currency,
        }
    }

    pub fn zero(currency: Currency) -> Self {
        Self::new(0, currency)
    }

    pub fn is_positive(&self) -> bool {
        self.amount_cents > 0
    }

    pub fn is_negative(&self) -> bool {
        self.amount_cents < 0
    }

    /// Human-readable amount, e.g. `49.99 USD`.
    pub fn display(&self) -> String {
        let digits = self.currency.minor_digits();
        let sign = if self.is_negative() { "-" } else { "" };
        let abs = self.amount_cents.unsigned_abs();
        if digits == 0 {
            return format!("{sign}{abs} {}", self.currency);
        }
        let unit = 10_u64.pow(digits);
        format!(
            "{sign}{}.{:0width$} {}",
            abs / unit,
            abs % unit,
            self.currency,
            width = digits as usize
        )
    }

    fn same_currency(&self, other: &Money) -> Option<()> {
        (self.currency == other.currency).then_some(())
    }

    pub fn try_add(&self, other: &Money) -> Option<Money> {
        self.same_currency(other)?;
        Some(Money::new(self.amount_cents.checked_add(other.amount_cents)?, self.currency))
    }

    pub fn try_subtract(&self, other: &Money) -> Option<Money> {
        self.same_currency(other)?;
        Some(Money::new(self.amount_cents.checked_sub(other.amount_cents)?, self.currency))
    }

    pub fn try_multiply(&self, factor: i64) -> Option<Money> {
        Some(Money::new(self.amount_cents.checked_mul(factor)?, self.currency))
    }

    /// A share of this amount given in basis points (1/100 of a percent),
    /// rounded half up.
    pub fn percentage_bps(&self, basis_points: u32) -> Option<Money> {
        let scaled = i128::from(self.amount_cents) * i128::from(basis_points);
        let amount = i64::try_from((scaled + 5_000) / 10_000).ok()?;
        Some(Money::new(amount, self.currency))
    }

    /// The smaller of two amounts in the same currency.
    pub fn min(&self, other: &Money) -> Option<Money> {
        self.same_currency(other)?;
        Some(if self.amount_cents <= other.amount_cents { *self } else { *other })
    }

    /// Sum amounts, all of which must be in `currency`.
    pub fn try_sum<'a>(mut iter: impl Iterator<Item = &'a Money>, currency: Currency) -> Option<Money> {
        iter.try_fold(Money::zero(currency), |acc, m| acc.try_add(m))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}
