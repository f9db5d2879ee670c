//! Value Objects for the order engine

use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};

/// Variant weight label (e.g. `500g`), the key of a variant within its product.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VariantWeight(String);

impl VariantWeight {
    pub fn new(value: impl Into<String>) -> Result<Self, WeightError> {
        let value: String = value.into().trim().to_lowercase().split_whitespace().collect();
        if value.is_empty() { return Err(WeightError::Empty); }
        if value.len() > 32 { return Err(WeightError::TooLong); }
        Ok(Self(value))
    }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for VariantWeight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

impl TryFrom<String> for VariantWeight {
    type Error = WeightError;
    fn try_from(value: String) -> Result<Self, Self::Error> { Self::new(value) }
}

impl From<VariantWeight> for String {
    fn from(w: VariantWeight) -> Self { w.0 }
}

#[derive(Debug, Clone)] pub enum WeightError { Empty, TooLong }
impl std::error::Error for WeightError {}
impl fmt::Display for WeightError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self { Self::Empty => write!(f, "weight empty"), Self::TooLong => write!(f, "weight too long") }
    }
}

/// Money value object. Single store currency; amounts are kept at 2 decimal places.
/// Serialized as a string with exactly two decimals (`"425.00"`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(from = "Decimal")]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    pub fn new(amount: Decimal) -> Self { Self(round2(amount)) }
    pub fn from_major(units: i64) -> Self { Self(Decimal::from(units)) }
    pub fn amount(&self) -> Decimal { self.0 }
    pub fn is_positive(&self) -> bool { self.0 > Decimal::ZERO }
    pub fn multiply(&self, qty: u32) -> Money { Money::new(self.0 * Decimal::from(qty)) }

    /// Amount in minor units (paise, cents) as gateways expect.
    pub fn minor_units(&self) -> Result<i64, MoneyError> {
        let scaled = (self.0 * Decimal::ONE_HUNDRED).round();
        i64::try_from(scaled).map_err(|_| MoneyError::OutOfRange)
    }
}

impl Add for Money {
    type Output = Money;
    fn add(self, rhs: Money) -> Money { Money::new(self.0 + rhs.0) }
}

impl Sub for Money {
    type Output = Money;
    fn sub(self, rhs: Money) -> Money { Money::new(self.0 - rhs.0) }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money { iter.fold(Money::ZERO, |acc, m| acc + m) }
}

impl From<Decimal> for Money {
    fn from(d: Decimal) -> Self { Money::new(d) }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{:.2}", self.0) }
}

impl Serialize for Money {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Half away from zero, 2 dp.
pub fn round2(d: Decimal) -> Decimal { d.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero) }

#[derive(Debug, Clone)] pub enum MoneyError { OutOfRange }
impl std::error::Error for MoneyError {}
impl fmt::Display for MoneyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "Amount out of range") }
}

/// Quantity value object, always at least one unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Quantity(u32);

impl Quantity {
    pub const MAX: u32 = 999;

    pub fn new(value: u32) -> Result<Self, QuantityError> {
        match value {
            0 => Err(QuantityError::Zero),
            v if v > Self::MAX => Err(QuantityError::TooLarge),
            v => Ok(Self(v)),
        }
    }
    pub fn value(&self) -> u32 { self.0 }
    /// Sum of both quantities, capped at [`Quantity::MAX`].
    pub fn add(&self, other: Quantity) -> Self { Self(self.0.saturating_add(other.0).min(Self::MAX)) }
}

impl TryFrom<u32> for Quantity {
    type Error = QuantityError;
    fn try_from(v: u32) -> Result<Self, Self::Error> { Self::new(v) }
}

impl From<Quantity> for u32 {
    fn from(q: Quantity) -> u32 { q.0 }
}

#[derive(Debug, Clone)] pub enum QuantityError { Zero, TooLarge }
impl std::error::Error for QuantityError {}
impl fmt::Display for QuantityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self { Self::Zero => write!(f, "quantity must be at least 1"), Self::TooLarge => write!(f, "quantity exceeds {}", Quantity::MAX) }
    }
}

/// Human readable order number: `ORD-YYYYMMDD-NNN`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderNumber(String);

impl OrderNumber {
    /// Sequence is zero-padded to three digits; days past 999 orders widen naturally.
    pub fn new(day: NaiveDate, sequence: u32) -> Self {
        Self(format!("{}{:03}", Self::day_prefix(day), sequence))
    }

    /// `ORD-YYYYMMDD-`, shared by every number issued on `day`.
    pub fn day_prefix(day: NaiveDate) -> String {
        format!("ORD-{}-", day.format("%Y%m%d"))
    }

    pub fn sequence(&self) -> Option<u32> {
        self.0.rsplit('-').next()?.parse().ok()
    }

    pub fn parse(value: &str) -> Option<Self> {
        let rest = value.strip_prefix("ORD-")?;
        let (date, seq) = rest.split_once('-')?;
        if date.len() != 8 || !date.bytes().all(|b| b.is_ascii_digit()) { return None; }
        NaiveDate::parse_from_str(date, "%Y%m%d").ok()?;
        if seq.len() < 3 || !seq.bytes().all(|b| b.is_ascii_digit()) { return None; }
        Some(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}
