// 1.0: all the primitives live here. nothing in the engine works without these types.
// money is unsigned 10^6 fixed-point, prices are unsigned 10^8 fixed-point. every
// operation is checked; overflow never wraps and never panics outside tests.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;

/// Scale factor for collateral/PnL amounts: 1.0 == 1_000_000 units.
pub const MONEY_SCALE: u64 = 1_000_000;
/// Scale factor for prices: 1.0 == 100_000_000 units.
pub const PRICE_SCALE: u64 = 100_000_000;
/// Basis-point denominator. 10_000 bps = 100%.
pub const BPS_DENOM: u64 = 10_000;
/// Seconds per day, for daily-cap bucket rollover.
pub const SECS_PER_DAY: i64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MathError {
    #[error("arithmetic overflow")]
    Overflow,
    #[error("arithmetic underflow")]
    Underflow,
    #[error("division by zero")]
    DivisionByZero,
    #[error("amount out of range")]
    InvalidAmount,
}

// 1.1: opaque 20-byte user key. venues and the ledger agree on this identity.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserKey(pub [u8; 20]);

impl UserKey {
    pub fn from_low_u64(v: u64) -> Self {
        let mut b = [0u8; 20];
        b[12..].copy_from_slice(&v.to_be_bytes());
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Debug for UserKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserKey(0x{})", hex::encode(&self.0[12..]))
    }
}

impl fmt::Display for UserKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

// 1.2: 32-byte reference id. consumed exactly once by the ledger dedup set.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RefId(pub [u8; 32]);

impl RefId {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for RefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RefId(0x{}..)", hex::encode(&self.0[..4]))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VenueId(pub String);

impl VenueId {
    pub fn new(name: &str) -> Self {
        Self(name.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VenueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// instrument symbol as venues and oracles both key it, e.g. "BTC-PERP"
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstrumentId(pub String);

impl InstrumentId {
    pub fn new(symbol: &str) -> Self {
        Self(symbol.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VaultId(pub u32);

// Long = profit when price goes up. Short = profit when price goes down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn sign(&self) -> i128 {
        match self {
            Side::Long => 1,
            Side::Short => -1,
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }
}

// 1.3: unsigned money amount in 10^6 units. collateral, pnl, pools all use this.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Money(u64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub fn from_units(units: u64) -> Self {
        Self(units)
    }

    /// Whole-currency constructor, mainly for tests and the sim.
    pub fn from_whole(whole: u64) -> Self {
        Self(whole * MONEY_SCALE)
    }

    pub fn units(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(&self, other: Money) -> Result<Money, MathError> {
        self.0.checked_add(other.0).map(Money).ok_or(MathError::Overflow)
    }

    pub fn checked_sub(&self, other: Money) -> Result<Money, MathError> {
        self.0.checked_sub(other.0).map(Money).ok_or(MathError::Underflow)
    }

    pub fn min(&self, other: Money) -> Money {
        Money(self.0.min(other.0))
    }

    pub fn saturating_sub(&self, other: Money) -> Money {
        Money(self.0.saturating_sub(other.0))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}", self.0 / MONEY_SCALE, self.0 % MONEY_SCALE)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        // summing trusted ledger fields; widen to avoid intermediate overflow
        let total: u128 = iter.map(|m| m.0 as u128).sum();
        debug_assert!(total <= u64::MAX as u128);
        Money(total as u64)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Self>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

// 1.4: signed money in 10^6 units. unrealized/realized pnl and net obligations only;
// never a stored balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct SignedMoney(i64);

impl SignedMoney {
    pub const ZERO: SignedMoney = SignedMoney(0);

    pub fn from_units(units: i64) -> Self {
        Self(units)
    }

    pub fn from_money(m: Money) -> Result<Self, MathError> {
        i64::try_from(m.units()).map(SignedMoney).map_err(|_| MathError::Overflow)
    }

    pub fn units(&self) -> i64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    pub fn abs_money(&self) -> Money {
        Money::from_units(self.0.unsigned_abs())
    }

    pub fn checked_add(&self, other: SignedMoney) -> Result<SignedMoney, MathError> {
        self.0.checked_add(other.0).map(SignedMoney).ok_or(MathError::Overflow)
    }
}

impl fmt::Display for SignedMoney {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:06}", sign, abs / MONEY_SCALE, abs % MONEY_SCALE)
    }
}

impl Sum for SignedMoney {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        let total: i128 = iter.map(|m| m.0 as i128).sum();
        debug_assert!(total >= i64::MIN as i128 && total <= i64::MAX as i128);
        SignedMoney(total as i64)
    }
}

// 1.5: unsigned price in 10^8 units. feeds are normalized into this before
// any engine math sees them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Price(u64);

impl Price {
    #[must_use]
    pub fn new(units: u64) -> Option<Self> {
        if units > 0 {
            Some(Self(units))
        } else {
            None
        }
    }

    pub fn from_units(units: u64) -> Result<Self, MathError> {
        Self::new(units).ok_or(MathError::InvalidAmount)
    }

    /// Whole-currency constructor, mainly for tests and the sim.
    pub fn from_whole(whole: u64) -> Self {
        Self(whole * PRICE_SCALE)
    }

    pub fn units(&self) -> u64 {
        self.0
    }

    /// Normalize a feed value quoted at `decimals` places into 10^8.
    /// Non-positive raw values are rejected before scaling.
    pub fn from_decimals(raw: i64, decimals: u32) -> Result<Self, MathError> {
        if raw <= 0 {
            return Err(MathError::InvalidAmount);
        }
        let raw = raw as u128;
        let scaled = if decimals <= 8 {
            let factor = 10u128.checked_pow(8 - decimals).ok_or(MathError::Overflow)?;
            raw.checked_mul(factor).ok_or(MathError::Overflow)?
        } else {
            let factor = 10u128.checked_pow(decimals - 8).ok_or(MathError::Overflow)?;
            raw / factor
        };
        let units = u64::try_from(scaled).map_err(|_| MathError::Overflow)?;
        Self::from_units(units)
    }

    /// Normalize an expo-style feed value: `raw * 10^(8 + expo)`.
    /// Pyth-style feeds publish negative exponents (e.g. raw=6_000_000, expo=-2).
    pub fn from_expo(raw: i64, expo: i32) -> Result<Self, MathError> {
        if raw <= 0 {
            return Err(MathError::InvalidAmount);
        }
        let shift = 8i64 + expo as i64;
        let raw = raw as u128;
        let scaled = if shift >= 0 {
            let factor = 10u128
                .checked_pow(u32::try_from(shift).map_err(|_| MathError::Overflow)?)
                .ok_or(MathError::Overflow)?;
            raw.checked_mul(factor).ok_or(MathError::Overflow)?
        } else {
            let factor = 10u128
                .checked_pow(u32::try_from(-shift).map_err(|_| MathError::Overflow)?)
                .ok_or(MathError::Overflow)?;
            raw / factor
        };
        let units = u64::try_from(scaled).map_err(|_| MathError::Overflow)?;
        Self::from_units(units)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:08}", self.0 / PRICE_SCALE, self.0 % PRICE_SCALE)
    }
}

/// Absolute deviation of `a` from `b` in basis points: |a-b| * 10_000 / b.
pub fn deviation_bps(a: Price, b: Price) -> Result<u64, MathError> {
    if b.units() == 0 {
        return Err(MathError::DivisionByZero);
    }
    let diff = a.units().abs_diff(b.units()) as u128;
    let bps = diff * BPS_DENOM as u128 / b.units() as u128;
    u64::try_from(bps).map_err(|_| MathError::Overflow)
}

/// Signed PnL of a position in 10^6 money units:
/// (mark - entry) * size * side / 10^8, computed through i128.
pub fn position_pnl(
    entry: Price,
    mark: Price,
    size: Money,
    side: Side,
) -> Result<SignedMoney, MathError> {
    let delta = mark.units() as i128 - entry.units() as i128;
    let raw = delta
        .checked_mul(size.units() as i128)
        .ok_or(MathError::Overflow)?
        .checked_mul(side.sign())
        .ok_or(MathError::Overflow)?
        / PRICE_SCALE as i128;
    i64::try_from(raw).map(SignedMoney::from_units).map_err(|_| MathError::Overflow)
}

// 1.6: basis points. 100 bps = 1%.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Bps(pub u32);

impl Bps {
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Fraction of `amount`, truncating. 5000 bps of 4_000 -> 2_000.
    pub fn apply(&self, amount: Money) -> Money {
        let scaled = amount.units() as u128 * self.0 as u128 / BPS_DENOM as u128;
        Money::from_units(scaled as u64)
    }

    pub fn apply_signed(&self, amount: SignedMoney) -> SignedMoney {
        let scaled = amount.units() as i128 * self.0 as i128 / BPS_DENOM as i128;
        SignedMoney::from_units(scaled as i64)
    }
}

// 1.7: logical timestamp in whole seconds. the engine clock is the only producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn from_secs(secs: i64) -> Self {
        Self(secs)
    }

    pub fn as_secs(&self) -> i64 {
        self.0
    }

    pub fn day(&self) -> i64 {
        self.0.div_euclid(SECS_PER_DAY)
    }

    /// Seconds into the current week, Monday 00:00 == 0 (unix epoch was a Thursday).
    pub fn secs_of_week(&self) -> i64 {
        (self.0 + 4 * SECS_PER_DAY).rem_euclid(7 * SECS_PER_DAY)
    }

    pub fn plus(&self, secs: i64) -> Self {
        Self(self.0 + secs)
    }

    pub fn since(&self, earlier: Timestamp) -> i64 {
        self.0 - earlier.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t={}", self.0)
    }
}
