// 2.0 oracle.rs: price validation. the engine is agnostic to whether prices come
// from an on-chain aggregator or an expo-style publisher; adapters hand over raw
// samples and this module normalizes, validates and falls back.
//
// a fetch never propagates upstream failures: any adapter problem is "no fresh
// price" and the fallback path decides what happens next.

use crate::types::{deviation_bps, Bps, InstrumentId, MathError, Price, Timestamp};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// How a feed quotes its raw price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeedKind {
    /// Signed answer at a fixed number of decimals (Chainlink-style).
    Aggregator { decimals: u32 },
    /// Signed price with a signed exponent (Pyth-style).
    Expo,
}

/// One raw observation from a feed, before normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSample {
    pub raw_price: i64,
    /// Only meaningful for `FeedKind::Expo` feeds.
    pub expo: i32,
    pub publish_time: Timestamp,
}

impl FeedKind {
    /// Normalize a raw sample into a 10^8 price. Non-positive raw values fail.
    pub fn normalize(&self, sample: &FeedSample) -> Result<Price, MathError> {
        match self {
            FeedKind::Aggregator { decimals } => Price::from_decimals(sample.raw_price, *decimals),
            FeedKind::Expo => Price::from_expo(sample.raw_price, sample.expo),
        }
    }
}

/// Trait for price feed adapters. Any upstream failure must surface as `None`,
/// never as a panic or propagated error.
pub trait PriceFeed: Send {
    fn name(&self) -> &str;

    fn fetch(&self) -> Option<FeedSample>;
}

/// Scriptable feed for tests and simulation. Clones share the same sample, so
/// a handle kept outside the oracle can move the price mid-test.
#[derive(Debug, Clone)]
pub struct MockFeed {
    name: String,
    sample: Arc<Mutex<Option<FeedSample>>>,
}

impl MockFeed {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            sample: Arc::new(Mutex::new(None)),
        }
    }

    pub fn set_sample(&self, sample: FeedSample) {
        *self.sample.lock() = Some(sample);
    }

    pub fn set_unavailable(&self) {
        *self.sample.lock() = None;
    }
}

impl PriceFeed for MockFeed {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&self) -> Option<FeedSample> {
        *self.sample.lock()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum OracleError {
    #[error("no oracle configured for symbol")]
    NotConfigured,
    #[error("price is stale")]
    PriceStale,
    #[error("price outside deviation band")]
    PriceOutsideBand,
    #[error("feed returned a non-positive or unrepresentable price")]
    InvalidPrice,
    #[error("oracle unavailable")]
    Unavailable,
}

/// Validation result. `used_fallback` is true when the returned price is the
/// stored last-valid price rather than a fresh observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatedPrice {
    pub price: Price,
    pub timestamp: Timestamp,
    pub used_fallback: bool,
}

/// Per-symbol validation parameters and fallback state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolParams {
    pub max_staleness_secs: i64,
    pub band_bps: Bps,
    pub max_fallback_age_secs: i64,
}

struct SymbolOracle {
    kind: FeedKind,
    feed: Box<dyn PriceFeed>,
    params: SymbolParams,
    /// Operator-pinned reference for band checks. Feeds never write this.
    reference: Option<(Price, Timestamp)>,
    /// Last operator-validated price, used as fallback.
    last_valid: Option<(Price, Timestamp)>,
}

impl SymbolOracle {
    /// Fresh-path validation: fetch, normalize, staleness, band.
    fn try_fresh(&self, now: Timestamp) -> Result<ValidatedPrice, OracleError> {
        let sample = self.feed.fetch().ok_or(OracleError::Unavailable)?;
        let price = self.kind.normalize(&sample).map_err(|_| OracleError::InvalidPrice)?;

        if now.since(sample.publish_time) > self.params.max_staleness_secs {
            return Err(OracleError::PriceStale);
        }

        if let Some((reference, _)) = self.reference {
            let dev = deviation_bps(price, reference).map_err(|_| OracleError::InvalidPrice)?;
            if dev > self.params.band_bps.value() as u64 {
                return Err(OracleError::PriceOutsideBand);
            }
        }

        Ok(ValidatedPrice {
            price,
            timestamp: sample.publish_time,
            used_fallback: false,
        })
    }

    fn try_fallback(&self, now: Timestamp) -> Option<ValidatedPrice> {
        let (price, timestamp) = self.last_valid?;
        if now.since(timestamp) <= self.params.max_fallback_age_secs {
            Some(ValidatedPrice {
                price,
                timestamp,
                used_fallback: true,
            })
        } else {
            None
        }
    }
}

/// Validates prices for every configured symbol.
pub struct PriceOracle {
    symbols: HashMap<InstrumentId, SymbolOracle>,
}

impl PriceOracle {
    pub fn new() -> Self {
        Self {
            symbols: HashMap::new(),
        }
    }

    pub fn configure(
        &mut self,
        symbol: InstrumentId,
        kind: FeedKind,
        feed: Box<dyn PriceFeed>,
        params: SymbolParams,
    ) {
        self.symbols.insert(
            symbol,
            SymbolOracle {
                kind,
                feed,
                params,
                reference: None,
                last_valid: None,
            },
        );
    }

    pub fn is_configured(&self, symbol: &InstrumentId) -> bool {
        self.symbols.contains_key(symbol)
    }

    pub fn set_params(&mut self, symbol: &InstrumentId, params: SymbolParams) -> Result<(), OracleError> {
        let entry = self.symbols.get_mut(symbol).ok_or(OracleError::NotConfigured)?;
        entry.params = params;
        Ok(())
    }

    pub fn reference(&self, symbol: &InstrumentId) -> Option<(Price, Timestamp)> {
        self.symbols.get(symbol).and_then(|s| s.reference)
    }

    /// Fresh price if the feed passes staleness and band checks, otherwise the
    /// last valid price while it is younger than the fallback bound.
    pub fn get_validated_price(
        &self,
        symbol: &InstrumentId,
        now: Timestamp,
    ) -> Result<ValidatedPrice, OracleError> {
        let entry = self.symbols.get(symbol).ok_or(OracleError::NotConfigured)?;

        let rejection = match entry.try_fresh(now) {
            Ok(validated) => return Ok(validated),
            Err(err) => err,
        };

        if let Some(fallback) = entry.try_fallback(now) {
            warn!(
                symbol = symbol.as_str(),
                price = fallback.price.units(),
                age = now.since(fallback.timestamp),
                "using fallback price"
            );
            return Ok(fallback);
        }

        debug!(symbol = symbol.as_str(), ?rejection, "no valid price");
        Err(rejection)
    }

    /// Operator operation: pin a fresh validated price as both the band
    /// reference and the fallback. This is the only writer of either field.
    pub fn refresh_reference(
        &mut self,
        symbol: &InstrumentId,
        now: Timestamp,
    ) -> Result<Price, OracleError> {
        let entry = self.symbols.get_mut(symbol).ok_or(OracleError::NotConfigured)?;

        let sample = entry.feed.fetch().ok_or(OracleError::Unavailable)?;
        let price = entry.kind.normalize(&sample).map_err(|_| OracleError::InvalidPrice)?;
        if now.since(sample.publish_time) > entry.params.max_staleness_secs {
            return Err(OracleError::PriceStale);
        }

        entry.reference = Some((price, sample.publish_time));
        entry.last_valid = Some((price, sample.publish_time));
        Ok(price)
    }
}

impl Default for PriceOracle {
    fn default() -> Self {
        Self::new()
    }
}
