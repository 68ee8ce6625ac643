// 6.0 equity.rs: per-venue equity computation. collateral plus own-venue pnl,
// plus a haircut fraction of positive cross-venue pnl, plus negative cross-venue
// pnl in full. the asymmetry is deliberate: venues are never credited with the
// full value of wins parked elsewhere, but always debited for losses.
//
// also owns trigger/debounce bookkeeping and the per-(user, venue) sequence
// numbers venue adapters use to discard superseded updates.

use crate::config::EquityParams;
use crate::oracle::PriceOracle;
use crate::position::{Position, PositionStore};
use crate::types::{
    deviation_bps, Bps, InstrumentId, MathError, Money, Price, Timestamp, UserKey, VenueId,
    BPS_DENOM,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

/// One balance update for a venue adapter. Adapters apply only if
/// `sequence > last_applied`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VenueUpdate {
    pub user: UserKey,
    pub venue: VenueId,
    pub equity: Money,
    pub sequence: u64,
}

/// Instruction to stop accepting new orders for a user on a venue.
/// Idempotent, so it carries no sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreezeIntent {
    pub user: UserKey,
    pub venue: VenueId,
    /// Margin the user has in use across all venues at freeze time.
    pub margin_in_use: Money,
}

#[derive(Debug, Clone, Default)]
pub struct UserEquityOutcome {
    pub updates: Vec<VenueUpdate>,
    pub freezes: Vec<FreezeIntent>,
    pub overspent: bool,
    pub scaled_down: bool,
}

/// Pure per-venue equity math over a consistent position snapshot.
/// Stale positions keep contributing to their own venue's local view but are
/// excluded from every cross-venue term. Returned amounts are signed; the
/// emission path clamps at zero.
pub fn venue_equities(
    collateral: Money,
    positions: &[Position],
    haircut: Bps,
) -> Result<BTreeMap<VenueId, i128>, MathError> {
    let mut own_all: BTreeMap<VenueId, i128> = BTreeMap::new();
    let mut own_fresh: BTreeMap<VenueId, i128> = BTreeMap::new();
    let mut total_fresh: i128 = 0;

    for position in positions {
        let pnl = position.unrealized.units() as i128;
        *own_all.entry(position.venue.clone()).or_insert(0) += pnl;
        own_fresh.entry(position.venue.clone()).or_insert(0);
        if !position.stale {
            *own_fresh.get_mut(&position.venue).expect("entry inserted above") += pnl;
            total_fresh += pnl;
        }
    }

    let mut equities = BTreeMap::new();
    for (venue, own) in &own_all {
        let cross = total_fresh - own_fresh[venue];
        let positive_cross = cross.max(0);
        let negative_cross = cross.min(0);
        let haircut_credit = positive_cross * haircut.value() as i128 / BPS_DENOM as i128;

        let equity = collateral.units() as i128 + own + haircut_credit + negative_cross;
        equities.insert(venue.clone(), equity);
    }
    Ok(equities)
}

/// Margin the venues hold against a user, summed per venue.
pub fn margin_in_use(positions: &[Position]) -> BTreeMap<VenueId, Money> {
    let mut margins: BTreeMap<VenueId, Money> = BTreeMap::new();
    for position in positions {
        let entry = margins.entry(position.venue.clone()).or_insert(Money::ZERO);
        *entry = entry.checked_add(position.initial_margin).unwrap_or(*entry);
    }
    margins
}

#[derive(Debug, Default)]
pub struct EquityEngine {
    sequences: HashMap<(UserKey, VenueId), u64>,
    /// Price at the last trigger per instrument; movement is measured from here.
    trigger_baseline: HashMap<InstrumentId, Price>,
    /// Users with a pending recompute and the time of their first trigger.
    pending: HashMap<UserKey, Timestamp>,
    last_update: HashMap<UserKey, Timestamp>,
}

impl EquityEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Price observation. When the move from the last baseline exceeds the
    /// instrument's threshold, every holder gets a recompute trigger.
    pub fn on_price_observation(
        &mut self,
        symbol: &InstrumentId,
        price: Price,
        threshold: Bps,
        holders: impl IntoIterator<Item = UserKey>,
        now: Timestamp,
    ) -> bool {
        let moved = match self.trigger_baseline.get(symbol) {
            None => true,
            Some(baseline) => deviation_bps(price, *baseline)
                .map(|bps| bps > threshold.value() as u64)
                .unwrap_or(true),
        };
        if !moved {
            return false;
        }
        self.trigger_baseline.insert(symbol.clone(), price);
        for user in holders {
            self.note_trigger(user, now);
        }
        true
    }

    /// Direct trigger: deposit/withdraw, position open/close, operator request.
    pub fn note_trigger(&mut self, user: UserKey, now: Timestamp) {
        self.pending.entry(user).or_insert(now);
    }

    /// Users whose debounce window elapsed plus users owed a heartbeat.
    /// Draining is destructive: returned users are no longer pending.
    pub fn due_users(
        &mut self,
        params: &EquityParams,
        all_users: impl IntoIterator<Item = UserKey>,
        now: Timestamp,
    ) -> Vec<UserKey> {
        let mut due: Vec<UserKey> = Vec::new();

        let flushed: Vec<UserKey> = self
            .pending
            .iter()
            .filter(|(_, first)| now.since(**first) * 1_000 >= params.debounce_ms)
            .map(|(user, _)| *user)
            .collect();
        for user in flushed {
            self.pending.remove(&user);
            due.push(user);
        }

        for user in all_users {
            if due.contains(&user) {
                continue;
            }
            let last = self.last_update.get(&user).copied().unwrap_or_default();
            if now.since(last) >= params.heartbeat_secs {
                due.push(user);
            }
        }
        due
    }

    pub fn last_sequence(&self, user: &UserKey, venue: &VenueId) -> u64 {
        self.sequences.get(&(*user, venue.clone())).copied().unwrap_or(0)
    }

    fn next_sequence(&mut self, user: UserKey, venue: &VenueId) -> u64 {
        let counter = self.sequences.entry((user, venue.clone())).or_insert(0);
        *counter += 1;
        *counter
    }

    /// Mark the user's positions to market and produce venue updates.
    /// A freshly produced update supersedes any in-flight one by sequence.
    pub fn recompute(
        &mut self,
        user: UserKey,
        collateral: Money,
        store: &PositionStore,
        oracle: &PriceOracle,
        params: &EquityParams,
        now: Timestamp,
    ) -> Result<UserEquityOutcome, MathError> {
        // mark-to-market pass; unpriceable instruments go stale
        for position in store.snapshot_user(&user) {
            match oracle.get_validated_price(&position.instrument, now) {
                Ok(validated) => {
                    store.mark(&position.key(), validated.price, now)?;
                }
                Err(err) => {
                    debug!(user = %user, instrument = position.instrument.as_str(), ?err, "marking position stale");
                    store.mark_stale(&position.key(), now);
                }
            }
        }

        self.pending.remove(&user);
        self.last_update.insert(user, now);

        let positions = store.snapshot_user(&user);
        if positions.is_empty() {
            return Ok(UserEquityOutcome::default());
        }

        let equities = venue_equities(collateral, &positions, params.haircut_bps)?;
        let margins = margin_in_use(&positions);
        let total_margin: Money = margins.values().copied().sum();

        let overspent = total_margin > collateral;
        let hard_limit = collateral
            .checked_add(params.overspend_alpha_bps.apply(collateral))
            .unwrap_or(collateral);
        let scale_down = total_margin > hard_limit && !total_margin.is_zero();

        let mut outcome = UserEquityOutcome {
            overspent,
            scaled_down: scale_down,
            ..Default::default()
        };

        if overspent {
            warn!(
                user = %user,
                margin = total_margin.units(),
                collateral = collateral.units(),
                "user overspent across venues"
            );
            for venue in equities.keys() {
                outcome.freezes.push(FreezeIntent {
                    user,
                    venue: venue.clone(),
                    margin_in_use: total_margin,
                });
            }
        }

        for (venue, signed_equity) in equities {
            let scaled = if scale_down {
                signed_equity * collateral.units() as i128 / total_margin.units() as i128
            } else {
                signed_equity
            };
            // a venue balance is unsigned on the wire
            let equity = Money::from_units(u64::try_from(scaled.max(0)).map_err(|_| MathError::Overflow)?);
            let sequence = self.next_sequence(user, &venue);
            outcome.updates.push(VenueUpdate {
                user,
                venue,
                equity,
                sequence,
            });
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::{FeedKind, FeedSample, MockFeed, SymbolParams};
    use crate::position::PositionUpdate;
    use crate::types::{Side, SignedMoney, MONEY_SCALE};

    fn user_a() -> UserKey {
        UserKey::from_low_u64(1)
    }

    fn position(venue: &str, unrealized_whole: i64, stale: bool) -> Position {
        Position {
            user: user_a(),
            venue: VenueId::new(venue),
            instrument: InstrumentId::new("BTC-PERP"),
            position_id: format!("{venue}-1"),
            side: Side::Long,
            size: Money::from_whole(1),
            entry: Price::from_whole(50_000),
            mark: Price::from_whole(50_000),
            unrealized: SignedMoney::from_units(unrealized_whole * MONEY_SCALE as i64),
            initial_margin: Money::from_whole(5_000),
            stale,
            updated_at: Timestamp::from_secs(0),
        }
    }

    #[test]
    fn cross_venue_asymmetric_haircut() {
        // venue K holds +4000 unrealized, venue B holds -4000
        let positions = vec![position("kraken", 4_000, false), position("bybit", -4_000, false)];
        let equities =
            venue_equities(Money::from_whole(50_000), &positions, Bps(5_000)).unwrap();

        // K: 50_000 + 4_000 + 0.5*max(0,-4_000) + min(0,-4_000) = 50_000
        assert_eq!(
            equities[&VenueId::new("kraken")],
            50_000 * MONEY_SCALE as i128
        );
        // B: 50_000 - 4_000 + 0.5*4_000 + 0 = 48_000
        assert_eq!(
            equities[&VenueId::new("bybit")],
            48_000 * MONEY_SCALE as i128
        );
    }

    #[test]
    fn stale_positions_kept_locally_excluded_cross() {
        let positions = vec![position("kraken", 4_000, false), position("bybit", -4_000, true)];
        let equities =
            venue_equities(Money::from_whole(50_000), &positions, Bps(5_000)).unwrap();

        // bybit's stale loss no longer drags kraken down
        assert_eq!(
            equities[&VenueId::new("kraken")],
            54_000 * MONEY_SCALE as i128
        );
        // bybit still sees its own local view plus the haircut credit from kraken
        assert_eq!(
            equities[&VenueId::new("bybit")],
            48_000 * MONEY_SCALE as i128
        );
    }

    #[test]
    fn equity_monotone_in_positive_cross_at_haircut_rate() {
        let base = vec![position("kraken", 0, false), position("bybit", 1_000, false)];
        let bumped = vec![position("kraken", 0, false), position("bybit", 1_100, false)];

        let haircut = Bps(5_000);
        let e0 = venue_equities(Money::from_whole(10_000), &base, haircut).unwrap();
        let e1 = venue_equities(Money::from_whole(10_000), &bumped, haircut).unwrap();

        let delta = e1[&VenueId::new("kraken")] - e0[&VenueId::new("kraken")];
        // +100 of cross pnl credits exactly 50
        assert_eq!(delta, 50 * MONEY_SCALE as i128);
    }

    #[test]
    fn sequences_strictly_increase_per_venue() {
        let mut engine = EquityEngine::new();
        let store = PositionStore::new();
        store.apply_update(PositionUpdate {
            user: user_a(),
            venue: VenueId::new("kraken"),
            instrument: InstrumentId::new("BTC-PERP"),
            position_id: "k-1".to_string(),
            side: Side::Long,
            size: Money::from_whole(1),
            entry: Price::from_whole(50_000),
            initial_margin: Money::from_whole(5_000),
            timestamp: Timestamp::from_secs(0),
        });

        let oracle = configured_oracle(50_000, 0);
        let params = EquityParams::default();

        let first = engine
            .recompute(user_a(), Money::from_whole(10_000), &store, &oracle, &params, Timestamp::from_secs(1))
            .unwrap();
        let second = engine
            .recompute(user_a(), Money::from_whole(10_000), &store, &oracle, &params, Timestamp::from_secs(2))
            .unwrap();

        assert_eq!(first.updates[0].sequence, 1);
        assert_eq!(second.updates[0].sequence, 2);
    }

    #[test]
    fn overspend_freezes_all_venues() {
        let mut engine = EquityEngine::new();
        let store = PositionStore::new();
        for venue in ["kraken", "bybit"] {
            store.apply_update(PositionUpdate {
                user: user_a(),
                venue: VenueId::new(venue),
                instrument: InstrumentId::new("BTC-PERP"),
                position_id: format!("{venue}-1"),
                side: Side::Long,
                size: Money::from_whole(1),
                entry: Price::from_whole(50_000),
                initial_margin: Money::from_whole(8_000),
                timestamp: Timestamp::from_secs(0),
            });
        }

        let oracle = configured_oracle(50_000, 0);
        let params = EquityParams::default();

        // 16_000 margin in use against 10_000 collateral
        let outcome = engine
            .recompute(user_a(), Money::from_whole(10_000), &store, &oracle, &params, Timestamp::from_secs(1))
            .unwrap();

        assert!(outcome.overspent);
        assert!(outcome.scaled_down);
        assert_eq!(outcome.freezes.len(), 2);
        // equities scaled by 10/16
        for update in &outcome.updates {
            assert_eq!(update.equity, Money::from_units(6_250 * MONEY_SCALE));
        }
    }

    #[test]
    fn debounce_collapses_triggers() {
        let mut engine = EquityEngine::new();
        let params = EquityParams::default();
        let t0 = Timestamp::from_secs(100);

        engine.note_trigger(user_a(), t0);
        engine.note_trigger(user_a(), t0);
        engine.note_trigger(user_a(), t0);

        // still inside the same second: debounce holds the user back
        // (heartbeat not due: pretend a recent update)
        engine.last_update.insert(user_a(), t0);
        assert!(engine.due_users(&params, [], t0).is_empty());

        let due = engine.due_users(&params, [], t0.plus(1));
        assert_eq!(due, vec![user_a()]);
        // drained: nothing further due
        assert!(engine.due_users(&params, [], t0.plus(2)).is_empty());
    }

    #[test]
    fn heartbeat_fires_without_triggers() {
        let mut engine = EquityEngine::new();
        let params = EquityParams::default();

        engine.last_update.insert(user_a(), Timestamp::from_secs(0));
        assert!(engine.due_users(&params, [user_a()], Timestamp::from_secs(299)).is_empty());
        assert_eq!(
            engine.due_users(&params, [user_a()], Timestamp::from_secs(300)),
            vec![user_a()]
        );
    }

    #[test]
    fn price_observation_threshold() {
        let mut engine = EquityEngine::new();
        let symbol = InstrumentId::new("BTC-PERP");
        let t0 = Timestamp::from_secs(0);

        // first observation sets the baseline and triggers
        assert!(engine.on_price_observation(&symbol, Price::from_whole(50_000), Bps(100), [user_a()], t0));

        // 0.5% move: below the 1% threshold
        assert!(!engine.on_price_observation(&symbol, Price::from_whole(50_250), Bps(100), [user_a()], t0));

        // 1.5% move from baseline: triggers and rebases
        assert!(engine.on_price_observation(&symbol, Price::from_whole(50_750), Bps(100), [user_a()], t0));
    }

    fn configured_oracle(price_whole: u64, publish_secs: i64) -> PriceOracle {
        let feed = MockFeed::new("mock");
        feed.set_sample(FeedSample {
            raw_price: (price_whole * crate::types::PRICE_SCALE) as i64,
            expo: 0,
            publish_time: Timestamp::from_secs(publish_secs),
        });
        let mut oracle = PriceOracle::new();
        oracle.configure(
            InstrumentId::new("BTC-PERP"),
            FeedKind::Aggregator { decimals: 8 },
            Box::new(feed),
            SymbolParams {
                max_staleness_secs: 300,
                band_bps: Bps(500),
                max_fallback_age_secs: 300,
            },
        );
        oracle
    }
}
