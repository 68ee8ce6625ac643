// 13.0 engine/core.rs: main engine. owns the clock, the ledger and every
// pipeline component; venue events flow in one side, balance updates and
// settlements flow out the other. the ledger is only ever touched through
// &mut self here, which serializes money movements in receipt order.

use super::results::{EngineError, TickReport};
use crate::bus::{EventBus, VenueEvent};
use crate::clock::{Clock, SimClock};
use crate::config::EngineConfig;
use crate::equity::{EquityEngine, FreezeIntent, VenueUpdate};
use crate::events::{
    EventCollector, EventPayload, OrdersFrozenEvent, ReferenceRefreshedEvent,
    VenueUpdateEmittedEvent,
};
use crate::hours::{TradingHoursGuard, TradingWindow};
use crate::ledger::{Ledger, LedgerStatus};
use crate::netting::{NettingEngine, NettingReport, Obligation};
use crate::oracle::{FeedKind, PriceFeed, PriceOracle, SymbolParams};
use crate::position::PositionStore;
use crate::settlement::{SettleOutcome, SettlementCoordinator};
use crate::types::{Bps, InstrumentId, Money, Timestamp, UserKey, VenueId};
use crate::venue::VenueAdapter;
use std::collections::HashMap;
use tracing::{debug, info, warn};

pub struct Engine {
    config: EngineConfig,
    clock: SimClock,
    ledger: Ledger,
    oracle: PriceOracle,
    hours: TradingHoursGuard,
    positions: PositionStore,
    equity: EquityEngine,
    coordinator: SettlementCoordinator,
    netting: NettingEngine,
    venues: HashMap<VenueId, Box<dyn VenueAdapter>>,
    /// Pipeline events (venue updates, freezes); money events live in the ledger.
    events: EventCollector,
    last_netting: Timestamp,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let clock = SimClock::new(Timestamp::from_secs(0));
        Self {
            ledger: Ledger::new(config.ledger.clone(), config.max_events),
            coordinator: SettlementCoordinator::new(config.retry.clone()),
            events: EventCollector::new(config.max_events),
            oracle: PriceOracle::new(),
            hours: TradingHoursGuard::new(),
            positions: PositionStore::new(),
            equity: EquityEngine::new(),
            netting: NettingEngine::new(),
            venues: HashMap::new(),
            last_netting: Timestamp::from_secs(0),
            clock,
            config,
        }
    }

    // ---- wiring ----

    pub fn clock(&self) -> &SimClock {
        &self.clock
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn positions(&self) -> &PositionStore {
        &self.positions
    }

    pub fn events(&self) -> &EventCollector {
        &self.events
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn operator_queue_len(&self) -> usize {
        self.coordinator.operator_queue().len()
    }

    pub fn register_venue(
        &mut self,
        mut adapter: Box<dyn VenueAdapter>,
        symbols: &[InstrumentId],
    ) -> Result<(), EngineError> {
        adapter.connect(symbols)?;
        self.venues.insert(adapter.venue().clone(), adapter);
        Ok(())
    }

    pub fn venue(&self, venue: &VenueId) -> Option<&dyn VenueAdapter> {
        self.venues.get(venue).map(|a| a.as_ref())
    }

    /// Configure a symbol's feed with the engine-wide oracle defaults.
    pub fn configure_symbol(&mut self, symbol: InstrumentId, kind: FeedKind, feed: Box<dyn PriceFeed>) {
        let params = SymbolParams {
            max_staleness_secs: self.config.oracle.max_staleness_secs,
            band_bps: self.config.oracle.band_bps,
            max_fallback_age_secs: self.config.oracle.max_fallback_age_secs,
        };
        self.oracle.configure(symbol, kind, feed, params);
    }

    // ---- user flows ----

    pub fn deposit(&mut self, user: UserKey, amount: Money) -> Result<(), EngineError> {
        let now = self.now();
        self.ledger.deposit_collateral(user, amount, now)?;
        self.equity.note_trigger(user, now);
        self.ledger.check_conservation(now)?;
        Ok(())
    }

    pub fn withdraw_collateral(&mut self, user: UserKey, amount: Money) -> Result<(), EngineError> {
        let now = self.now();
        self.ledger.withdraw_collateral(user, amount, now)?;
        self.equity.note_trigger(user, now);
        self.ledger.check_conservation(now)?;
        Ok(())
    }

    pub fn withdraw_pnl(&mut self, user: UserKey, amount: Money) -> Result<(), EngineError> {
        let now = self.now();
        self.ledger.withdraw_pnl(user, amount, now)?;
        self.equity.note_trigger(user, now);
        self.ledger.check_conservation(now)?;
        Ok(())
    }

    // ---- venue event pipeline ----

    /// Bounded queue adapters publish into; a full queue backpressures them.
    pub fn new_bus(&self) -> EventBus<VenueEvent> {
        EventBus::new(self.config.bus_capacity)
    }

    /// Drain every queued venue event into the pipeline.
    pub fn pump(&mut self, bus: &EventBus<VenueEvent>) -> Result<usize, EngineError> {
        let mut processed = 0;
        while let Some(event) = bus.try_next() {
            self.on_venue_event(event)?;
            processed += 1;
        }
        Ok(processed)
    }

    pub fn on_venue_event(&mut self, event: VenueEvent) -> Result<(), EngineError> {
        let now = self.now();
        match event {
            VenueEvent::Price(tick) => {
                let threshold = self.config.equity.trigger_bps(&tick.symbol);
                let holders: Vec<UserKey> = self
                    .positions
                    .snapshot_all()
                    .into_iter()
                    .filter(|p| p.instrument == tick.symbol)
                    .map(|p| p.user)
                    .collect();
                self.equity
                    .on_price_observation(&tick.symbol, tick.mid(), threshold, holders, now);
            }
            VenueEvent::PositionSnapshot { venue, user, positions } => {
                self.positions.apply_snapshot(&venue, user, positions);
                self.equity.note_trigger(user, now);
            }
            VenueEvent::Position(update) => {
                let user = update.user;
                self.positions.apply_update(update);
                self.equity.note_trigger(user, now);
            }
            VenueEvent::PositionClosed(close) => {
                let user = close.user;
                self.positions.apply_close(&close);
                self.coordinator.on_position_closed(
                    close,
                    &mut self.ledger,
                    &self.hours,
                    &self.oracle,
                    now,
                )?;
                self.equity.note_trigger(user, now);
                self.ledger.check_conservation(now)?;
            }
            VenueEvent::Shortfall(claim) => {
                let outcome = self.coordinator.on_venue_shortfall(
                    claim,
                    &mut self.ledger,
                    &self.hours,
                    &self.oracle,
                    now,
                )?;
                self.forward_recovery(&outcome);
                self.ledger.check_conservation(now)?;
            }
        }
        Ok(())
    }

    /// Covered shortfall funds are pushed back to the claiming venue.
    fn forward_recovery(&mut self, outcome: &SettleOutcome) {
        let SettleOutcome::Seized { recovered, venue, user, .. } = outcome else {
            return;
        };
        if recovered.is_zero() {
            return;
        }
        match self.venues.get_mut(venue) {
            Some(adapter) => {
                if let Err(err) = adapter.forward_shortfall_cover(*user, *recovered) {
                    warn!(%venue, %err, "failed to forward shortfall cover");
                }
            }
            None => warn!(%venue, "no adapter to forward shortfall cover"),
        }
    }

    // ---- periodic driver ----

    /// One scheduler pass: due retries, debounced/heartbeat recomputes with
    /// venue dispatch, and a netting window when one is due.
    pub fn tick(&mut self) -> Result<TickReport, EngineError> {
        let now = self.now();
        let mut report = TickReport::default();

        let outcomes =
            self.coordinator
                .process_due(&mut self.ledger, &self.hours, &self.oracle, now);
        for outcome in &outcomes {
            self.forward_recovery(outcome);
        }
        report.retries_settled = outcomes.len();

        let due = self
            .equity
            .due_users(&self.config.equity, self.positions.users(), now);
        for user in due {
            let (updates, freezes) = self.recompute_user(user)?;
            report.users_recomputed += 1;
            report.updates_sent += updates;
            report.freezes_sent += freezes;
        }

        if self.netting.pending_count() > 0
            && now.since(self.last_netting) >= self.config.netting.window_secs
            && self.ledger.status() == LedgerStatus::Active
        {
            report.netting = Some(self.run_netting_window()?);
        }

        self.ledger.check_conservation(now)?;
        Ok(report)
    }

    /// Recompute one user and dispatch the resulting updates and freezes.
    fn recompute_user(&mut self, user: UserKey) -> Result<(usize, usize), EngineError> {
        let now = self.now();
        let outcome = self.equity.recompute(
            user,
            self.ledger.collateral(&user),
            &self.positions,
            &self.oracle,
            &self.config.equity,
            now,
        )?;

        for update in &outcome.updates {
            self.dispatch_update(update, now);
        }
        for freeze in &outcome.freezes {
            self.dispatch_freeze(freeze, now);
        }
        Ok((outcome.updates.len(), outcome.freezes.len()))
    }

    fn dispatch_update(&mut self, update: &VenueUpdate, now: Timestamp) {
        self.events.record(
            now,
            EventPayload::VenueUpdateEmitted(VenueUpdateEmittedEvent {
                user: update.user,
                venue: update.venue.clone(),
                equity: update.equity,
                sequence: update.sequence,
            }),
        );
        match self.venues.get_mut(&update.venue) {
            Some(adapter) => match adapter.set_user_balance(update) {
                Ok(ack) => {
                    debug!(venue = %update.venue, sequence = ack.sequence, "venue balance updated")
                }
                // a fresher sequence supersedes this update on the next pass
                Err(err) => warn!(venue = %update.venue, %err, "venue update failed"),
            },
            None => warn!(venue = %update.venue, "no adapter for venue update"),
        }
    }

    fn dispatch_freeze(&mut self, freeze: &FreezeIntent, now: Timestamp) {
        self.events.record(
            now,
            EventPayload::OrdersFrozen(OrdersFrozenEvent {
                user: freeze.user,
                venue: freeze.venue.clone(),
                margin_in_use: freeze.margin_in_use,
                collateral: self.ledger.collateral(&freeze.user),
            }),
        );
        if let Some(adapter) = self.venues.get_mut(&freeze.venue) {
            if let Err(err) = adapter.freeze_new_orders(freeze.user) {
                warn!(venue = %freeze.venue, %err, "freeze request failed");
            }
        }
    }

    // ---- netting ----

    pub fn enqueue_obligation(&mut self, obligation: Obligation) {
        self.netting.enqueue(obligation);
    }

    pub fn pending_obligations(&self) -> usize {
        self.netting.pending_count()
    }

    pub fn run_netting_window(&mut self) -> Result<NettingReport, EngineError> {
        let now = self.now();
        self.last_netting = now;
        let report = self
            .netting
            .run_window(&mut self.ledger, self.config.netting.fee_bps, now)?;
        info!(
            batches = report.batches.len(),
            gross = report.gross_volume.units(),
            netted = report.netted_volume.units(),
            "netting window complete"
        );
        self.ledger.check_conservation(now)?;
        Ok(report)
    }

    // ---- operator surface ----

    pub fn pause(&mut self) {
        let now = self.now();
        self.ledger.pause(now);
    }

    pub fn unpause(&mut self) {
        let now = self.now();
        self.ledger.unpause(now);
    }

    pub fn set_haircut(&mut self, haircut: Bps) {
        self.config.equity.haircut_bps = haircut;
    }

    pub fn set_trigger_threshold(&mut self, symbol: InstrumentId, threshold: Bps) {
        self.config.equity.trigger_thresholds_bps.insert(symbol, threshold);
    }

    pub fn set_daily_caps(&mut self, user_cap: Money, global_cap: Money) {
        self.config.ledger.user_daily_cap = user_cap;
        self.config.ledger.global_daily_cap = global_cap;
        self.ledger.set_params(self.config.ledger.clone());
    }

    pub fn set_withdrawal_cooldown(&mut self, secs: i64) {
        self.config.ledger.withdrawal_cooldown_secs = secs;
        self.ledger.set_params(self.config.ledger.clone());
    }

    pub fn set_circuit_breaker(&mut self, threshold: Money, window_secs: i64) {
        self.config.ledger.circuit_breaker_threshold = threshold;
        self.config.ledger.circuit_breaker_window_secs = window_secs;
        self.ledger.set_params(self.config.ledger.clone());
    }

    pub fn set_oracle_params(
        &mut self,
        symbol: &InstrumentId,
        params: SymbolParams,
    ) -> Result<(), EngineError> {
        self.oracle.set_params(symbol, params)?;
        Ok(())
    }

    pub fn set_trading_hours(&mut self, symbol: InstrumentId, windows: Vec<TradingWindow>) {
        self.hours.set_schedule(symbol, windows);
    }

    pub fn broker_deposit(&mut self, amount: Money) -> Result<(), EngineError> {
        self.ledger.broker_deposit(amount)?;
        Ok(())
    }

    pub fn broker_withdraw(&mut self, amount: Money) -> Result<(), EngineError> {
        self.ledger.broker_withdraw(amount)?;
        Ok(())
    }

    pub fn insurance_deposit(&mut self, amount: Money) -> Result<(), EngineError> {
        self.ledger.insurance_deposit(amount)?;
        Ok(())
    }

    pub fn insurance_withdraw(&mut self, amount: Money) -> Result<(), EngineError> {
        self.ledger.insurance_withdraw(amount)?;
        Ok(())
    }

    /// Operator: pin a fresh reference/fallback price for a symbol.
    pub fn refresh_reference(&mut self, symbol: &InstrumentId) -> Result<(), EngineError> {
        let now = self.now();
        let reference = self.oracle.refresh_reference(symbol, now)?;
        self.events.record(
            now,
            EventPayload::ReferenceRefreshed(ReferenceRefreshedEvent {
                symbol: symbol.clone(),
                reference,
                band_bps: self.config.oracle.band_bps,
            }),
        );
        Ok(())
    }

    /// Operator: force a recompute for one user on the next tick.
    pub fn request_recompute(&mut self, user: UserKey) {
        let now = self.now();
        self.equity.note_trigger(user, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::PriceTick;
    use crate::oracle::{FeedSample, MockFeed};
    use crate::position::PositionUpdate;
    use crate::types::{Price, Side};
    use crate::venue::MockVenue;

    fn user_a() -> UserKey {
        UserKey::from_low_u64(1)
    }

    fn btc() -> InstrumentId {
        InstrumentId::new("BTC-PERP")
    }

    fn engine_with_venue(venue: &str, price_whole: u64) -> Engine {
        let mut engine = Engine::new(EngineConfig::default());
        engine
            .register_venue(Box::new(MockVenue::new(venue)), &[btc()])
            .unwrap();

        let feed = MockFeed::new("mock");
        feed.set_sample(FeedSample {
            raw_price: (price_whole * crate::types::PRICE_SCALE) as i64,
            expo: 0,
            publish_time: Timestamp::from_secs(0),
        });
        engine.configure_symbol(btc(), FeedKind::Aggregator { decimals: 8 }, Box::new(feed));
        engine
    }

    fn position_update(venue: &str, size_whole: u64) -> PositionUpdate {
        PositionUpdate {
            user: user_a(),
            venue: VenueId::new(venue),
            instrument: btc(),
            position_id: format!("{venue}-1"),
            side: Side::Long,
            size: Money::from_whole(size_whole),
            entry: Price::from_whole(50_000),
            initial_margin: Money::from_whole(5_000),
            timestamp: Timestamp::from_secs(0),
        }
    }

    #[test]
    fn deposit_then_tick_updates_venue() {
        let mut engine = engine_with_venue("kraken", 50_000);
        engine.deposit(user_a(), Money::from_whole(10_000)).unwrap();
        engine
            .on_venue_event(VenueEvent::Position(position_update("kraken", 1)))
            .unwrap();

        // past the debounce window
        engine.clock().advance(1);
        let report = engine.tick().unwrap();
        assert_eq!(report.users_recomputed, 1);
        assert_eq!(report.updates_sent, 1);
    }

    #[test]
    fn price_tick_triggers_on_threshold() {
        let mut engine = engine_with_venue("kraken", 50_000);
        engine.deposit(user_a(), Money::from_whole(10_000)).unwrap();
        engine
            .on_venue_event(VenueEvent::Position(position_update("kraken", 1)))
            .unwrap();
        engine.clock().advance(1);
        engine.tick().unwrap();

        let tick_at = |engine: &mut Engine, price_whole: u64| {
            engine
                .on_venue_event(VenueEvent::Price(PriceTick {
                    symbol: btc(),
                    bid: Price::from_whole(price_whole),
                    ask: Price::from_whole(price_whole),
                    timestamp: engine.now(),
                    venue: VenueId::new("kraken"),
                }))
                .unwrap();
        };

        // first observation sets the trigger baseline
        tick_at(&mut engine, 50_000);
        engine.clock().advance(1);
        engine.tick().unwrap();

        // 0.5% move: below the default 1% threshold, no recompute
        tick_at(&mut engine, 50_250);
        engine.clock().advance(1);
        let report = engine.tick().unwrap();
        assert_eq!(report.users_recomputed, 0);

        // 2% move from the baseline: triggers
        tick_at(&mut engine, 51_000);
        engine.clock().advance(1);
        let report = engine.tick().unwrap();
        assert_eq!(report.users_recomputed, 1);
    }

    #[test]
    fn netting_window_runs_when_due() {
        let mut engine = engine_with_venue("kraken", 50_000);
        engine.broker_deposit(Money::from_whole(1_000)).unwrap();
        engine.enqueue_obligation(Obligation {
            user: user_a(),
            vault: crate::types::VaultId(1),
            amount: crate::types::SignedMoney::from_units(500),
        });

        engine.clock().advance(engine.config().netting.window_secs);
        let report = engine.tick().unwrap();
        let netting = report.netting.unwrap();
        assert_eq!(netting.batches.len(), 1);
        assert_eq!(engine.ledger().pnl(&user_a()), Money::from_units(500));
    }

    #[test]
    fn operator_surface_mutates_params() {
        let mut engine = engine_with_venue("kraken", 50_000);
        engine.set_haircut(Bps(2_500));
        engine.set_daily_caps(Money::from_whole(100), Money::from_whole(1_000));
        engine.set_withdrawal_cooldown(3_600);
        engine.set_circuit_breaker(Money::from_whole(10_000), 1_800);

        assert_eq!(engine.config().equity.haircut_bps, Bps(2_500));
        assert_eq!(engine.ledger().params().withdrawal_cooldown_secs, 3_600);
        assert_eq!(
            engine.ledger().params().circuit_breaker_threshold,
            Money::from_whole(10_000)
        );
    }

    #[test]
    fn pump_drains_queued_events_in_order() {
        let mut engine = engine_with_venue("kraken", 50_000);
        engine.deposit(user_a(), Money::from_whole(10_000)).unwrap();

        let bus = engine.new_bus();
        bus.publish(VenueEvent::Position(position_update("kraken", 1)));
        bus.publish(VenueEvent::Price(PriceTick {
            symbol: btc(),
            bid: Price::from_whole(50_000),
            ask: Price::from_whole(50_000),
            timestamp: engine.now(),
            venue: VenueId::new("kraken"),
        }));

        assert_eq!(engine.pump(&bus).unwrap(), 2);
        assert!(bus.is_empty());

        engine.clock().advance(1);
        let report = engine.tick().unwrap();
        assert_eq!(report.users_recomputed, 1);
    }

    #[test]
    fn pause_blocks_user_flow() {
        let mut engine = engine_with_venue("kraken", 50_000);
        engine.pause();
        let err = engine.deposit(user_a(), Money::from_whole(1));
        assert!(matches!(
            err,
            Err(EngineError::Ledger(crate::ledger::LedgerError::Paused))
        ));
        engine.unpause();
        engine.deposit(user_a(), Money::from_whole(1)).unwrap();
    }
}
