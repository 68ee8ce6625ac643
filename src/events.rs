// 9.0: every state change produces an event. used for audit trails, state
// reconstruction, and notifying external systems. the EventPayload enum lists
// all event types.

use crate::types::{
    Bps, InstrumentId, Money, Price, RefId, Timestamp, UserKey, VaultId, VenueId,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub timestamp: Timestamp,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(id: EventId, timestamp: Timestamp, payload: EventPayload) -> Self {
        Self {
            id,
            timestamp,
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    // User flows
    Deposit(DepositEvent),
    Withdrawal(WithdrawalEvent),
    WithdrawalRejected(WithdrawalRejectedEvent),

    // Settlement flows
    PnlCredited(PnlCreditedEvent),
    CollateralSeized(CollateralSeizedEvent),
    Shortfall(ShortfallEvent),

    // Safety rails
    CircuitBreakerTriggered(CircuitBreakerTriggeredEvent),
    LedgerPaused,
    LedgerUnpaused,

    // Equity pipeline
    VenueUpdateEmitted(VenueUpdateEmittedEvent),
    OrdersFrozen(OrdersFrozenEvent),

    // Netting
    BatchSettled(BatchSettledEvent),

    // Oracle
    FallbackPriceUsed(FallbackPriceUsedEvent),
    ReferenceRefreshed(ReferenceRefreshedEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositEvent {
    pub user: UserKey,
    pub amount: Money,
    pub new_collateral: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalEvent {
    pub user: UserKey,
    pub amount: Money,
    /// Which sub-ledger the withdrawal came out of.
    pub from_pnl: bool,
    pub new_balance: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalRejectedEvent {
    pub user: UserKey,
    pub amount: Money,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PnlCreditedEvent {
    pub user: UserKey,
    pub amount: Money,
    pub ref_id: RefId,
    pub broker_pool_after: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollateralSeizedEvent {
    pub user: UserKey,
    pub amount: Money,
    pub ref_id: RefId,
    pub collateral_after: Money,
}

/// Emitted by the capped seize when the user's collateral could not cover the
/// full claim. `covered_by_insurance + socialized == shortfall`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShortfallEvent {
    pub user: UserKey,
    pub shortfall: Money,
    pub covered_by_insurance: Money,
    pub socialized: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerTriggeredEvent {
    pub window_volume: Money,
    pub threshold: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueUpdateEmittedEvent {
    pub user: UserKey,
    pub venue: VenueId,
    pub equity: Money,
    pub sequence: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrdersFrozenEvent {
    pub user: UserKey,
    pub venue: VenueId,
    pub margin_in_use: Money,
    pub collateral: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSettledEvent {
    pub vault: VaultId,
    pub root: RefId,
    pub batch_id: RefId,
    pub leaves: usize,
    pub gross_volume: Money,
    pub netted_volume: Money,
    pub savings: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackPriceUsedEvent {
    pub symbol: InstrumentId,
    pub price: Price,
    pub price_age_secs: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceRefreshedEvent {
    pub symbol: InstrumentId,
    pub reference: Price,
    pub band_bps: Bps,
}

pub trait EventEmitter {
    fn emit(&mut self, event: Event);
}

#[derive(Debug, Default)]
pub struct EventCollector {
    events: Vec<Event>,
    next_id: u64,
    max_events: usize,
}

impl EventCollector {
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Vec::new(),
            next_id: 1,
            max_events,
        }
    }

    pub fn record(&mut self, timestamp: Timestamp, payload: EventPayload) -> EventId {
        let id = EventId(self.next_id);
        self.next_id += 1;
        self.events.push(Event::new(id, timestamp, payload));
        if self.max_events > 0 && self.events.len() > self.max_events {
            let drain = self.events.len() - self.max_events;
            self.events.drain(0..drain);
        }
        id
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn recent(&self, count: usize) -> &[Event] {
        let start = self.events.len().saturating_sub(count);
        &self.events[start..]
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

impl EventEmitter for EventCollector {
    fn emit(&mut self, event: Event) {
        self.events.push(event);
    }
}
