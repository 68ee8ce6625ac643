// clearing-core: cross-venue settlement and portfolio-margin engine.
// ledger-first architecture: one stable collateral pool backs positions on many
// venues; the ledger is the only component that moves money, and every monetary
// primitive is at-most-once via a reference-id dedup set.
// all computation is deterministic with no external I/O; venues, feeds and the
// clock sit behind traits.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: fixed-point Money/Price/SignedMoney, ids, Bps, Timestamp
//   2.x  oracle.rs: feed normalization, staleness/band checks, fallback
//   3.x  hours.rs: trading-hours guard for guarded settlements
//   4.x  ledger.rs: sub-ledgers, pools, waterfall, dedup, caps, breaker
//   5.x  position.rs: (user, venue, instrument) position store
//   6.x  equity.rs: per-venue equity, overspend, triggers, sequences
//   7.x  merkle.rs: keccak sorted-pair commitments for netting batches
//   8.x  netting.rs: multilateral netting windows, batch submission
//   9.x  events.rs: audit events   9.1 settlement.rs: coordinator + retries
//   10.x clock.rs: logical clock   10.1 bus.rs: bounded venue-event queue
//   11.x venue.rs: adapter contract consumed by the core
//   12.x config.rs: parameters, presets, validation
//   13.x engine/: composed engine driving the whole pipeline

// money core
pub mod ledger;
pub mod types;

// market data
pub mod hours;
pub mod oracle;

// pipeline
pub mod equity;
pub mod netting;
pub mod position;
pub mod settlement;

// plumbing
pub mod bus;
pub mod clock;
pub mod events;
pub mod merkle;
pub mod venue;

// integration
pub mod config;
pub mod engine;

// re exports for convenience
pub use bus::{EventBus, PriceTick, VenueEvent};
pub use clock::{Clock, SimClock, SystemClock};
pub use config::{ConfigError, EngineConfig, EquityParams, LedgerParams, NettingParams, RetryParams};
pub use engine::{Engine, EngineError, TickReport};
pub use equity::{venue_equities, EquityEngine, FreezeIntent, VenueUpdate};
pub use events::{Event, EventCollector, EventId, EventPayload};
pub use hours::{TradingHoursGuard, TradingWindow};
pub use ledger::{
    BatchOutcome, Ledger, LedgerError, LedgerStatus, NetLeaf, SeizeOutcome, UserLedger,
};
pub use merkle::{leaf_hash, verify_proof, MerkleTree};
pub use netting::{BatchReport, NettingEngine, NettingError, NettingReport, Obligation};
pub use oracle::{
    FeedKind, FeedSample, MockFeed, OracleError, PriceFeed, PriceOracle, SymbolParams,
    ValidatedPrice,
};
pub use position::{Position, PositionClose, PositionKey, PositionStore, PositionUpdate};
pub use settlement::{
    close_ref_id, shortfall_ref_id, SettleOutcome, SettlementCoordinator, SettlementWork,
    ShortfallClaim,
};
pub use types::{
    deviation_bps, position_pnl, Bps, InstrumentId, MathError, Money, Price, RefId, Side,
    SignedMoney, Timestamp, UserKey, VaultId, VenueId,
};
pub use venue::{reconnect_backoff, Ack, MockVenue, VenueAdapter, VenueError};
