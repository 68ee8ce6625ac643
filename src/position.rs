// 5.0 position.rs: current position snapshot per (user, venue, instrument).
// venue adapters publish snapshot and delta events; the store merges them into
// one consistent map. closes are removed here and surfaced to the settlement
// coordinator as realized-pnl signals.
//
// readers take point-in-time snapshots under the read guard; writers are
// serialized per store. per-key update order follows arrival order.

use crate::types::{
    position_pnl, InstrumentId, MathError, Money, Price, Side, SignedMoney, Timestamp, UserKey,
    VenueId,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionKey {
    pub user: UserKey,
    pub venue: VenueId,
    pub instrument: InstrumentId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub user: UserKey,
    pub venue: VenueId,
    pub instrument: InstrumentId,
    pub position_id: String,
    pub side: Side,
    /// Base size in 10^6 units.
    pub size: Money,
    pub entry: Price,
    /// Last mark applied by the equity engine; entry until first mark.
    pub mark: Price,
    pub unrealized: SignedMoney,
    /// Initial margin the venue holds against this position.
    pub initial_margin: Money,
    /// Set when no validated price was available at the last mark pass.
    pub stale: bool,
    pub updated_at: Timestamp,
}

impl Position {
    pub fn key(&self) -> PositionKey {
        PositionKey {
            user: self.user,
            venue: self.venue.clone(),
            instrument: self.instrument.clone(),
        }
    }
}

/// Upsert event from a venue adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionUpdate {
    pub user: UserKey,
    pub venue: VenueId,
    pub instrument: InstrumentId,
    pub position_id: String,
    pub side: Side,
    pub size: Money,
    pub entry: Price,
    pub initial_margin: Money,
    pub timestamp: Timestamp,
}

/// Close event from a venue adapter; becomes a realized-pnl signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionClose {
    pub user: UserKey,
    pub venue: VenueId,
    pub instrument: InstrumentId,
    pub position_id: String,
    pub side: Side,
    pub size: Money,
    pub entry: Price,
    pub exit: Price,
    pub closed_at: Timestamp,
}

impl PositionClose {
    pub fn realized_pnl(&self) -> Result<SignedMoney, MathError> {
        position_pnl(self.entry, self.exit, self.size, self.side)
    }
}

#[derive(Debug, Default)]
pub struct PositionStore {
    inner: RwLock<HashMap<PositionKey, Position>>,
}

impl PositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole (venue, user) slice with the venue's snapshot.
    pub fn apply_snapshot(&self, venue: &VenueId, user: UserKey, updates: Vec<PositionUpdate>) {
        let mut map = self.inner.write();
        map.retain(|k, _| !(k.venue == *venue && k.user == user));
        for update in updates {
            let position = Self::position_from(update);
            map.insert(position.key(), position);
        }
    }

    pub fn apply_update(&self, update: PositionUpdate) {
        let position = Self::position_from(update);
        self.inner.write().insert(position.key(), position);
    }

    /// Remove the closed position. The close is forwarded to settlement whether
    /// or not the store knew the position; the refId dedup makes replays safe.
    pub fn apply_close(&self, close: &PositionClose) -> Option<Position> {
        self.inner.write().remove(&PositionKey {
            user: close.user,
            venue: close.venue.clone(),
            instrument: close.instrument.clone(),
        })
    }

    fn position_from(update: PositionUpdate) -> Position {
        Position {
            user: update.user,
            venue: update.venue,
            instrument: update.instrument,
            position_id: update.position_id,
            side: update.side,
            size: update.size,
            entry: update.entry,
            mark: update.entry,
            unrealized: SignedMoney::ZERO,
            initial_margin: update.initial_margin,
            stale: false,
            updated_at: update.timestamp,
        }
    }

    /// Mark one position to market. Returns false when the key is gone.
    pub fn mark(&self, key: &PositionKey, mark: Price, now: Timestamp) -> Result<bool, MathError> {
        let mut map = self.inner.write();
        let Some(position) = map.get_mut(key) else {
            return Ok(false);
        };
        position.unrealized = position_pnl(position.entry, mark, position.size, position.side)?;
        position.mark = mark;
        position.stale = false;
        position.updated_at = now;
        Ok(true)
    }

    pub fn mark_stale(&self, key: &PositionKey, now: Timestamp) {
        let mut map = self.inner.write();
        if let Some(position) = map.get_mut(key) {
            position.stale = true;
            position.updated_at = now;
        }
    }

    /// Point-in-time view of one user's positions across every venue.
    pub fn snapshot_user(&self, user: &UserKey) -> Vec<Position> {
        self.inner
            .read()
            .values()
            .filter(|p| p.user == *user)
            .cloned()
            .collect()
    }

    pub fn snapshot_all(&self) -> Vec<Position> {
        self.inner.read().values().cloned().collect()
    }

    /// Venues currently hosting at least one position for the user, in a
    /// stable order.
    pub fn venues_of(&self, user: &UserKey) -> BTreeSet<VenueId> {
        self.inner
            .read()
            .values()
            .filter(|p| p.user == *user)
            .map(|p| p.venue.clone())
            .collect()
    }

    pub fn users(&self) -> BTreeSet<UserKey> {
        self.inner.read().values().map(|p| p.user).collect()
    }

    pub fn instruments(&self) -> BTreeSet<InstrumentId> {
        self.inner.read().values().map(|p| p.instrument.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}
