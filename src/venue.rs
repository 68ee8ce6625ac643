// 11.0 venue.rs: the adapter contract the core consumes. real adapters speak
// WebSocket/REST to an exchange; the core only sees this trait. balance updates
// carry a per-(user, venue) sequence and an adapter applies one only if it is
// newer than the last applied.

use crate::equity::VenueUpdate;
use crate::types::{InstrumentId, Money, UserKey, VenueId};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VenueError {
    /// Worth retrying: timeouts, disconnects, rate limits.
    #[error("transient venue failure: {0}")]
    Transient(String),
    /// Not worth retrying: bad credentials, unknown user.
    #[error("fatal venue failure: {0}")]
    Fatal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub sequence: u64,
}

/// Reconnect delay for `attempt` (0-based): exponential from `base_secs`,
/// capped at 30s; `None` once the 10-attempt budget is spent.
pub fn reconnect_backoff(attempt: u32, base_secs: i64) -> Option<i64> {
    const MAX_ATTEMPTS: u32 = 10;
    const CAP_SECS: i64 = 30;
    if attempt >= MAX_ATTEMPTS {
        return None;
    }
    Some(base_secs.saturating_mul(1i64 << attempt.min(32)).min(CAP_SECS))
}

pub trait VenueAdapter: Send {
    fn venue(&self) -> &VenueId;

    fn connect(&mut self, symbols: &[InstrumentId]) -> Result<(), VenueError>;

    /// Push a target equity. Stale sequences are ignored, not errors.
    fn set_user_balance(&mut self, update: &VenueUpdate) -> Result<Ack, VenueError>;

    fn freeze_new_orders(&mut self, user: UserKey) -> Result<(), VenueError>;

    /// Forward recovered funds for a shortfall claim back to the venue.
    fn forward_shortfall_cover(&mut self, user: UserKey, amount: Money) -> Result<(), VenueError>;
}

/// In-memory venue for tests and the sim. Records everything and enforces the
/// sequence rule the way a real adapter must.
pub struct MockVenue {
    venue: VenueId,
    connected: bool,
    applied: HashMap<UserKey, (Money, u64)>,
    frozen: HashSet<UserKey>,
    forwarded: Vec<(UserKey, Money)>,
    fail_next: Option<VenueError>,
}

impl MockVenue {
    pub fn new(name: &str) -> Self {
        Self {
            venue: VenueId::new(name),
            connected: false,
            applied: HashMap::new(),
            frozen: HashSet::new(),
            forwarded: Vec::new(),
            fail_next: None,
        }
    }

    /// Script the next call to fail once.
    pub fn fail_next(&mut self, err: VenueError) {
        self.fail_next = Some(err);
    }

    pub fn applied_equity(&self, user: &UserKey) -> Option<Money> {
        self.applied.get(user).map(|(equity, _)| *equity)
    }

    pub fn applied_sequence(&self, user: &UserKey) -> u64 {
        self.applied.get(user).map(|(_, seq)| *seq).unwrap_or(0)
    }

    pub fn is_frozen(&self, user: &UserKey) -> bool {
        self.frozen.contains(user)
    }

    pub fn forwarded(&self) -> &[(UserKey, Money)] {
        &self.forwarded
    }

    fn take_scripted_failure(&mut self) -> Result<(), VenueError> {
        match self.fail_next.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl VenueAdapter for MockVenue {
    fn venue(&self) -> &VenueId {
        &self.venue
    }

    fn connect(&mut self, _symbols: &[InstrumentId]) -> Result<(), VenueError> {
        self.take_scripted_failure()?;
        self.connected = true;
        Ok(())
    }

    fn set_user_balance(&mut self, update: &VenueUpdate) -> Result<Ack, VenueError> {
        self.take_scripted_failure()?;
        let entry = self.applied.entry(update.user).or_insert((Money::ZERO, 0));
        if update.sequence > entry.1 {
            *entry = (update.equity, update.sequence);
        }
        Ok(Ack { sequence: entry.1 })
    }

    fn freeze_new_orders(&mut self, user: UserKey) -> Result<(), VenueError> {
        self.take_scripted_failure()?;
        self.frozen.insert(user);
        Ok(())
    }

    fn forward_shortfall_cover(&mut self, user: UserKey, amount: Money) -> Result<(), VenueError> {
        self.take_scripted_failure()?;
        self.forwarded.push((user, amount));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(user: u64, equity: u64, sequence: u64) -> VenueUpdate {
        VenueUpdate {
            user: UserKey::from_low_u64(user),
            venue: VenueId::new("mock"),
            equity: Money::from_units(equity),
            sequence,
        }
    }

    #[test]
    fn stale_sequence_ignored() {
        let mut venue = MockVenue::new("mock");
        venue.set_user_balance(&update(1, 100, 2)).unwrap();
        // older update arrives late; must not clobber
        venue.set_user_balance(&update(1, 50, 1)).unwrap();

        assert_eq!(
            venue.applied_equity(&UserKey::from_low_u64(1)),
            Some(Money::from_units(100))
        );
        assert_eq!(venue.applied_sequence(&UserKey::from_low_u64(1)), 2);
    }

    #[test]
    fn scripted_failure_fires_once() {
        let mut venue = MockVenue::new("mock");
        venue.fail_next(VenueError::Transient("timeout".to_string()));

        assert!(venue.set_user_balance(&update(1, 100, 1)).is_err());
        assert!(venue.set_user_balance(&update(1, 100, 1)).is_ok());
    }

    #[test]
    fn reconnect_backoff_caps_and_exhausts() {
        assert_eq!(reconnect_backoff(0, 1), Some(1));
        assert_eq!(reconnect_backoff(3, 1), Some(8));
        assert_eq!(reconnect_backoff(6, 1), Some(30));
        assert_eq!(reconnect_backoff(9, 1), Some(30));
        assert_eq!(reconnect_backoff(10, 1), None);
    }

    #[test]
    fn freeze_and_forward_recorded() {
        let mut venue = MockVenue::new("mock");
        let user = UserKey::from_low_u64(7);

        venue.freeze_new_orders(user).unwrap();
        assert!(venue.is_frozen(&user));

        venue.forward_shortfall_cover(user, Money::from_units(55)).unwrap();
        assert_eq!(venue.forwarded(), &[(user, Money::from_units(55))]);
    }
}
