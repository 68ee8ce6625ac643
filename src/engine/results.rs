// 13.2 engine/results.rs: error aggregation across components, plus the
// per-tick report the driver loop consumes.

use crate::config::ConfigError;
use crate::ledger::LedgerError;
use crate::netting::{NettingError, NettingReport};
use crate::oracle::OracleError;
use crate::types::{MathError, VenueId};
use crate::venue::VenueError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Oracle(#[from] OracleError),
    #[error(transparent)]
    Venue(#[from] VenueError),
    #[error(transparent)]
    Netting(#[from] NettingError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("arithmetic failure: {0}")]
    Math(#[from] MathError),
    #[error("no adapter registered for venue {0}")]
    UnknownVenue(VenueId),
}

/// What one `tick()` did.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub retries_settled: usize,
    pub users_recomputed: usize,
    pub updates_sent: usize,
    pub freezes_sent: usize,
    pub netting: Option<NettingReport>,
}
