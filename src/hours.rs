// 3.0 hours.rs: trading-hours guard. guarded settlement primitives consult this
// before touching the dedup set, so an off-hours claim fails clean. instruments
// without a schedule trade around the clock.

use crate::types::{InstrumentId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("market closed for symbol")]
pub struct MarketClosed;

/// A trading window in seconds-of-week, Monday 00:00 == 0.
/// Windows may not wrap the week boundary; split them instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingWindow {
    pub open: i64,
    pub close: i64,
}

impl TradingWindow {
    pub fn contains(&self, secs_of_week: i64) -> bool {
        secs_of_week >= self.open && secs_of_week < self.close
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradingHoursGuard {
    schedules: HashMap<InstrumentId, Vec<TradingWindow>>,
}

impl TradingHoursGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_schedule(&mut self, symbol: InstrumentId, windows: Vec<TradingWindow>) {
        self.schedules.insert(symbol, windows);
    }

    pub fn clear_schedule(&mut self, symbol: &InstrumentId) {
        self.schedules.remove(symbol);
    }

    pub fn check(&self, symbol: &InstrumentId, now: Timestamp) -> Result<(), MarketClosed> {
        match self.schedules.get(symbol) {
            None => Ok(()),
            Some(windows) => {
                let sow = now.secs_of_week();
                if windows.iter().any(|w| w.contains(sow)) {
                    Ok(())
                } else {
                    Err(MarketClosed)
                }
            }
        }
    }
}
