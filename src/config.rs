// 12.0 config.rs: all settings in one place. every numeric parameter the ledger,
// oracle, equity engine and netting window consume, with the documented defaults.

use crate::types::{Bps, InstrumentId, Money};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// Ledger-side limits and safety rails
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerParams {
    // Seconds a user must wait after a deposit before withdrawing. 0 = off.
    pub withdrawal_cooldown_secs: i64,
    // Per-user daily withdrawal cap. zero = uncapped.
    pub user_daily_cap: Money,
    // Global daily withdrawal cap across all users. zero = uncapped.
    pub global_daily_cap: Money,
    // Settlement volume that trips the breaker. zero = breaker off.
    pub circuit_breaker_threshold: Money,
    // Rolling horizon for the breaker sum in seconds.
    pub circuit_breaker_window_secs: i64,
}

impl Default for LedgerParams {
    fn default() -> Self {
        Self {
            withdrawal_cooldown_secs: 0,
            user_daily_cap: Money::ZERO,
            global_daily_cap: Money::ZERO,
            circuit_breaker_threshold: Money::ZERO,
            circuit_breaker_window_secs: 3_600,
        }
    }
}

// Oracle validation defaults, applied to symbols configured without overrides
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleParams {
    // Reject fresh prices older than this many seconds.
    pub max_staleness_secs: i64,
    // Reject fresh prices deviating from the reference by more than this.
    pub band_bps: Bps,
    // Accept the last valid price as fallback up to this age.
    pub max_fallback_age_secs: i64,
}

impl Default for OracleParams {
    fn default() -> Self {
        Self {
            max_staleness_secs: 300,
            band_bps: Bps(500), // 5%
            max_fallback_age_secs: 300,
        }
    }
}

/** 12.1: equity computation knobs. haircut is the fraction of positive
cross-venue pnl a venue is credited with. */
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquityParams {
    pub haircut_bps: Bps,
    // Overspend tolerance before venue equities are scaled down.
    pub overspend_alpha_bps: Bps,
    // Price move that triggers a recompute, per instrument; fallback default.
    pub trigger_thresholds_bps: HashMap<InstrumentId, Bps>,
    pub default_trigger_bps: Bps,
    // Collapse triggers for one user within this window.
    pub debounce_ms: i64,
    // Recompute at least this often per user even without triggers.
    pub heartbeat_secs: i64,
}

impl Default for EquityParams {
    fn default() -> Self {
        Self {
            haircut_bps: Bps(5_000), // 50%
            overspend_alpha_bps: Bps(1_000), // 10%
            trigger_thresholds_bps: HashMap::new(),
            default_trigger_bps: Bps(100), // 1%
            debounce_ms: 200,
            heartbeat_secs: 300,
        }
    }
}

impl EquityParams {
    pub fn trigger_bps(&self, symbol: &InstrumentId) -> Bps {
        self.trigger_thresholds_bps
            .get(symbol)
            .copied()
            .unwrap_or(self.default_trigger_bps)
    }
}

// Retry policy for transient settlement failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryParams {
    pub base_delay_secs: i64,
    pub max_delay_secs: i64,
    pub max_retries: u32,
}

impl Default for RetryParams {
    fn default() -> Self {
        Self {
            base_delay_secs: 1,
            max_delay_secs: 30,
            max_retries: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NettingParams {
    // Fee skimmed from each net credit into the insurance fund.
    pub fee_bps: Bps,
    // Run a netting window at most this often.
    pub window_secs: i64,
}

impl Default for NettingParams {
    fn default() -> Self {
        Self {
            fee_bps: Bps(0),
            window_secs: 60,
        }
    }
}

// The complete engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub ledger: LedgerParams,
    pub oracle: OracleParams,
    pub equity: EquityParams,
    pub retry: RetryParams,
    pub netting: NettingParams,
    // Bounded event-bus capacity; producers block when full.
    pub bus_capacity: usize,
    // Audit-event retention. 0 = unbounded.
    pub max_events: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ledger: LedgerParams::default(),
            oracle: OracleParams::default(),
            equity: EquityParams::default(),
            retry: RetryParams::default(),
            netting: NettingParams::default(),
            bus_capacity: 4_096,
            max_events: 100_000,
        }
    }
}

impl EngineConfig {
    // Tighter rails: breaker armed, caps on, slower heartbeat kept
    pub fn conservative() -> Self {
        let mut config = Self::default();
        config.ledger.circuit_breaker_threshold = Money::from_whole(1_000_000);
        config.ledger.user_daily_cap = Money::from_whole(100_000);
        config.ledger.global_daily_cap = Money::from_whole(5_000_000);
        config.ledger.withdrawal_cooldown_secs = 86_400;
        config.oracle.band_bps = Bps(200); // 2%
        config.equity.haircut_bps = Bps(2_500); // 25%
        config
    }

    // Fast settlement loop for latency-sensitive deployments
    pub fn fast_settlement() -> Self {
        let mut config = Self::default();
        config.oracle.max_staleness_secs = 15;
        config.oracle.max_fallback_age_secs = 30;
        config.equity.debounce_ms = 50;
        config.equity.heartbeat_secs = 30;
        config.netting.window_secs = 10;
        config
    }

    // Validate the configuration for internal consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.equity.haircut_bps.value() > 10_000 {
            return Err(ConfigError::InvalidEquity {
                reason: "haircut above 100%".to_string(),
            });
        }
        if self.equity.debounce_ms < 0 || self.equity.heartbeat_secs <= 0 {
            return Err(ConfigError::InvalidEquity {
                reason: "debounce/heartbeat must be non-negative".to_string(),
            });
        }
        if self.oracle.max_staleness_secs <= 0 || self.oracle.max_fallback_age_secs < 0 {
            return Err(ConfigError::InvalidOracle {
                reason: "staleness bounds must be positive".to_string(),
            });
        }
        if self.ledger.circuit_breaker_window_secs <= 0 {
            return Err(ConfigError::InvalidLedger {
                reason: "breaker window must be positive".to_string(),
            });
        }
        if self.retry.base_delay_secs <= 0 || self.retry.max_delay_secs < self.retry.base_delay_secs
        {
            return Err(ConfigError::InvalidRetry {
                reason: "retry delays must satisfy 0 < base <= max".to_string(),
            });
        }
        if self.netting.fee_bps.value() > 10_000 {
            return Err(ConfigError::InvalidNetting {
                reason: "netting fee above 100%".to_string(),
            });
        }
        if self.bus_capacity == 0 {
            return Err(ConfigError::InvalidBus {
                reason: "bus capacity must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid ledger params: {reason}")]
    InvalidLedger { reason: String },
    #[error("invalid oracle params: {reason}")]
    InvalidOracle { reason: String },
    #[error("invalid equity params: {reason}")]
    InvalidEquity { reason: String },
    #[error("invalid retry params: {reason}")]
    InvalidRetry { reason: String },
    #[error("invalid netting params: {reason}")]
    InvalidNetting { reason: String },
    #[error("invalid bus params: {reason}")]
    InvalidBus { reason: String },
}
