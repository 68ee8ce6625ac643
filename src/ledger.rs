// 4.0 ledger.rs: the authoritative ledger. the ONLY component that mutates money.
// every primitive is atomic: all checks run before any mutation, and check order
// is part of the contract. all primitives funnel through &mut Ledger, which gives
// a total order over money-moving operations.
//
//   vault balance == sum(collateral) + sum(pnl) + broker_pool + insurance_fund
//
// holds after every primitive; check_conservation() enforces it and pauses the
// ledger on mismatch.

use crate::config::LedgerParams;
use crate::events::{
    BatchSettledEvent, CircuitBreakerTriggeredEvent, CollateralSeizedEvent, DepositEvent,
    EventCollector, EventPayload, FallbackPriceUsedEvent, PnlCreditedEvent, ShortfallEvent,
    WithdrawalEvent, WithdrawalRejectedEvent,
};
use crate::hours::TradingHoursGuard;
use crate::oracle::{OracleError, PriceOracle};
use crate::types::{
    Bps, InstrumentId, MathError, Money, RefId, SignedMoney, Timestamp, UserKey, VaultId,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("amount must be positive")]
    ZeroAmount,
    #[error("insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: Money, available: Money },
    #[error("insufficient broker pool: requested {requested}, available {available}")]
    InsufficientBrokerPool { requested: Money, available: Money },
    #[error("insufficient insurance fund: requested {requested}, available {available}")]
    InsufficientInsuranceFund { requested: Money, available: Money },
    #[error("per-user daily withdrawal cap exceeded")]
    ExceedsUserDailyCap,
    #[error("global daily withdrawal cap exceeded")]
    ExceedsGlobalDailyCap,
    #[error("withdrawal cooldown active: {remaining}s remaining")]
    WithdrawalCooldownActive { remaining: i64 },
    #[error("duplicate reference id")]
    DuplicateRefId,
    #[error("circuit breaker triggered")]
    CircuitBreakerTriggered,
    #[error("ledger is paused")]
    Paused,
    #[error("market closed for settlement symbol")]
    MarketClosed,
    #[error("oracle rejected settlement symbol: {0}")]
    Oracle(#[from] OracleError),
    #[error("arithmetic failure: {0}")]
    Math(#[from] MathError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerStatus {
    Active,
    Paused,
}

/// Per-user sub-ledgers. Created on first deposit, never removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct UserLedger {
    pub collateral: Money,
    pub pnl: Money,
    pub last_deposit: Timestamp,
}

/// Daily withdrawal bucket; rolled when the day changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
struct CapBucket {
    day: i64,
    withdrawn: Money,
}

impl CapBucket {
    fn rolled(&self, now: Timestamp) -> CapBucket {
        if self.day == now.day() {
            *self
        } else {
            CapBucket {
                day: now.day(),
                withdrawn: Money::ZERO,
            }
        }
    }
}

/// Result of a capped seize. `seized + shortfall == requested` always;
/// `covered_by_insurance + socialized == shortfall`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeizeOutcome {
    pub seized: Money,
    pub shortfall: Money,
    pub covered_by_insurance: Money,
    pub socialized: Money,
}

/// One leaf of a netting batch: a signed adjustment to a user's pnl sub-ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetLeaf {
    pub user: UserKey,
    pub amount: SignedMoney,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    pub leaves_applied: usize,
    pub fee_collected: Money,
    pub netted_volume: Money,
}

pub struct Ledger {
    params: LedgerParams,
    users: HashMap<UserKey, UserLedger>,
    broker_pool: Money,
    insurance_fund: Money,
    socialized_loss: Money,
    ref_ids: HashSet<RefId>,
    user_caps: HashMap<UserKey, CapBucket>,
    global_cap: CapBucket,
    /// Recent settlement volume: (timestamp, amount) pairs inside the horizon.
    breaker_window: Vec<(Timestamp, Money)>,
    status: LedgerStatus,
    /// External stable balance held by the vault; moves only on external flows.
    vault_stable_balance: Money,
    events: EventCollector,
}

impl Ledger {
    pub fn new(params: LedgerParams, max_events: usize) -> Self {
        Self {
            params,
            users: HashMap::new(),
            broker_pool: Money::ZERO,
            insurance_fund: Money::ZERO,
            socialized_loss: Money::ZERO,
            ref_ids: HashSet::new(),
            user_caps: HashMap::new(),
            global_cap: CapBucket::default(),
            breaker_window: Vec::new(),
            status: LedgerStatus::Active,
            vault_stable_balance: Money::ZERO,
            events: EventCollector::new(max_events),
        }
    }

    // ---- views (always available, paused or not) ----

    pub fn status(&self) -> LedgerStatus {
        self.status
    }

    pub fn user(&self, user: &UserKey) -> UserLedger {
        self.users.get(user).copied().unwrap_or_default()
    }

    pub fn collateral(&self, user: &UserKey) -> Money {
        self.user(user).collateral
    }

    pub fn pnl(&self, user: &UserKey) -> Money {
        self.user(user).pnl
    }

    pub fn broker_pool(&self) -> Money {
        self.broker_pool
    }

    pub fn insurance_fund(&self) -> Money {
        self.insurance_fund
    }

    pub fn socialized_loss(&self) -> Money {
        self.socialized_loss
    }

    pub fn vault_stable_balance(&self) -> Money {
        self.vault_stable_balance
    }

    pub fn is_ref_id_used(&self, ref_id: &RefId) -> bool {
        self.ref_ids.contains(ref_id)
    }

    pub fn params(&self) -> &LedgerParams {
        &self.params
    }

    pub fn events(&self) -> &EventCollector {
        &self.events
    }

    pub fn users_iter(&self) -> impl Iterator<Item = (&UserKey, &UserLedger)> {
        self.users.iter()
    }

    /// Sum of everything the ledger accounts for. Must equal the vault's
    /// external stable balance after every primitive.
    pub fn accounted_total(&self) -> Money {
        let user_total: Money = self
            .users
            .values()
            .map(|u| u.collateral.checked_add(u.pnl).unwrap_or(Money::ZERO))
            .sum();
        user_total
            .checked_add(self.broker_pool)
            .and_then(|t| t.checked_add(self.insurance_fund))
            .unwrap_or(Money::ZERO)
    }

    /// Fatal invariant check: accounted total vs held stable balance.
    /// A mismatch pauses the ledger; manual intervention required.
    pub fn check_conservation(&mut self, now: Timestamp) -> Result<(), LedgerError> {
        let accounted = self.accounted_total();
        if accounted != self.vault_stable_balance {
            error!(
                accounted = accounted.units(),
                held = self.vault_stable_balance.units(),
                "conservation violated; pausing ledger"
            );
            self.status = LedgerStatus::Paused;
            self.events.record(now, EventPayload::LedgerPaused);
            return Err(LedgerError::Paused);
        }
        Ok(())
    }

    // ---- admin ----

    pub fn set_params(&mut self, params: LedgerParams) {
        self.params = params;
    }

    pub fn pause(&mut self, now: Timestamp) {
        if self.status != LedgerStatus::Paused {
            self.status = LedgerStatus::Paused;
            self.events.record(now, EventPayload::LedgerPaused);
        }
    }

    pub fn unpause(&mut self, now: Timestamp) {
        if self.status != LedgerStatus::Active {
            self.status = LedgerStatus::Active;
            self.events.record(now, EventPayload::LedgerUnpaused);
        }
    }

    fn ensure_active(&self) -> Result<(), LedgerError> {
        match self.status {
            LedgerStatus::Active => Ok(()),
            LedgerStatus::Paused => Err(LedgerError::Paused),
        }
    }

    // ---- user primitives ----

    pub fn deposit_collateral(
        &mut self,
        user: UserKey,
        amount: Money,
        now: Timestamp,
    ) -> Result<(), LedgerError> {
        self.ensure_active()?;
        if amount.is_zero() {
            return Err(LedgerError::ZeroAmount);
        }

        let entry = self.users.entry(user).or_default();
        entry.collateral = entry.collateral.checked_add(amount)?;
        entry.last_deposit = now;
        let new_collateral = entry.collateral;

        self.vault_stable_balance = self.vault_stable_balance.checked_add(amount)?;
        self.events.record(
            now,
            EventPayload::Deposit(DepositEvent {
                user,
                amount,
                new_collateral,
            }),
        );
        Ok(())
    }

    pub fn withdraw_collateral(
        &mut self,
        user: UserKey,
        amount: Money,
        now: Timestamp,
    ) -> Result<(), LedgerError> {
        self.withdraw_sub_ledger(user, amount, now, false)
    }

    pub fn withdraw_pnl(
        &mut self,
        user: UserKey,
        amount: Money,
        now: Timestamp,
    ) -> Result<(), LedgerError> {
        self.withdraw_sub_ledger(user, amount, now, true)
    }

    // shared withdraw path; check order is contractual:
    // amount > 0, balance, cooldown, per-user cap, global cap, then debit
    fn withdraw_sub_ledger(
        &mut self,
        user: UserKey,
        amount: Money,
        now: Timestamp,
        from_pnl: bool,
    ) -> Result<(), LedgerError> {
        let result = self.try_withdraw(user, amount, now, from_pnl);
        if let Err(ref err) = result {
            self.events.record(
                now,
                EventPayload::WithdrawalRejected(WithdrawalRejectedEvent {
                    user,
                    amount,
                    reason: err.to_string(),
                }),
            );
        }
        result
    }

    fn try_withdraw(
        &mut self,
        user: UserKey,
        amount: Money,
        now: Timestamp,
        from_pnl: bool,
    ) -> Result<(), LedgerError> {
        self.ensure_active()?;
        if amount.is_zero() {
            return Err(LedgerError::ZeroAmount);
        }

        let account = self.user(&user);
        let available = if from_pnl {
            account.pnl
        } else {
            account.collateral
        };
        let new_balance = available.checked_sub(amount).map_err(|_| {
            LedgerError::InsufficientBalance {
                requested: amount,
                available,
            }
        })?;

        if self.params.withdrawal_cooldown_secs > 0 {
            let elapsed = now.since(account.last_deposit);
            if elapsed < self.params.withdrawal_cooldown_secs {
                return Err(LedgerError::WithdrawalCooldownActive {
                    remaining: self.params.withdrawal_cooldown_secs - elapsed,
                });
            }
        }

        // both caps checked before either is consumed
        let user_bucket = self
            .user_caps
            .get(&user)
            .copied()
            .unwrap_or_default()
            .rolled(now);
        let global_bucket = self.global_cap.rolled(now);

        let user_after = user_bucket.withdrawn.checked_add(amount)?;
        if !self.params.user_daily_cap.is_zero() && user_after > self.params.user_daily_cap {
            return Err(LedgerError::ExceedsUserDailyCap);
        }
        let global_after = global_bucket.withdrawn.checked_add(amount)?;
        if !self.params.global_daily_cap.is_zero() && global_after > self.params.global_daily_cap {
            return Err(LedgerError::ExceedsGlobalDailyCap);
        }

        self.user_caps.insert(
            user,
            CapBucket {
                day: user_bucket.day,
                withdrawn: user_after,
            },
        );
        self.global_cap = CapBucket {
            day: global_bucket.day,
            withdrawn: global_after,
        };

        let entry = self.users.get_mut(&user).expect("balance check implies user exists");
        if from_pnl {
            entry.pnl = new_balance;
        } else {
            entry.collateral = new_balance;
        }
        self.vault_stable_balance = self.vault_stable_balance.checked_sub(amount)?;

        self.events.record(
            now,
            EventPayload::Withdrawal(WithdrawalEvent {
                user,
                amount,
                from_pnl,
                new_balance,
            }),
        );
        Ok(())
    }

    // ---- settlement primitives ----

    pub fn credit_pnl(
        &mut self,
        user: UserKey,
        amount: Money,
        ref_id: RefId,
        now: Timestamp,
    ) -> Result<(), LedgerError> {
        self.ensure_active()?;
        if amount.is_zero() {
            return Err(LedgerError::ZeroAmount);
        }
        if self.ref_ids.contains(&ref_id) {
            return Err(LedgerError::DuplicateRefId);
        }
        let new_pool = self.broker_pool.checked_sub(amount).map_err(|_| {
            LedgerError::InsufficientBrokerPool {
                requested: amount,
                available: self.broker_pool,
            }
        })?;
        self.breaker_step(amount, now)?;

        self.ref_ids.insert(ref_id);
        self.broker_pool = new_pool;
        let entry = self.users.entry(user).or_default();
        entry.pnl = entry.pnl.checked_add(amount)?;

        info!(%user, amount = amount.units(), "pnl credited");
        self.events.record(
            now,
            EventPayload::PnlCredited(PnlCreditedEvent {
                user,
                amount,
                ref_id,
                broker_pool_after: new_pool,
            }),
        );
        Ok(())
    }

    pub fn seize_collateral(
        &mut self,
        user: UserKey,
        amount: Money,
        ref_id: RefId,
        now: Timestamp,
    ) -> Result<(), LedgerError> {
        self.ensure_active()?;
        if amount.is_zero() {
            return Err(LedgerError::ZeroAmount);
        }
        if self.ref_ids.contains(&ref_id) {
            return Err(LedgerError::DuplicateRefId);
        }
        let available = self.collateral(&user);
        let new_collateral = available.checked_sub(amount).map_err(|_| {
            LedgerError::InsufficientBalance {
                requested: amount,
                available,
            }
        })?;
        self.breaker_step(amount, now)?;

        self.ref_ids.insert(ref_id);
        let entry = self.users.entry(user).or_default();
        entry.collateral = new_collateral;
        self.broker_pool = self.broker_pool.checked_add(amount)?;

        info!(%user, amount = amount.units(), "collateral seized");
        self.events.record(
            now,
            EventPayload::CollateralSeized(CollateralSeizedEvent {
                user,
                amount,
                ref_id,
                collateral_after: new_collateral,
            }),
        );
        Ok(())
    }

    /// Seize up to `requested` and run the insurance waterfall on whatever the
    /// user's collateral could not cover. Consumes the refId unconditionally.
    pub fn seize_collateral_capped(
        &mut self,
        user: UserKey,
        requested: Money,
        ref_id: RefId,
        now: Timestamp,
    ) -> Result<SeizeOutcome, LedgerError> {
        self.ensure_active()?;
        if requested.is_zero() {
            return Err(LedgerError::ZeroAmount);
        }
        if self.ref_ids.contains(&ref_id) {
            return Err(LedgerError::DuplicateRefId);
        }

        let collateral = self.collateral(&user);
        let seized = collateral.min(requested);
        let shortfall = requested.checked_sub(seized)?;
        let covered = self.insurance_fund.min(shortfall);
        let socialized = shortfall.checked_sub(covered)?;

        let moved = seized.checked_add(covered)?;
        if !moved.is_zero() {
            self.breaker_step(moved, now)?;
        }

        self.ref_ids.insert(ref_id);
        let entry = self.users.entry(user).or_default();
        entry.collateral = entry.collateral.checked_sub(seized)?;
        self.insurance_fund = self.insurance_fund.checked_sub(covered)?;
        self.broker_pool = self.broker_pool.checked_add(moved)?;
        self.socialized_loss = self.socialized_loss.checked_add(socialized)?;

        let collateral_after = entry.collateral;
        self.events.record(
            now,
            EventPayload::CollateralSeized(CollateralSeizedEvent {
                user,
                amount: seized,
                ref_id,
                collateral_after,
            }),
        );
        if !shortfall.is_zero() {
            warn!(
                %user,
                shortfall = shortfall.units(),
                covered = covered.units(),
                socialized = socialized.units(),
                "liquidation shortfall"
            );
            self.events.record(
                now,
                EventPayload::Shortfall(ShortfallEvent {
                    user,
                    shortfall,
                    covered_by_insurance: covered,
                    socialized,
                }),
            );
        }

        Ok(SeizeOutcome {
            seized,
            shortfall,
            covered_by_insurance: covered,
            socialized,
        })
    }

    // guarded variants: trading hours and oracle are consulted before the
    // dedup set or any balance is touched
    #[allow(clippy::too_many_arguments)]
    pub fn credit_pnl_guarded(
        &mut self,
        user: UserKey,
        amount: Money,
        ref_id: RefId,
        symbol: &InstrumentId,
        guard: &TradingHoursGuard,
        oracle: &PriceOracle,
        now: Timestamp,
    ) -> Result<(), LedgerError> {
        self.check_settlement_guards(symbol, guard, oracle, now)?;
        self.credit_pnl(user, amount, ref_id, now)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn seize_collateral_guarded(
        &mut self,
        user: UserKey,
        amount: Money,
        ref_id: RefId,
        symbol: &InstrumentId,
        guard: &TradingHoursGuard,
        oracle: &PriceOracle,
        now: Timestamp,
    ) -> Result<(), LedgerError> {
        self.check_settlement_guards(symbol, guard, oracle, now)?;
        self.seize_collateral(user, amount, ref_id, now)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn seize_collateral_capped_guarded(
        &mut self,
        user: UserKey,
        requested: Money,
        ref_id: RefId,
        symbol: &InstrumentId,
        guard: &TradingHoursGuard,
        oracle: &PriceOracle,
        now: Timestamp,
    ) -> Result<SeizeOutcome, LedgerError> {
        self.check_settlement_guards(symbol, guard, oracle, now)?;
        self.seize_collateral_capped(user, requested, ref_id, now)
    }

    fn check_settlement_guards(
        &mut self,
        symbol: &InstrumentId,
        guard: &TradingHoursGuard,
        oracle: &PriceOracle,
        now: Timestamp,
    ) -> Result<(), LedgerError> {
        self.ensure_active()?;
        guard.check(symbol, now).map_err(|_| LedgerError::MarketClosed)?;
        let validated = oracle.get_validated_price(symbol, now)?;
        if validated.used_fallback {
            self.events.record(
                now,
                EventPayload::FallbackPriceUsed(FallbackPriceUsedEvent {
                    symbol: symbol.clone(),
                    price: validated.price,
                    price_age_secs: now.since(validated.timestamp),
                }),
            );
        }
        Ok(())
    }

    // ---- broker / insurance pools ----

    pub fn broker_deposit(&mut self, amount: Money) -> Result<(), LedgerError> {
        if amount.is_zero() {
            return Err(LedgerError::ZeroAmount);
        }
        self.broker_pool = self.broker_pool.checked_add(amount)?;
        self.vault_stable_balance = self.vault_stable_balance.checked_add(amount)?;
        Ok(())
    }

    pub fn broker_withdraw(&mut self, amount: Money) -> Result<(), LedgerError> {
        if amount.is_zero() {
            return Err(LedgerError::ZeroAmount);
        }
        self.broker_pool = self.broker_pool.checked_sub(amount).map_err(|_| {
            LedgerError::InsufficientBrokerPool {
                requested: amount,
                available: self.broker_pool,
            }
        })?;
        self.vault_stable_balance = self.vault_stable_balance.checked_sub(amount)?;
        Ok(())
    }

    pub fn insurance_deposit(&mut self, amount: Money) -> Result<(), LedgerError> {
        if amount.is_zero() {
            return Err(LedgerError::ZeroAmount);
        }
        self.insurance_fund = self.insurance_fund.checked_add(amount)?;
        self.vault_stable_balance = self.vault_stable_balance.checked_add(amount)?;
        Ok(())
    }

    pub fn insurance_withdraw(&mut self, amount: Money) -> Result<(), LedgerError> {
        if amount.is_zero() {
            return Err(LedgerError::ZeroAmount);
        }
        self.insurance_fund = self.insurance_fund.checked_sub(amount).map_err(|_| {
            LedgerError::InsufficientInsuranceFund {
                requested: amount,
                available: self.insurance_fund,
            }
        })?;
        self.vault_stable_balance = self.vault_stable_balance.checked_sub(amount)?;
        Ok(())
    }

    // ---- netting batch ----

    /// Apply one atomic netting batch: the batch id goes through the same dedup
    /// set as every other settlement, every leaf is validated before anything
    /// moves, credits draw from the broker pool and debits refill it, and the
    /// configured fee on credits accrues to the insurance fund.
    #[allow(clippy::too_many_arguments)]
    pub fn apply_net_batch(
        &mut self,
        vault: VaultId,
        batch_id: RefId,
        root: RefId,
        leaves: &[NetLeaf],
        fee_bps: Bps,
        gross_volume: Money,
        now: Timestamp,
    ) -> Result<BatchOutcome, LedgerError> {
        self.ensure_active()?;
        if leaves.is_empty() {
            return Err(LedgerError::ZeroAmount);
        }
        if self.ref_ids.contains(&batch_id) {
            return Err(LedgerError::DuplicateRefId);
        }

        // validate every leaf before applying any
        let mut total_debits = Money::ZERO;
        let mut total_credits = Money::ZERO;
        let mut netted_volume = Money::ZERO;
        for leaf in leaves {
            let magnitude = leaf.amount.abs_money();
            if magnitude.is_zero() {
                return Err(LedgerError::ZeroAmount);
            }
            netted_volume = netted_volume.checked_add(magnitude)?;
            if leaf.amount.is_negative() {
                let available = self.pnl(&leaf.user);
                if available < magnitude {
                    return Err(LedgerError::InsufficientBalance {
                        requested: magnitude,
                        available,
                    });
                }
                total_debits = total_debits.checked_add(magnitude)?;
            } else {
                total_credits = total_credits.checked_add(magnitude)?;
            }
        }
        let pool_after_debits = self.broker_pool.checked_add(total_debits)?;
        if pool_after_debits < total_credits {
            return Err(LedgerError::InsufficientBrokerPool {
                requested: total_credits,
                available: pool_after_debits,
            });
        }

        self.ref_ids.insert(batch_id);
        let mut fee_collected = Money::ZERO;
        for leaf in leaves {
            let magnitude = leaf.amount.abs_money();
            if leaf.amount.is_negative() {
                let entry = self.users.entry(leaf.user).or_default();
                entry.pnl = entry.pnl.checked_sub(magnitude)?;
                self.broker_pool = self.broker_pool.checked_add(magnitude)?;
            } else {
                let fee = fee_bps.apply(magnitude);
                let credited = magnitude.checked_sub(fee)?;
                self.broker_pool = self.broker_pool.checked_sub(magnitude)?;
                self.insurance_fund = self.insurance_fund.checked_add(fee)?;
                let entry = self.users.entry(leaf.user).or_default();
                entry.pnl = entry.pnl.checked_add(credited)?;
                fee_collected = fee_collected.checked_add(fee)?;
            }
        }

        let savings = gross_volume.saturating_sub(netted_volume);
        info!(
            vault = vault.0,
            leaves = leaves.len(),
            gross = gross_volume.units(),
            netted = netted_volume.units(),
            "netting batch settled"
        );
        self.events.record(
            now,
            EventPayload::BatchSettled(BatchSettledEvent {
                vault,
                root,
                batch_id,
                leaves: leaves.len(),
                gross_volume,
                netted_volume,
                savings,
            }),
        );

        Ok(BatchOutcome {
            leaves_applied: leaves.len(),
            fee_collected,
            netted_volume,
        })
    }

    // ---- circuit breaker ----

    /// Rolling-window volume check. The window only accumulates records for
    /// primitives that go on to succeed; a trip pauses the ledger and fails
    /// the current primitive without recording it.
    fn breaker_step(&mut self, amount: Money, now: Timestamp) -> Result<(), LedgerError> {
        if self.params.circuit_breaker_threshold.is_zero() {
            return Ok(());
        }
        let horizon = now.as_secs() - self.params.circuit_breaker_window_secs;
        self.breaker_window.retain(|(t, _)| t.as_secs() >= horizon);

        let window_sum: Money = self.breaker_window.iter().map(|(_, a)| *a).sum();
        let projected = window_sum.checked_add(amount)?;
        if projected > self.params.circuit_breaker_threshold {
            warn!(
                volume = projected.units(),
                threshold = self.params.circuit_breaker_threshold.units(),
                "circuit breaker tripped"
            );
            self.status = LedgerStatus::Paused;
            self.events.record(
                now,
                EventPayload::CircuitBreakerTriggered(CircuitBreakerTriggeredEvent {
                    window_volume: projected,
                    threshold: self.params.circuit_breaker_threshold,
                }),
            );
            return Err(LedgerError::CircuitBreakerTriggered);
        }
        self.breaker_window.push((now, amount));
        Ok(())
    }
}
