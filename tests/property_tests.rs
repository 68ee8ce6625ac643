//! Law-level property tests: daily-cap reset, circuit-breaker windows, equity
//! formula monotonicity, and merkle commitment round trips.

use clearing_core::*;
use proptest::prelude::*;

fn user(n: u64) -> UserKey {
    UserKey::from_low_u64(n)
}

fn rid(i: u16) -> RefId {
    let mut bytes = [0u8; 32];
    bytes[..2].copy_from_slice(&i.to_be_bytes());
    RefId(bytes)
}

fn position(venue: &str, unrealized: i64, stale: bool) -> Position {
    Position {
        user: user(1),
        venue: VenueId::new(venue),
        instrument: InstrumentId::new("BTC-PERP"),
        position_id: format!("{venue}-1"),
        side: Side::Long,
        size: Money::from_whole(1),
        entry: Price::from_whole(50_000),
        mark: Price::from_whole(50_000),
        unrealized: SignedMoney::from_units(unrealized),
        initial_margin: Money::from_whole(1_000),
        stale,
        updated_at: Timestamp::from_secs(0),
    }
}

proptest! {
    /// Daily-cap reset: crossing a day boundary restores the full cap.
    #[test]
    fn daily_cap_resets_on_day_boundary(
        cap in 10u64..1_000,
        t1 in 0i64..86_400,
        extra_days in 1i64..20,
    ) {
        let mut params = LedgerParams::default();
        params.user_daily_cap = Money::from_units(cap);
        let mut ledger = Ledger::new(params, 0);
        ledger
            .deposit_collateral(user(1), Money::from_units(cap * 40), Timestamp::from_secs(0))
            .unwrap();

        // consume the whole cap on day 0
        ledger
            .withdraw_collateral(user(1), Money::from_units(cap), Timestamp::from_secs(t1))
            .unwrap();
        prop_assert_eq!(
            ledger.withdraw_collateral(user(1), Money::from_units(1), Timestamp::from_secs(t1)),
            Err(LedgerError::ExceedsUserDailyCap)
        );

        // any later day has the full cap available again
        let t2 = t1 + extra_days * 86_400;
        ledger
            .withdraw_collateral(user(1), Money::from_units(cap), Timestamp::from_secs(t2))
            .unwrap();
    }

    /// Circuit-breaker window: a settlement at time t contributes to the sum
    /// until now - t > window, and nothing after.
    #[test]
    fn breaker_record_expires_exactly_at_window(
        window in 10i64..5_000,
        first_amount in 1u64..500,
    ) {
        let threshold = Money::from_units(500);
        let mut params = LedgerParams::default();
        params.circuit_breaker_threshold = threshold;
        params.circuit_breaker_window_secs = window;
        let mut ledger = Ledger::new(params, 0);
        ledger.broker_deposit(Money::from_units(1_000_000)).unwrap();

        ledger
            .credit_pnl(user(1), Money::from_units(first_amount), rid(1), Timestamp::from_secs(0))
            .unwrap();

        // while the first record is still inside the horizon, a credit that
        // would push the sum past the threshold fails
        let overflow_amount = Money::from_units(500 - first_amount + 1);
        let inside = Timestamp::from_secs(window);
        prop_assert_eq!(
            ledger.credit_pnl(user(1), overflow_amount, rid(2), inside),
            Err(LedgerError::CircuitBreakerTriggered)
        );
        ledger.unpause(Timestamp::from_secs(window));

        // one second past the horizon the record contributes nothing
        let outside = Timestamp::from_secs(window + 1);
        ledger
            .credit_pnl(user(1), Money::from_units(500), rid(3), outside)
            .unwrap();
    }

    /// venueEquity is monotone non-decreasing in own pnl and in negative cross
    /// pnl, and increases at exactly the haircut rate in positive cross pnl.
    #[test]
    fn equity_formula_monotonicity(
        own in -100_000i64..100_000,
        cross in -100_000i64..100_000,
        bump in 1i64..10_000,
        haircut_bps in 0u32..=10_000,
    ) {
        let collateral = Money::from_whole(1_000);
        let haircut = Bps(haircut_bps);

        let eq = |own: i64, cross: i64| -> i128 {
            let positions = vec![position("own", own, false), position("other", cross, false)];
            venue_equities(collateral, &positions, haircut).unwrap()[&VenueId::new("own")]
        };

        // own pnl: slope 1
        prop_assert_eq!(eq(own + bump, cross) - eq(own, cross), bump as i128);

        if cross >= 0 {
            // positive cross pnl: slope is the haircut fraction
            let delta = eq(own, cross + bump) - eq(own, cross);
            let expected = (cross + bump) as i128 * haircut_bps as i128 / 10_000
                - cross as i128 * haircut_bps as i128 / 10_000;
            prop_assert_eq!(delta, expected);
        } else {
            // negative cross pnl: non-decreasing as the loss shrinks
            prop_assert!(eq(own, cross + bump) >= eq(own, cross));
        }
    }

    /// Merkle commitments: identical leaf sets agree, every proof verifies,
    /// and a forged leaf never does.
    #[test]
    fn merkle_proofs_round_trip(amounts in proptest::collection::vec(1u64..1_000_000, 1..32)) {
        let leaves: Vec<[u8; 32]> = amounts
            .iter()
            .enumerate()
            .map(|(i, amount)| leaf_hash(&user(i as u64 + 1), Money::from_units(*amount)))
            .collect();

        let tree = MerkleTree::build(leaves.clone()).unwrap();
        let again = MerkleTree::build(leaves.clone()).unwrap();
        prop_assert_eq!(tree.root(), again.root());

        for (i, leaf) in leaves.iter().enumerate() {
            let proof = tree.proof(i).unwrap();
            prop_assert!(verify_proof(&tree.root(), leaf, &proof));
        }

        let forged = leaf_hash(&user(10_000), Money::from_units(1));
        if !leaves.contains(&forged) {
            let proof = tree.proof(0).unwrap();
            prop_assert!(!verify_proof(&tree.root(), &forged, &proof));
        }
    }

    /// Netting a window moves each user by exactly their multilateral net and
    /// reports savings = gross - netted.
    #[test]
    fn netting_moves_exactly_the_net(
        raw in proptest::collection::vec((1u64..4, -500i64..500), 1..20),
    ) {
        let mut ledger = Ledger::new(LedgerParams::default(), 0);
        ledger.broker_deposit(Money::from_units(10_000_000)).unwrap();

        // pre-fund every user's pnl so net debits are always covered
        for u in 1..4u64 {
            ledger
                .deposit_collateral(user(u), Money::from_units(1), Timestamp::from_secs(0))
                .unwrap();
            ledger
                .credit_pnl(user(u), Money::from_units(20_000), rid(u as u16), Timestamp::from_secs(0))
                .unwrap();
        }

        let mut engine = NettingEngine::new();
        let mut expected_net = std::collections::HashMap::new();
        let mut gross = 0u64;
        for (who, amount) in &raw {
            if *amount == 0 {
                continue;
            }
            engine.enqueue(Obligation {
                user: user(*who),
                vault: VaultId(1),
                amount: SignedMoney::from_units(*amount),
            });
            *expected_net.entry(*who).or_insert(0i64) += amount;
            gross += amount.unsigned_abs();
        }
        prop_assume!(engine.pending_count() > 0);

        let before: Vec<(u64, Money)> = (1..4).map(|u| (u, ledger.pnl(&user(u)))).collect();
        let report = engine
            .run_window(&mut ledger, Bps(0), Timestamp::from_secs(10))
            .unwrap();
        prop_assert!(report.failed.is_empty());

        prop_assert_eq!(report.gross_volume, Money::from_units(gross));
        let netted: u64 = expected_net.values().map(|n| n.unsigned_abs()).sum();
        prop_assert_eq!(report.netted_volume, Money::from_units(netted));
        prop_assert_eq!(report.savings, Money::from_units(gross - netted));

        for (u, pnl_before) in before {
            let net = expected_net.get(&u).copied().unwrap_or(0);
            let expected = pnl_before.units() as i64 + net;
            prop_assert_eq!(ledger.pnl(&user(u)).units() as i64, expected, "user {}", u);
        }
        prop_assert_eq!(ledger.accounted_total(), ledger.vault_stable_balance());
    }
}

#[cfg(test)]
mod deterministic_laws {
    use super::*;

    #[test]
    fn oracle_fallback_boundary_behaviors() {
        let feed = MockFeed::new("agg");
        feed.set_sample(FeedSample {
            raw_price: 42 * 100_000_000,
            expo: 0,
            publish_time: Timestamp::from_secs(1_000),
        });
        let mut oracle = PriceOracle::new();
        oracle.configure(
            InstrumentId::new("X"),
            FeedKind::Aggregator { decimals: 8 },
            Box::new(feed.clone()),
            SymbolParams {
                max_staleness_secs: 300,
                band_bps: Bps(500),
                max_fallback_age_secs: 300,
            },
        );
        oracle
            .refresh_reference(&InstrumentId::new("X"), Timestamp::from_secs(1_000))
            .unwrap();
        feed.set_unavailable();

        // at exactly max_fallback_age: fallback accepted
        let v = oracle
            .get_validated_price(&InstrumentId::new("X"), Timestamp::from_secs(1_300))
            .unwrap();
        assert!(v.used_fallback);

        // one past: hard failure
        assert!(oracle
            .get_validated_price(&InstrumentId::new("X"), Timestamp::from_secs(1_301))
            .is_err());
    }

    #[test]
    fn batch_ref_id_binds_root_and_nonce() {
        // keccak(root || nonce) differs whenever either input differs
        let root_a = RefId([1; 32]);
        let root_b = RefId([2; 32]);

        let id = |root: &RefId, nonce: u64| {
            merkle::keccak256(&[&root.0, &nonce.to_be_bytes()])
        };

        assert_eq!(id(&root_a, 0), id(&root_a, 0));
        assert_ne!(id(&root_a, 0), id(&root_a, 1));
        assert_ne!(id(&root_a, 0), id(&root_b, 0));
    }
}
