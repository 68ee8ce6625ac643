//! Clearing engine simulation driver.
//!
//! Runs an end-to-end scenario against the deterministic core: deposits,
//! cross-venue positions, a price move, a losing close with a shortfall,
//! and a netting window.

use clearing_core::*;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    println!("=== clearing-core simulation ===\n");

    let mut engine = Engine::new(EngineConfig::default());
    let alice = UserKey::from_low_u64(0xA11CE);
    let btc = InstrumentId::new("BTC-PERP");

    // venues and oracle
    engine
        .register_venue(Box::new(MockVenue::new("kraken")), std::slice::from_ref(&btc))
        .expect("mock venue connects");
    engine
        .register_venue(Box::new(MockVenue::new("bybit")), std::slice::from_ref(&btc))
        .expect("mock venue connects");

    let feed = MockFeed::new("agg-btc");
    feed.set_sample(FeedSample {
        raw_price: 50_000 * 100_000_000,
        expo: 0,
        publish_time: engine.now(),
    });
    engine.configure_symbol(
        btc.clone(),
        FeedKind::Aggregator { decimals: 8 },
        Box::new(feed.clone()),
    );

    // funding
    engine.broker_deposit(Money::from_whole(1_000_000)).expect("broker funding");
    engine.insurance_deposit(Money::from_whole(100_000)).expect("insurance funding");
    engine.deposit(alice, Money::from_whole(50_000)).expect("user deposit");
    println!("alice deposits 50_000; broker pool 1_000_000; insurance 100_000");

    // positions arrive over the bounded adapter bus
    let bus = engine.new_bus();
    for (venue, side) in [("kraken", Side::Long), ("bybit", Side::Short)] {
        bus.publish(VenueEvent::Position(PositionUpdate {
            user: alice,
            venue: VenueId::new(venue),
            instrument: btc.clone(),
            position_id: format!("{venue}-pos-1"),
            side,
            size: Money::from_whole(2),
            entry: Price::from_whole(50_000),
            initial_margin: Money::from_whole(10_000),
            timestamp: engine.now(),
        }));
    }
    engine.pump(&bus).expect("positions accepted");
    println!("alice opens 2 BTC long on kraken, 2 BTC short on bybit");

    engine.clock().advance(1);
    let report = engine.tick().expect("tick");
    print_updates(&engine, &report);

    // price moves 4% up; kraken gains, bybit loses
    feed.set_sample(FeedSample {
        raw_price: 52_000 * 100_000_000,
        expo: 0,
        publish_time: engine.now(),
    });
    bus.publish(VenueEvent::Price(PriceTick {
        symbol: btc.clone(),
        bid: Price::from_whole(52_000),
        ask: Price::from_whole(52_000),
        timestamp: engine.now(),
        venue: VenueId::new("kraken"),
    }));
    engine.pump(&bus).expect("price tick");
    engine.clock().advance(1);
    let report = engine.tick().expect("tick");
    println!("\n--- BTC marks 52_000 (venue stream moves 4%) ---");
    print_updates(&engine, &report);

    // bybit closes the losing short: 2 BTC * -2_000 = -4_000 realized
    bus.publish(VenueEvent::PositionClosed(PositionClose {
        user: alice,
        venue: VenueId::new("bybit"),
        instrument: btc.clone(),
        position_id: "bybit-pos-1".to_string(),
        side: Side::Short,
        size: Money::from_whole(2),
        entry: Price::from_whole(50_000),
        exit: Price::from_whole(52_000),
        closed_at: engine.now(),
    }));
    engine.pump(&bus).expect("close settles");
    println!("\n--- bybit closes the short at 52_000: 4_000 loss seized ---");
    println!("collateral[alice] = {}", engine.ledger().collateral(&alice));
    println!("broker pool       = {}", engine.ledger().broker_pool());

    // cross-venue netting window
    engine.enqueue_obligation(Obligation {
        user: alice,
        vault: VaultId(1),
        amount: SignedMoney::from_units(1_500_000_000),
    });
    engine.enqueue_obligation(Obligation {
        user: alice,
        vault: VaultId(1),
        amount: SignedMoney::from_units(-500_000_000),
    });
    let netting = engine.run_netting_window().expect("netting window");
    println!("\n--- netting window ---");
    println!(
        "gross {} netted {} savings {}",
        netting.gross_volume, netting.netted_volume, netting.savings
    );
    println!("pnl[alice] = {}", engine.ledger().pnl(&alice));

    println!("\n--- conservation ---");
    println!(
        "accounted {} == held {}",
        engine.ledger().accounted_total(),
        engine.ledger().vault_stable_balance()
    );
    println!("socialized loss = {}", engine.ledger().socialized_loss());
}

fn print_updates(engine: &Engine, report: &TickReport) {
    println!(
        "tick: {} users recomputed, {} venue updates",
        report.users_recomputed, report.updates_sent
    );
    for event in engine.events().recent(4) {
        if let EventPayload::VenueUpdateEmitted(update) = &event.payload {
            println!(
                "  -> {} equity {} (seq {})",
                update.venue, update.equity, update.sequence
            );
        }
    }
}
