//! End-to-end runs of the simulation facade with a manual clock.

#![allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]

use std::sync::Arc;

use chrono::{DateTime, TimeDelta};
use kingdom_core::{ChannelSink, KingdomConfig, ManualClock, Scheduler, Simulation};
use kingdom_economy::PresenceProvider;
use kingdom_ledger::RowKey;
use kingdom_types::{Account, EntryKind, ErrorKind, Item, Notice, PlayerId, Resource};
use tokio::sync::broadcast::Receiver;

struct Harness {
    sim: Arc<Simulation>,
    clock: Arc<ManualClock>,
    notices: Receiver<Notice>,
}

async fn harness() -> Harness {
    // Start on a day boundary so day arithmetic in tests is exact.
    let day_ms = 10 * 60 * 1000;
    let start = DateTime::from_timestamp_millis(day_ms * 2_000_000).unwrap();
    let clock = Arc::new(ManualClock::new(start));
    let sink = ChannelSink::new(256);
    let notices = sink.subscribe();
    let sim = Simulation::builder(KingdomConfig::default())
        .clock(Arc::clone(&clock) as Arc<dyn kingdom_core::Clock>)
        .sink(Arc::new(sink))
        .rng_seed(11)
        .build();
    sim.generate_world(Some("harness".to_owned()), Some(96), false)
        .await
        .unwrap();
    Harness {
        sim: Arc::new(sim),
        clock,
        notices,
    }
}

async fn grant(sim: &Simulation, player: PlayerId, resource: Resource, qty: u64) {
    sim.ledger()
        .transact([RowKey::Player(player)], |tx| {
            tx.give_resource(player, resource, qty, Account::World, EntryKind::Grant)
        })
        .await
        .unwrap();
}

fn drain(rx: &mut Receiver<Notice>) -> Vec<Notice> {
    let mut out = Vec::new();
    while let Ok(n) = rx.try_recv() {
        out.push(n);
    }
    out
}

#[tokio::test]
async fn generation_is_idempotent_without_force() {
    let h = harness().await;
    let first = h.sim.world_meta().await.unwrap();
    let again = h
        .sim
        .generate_world(Some("other".to_owned()), None, false)
        .await
        .unwrap();
    assert_eq!(first, again);
    let grid = h.sim.grid_cells().await.unwrap();
    assert_eq!(grid.cells.len(), 96 * 96);
    assert_eq!(grid.settlements.len(), 1);
    assert!(grid.settlements[0].is_capital);
}

#[tokio::test]
async fn players_join_in_the_capital_and_found_towns() {
    let mut h = harness().await;
    let ada = PlayerId::new();
    let account = h.sim.connect(ada, "ada").await.unwrap();
    let capital = h.sim.find_settlement("capital").await.unwrap();
    assert_eq!(account.settlement, capital.id);
    assert_eq!(h.sim.presence().online_in(capital.id), 1);

    let town = h.sim.found_settlement(Some(ada), "Riverbend", None).await.unwrap();
    assert_eq!(town.owner, Some(ada));
    assert_eq!(h.sim.account(ada).await.unwrap().settlement, town.id);
    assert_eq!(h.sim.presence().online_in(town.id), 1);
    assert_eq!(h.sim.presence().online_in(capital.id), 0);

    let notices = drain(&mut h.notices);
    assert!(notices
        .iter()
        .any(|n| n.settlement.is_none() && n.message.contains("Riverbend was founded by ada")));

    let settled = h.sim.settle(ada).await.unwrap();
    assert_eq!(settled.residents, 1);

    let removed = h.sim.reset_settlements().await.unwrap();
    assert_eq!(removed, vec![town.id]);
    assert_eq!(h.sim.account(ada).await.unwrap().settlement, capital.id);
    assert_eq!(h.sim.presence().online_in(capital.id), 1);
}

#[tokio::test]
async fn trading_and_jobs_through_the_facade() {
    let mut h = harness().await;
    let ada = PlayerId::new();
    let bo = PlayerId::new();
    h.sim.connect(ada, "ada").await.unwrap();
    h.sim.connect(bo, "bo").await.unwrap();
    let capital = h.sim.find_settlement("capital").await.unwrap();

    grant(&h.sim, ada, Resource::Meat, 4).await;
    let sale = h.sim.sell(ada, Resource::Meat, 4).await.unwrap();
    assert_eq!(sale.market_gross, 12);
    assert_eq!(sale.market_net, 10);
    let receipt = h
        .sim
        .buy(bo, Item::Resource(Resource::Meat), Some(1))
        .await;
    assert_eq!(receipt.unwrap_err().kind(), ErrorKind::InsufficientFunds);
    h.sim.pay(ada, bo, 3).await.unwrap();
    let receipt = h
        .sim
        .buy(bo, Item::Resource(Resource::Meat), Some(1))
        .await
        .unwrap();
    assert_eq!(receipt.cost, 3);
    assert_eq!(receipt.new_stock, Some(3));

    // A lone capital has nowhere to send couriers, so a sweep may post
    // fewer than a full batch.
    let mut posted = 0;
    for _ in 0..10 {
        if h.sim.list_open_jobs(capital.id).await.len() >= 3 {
            break;
        }
        posted += h.sim.run_job_cycle().await.unwrap().len();
    }
    let open = h.sim.list_open_jobs(capital.id).await;
    assert!(open.len() >= 3);
    assert_eq!(open.len(), posted);
    let notices = drain(&mut h.notices);
    assert_eq!(
        notices
            .iter()
            .filter(|n| n.message.starts_with("New job posted"))
            .count(),
        posted
    );

    let job = open[0].clone();
    let resource = job.resource.unwrap();
    h.sim.accept_job(ada, job.id).await.unwrap();
    assert!(h.sim.current_claim(ada).await.is_some());
    grant(&h.sim, ada, resource, job.quantity).await;
    let gold_before = h.sim.account(ada).await.unwrap().gold;
    h.sim.deliver_job(ada).await.unwrap();
    assert_eq!(h.sim.account(ada).await.unwrap().gold, gold_before + job.reward);

    h.sim.accept_job(bo, open[1].id).await.unwrap();
    h.sim.abandon_job(bo).await.unwrap();
    let err = h.sim.accept_job(bo, open[2].id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cooldown);
    h.clock.advance(TimeDelta::seconds(61)).unwrap();
    h.sim.accept_job(bo, open[2].id).await.unwrap();

    h.sim.audit().await.unwrap();
}

#[tokio::test]
async fn upkeep_rolls_the_day() {
    let h = harness().await;
    let ada = PlayerId::new();
    h.sim.connect(ada, "ada").await.unwrap();
    let capital = h.sim.find_settlement("capital").await.unwrap();

    // Capital stake with one player online: 50 + 5 + 50.
    grant(&h.sim, ada, Resource::Wood, 105).await;
    let receipt = h
        .sim
        .claim_market_maker(ada, capital.id, Resource::Wood)
        .await
        .unwrap();
    assert_eq!(receipt.staked, 105);
    assert_eq!(h.sim.market_maker_status(capital.id).await.stakes.len(), 1);

    let first = h.sim.run_upkeep().await.unwrap();
    assert_eq!(first.ended, None);
    assert_eq!(first.stakes_lapsed, 0);

    h.clock.advance(TimeDelta::minutes(10)).unwrap();
    let rolled = h.sim.run_upkeep().await.unwrap();
    assert!(rolled.ended.is_some());
    assert_eq!(rolled.stakes_lapsed, 1);
    assert!(h.sim.market_maker_status(capital.id).await.stakes.is_empty());

    let quiet = h.sim.run_upkeep().await.unwrap();
    assert_eq!(quiet.ended, None);
}

#[tokio::test]
async fn scheduler_posts_jobs_on_boot() {
    let h = harness().await;
    // With a second town every draw finds a job, couriers included.
    h.sim.found_settlement(None, "Millbrook", None).await.unwrap();
    let scheduler = Scheduler::start(&h.sim);
    assert_eq!(scheduler.len(), 2);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    scheduler.shutdown().await.unwrap();
    assert_eq!(h.sim.ledger().jobs().await.len(), 6);
}

#[tokio::test]
async fn unknown_players_are_rejected() {
    let h = harness().await;
    let ghost = PlayerId::new();
    assert_eq!(h.sim.account(ghost).await.unwrap_err().kind(), ErrorKind::NotFound);
    let err = h.sim.sell(ghost, Resource::Wood, 1).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}
