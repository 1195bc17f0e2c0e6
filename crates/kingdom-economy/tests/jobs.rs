//! Job board lifecycle against a live ledger.

#![allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use futures::future::join_all;
use kingdom_economy::{Accounts, EconomyError, JobBoard, JobConfig};
use kingdom_ledger::conservation::verify_conservation;
use kingdom_ledger::{Ledger, RowKey};
use kingdom_types::{
    Account, ClaimStatus, Coord, EntryKind, ErrorKind, Job, JobId, JobKind, PlayerId, Resource,
    SettlementId,
};
use kingdom_world::SettlementRules;
use rand::SeedableRng;
use rand::rngs::SmallRng;

async fn town(ledger: &Ledger, name: &str, coord: Option<Coord>) -> SettlementId {
    let mut s = SettlementRules::default().blank(SettlementId::new(), name, Utc::now());
    s.coord = coord;
    let id = s.id;
    ledger
        .transact(
            [RowKey::settlement_name(name), RowKey::Settlement(id)],
            |tx| tx.insert_settlement(s.clone()),
        )
        .await
        .unwrap();
    id
}

async fn worker(ledger: &Arc<Ledger>, settlement: SettlementId, name: &str) -> PlayerId {
    let id = PlayerId::new();
    Accounts::new(Arc::clone(ledger))
        .open_account(id, name, settlement, 0)
        .await
        .unwrap();
    id
}

async fn post(ledger: &Ledger, job: Job) -> JobId {
    let id = job.id;
    ledger
        .transact([RowKey::Job(id)], |tx| tx.insert_job(job.clone()))
        .await
        .unwrap();
    id
}

fn delivery(settlement: SettlementId, kind: JobKind, quantity: u64, now: DateTime<Utc>) -> Job {
    Job {
        id: JobId::new(),
        settlement,
        kind,
        resource: kind.resource(),
        quantity,
        destination: None,
        reward: 12,
        posted_at: now,
        expires_at: now + TimeDelta::minutes(30),
    }
}

fn courier(settlement: SettlementId, destination: SettlementId, now: DateTime<Utc>) -> Job {
    Job {
        id: JobId::new(),
        settlement,
        kind: JobKind::Courier,
        resource: None,
        quantity: 0,
        destination: Some(destination),
        reward: 7,
        posted_at: now,
        expires_at: now + TimeDelta::minutes(30),
    }
}

fn board(ledger: &Arc<Ledger>) -> JobBoard {
    JobBoard::new(Arc::clone(ledger), JobConfig::default())
}

#[tokio::test]
async fn generation_respects_batch_and_cap() {
    let ledger = Arc::new(Ledger::new());
    let a = town(&ledger, "Alder", Some(Coord::new(5, 5))).await;
    town(&ledger, "Birch", Some(Coord::new(20, 20))).await;
    let board = board(&ledger);
    let mut rng = SmallRng::seed_from_u64(7);
    let now = Utc::now();

    let first = board.generate(&mut rng, now).await.unwrap();
    assert_eq!(first.len(), 6);
    assert_eq!(board.list_open(a, now).await.len(), 3);

    for _ in 0..5 {
        board.generate(&mut rng, now).await.unwrap();
    }
    assert_eq!(board.list_open(a, now).await.len(), 10);
    assert!(board.generate(&mut rng, now).await.unwrap().is_empty());
}

#[tokio::test]
async fn couriers_may_head_for_unplaced_settlements() {
    let ledger = Arc::new(Ledger::new());
    let mut free = SettlementRules::default().blank(SettlementId::new(), "Freeport", Utc::now());
    free.coord = Some(Coord::new(5, 5));
    free.prices.insert(Resource::Fruit, 0);
    free.prices.insert(Resource::Meat, 0);
    free.prices.insert(Resource::Stone, 0);
    let origin = free.id;
    ledger
        .transact(
            [RowKey::settlement_name("Freeport"), RowKey::Settlement(origin)],
            |tx| tx.insert_settlement(free.clone()),
        )
        .await
        .unwrap();
    let camp = town(&ledger, "Camp", None).await;

    let board = board(&ledger);
    let mut rng = SmallRng::seed_from_u64(5);
    let now = Utc::now();
    board.generate(&mut rng, now).await.unwrap();

    // With no prices the free port can only post couriers, and the camp is
    // the only other settlement.
    let open = board.list_open(origin, now).await;
    assert_eq!(open.len(), 3);
    assert!(open
        .iter()
        .all(|j| j.kind == JobKind::Courier && j.destination == Some(camp)));
}

#[tokio::test]
async fn expired_jobs_are_swept_before_posting() {
    let ledger = Arc::new(Ledger::new());
    let a = town(&ledger, "Cedar", Some(Coord::new(5, 5))).await;
    let board = board(&ledger);
    let then = Utc::now() - TimeDelta::hours(2);
    let mut stale = delivery(a, JobKind::Forage, 5, then);
    stale.expires_at = then + TimeDelta::minutes(1);
    let stale = post(&ledger, stale).await;

    let now = Utc::now();
    let mut rng = SmallRng::seed_from_u64(1);
    board.generate(&mut rng, now).await.unwrap();
    let open = board.list_open(a, now).await;
    assert!(open.iter().all(|j| j.id != stale));
    assert!(ledger.jobs().await.iter().all(|j| j.id != stale));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn only_one_player_wins_a_job() {
    let ledger = Arc::new(Ledger::new());
    let a = town(&ledger, "Dunmore", None).await;
    let now = Utc::now();
    let job = post(&ledger, delivery(a, JobKind::Hunt, 5, now)).await;
    let board = Arc::new(board(&ledger));

    let mut players = Vec::new();
    for i in 0..8 {
        players.push(worker(&ledger, a, &format!("w{i}")).await);
    }
    let tasks = players.into_iter().map(|p| {
        let board = Arc::clone(&board);
        tokio::spawn(async move { board.accept(p, job, now).await })
    });
    let results: Vec<_> = join_all(tasks).await.into_iter().map(Result::unwrap).collect();

    let wins = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(wins, 1);
    let losses: Vec<ErrorKind> = results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .map(EconomyError::kind)
        .collect();
    assert_eq!(losses.len(), 7);
    assert!(losses.iter().all(|k| *k == ErrorKind::AlreadyClaimed));
    assert!(board.list_open(a, now).await.is_empty());
}

#[tokio::test]
async fn delivering_goods_pays_the_reward() {
    let ledger = Arc::new(Ledger::new());
    let a = town(&ledger, "Elmstead", None).await;
    let now = Utc::now();
    let job = post(&ledger, delivery(a, JobKind::Mine, 6, now)).await;
    let p = worker(&ledger, a, "ada").await;
    let board = board(&ledger);

    let accepted = board.accept(p, job, now).await.unwrap();
    assert_eq!(accepted.claim.status, ClaimStatus::Claimed);
    assert_eq!(board.current_claim(p, now).await.unwrap().job.id, job);
    let err = board.accept(p, job, now).await.unwrap_err();
    assert!(matches!(err, EconomyError::ClaimHeld { .. }));

    // Short of goods: nothing changes.
    ledger
        .transact([RowKey::Player(p)], |tx| {
            tx.give_resource(p, Resource::Stone, 5, Account::World, EntryKind::Grant)
        })
        .await
        .unwrap();
    let err = board.deliver(p, now).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientQuantity);
    assert_eq!(ledger.player(p).await.unwrap().gold, 0);

    ledger
        .transact([RowKey::Player(p)], |tx| {
            tx.give_resource(p, Resource::Stone, 1, Account::World, EntryKind::Grant)
        })
        .await
        .unwrap();
    let done = board.deliver(p, now).await.unwrap();
    assert_eq!(done.claim.status, ClaimStatus::Completed);
    let account = ledger.player(p).await.unwrap();
    assert_eq!(account.gold, 12);
    assert_eq!(account.holding(Resource::Stone), 0);
    assert!(board.current_claim(p, now).await.is_none());
    assert!(ledger.jobs().await.is_empty());

    let journal = ledger.journal().await;
    assert!(verify_conservation(&journal).is_balanced());
    assert!(journal
        .iter()
        .any(|e| e.kind == EntryKind::JobReward && e.reference_id == Some(job.into_inner())));
}

#[tokio::test]
async fn couriers_deliver_at_the_destination() {
    let ledger = Arc::new(Ledger::new());
    let from = town(&ledger, "Fenwick", Some(Coord::new(3, 3))).await;
    let to = town(&ledger, "Glenholm", Some(Coord::new(30, 30))).await;
    let now = Utc::now();
    let job = post(&ledger, courier(from, to, now)).await;
    let p = worker(&ledger, from, "bo").await;
    let board = board(&ledger);

    board.accept(p, job, now).await.unwrap();
    let err = board.deliver(p, now).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WrongLocation);

    Accounts::new(Arc::clone(&ledger)).relocate(p, to).await.unwrap();
    board.deliver(p, now).await.unwrap();
    assert_eq!(ledger.player(p).await.unwrap().gold, 7);
}

#[tokio::test]
async fn jobs_are_taken_where_they_are_posted() {
    let ledger = Arc::new(Ledger::new());
    let a = town(&ledger, "Harrow", None).await;
    let b = town(&ledger, "Ivybridge", None).await;
    let now = Utc::now();
    let job = post(&ledger, delivery(a, JobKind::Forage, 5, now)).await;
    let p = worker(&ledger, b, "cy").await;

    let err = board(&ledger).accept(p, job, now).await.unwrap_err();
    assert!(matches!(err, EconomyError::WrongSettlement { expected } if expected == a));
    assert_eq!(err.kind(), ErrorKind::WrongLocation);

    let err = board(&ledger).accept(p, JobId::new(), now).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn abandoning_starts_a_cooldown() {
    let ledger = Arc::new(Ledger::new());
    let a = town(&ledger, "Jesmond", None).await;
    let now = Utc::now();
    let first = post(&ledger, delivery(a, JobKind::Forage, 5, now)).await;
    let second = post(&ledger, delivery(a, JobKind::Forage, 5, now)).await;
    let p = worker(&ledger, a, "dee").await;
    let board = board(&ledger);

    board.accept(p, first, now).await.unwrap();
    let dropped = board.abandon(p, now).await.unwrap();
    assert_eq!(dropped.status, ClaimStatus::Abandoned);
    assert_eq!(board.list_open(a, now).await.len(), 2);

    let err = board
        .accept(p, second, now + TimeDelta::seconds(15))
        .await
        .unwrap_err();
    assert!(matches!(err, EconomyError::Cooldown { remaining_secs: 45 }));
    assert_eq!(err.kind(), ErrorKind::Cooldown);

    board
        .accept(p, second, now + TimeDelta::seconds(60))
        .await
        .unwrap();
    assert!(matches!(
        board.abandon(PlayerId::new(), now).await,
        Err(EconomyError::NoActiveJob)
    ));
}

#[tokio::test]
async fn expired_jobs_cannot_be_worked() {
    let ledger = Arc::new(Ledger::new());
    let a = town(&ledger, "Kelso", None).await;
    let now = Utc::now();
    let job = post(&ledger, delivery(a, JobKind::Hunt, 5, now)).await;
    let p = worker(&ledger, a, "eve").await;
    let board = board(&ledger);
    let late = now + TimeDelta::minutes(31);

    let err = board.accept(p, job, late).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Expired);

    board.accept(p, job, now).await.unwrap();
    let err = board.deliver(p, late).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Expired);

    assert_eq!(board.sweep_expired(late).await.unwrap(), 1);
    assert!(board.current_claim(p, late).await.is_none());
    assert!(matches!(
        board.deliver(p, late).await,
        Err(EconomyError::NoActiveJob)
    ));
}
