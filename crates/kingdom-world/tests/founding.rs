//! Founding, residency, and reset against a generated world.

#![allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]

use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use futures::future::join_all;
use kingdom_ledger::{Ledger, Row, RowKey};
use kingdom_types::{
    Account, BuildingBuffs, ClaimId, ClaimStatus, EntryKind, ErrorKind, Job, JobClaim, JobId,
    JobKind, PlayerAccount, PlayerId, Resource, SettlementId,
};
use kingdom_world::{
    SettlementRegistry, SettlementRules, World, WorldError, WorldGenConfig, generate_world,
};

async fn world() -> SettlementRegistry {
    let registry = SettlementRegistry::new(
        Arc::new(Ledger::new()),
        Arc::new(World::new()),
        SettlementRules::default(),
    );
    let config = WorldGenConfig {
        seed: "kingdom".to_owned(),
        size: 96,
        capital_candidates: 400,
    };
    generate_world(&registry, &config, false, Utc::now())
        .await
        .unwrap();
    registry
}

async fn player_in(registry: &SettlementRegistry, name: &str) -> PlayerId {
    let capital = registry.capital().await.unwrap();
    let account = PlayerAccount::new(PlayerId::new(), name.to_owned(), capital.id);
    let id = account.id;
    registry
        .ledger()
        .transact([RowKey::Player(id)], |tx| tx.insert_player(account.clone()))
        .await
        .unwrap();
    id
}

#[tokio::test]
async fn founding_validates_names() {
    let registry = world().await;
    let short = registry.found(None, " ab ", None).await.unwrap_err();
    assert_eq!(short.kind(), ErrorKind::InvalidInput);

    let reserved = registry.found(None, "CAPITAL", None).await.unwrap_err();
    assert_eq!(reserved.kind(), ErrorKind::Reserved);

    registry.found(None, "Oakridge", None).await.unwrap();
    let dup = registry.found(None, "oakRIDGE", None).await.unwrap_err();
    assert_eq!(dup.kind(), ErrorKind::AlreadyExists);
}

#[tokio::test]
async fn explicit_coordinates_are_checked() {
    let registry = world().await;
    let err = registry
        .found(None, "Faraway", Some(kingdom_types::Coord::new(500, 500)))
        .await
        .unwrap_err();
    assert!(matches!(err, WorldError::OutOfBounds { .. }));

    let capital = registry.capital().await.unwrap().coord.unwrap();
    let beside = kingdom_types::Coord::new(capital.x.saturating_add(1), capital.y);
    let err = registry.found(None, "Neighbour", Some(beside)).await.unwrap_err();
    assert!(matches!(
        err.kind(),
        ErrorKind::TooClose | ErrorKind::OutOfBounds
    ));
}

#[tokio::test]
async fn founder_owns_and_moves_into_the_town() {
    let registry = world().await;
    let founder = player_in(&registry, "ada").await;
    let town = registry.found(Some(founder), "Riverbend", None).await.unwrap();
    assert_eq!(town.owner, Some(founder));
    assert_eq!(town.tax_rate, 10);
    assert_eq!(town.treasury, 0);
    assert!(town.living_quality >= 0);
    assert_eq!(
        town.pop_cap,
        registry.rules().pop_cap(false, town.living_quality)
    );
    let account = registry.ledger().player(founder).await.unwrap();
    assert_eq!(account.settlement, town.id);

    let settled = registry.settle(founder).await.unwrap();
    assert_eq!(settled.pop_cap, town.pop_cap);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_founding_keeps_separation() {
    let registry = Arc::new(world().await);
    let tasks = (0..12).map(|i| {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move { registry.found(None, &format!("Town {i}"), None).await })
    });
    let founded: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(Result::unwrap)
        .filter_map(Result::ok)
        .collect();
    assert!(!founded.is_empty());

    let markers = registry.markers().await;
    for (i, a) in markers.iter().enumerate() {
        for b in markers.iter().skip(i + 1) {
            assert!(
                a.coord.chebyshev(b.coord) >= 3,
                "{} and {} too close",
                a.name,
                b.name
            );
        }
    }
}

#[tokio::test]
async fn settle_respects_capacity_and_moves_homes() {
    let mut rules = SettlementRules::default();
    rules.base_pop_cap = 1;
    let registry = SettlementRegistry::new(
        Arc::new(Ledger::new()),
        Arc::new(World::new()),
        rules,
    );
    let config = WorldGenConfig {
        seed: "kingdom".to_owned(),
        size: 96,
        capital_candidates: 400,
    };
    generate_world(&registry, &config, false, Utc::now())
        .await
        .unwrap();

    let ada = player_in(&registry, "ada").await;
    let bo = player_in(&registry, "bo").await;
    let town = registry.found(Some(ada), "Hollow", None).await.unwrap();
    registry
        .ledger()
        .transact([RowKey::Player(bo)], |tx| {
            tx.player_mut(bo)?.settlement = town.id;
            Ok::<_, kingdom_ledger::LedgerError>(())
        })
        .await
        .unwrap();

    let settled = registry.settle(ada).await.unwrap();
    assert_eq!(settled.residents, 1);
    // Settling again in place is a no-op.
    assert_eq!(registry.settle(ada).await.unwrap().residents, 1);

    let cap = settled.pop_cap;
    if cap == 1 {
        let err = registry.settle(bo).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CapacityExceeded);
    }
}

#[tokio::test]
async fn unplaced_settlements_take_no_residents() {
    let registry = world().await;
    let player = player_in(&registry, "cy").await;
    let camp = registry.ensure("Camp").await.unwrap();
    assert_eq!(camp.tax_rate, 12);
    registry
        .ledger()
        .transact([RowKey::Player(player)], |tx| {
            tx.player_mut(player)?.settlement = camp.id;
            Ok::<_, kingdom_ledger::LedgerError>(())
        })
        .await
        .unwrap();
    let err = registry.settle(player).await.unwrap_err();
    assert!(matches!(err, WorldError::Unplaced { .. }));
}

#[tokio::test]
async fn buildings_raise_living_quality() {
    let registry = world().await;
    let town = registry.found(None, "Builder", None).await.unwrap();
    let buffs = BuildingBuffs::default();
    let mut latest = town.clone();
    for _ in 0..3 {
        latest = registry.record_building(town.id, &buffs).await.unwrap();
    }
    assert_eq!(latest.building_count, 3);
    assert_eq!(
        latest.living_quality,
        (town.base_living_quality + 1).min(100)
    );
}

#[tokio::test]
async fn reset_keeps_only_the_capital() {
    let registry = world().await;
    let player = player_in(&registry, "dee").await;
    let town = registry.found(Some(player), "Doomed", None).await.unwrap();
    registry
        .ledger()
        .transact([RowKey::Stock(town.id, Resource::Wood)], |tx| {
            tx.add_stock(town.id, Resource::Wood, 9, Account::World, EntryKind::MarketSale)
        })
        .await
        .unwrap();

    let removed = registry.reset().await.unwrap();
    assert_eq!(removed, vec![town.id]);
    assert!(registry.find("Doomed").await.is_none());
    assert_eq!(registry.list().await.len(), 1);
    assert_eq!(registry.ledger().stock(town.id, Resource::Wood).await, 0);

    let capital = registry.capital().await.unwrap();
    let account = registry.ledger().player(player).await.unwrap();
    assert_eq!(account.settlement, capital.id);

    // The name is free again.
    registry.found(None, "Doomed", None).await.unwrap();
}

fn job(settlement: SettlementId, destination: Option<SettlementId>) -> Job {
    let now = Utc::now();
    Job {
        id: JobId::new(),
        settlement,
        kind: if destination.is_some() {
            JobKind::Courier
        } else {
            JobKind::Hunt
        },
        resource: destination.is_none().then_some(Resource::Meat),
        quantity: u64::from(destination.is_none()) * 4,
        destination,
        reward: 5,
        posted_at: now,
        expires_at: now + TimeDelta::minutes(20),
    }
}

#[tokio::test]
async fn reset_withdraws_jobs_tied_to_removed_towns() {
    let registry = world().await;
    let capital = registry.capital().await.unwrap();
    let worker = player_in(&registry, "eve").await;
    let town = registry.found(Some(worker), "Stranded", None).await.unwrap();

    let local = job(town.id, None);
    let courier = job(capital.id, Some(town.id));
    let kept = job(capital.id, None);
    let claim = JobClaim {
        id: ClaimId::new(),
        job: local.id,
        player: worker,
        status: ClaimStatus::Claimed,
        claimed_at: Utc::now(),
        updated_at: Utc::now(),
    };
    registry
        .ledger()
        .transact(
            [
                RowKey::Job(local.id),
                RowKey::JobClaim(local.id),
                RowKey::ClaimSlot(worker),
                RowKey::Job(courier.id),
                RowKey::Job(kept.id),
            ],
            |tx| {
                tx.insert_job(local.clone())?;
                tx.insert_job(courier.clone())?;
                tx.insert_job(kept.clone())?;
                tx.insert_job_claim(claim.clone())?;
                tx.claim_slot_mut(worker)?.active = Some(claim.clone());
                Ok::<_, kingdom_ledger::LedgerError>(())
            },
        )
        .await
        .unwrap();

    registry.reset().await.unwrap();

    let jobs = registry.ledger().jobs().await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].id, kept.id);
    assert!(
        registry
            .ledger()
            .read(&RowKey::JobClaim(local.id))
            .await
            .is_none()
    );
    match registry.ledger().read(&RowKey::ClaimSlot(worker)).await {
        Some(Row::ClaimSlot(slot)) => assert!(slot.active.is_none()),
        other => panic!("unexpected claim slot {other:?}"),
    }
    let account = registry.ledger().player(worker).await.unwrap();
    assert_eq!(account.settlement, capital.id);
}
