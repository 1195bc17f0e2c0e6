//! The job board: generation, expiry, and the claim lifecycle.
//!
//! ```text
//! posted --accept--> claimed --deliver--> completed (job removed)
//!                       |
//!                       +--abandon--> abandoned (job open again, claimant cools down)
//! posted/claimed --expiry sweep--> expired (job removed)
//! ```
//!
//! A job's active claim lives in [`RowKey::JobClaim`], and a player's in
//! their [`RowKey::ClaimSlot`]. Accept locks both, so two players racing for
//! one job serialize on the job's claim row and the loser sees
//! [`EconomyError::JobTaken`].

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::seq::IndexedRandom;
use tracing::{debug, info};

use kingdom_ledger::{Ledger, Row, RowKey};
use kingdom_types::{
    Account, ActiveClaim, ClaimId, ClaimStatus, EntryKind, Job, JobClaim, JobId, JobKind,
    PlayerId, Resource, Settlement, SettlementId,
};

use crate::config::JobConfig;
use crate::error::EconomyError;

/// Posts jobs and runs their claims.
#[derive(Debug, Clone)]
pub struct JobBoard {
    ledger: Arc<Ledger>,
    config: JobConfig,
}

impl JobBoard {
    /// Create a board over `ledger`.
    pub const fn new(ledger: Arc<Ledger>, config: JobConfig) -> Self {
        Self { ledger, config }
    }

    /// Board settings.
    pub const fn config(&self) -> &JobConfig {
        &self.config
    }

    // -------------------------------------------------------------------
    // Generation
    // -------------------------------------------------------------------

    /// Purge expired jobs, then top up every settlement's board.
    ///
    /// Each settlement gets at most one batch per sweep and never more open
    /// jobs than the cap, claimed ones included. Returns the new jobs.
    pub async fn generate<R: Rng + Send>(
        &self,
        rng: &mut R,
        now: DateTime<Utc>,
    ) -> Result<Vec<Job>, EconomyError> {
        self.sweep_expired(now).await?;

        let mut open: BTreeMap<SettlementId, usize> = BTreeMap::new();
        for job in self.ledger.jobs().await {
            if !job.is_expired(now) {
                let n = open.entry(job.settlement).or_insert(0);
                *n = n.saturating_add(1);
            }
        }
        let settlements = self.ledger.settlements().await;
        let everywhere: Vec<SettlementId> = settlements.iter().map(|s| s.id).collect();

        let mut posted = Vec::new();
        for s in &settlements {
            let have = open.get(&s.id).copied().unwrap_or(0);
            let room = self
                .config
                .per_settlement_cap
                .saturating_sub(have)
                .min(self.config.batch_size);
            for _ in 0..room {
                if let Some(job) = self.draw(rng, s, &everywhere, now) {
                    posted.push(job);
                }
            }
        }
        if posted.is_empty() {
            return Ok(posted);
        }

        let keys: Vec<RowKey> = posted.iter().map(|j| RowKey::Job(j.id)).collect();
        self.ledger
            .transact(keys, |tx| {
                for job in &posted {
                    tx.insert_job(job.clone())?;
                }
                Ok::<_, EconomyError>(())
            })
            .await?;
        info!(posted = posted.len(), "Jobs posted");
        Ok(posted)
    }

    /// Draw one job for `settlement`, or `None` when a courier has nowhere
    /// to go.
    ///
    /// Delivery kinds are weighted by their market price, so dearer goods
    /// are asked for more often. A courier may be sent to any other
    /// settlement in `destinations`, placed on the map or not.
    pub fn draw<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        settlement: &Settlement,
        destinations: &[SettlementId],
        now: DateTime<Utc>,
    ) -> Option<Job> {
        let config = &self.config;
        let weights = [
            (JobKind::Forage, settlement.price(Resource::Fruit)),
            (JobKind::Hunt, settlement.price(Resource::Meat)),
            (JobKind::Mine, settlement.price(Resource::Stone)),
            (JobKind::Courier, config.courier_weight),
        ];
        let kind = weights
            .choose_weighted(rng, |(_, w)| *w)
            .map_or(JobKind::Forage, |(k, _)| *k);
        let expires_at = now.checked_add_signed(config.lifetime_delta())?;

        let mut job = Job {
            id: JobId::new(),
            settlement: settlement.id,
            kind,
            resource: None,
            quantity: 0,
            destination: None,
            reward: 0,
            posted_at: now,
            expires_at,
        };

        if let Some(resource) = kind.resource() {
            let max = config.max_base_quantity.max(config.min_base_quantity);
            let base = rng.random_range(config.min_base_quantity..=max);
            let unit = settlement.price(resource).max(1);
            // Quantity scales by 0.8 + price/10, rounded half up.
            let scaled = base.saturating_mul(unit.saturating_add(8)).saturating_add(5) / 10;
            let quantity = scaled.max(config.min_quantity);
            let value = quantity
                .saturating_mul(unit)
                .saturating_mul(config.reward_percent)
                .saturating_add(50)
                / 100;
            job.resource = Some(resource);
            job.quantity = quantity;
            job.reward = value.max(config.min_reward);
        } else {
            let others: Vec<SettlementId> = destinations
                .iter()
                .copied()
                .filter(|id| *id != settlement.id)
                .collect();
            let destination = *others.choose(rng)?;
            let sum = [Resource::Fruit, Resource::Meat, Resource::Stone]
                .into_iter()
                .map(|r| settlement.price(r))
                .fold(0_u64, u64::saturating_add);
            // Average price times the factor, rounded half up.
            let reward = sum
                .saturating_mul(config.courier_reward_factor)
                .saturating_add(1)
                / 3;
            job.destination = Some(destination);
            job.reward = reward.max(config.courier_min_reward);
        }
        Some(job)
    }

    /// Delete every expired job, expiring its claim and freeing the
    /// claimant. Returns how many jobs were removed.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize, EconomyError> {
        let expired: Vec<JobId> = self
            .ledger
            .jobs()
            .await
            .into_iter()
            .filter(|j| j.is_expired(now))
            .map(|j| j.id)
            .collect();
        if expired.is_empty() {
            return Ok(0);
        }

        let mut keys = Vec::with_capacity(expired.len().saturating_mul(3));
        for id in &expired {
            keys.push(RowKey::Job(*id));
            keys.push(RowKey::JobClaim(*id));
            if let Some(Row::JobClaim(claim)) = self.ledger.read(&RowKey::JobClaim(*id)).await {
                keys.push(RowKey::ClaimSlot(claim.player));
            }
        }

        let removed = self
            .ledger
            .transact(keys, |tx| {
                let mut removed = 0_usize;
                for id in &expired {
                    let Some(job) = tx.find_job(*id)? else {
                        continue;
                    };
                    if !job.is_expired(now) {
                        continue;
                    }
                    if let Some(claim) = tx.find_job_claim(*id)?.cloned() {
                        let slot = tx.claim_slot_mut(claim.player)?;
                        if slot.active.as_ref().is_some_and(|c| c.job == *id) {
                            slot.active = None;
                        }
                        debug!(job = %id, player = %claim.player, "Claim expired");
                    }
                    tx.remove_job(*id)?;
                    removed = removed.saturating_add(1);
                }
                Ok::<_, EconomyError>(removed)
            })
            .await?;
        info!(removed, "Expired jobs purged");
        Ok(removed)
    }

    // -------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------

    /// Unclaimed, unexpired jobs in a settlement, oldest first.
    pub async fn list_open(&self, settlement: SettlementId, now: DateTime<Utc>) -> Vec<Job> {
        let mut jobs = Vec::new();
        for job in self.ledger.jobs().await {
            if job.settlement != settlement || job.is_expired(now) {
                continue;
            }
            if self.ledger.read(&RowKey::JobClaim(job.id)).await.is_none() {
                jobs.push(job);
            }
        }
        jobs.sort_by_key(|j| (j.posted_at, j.id));
        jobs
    }

    /// The player's claim, if its job is still live.
    pub async fn current_claim(&self, player: PlayerId, now: DateTime<Utc>) -> Option<ActiveClaim> {
        let Some(Row::ClaimSlot(slot)) = self.ledger.read(&RowKey::ClaimSlot(player)).await else {
            return None;
        };
        let claim = slot.active?;
        match self.ledger.read(&RowKey::Job(claim.job)).await {
            Some(Row::Job(job)) if !job.is_expired(now) => Some(ActiveClaim { claim, job }),
            _ => None,
        }
    }

    async fn held_job(&self, player: PlayerId) -> Option<JobId> {
        match self.ledger.read(&RowKey::ClaimSlot(player)).await {
            Some(Row::ClaimSlot(slot)) => slot.active.map(|c| c.job),
            _ => None,
        }
    }

    // -------------------------------------------------------------------
    // Claim lifecycle
    // -------------------------------------------------------------------

    /// Claim a job in the player's settlement.
    pub async fn accept(
        &self,
        player: PlayerId,
        job_id: JobId,
        now: DateTime<Utc>,
    ) -> Result<ActiveClaim, EconomyError> {
        let mut keys = vec![
            RowKey::Player(player),
            RowKey::ClaimSlot(player),
            RowKey::Job(job_id),
            RowKey::JobClaim(job_id),
        ];
        if let Some(held) = self.held_job(player).await {
            keys.push(RowKey::Job(held));
        }

        let active = self
            .ledger
            .transact(keys, |tx| {
                let here = tx
                    .find_player(player)?
                    .ok_or(EconomyError::UnknownPlayer(player))?
                    .settlement;
                let slot = tx.claim_slot(player)?;
                if let Some(held) = &slot.active {
                    let live = tx.find_job(held.job)?.is_some_and(|j| !j.is_expired(now));
                    if live {
                        return Err(EconomyError::ClaimHeld { job: held.job });
                    }
                }
                if let Some(until) = slot.cooldown_until {
                    if now < until {
                        let left = until.signed_duration_since(now).num_milliseconds();
                        let ms = u64::try_from(left).unwrap_or(0);
                        return Err(EconomyError::Cooldown {
                            remaining_secs: ms.div_ceil(1000),
                        });
                    }
                }

                let job = tx
                    .find_job(job_id)?
                    .ok_or(EconomyError::JobNotFound(job_id))?
                    .clone();
                if job.is_expired(now) {
                    return Err(EconomyError::JobExpired(job_id));
                }
                if job.settlement != here {
                    return Err(EconomyError::WrongSettlement {
                        expected: job.settlement,
                    });
                }
                if tx.find_job_claim(job_id)?.is_some() {
                    return Err(EconomyError::JobTaken(job_id));
                }

                let claim = JobClaim {
                    id: ClaimId::new(),
                    job: job_id,
                    player,
                    status: ClaimStatus::Claimed,
                    claimed_at: now,
                    updated_at: now,
                };
                tx.insert_job_claim(claim.clone())?;
                let slot = tx.claim_slot_mut(player)?;
                slot.active = Some(claim.clone());
                slot.cooldown_until = None;
                Ok(ActiveClaim { claim, job })
            })
            .await?;

        info!(%player, job = %job_id, kind = active.job.kind.name(), "Job accepted");
        Ok(active)
    }

    /// Complete the player's job and pay the reward.
    ///
    /// Couriers must stand in the destination; delivery jobs hand over the
    /// goods. Payment, completion, and removal of the job are one step.
    pub async fn deliver(&self, player: PlayerId, now: DateTime<Utc>) -> Result<ActiveClaim, EconomyError> {
        let mut keys = vec![RowKey::Player(player), RowKey::ClaimSlot(player)];
        if let Some(held) = self.held_job(player).await {
            keys.push(RowKey::Job(held));
            keys.push(RowKey::JobClaim(held));
        }

        let done = self
            .ledger
            .transact(keys, |tx| {
                let mut claim = tx
                    .claim_slot(player)?
                    .active
                    .ok_or(EconomyError::NoActiveJob)?;
                let job = tx
                    .find_job(claim.job)?
                    .ok_or(EconomyError::NoActiveJob)?
                    .clone();
                if job.is_expired(now) {
                    return Err(EconomyError::JobExpired(job.id));
                }
                if tx.find_job_claim(job.id)?.is_none_or(|c| c.player != player) {
                    return Err(EconomyError::NoActiveJob);
                }
                let here = tx
                    .find_player(player)?
                    .ok_or(EconomyError::UnknownPlayer(player))?
                    .settlement;

                tx.reference(Some(job.id.into_inner()));
                match (job.resource, job.destination) {
                    (Some(resource), _) => {
                        tx.take_resource(
                            player,
                            resource,
                            job.quantity,
                            Account::Void,
                            EntryKind::JobDelivery,
                        )?;
                    }
                    (None, Some(destination)) => {
                        if here != destination {
                            return Err(EconomyError::WrongSettlement {
                                expected: destination,
                            });
                        }
                    }
                    (None, None) => {}
                }
                tx.credit_gold(player, job.reward, Account::World, EntryKind::JobReward)?;
                tx.remove_job(job.id)?;
                tx.claim_slot_mut(player)?.active = None;

                claim.status = ClaimStatus::Completed;
                claim.updated_at = now;
                Ok(ActiveClaim { claim, job })
            })
            .await?;

        info!(%player, job = %done.job.id, reward = done.job.reward, "Job delivered");
        Ok(done)
    }

    /// Give up the player's job. The job reopens and the player cools down.
    pub async fn abandon(&self, player: PlayerId, now: DateTime<Utc>) -> Result<JobClaim, EconomyError> {
        let mut keys = vec![RowKey::ClaimSlot(player)];
        if let Some(held) = self.held_job(player).await {
            keys.push(RowKey::Job(held));
            keys.push(RowKey::JobClaim(held));
        }
        let cooldown = self.config.cooldown_delta();

        let claim = self
            .ledger
            .transact(keys, |tx| {
                let mut claim = tx
                    .claim_slot(player)?
                    .active
                    .ok_or(EconomyError::NoActiveJob)?;
                let live = tx.find_job(claim.job)?.is_some_and(|j| !j.is_expired(now));
                if !live {
                    return Err(EconomyError::NoActiveJob);
                }
                if tx.find_job_claim(claim.job)?.is_some_and(|c| c.player == player) {
                    tx.clear_job_claim(claim.job)?;
                }
                let slot = tx.claim_slot_mut(player)?;
                slot.active = None;
                slot.cooldown_until = now.checked_add_signed(cooldown);

                claim.status = ClaimStatus::Abandoned;
                claim.updated_at = now;
                Ok::<_, EconomyError>(claim)
            })
            .await?;

        info!(%player, job = %claim.job, "Job abandoned");
        Ok(claim)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    use super::*;

    fn town(prices: [u64; 3]) -> Settlement {
        let mut s = kingdom_world::SettlementRules::default().blank(SettlementId::new(), "Mill", Utc::now());
        s.prices.insert(Resource::Fruit, prices[0]);
        s.prices.insert(Resource::Meat, prices[1]);
        s.prices.insert(Resource::Stone, prices[2]);
        s
    }

    fn board() -> JobBoard {
        JobBoard::new(Arc::new(Ledger::new()), JobConfig::default())
    }

    #[test]
    fn delivery_quantities_and_rewards_follow_price() {
        let board = board();
        let s = town([1, 3, 2]);
        let mut rng = SmallRng::seed_from_u64(7);
        for _ in 0..200 {
            let Some(job) = board.draw(&mut rng, &s, &[], Utc::now()) else {
                continue;
            };
            let resource = job.resource.unwrap();
            let unit = s.price(resource);
            assert!(job.quantity >= 5);
            // base 10..=30 scaled by 0.8 + price/10
            let lo = (10 * (8 + unit) + 5) / 10;
            let hi = (30 * (8 + unit) + 5) / 10;
            assert!((lo..=hi).contains(&job.quantity), "{job:?}");
            assert_eq!(job.reward, ((job.quantity * unit * 110 + 50) / 100).max(1));
        }
    }

    #[test]
    fn couriers_need_somewhere_to_go() {
        let board = board();
        let s = town([0, 0, 0]);
        let mut rng = SmallRng::seed_from_u64(1);
        // With every price at zero only couriers can be drawn.
        assert!(board.draw(&mut rng, &s, &[s.id], Utc::now()).is_none());

        let elsewhere = SettlementId::new();
        let job = board.draw(&mut rng, &s, &[s.id, elsewhere], Utc::now()).unwrap();
        assert_eq!(job.kind, JobKind::Courier);
        assert_eq!(job.destination, Some(elsewhere));
        assert_eq!(job.reward, 5);
    }

    #[test]
    fn courier_reward_averages_prices() {
        let board = board();
        let mut rng = SmallRng::seed_from_u64(3);
        let s = town([1, 3, 2]);
        let elsewhere = SettlementId::new();
        let couriers: Vec<Job> = (0..100)
            .filter_map(|_| board.draw(&mut rng, &s, &[elsewhere], Utc::now()))
            .filter(|j| j.kind == JobKind::Courier)
            .collect();
        assert!(!couriers.is_empty());
        assert!(couriers.iter().all(|j| j.reward == 20));
    }

    #[test]
    fn jobs_expire_after_their_lifetime() {
        let board = board();
        let now = Utc::now();
        let s = town([1, 3, 2]);
        let mut rng = SmallRng::seed_from_u64(9);
        let job = board.draw(&mut rng, &s, &[SettlementId::new()], now).unwrap();
        assert!(!job.is_expired(now));
        assert!(job.is_expired(now + board.config().lifetime_delta()));
    }
}
