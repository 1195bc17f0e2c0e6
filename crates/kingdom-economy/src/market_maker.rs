//! Market-maker stakes: one commission slot per settlement, resource, and
//! game day.
//!
//! A player opens a slot by surrendering a stake of the resource itself.
//! The stake size depends on how many players are online in the settlement,
//! so it is computed inside the transaction that inserts the stake. Slots
//! are never refunded; they lapse when the day ends.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use kingdom_ledger::{Ledger, Row, RowKey};
use kingdom_types::{
    Account, EntryKind, GameDay, MarketMakerBoard, MarketMakerStake, PlayerId, Resource,
    SettlementId, StakeReceipt, StakeStatus,
};

use crate::config::MarketMakerConfig;
use crate::error::EconomyError;

/// Fixed-length game days counted from the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameCalendar {
    day_ms: u64,
}

impl GameCalendar {
    /// A calendar with days of `day_length` (at least one millisecond).
    pub fn new(day_length: Duration) -> Self {
        Self {
            day_ms: u64::try_from(day_length.as_millis())
                .unwrap_or(u64::MAX)
                .max(1),
        }
    }

    /// Length of a day in milliseconds.
    pub const fn day_ms(self) -> u64 {
        self.day_ms
    }

    fn epoch_ms(now: DateTime<Utc>) -> u64 {
        u64::try_from(now.timestamp_millis()).unwrap_or(0)
    }

    /// The day `now` falls in.
    pub fn day_of(self, now: DateTime<Utc>) -> GameDay {
        GameDay(Self::epoch_ms(now).checked_div(self.day_ms).unwrap_or(0))
    }

    /// Milliseconds until the day containing `now` ends.
    pub fn remaining_ms(self, now: DateTime<Utc>) -> u64 {
        let into = Self::epoch_ms(now).checked_rem(self.day_ms).unwrap_or(0);
        self.day_ms.saturating_sub(into)
    }
}

/// How many players are online in a settlement.
///
/// Presence belongs to the session layer; the allocator only needs a count.
pub trait PresenceProvider: Send + Sync {
    /// Players currently connected in `settlement`.
    fn online_in(&self, settlement: SettlementId) -> u32;
}

/// Allocates and reports market-maker slots.
#[derive(Clone)]
pub struct MarketMakers {
    ledger: Arc<Ledger>,
    config: MarketMakerConfig,
    presence: Arc<dyn PresenceProvider>,
}

impl core::fmt::Debug for MarketMakers {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MarketMakers")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl MarketMakers {
    /// Create an allocator over `ledger`.
    pub fn new(
        ledger: Arc<Ledger>,
        config: MarketMakerConfig,
        presence: Arc<dyn PresenceProvider>,
    ) -> Self {
        Self {
            ledger,
            config,
            presence,
        }
    }

    /// The game calendar stakes are keyed by.
    pub fn calendar(&self) -> GameCalendar {
        GameCalendar::new(self.config.day_length)
    }

    /// Take today's slot for `resource` in `settlement`.
    ///
    /// The player must stand in the settlement and carry at least the
    /// current threshold. Exactly the threshold is deducted.
    pub async fn claim(
        &self,
        player: PlayerId,
        settlement: SettlementId,
        resource: Resource,
        now: DateTime<Utc>,
    ) -> Result<StakeReceipt, EconomyError> {
        let day = self.calendar().day_of(now);
        let config = &self.config;
        let presence = &self.presence;

        let receipt = self
            .ledger
            .transact(
                [
                    RowKey::Player(player),
                    RowKey::Settlement(settlement),
                    RowKey::Stake(settlement, resource, day),
                ],
                |tx| {
                    let account = tx
                        .find_player(player)?
                        .ok_or(EconomyError::UnknownPlayer(player))?;
                    if account.settlement != settlement {
                        return Err(EconomyError::WrongSettlement {
                            expected: settlement,
                        });
                    }
                    let held = account.holding(resource);
                    let is_capital = tx
                        .find_settlement(settlement)?
                        .ok_or(EconomyError::UnknownSettlement(settlement))?
                        .is_capital;

                    let online = presence.online_in(settlement);
                    let need = config.threshold(online, is_capital);
                    if held < need {
                        return Err(EconomyError::BelowStakeThreshold {
                            resource,
                            needed: need,
                            available: held,
                        });
                    }
                    if tx.find_stake(settlement, resource, day)?.is_some() {
                        return Err(EconomyError::StakeTaken { resource, day });
                    }

                    tx.take_resource(player, resource, need, Account::Void, EntryKind::Stake)?;
                    tx.insert_stake(MarketMakerStake {
                        settlement,
                        resource,
                        day,
                        holder: player,
                        percent: config.percent,
                        staked: need,
                    })?;
                    Ok(StakeReceipt {
                        staked: need,
                        percent: config.percent,
                    })
                },
            )
            .await?;

        info!(
            %player,
            %settlement,
            %resource,
            day = day.0,
            staked = receipt.staked,
            "Market maker stake opened"
        );
        Ok(receipt)
    }

    /// Today's stakes in `settlement`, by resource, with time left in the day.
    pub async fn status(&self, settlement: SettlementId, now: DateTime<Utc>) -> MarketMakerBoard {
        let calendar = self.calendar();
        let day = calendar.day_of(now);
        let rows = self
            .ledger
            .scan(|key| matches!(key, RowKey::Stake(s, _, d) if *s == settlement && *d == day))
            .await;

        let mut stakes = Vec::with_capacity(rows.len());
        for (_, row) in rows {
            if let Row::Stake(stake) = row {
                let holder_name = self.ledger.player(stake.holder).await.map(|p| p.name);
                stakes.push(StakeStatus {
                    resource: stake.resource,
                    holder: stake.holder,
                    holder_name,
                    percent: stake.percent,
                });
            }
        }
        stakes.sort_by_key(|s| s.resource);

        MarketMakerBoard {
            day,
            remaining_ms: calendar.remaining_ms(now),
            stakes,
        }
    }

    /// Drop every stake from days before `today`. Returns how many lapsed.
    pub async fn lapse(&self, today: GameDay) -> Result<usize, EconomyError> {
        let stale: Vec<RowKey> = self
            .ledger
            .scan(|key| matches!(key, RowKey::Stake(_, _, d) if *d < today))
            .await
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        if stale.is_empty() {
            return Ok(0);
        }

        let removed = self
            .ledger
            .transact(stale.clone(), |tx| {
                let mut removed = 0_usize;
                for key in &stale {
                    if tx.remove(key)?.is_some() {
                        removed = removed.saturating_add(1);
                    }
                }
                Ok::<_, EconomyError>(removed)
            })
            .await?;
        debug!(removed, today = today.0, "Market maker stakes lapsed");
        Ok(removed)
    }
}
