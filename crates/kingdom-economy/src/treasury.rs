//! Treasury management and daily quota upkeep.
//!
//! A settlement's owner funds its treasury and sets the knobs the market
//! reads: floor prices, daily quotas, tax rate, and market prices. A
//! settlement without an owner is administered by anyone, which is how the
//! capital and settlements created on demand are configured.

use std::sync::Arc;

use tracing::{debug, info};

use kingdom_ledger::{Ledger, RowKey, Transaction};
use kingdom_types::{Account, Asset, EntryKind, Item, PlayerId, Resource, Settlement, SettlementId};

use crate::config::MarketConfig;
use crate::error::EconomyError;

/// Owner operations on settlement treasuries.
#[derive(Debug, Clone)]
pub struct Treasury {
    ledger: Arc<Ledger>,
    config: MarketConfig,
}

/// The settlement row, checked for existence and ownership.
fn owned<'t>(
    tx: &'t mut Transaction,
    actor: PlayerId,
    settlement: SettlementId,
) -> Result<&'t mut Settlement, EconomyError> {
    let owner = tx
        .find_settlement(settlement)?
        .ok_or(EconomyError::UnknownSettlement(settlement))?
        .owner;
    if owner.is_some_and(|o| o != actor) {
        return Err(EconomyError::NotOwner {
            player: actor,
            settlement,
        });
    }
    Ok(tx.settlement_mut(settlement)?)
}

impl Treasury {
    /// Create a treasury service over `ledger`.
    pub const fn new(ledger: Arc<Ledger>, config: MarketConfig) -> Self {
        Self { ledger, config }
    }

    async fn update(
        &self,
        actor: PlayerId,
        settlement: SettlementId,
        mut apply: impl FnMut(&mut Settlement) -> Result<(), EconomyError>,
    ) -> Result<Settlement, EconomyError> {
        self.ledger
            .transact([RowKey::Settlement(settlement)], |tx| {
                let s = owned(tx, actor, settlement)?;
                apply(s)?;
                Ok(s.clone())
            })
            .await
    }

    /// Move gold from the player into their settlement's treasury.
    pub async fn fund(&self, player: PlayerId, amount: u64) -> Result<Settlement, EconomyError> {
        if amount == 0 {
            return Err(EconomyError::ZeroQuantity);
        }
        let here = self
            .ledger
            .player(player)
            .await
            .ok_or(EconomyError::UnknownPlayer(player))?
            .settlement;

        let funded = self
            .ledger
            .transact([RowKey::Player(player), RowKey::Settlement(here)], |tx| {
                let here = tx
                    .find_player(player)?
                    .ok_or(EconomyError::UnknownPlayer(player))?
                    .settlement;
                owned(tx, player, here)?;
                tx.transfer(
                    Asset::Gold,
                    Account::Player(player),
                    Account::Treasury(here),
                    amount,
                    EntryKind::TreasuryFund,
                )?;
                Ok::<_, EconomyError>(tx.settlement(here)?.clone())
            })
            .await?;
        info!(%player, settlement = %funded.name, amount, treasury = funded.treasury, "Treasury funded");
        Ok(funded)
    }

    /// Set the treasury floor price of a resource. Zero disables it.
    pub async fn set_floor(
        &self,
        actor: PlayerId,
        settlement: SettlementId,
        resource: Resource,
        floor: u64,
    ) -> Result<Settlement, EconomyError> {
        let updated = self
            .update(actor, settlement, |s| {
                let price = s.price(resource);
                if floor > price {
                    return Err(EconomyError::FloorAboveMarket {
                        resource,
                        floor,
                        price,
                    });
                }
                s.floors.insert(resource, floor);
                Ok(())
            })
            .await?;
        debug!(settlement = %updated.name, %resource, floor, "Floor set");
        Ok(updated)
    }

    /// Set the daily treasury quota of a resource and refill today's.
    pub async fn set_daily_quota(
        &self,
        actor: PlayerId,
        settlement: SettlementId,
        resource: Resource,
        amount: u64,
    ) -> Result<Settlement, EconomyError> {
        let max = self.config.max_daily_quota;
        if amount > max {
            return Err(EconomyError::QuotaOutOfRange { amount, max });
        }
        let updated = self
            .update(actor, settlement, |s| {
                s.daily_quotas.insert(resource, amount);
                s.quotas.insert(resource, amount);
                Ok(())
            })
            .await?;
        debug!(settlement = %updated.name, %resource, amount, "Daily quota set");
        Ok(updated)
    }

    /// Set the tax rate, 0 to 100 percent.
    pub async fn set_tax_rate(
        &self,
        actor: PlayerId,
        settlement: SettlementId,
        percent: u8,
    ) -> Result<Settlement, EconomyError> {
        if percent > 100 {
            return Err(EconomyError::TaxOutOfRange { percent });
        }
        let updated = self
            .update(actor, settlement, |s| {
                s.tax_rate = percent;
                Ok(())
            })
            .await?;
        debug!(settlement = %updated.name, percent, "Tax rate set");
        Ok(updated)
    }

    /// Set the market price of a resource or the base price of a tool.
    ///
    /// Lowering a resource price below its floor pulls the floor down with
    /// it, so the floor never exceeds the market price.
    pub async fn set_price(
        &self,
        actor: PlayerId,
        settlement: SettlementId,
        item: Item,
        price: u64,
    ) -> Result<Settlement, EconomyError> {
        let updated = self
            .update(actor, settlement, |s| {
                match item {
                    Item::Resource(resource) => {
                        s.prices.insert(resource, price);
                        if s.floor(resource) > price {
                            s.floors.insert(resource, price);
                        }
                    }
                    Item::Tool(tool) => {
                        s.tool_prices.insert(tool, price);
                    }
                }
                Ok(())
            })
            .await?;
        debug!(settlement = %updated.name, ?item, price, "Price set");
        Ok(updated)
    }

    /// Refill every settlement's remaining quotas from its daily quotas.
    ///
    /// Runs once per game day. Returns how many settlements were touched.
    pub async fn restore_quotas(&self) -> Result<usize, EconomyError> {
        let ids: Vec<SettlementId> = self
            .ledger
            .settlements()
            .await
            .into_iter()
            .filter(|s| s.quotas != s.daily_quotas)
            .map(|s| s.id)
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }
        let keys: Vec<RowKey> = ids.iter().map(|id| RowKey::Settlement(*id)).collect();
        let restored = self
            .ledger
            .transact(keys, |tx| {
                let mut restored = 0_usize;
                for id in &ids {
                    if tx.find_settlement(*id)?.is_none() {
                        continue;
                    }
                    let s = tx.settlement_mut(*id)?;
                    s.quotas.clone_from(&s.daily_quotas);
                    restored = restored.saturating_add(1);
                }
                Ok::<_, EconomyError>(restored)
            })
            .await?;
        info!(restored, "Daily quotas restored");
        Ok(restored)
    }
}
