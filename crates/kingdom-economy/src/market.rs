//! Buying and selling against a settlement's market.
//!
//! # Sales
//!
//! A sale is split in two. The treasury buys first, at the floor price and
//! untaxed, up to the lesser of the remaining daily quota and what the
//! treasury can afford. The rest goes to the market at the market price,
//! taxed unless the gross is within the tax-free threshold. Both portions
//! land in market stock. The settlement row stays locked across the whole
//! computation, so two sellers cannot both spend the same treasury gold.
//!
//! # Purchases
//!
//! Resources come out of stock; tools are made to order and have no stock.
//! Purchases over the tax-free threshold carry the tax as a markup.
//!
//! # Commission
//!
//! Whoever holds today's market-maker stake on a resource earns a percent
//! of every market-priced trade in it, measured on the pre-tax gross and
//! paid by the market, never out of the seller's proceeds.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use kingdom_ledger::{Ledger, LedgerError, Row, RowKey, Transaction};
use kingdom_types::{
    Account, Asset, EntryKind, GameDay, Item, PlayerId, PurchaseReceipt, Resource, SaleReceipt,
    SettlementId, StockLine, Tool,
};

use crate::buffs::BuffProvider;
use crate::config::MarketConfig;
use crate::error::EconomyError;
use crate::market_maker::GameCalendar;
use crate::pricing;

/// A settlement market bound to the shared ledger.
#[derive(Clone)]
pub struct Market {
    ledger: Arc<Ledger>,
    config: MarketConfig,
    calendar: GameCalendar,
    buffs: Arc<dyn BuffProvider>,
}

impl core::fmt::Debug for Market {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Market")
            .field("config", &self.config)
            .field("calendar", &self.calendar)
            .finish_non_exhaustive()
    }
}

impl Market {
    /// Create a market over `ledger`.
    pub fn new(
        ledger: Arc<Ledger>,
        config: MarketConfig,
        calendar: GameCalendar,
        buffs: Arc<dyn BuffProvider>,
    ) -> Self {
        Self {
            ledger,
            config,
            calendar,
            buffs,
        }
    }

    /// Rows a trade is expected to touch, guessed from a snapshot.
    ///
    /// The guess only saves lock-set widening; the transaction re-reads
    /// everything under lock.
    async fn trade_keys(
        &self,
        player: PlayerId,
        traded: Option<(Resource, GameDay)>,
    ) -> Result<Vec<RowKey>, EconomyError> {
        let here = self
            .ledger
            .player(player)
            .await
            .ok_or(EconomyError::UnknownPlayer(player))?
            .settlement;
        let mut keys = vec![RowKey::Player(player), RowKey::Settlement(here)];
        if let Some((resource, day)) = traded {
            keys.push(RowKey::Stock(here, resource));
            let stake = RowKey::Stake(here, resource, day);
            if let Some(Row::Stake(s)) = self.ledger.read(&stake).await {
                keys.push(RowKey::Player(s.holder));
            }
            keys.push(stake);
        }
        Ok(keys)
    }

    /// Sell `quantity` units of `resource` in the player's settlement.
    pub async fn sell(
        &self,
        player: PlayerId,
        resource: Resource,
        quantity: u64,
        now: DateTime<Utc>,
    ) -> Result<SaleReceipt, EconomyError> {
        if quantity == 0 {
            return Err(EconomyError::ZeroQuantity);
        }
        let day = self.calendar.day_of(now);
        let keys = self.trade_keys(player, Some((resource, day))).await?;

        let receipt = self
            .ledger
            .transact(keys, |tx| {
                let account = tx
                    .find_player(player)?
                    .ok_or(EconomyError::UnknownPlayer(player))?;
                let here = account.settlement;
                let held = account.holding(resource);
                if held < quantity {
                    return Err(LedgerError::InsufficientQuantity {
                        resource,
                        needed: quantity,
                        available: held,
                    }
                    .into());
                }
                let s = tx
                    .find_settlement(here)?
                    .ok_or(EconomyError::UnknownSettlement(here))?;
                let floor = s.floor(resource);
                let quota = s.quota_remaining(resource);
                let treasury = s.treasury;
                let price = s.price(resource);
                let tax_rate = s.tax_rate;
                let threshold = pricing::tax_free_threshold(
                    s,
                    &self.buffs.buffs(here),
                    self.config.default_tax_free_up_to,
                );

                let affordable = treasury.checked_div(floor).unwrap_or(0);
                let treasury_qty = quantity.min(quota).min(affordable);
                let treasury_paid = pricing::gross(treasury_qty, floor, "floor sale")?;
                if treasury_qty > 0 {
                    tx.transfer(
                        Asset::Resource(resource),
                        Account::Player(player),
                        Account::Stock(here),
                        treasury_qty,
                        EntryKind::FloorSale,
                    )?;
                    tx.transfer(
                        Asset::Gold,
                        Account::Treasury(here),
                        Account::Player(player),
                        treasury_paid,
                        EntryKind::FloorSale,
                    )?;
                    let left = tx
                        .settlement_mut(here)?
                        .quotas
                        .entry(resource)
                        .or_insert(0);
                    *left = left.saturating_sub(treasury_qty);
                }

                let market_qty = quantity.saturating_sub(treasury_qty);
                let market_gross = pricing::gross(market_qty, price, "market sale")?;
                let market_net = pricing::sale_net(market_gross, tax_rate, threshold)?;
                if market_qty > 0 {
                    tx.transfer(
                        Asset::Resource(resource),
                        Account::Player(player),
                        Account::Stock(here),
                        market_qty,
                        EntryKind::MarketSale,
                    )?;
                    tx.credit_gold(player, market_net, Account::Market(here), EntryKind::MarketSale)?;
                }
                let commission = pay_commission(tx, here, resource, day, market_gross)?;

                Ok::<_, EconomyError>(SaleReceipt {
                    treasury_qty,
                    treasury_paid,
                    market_qty,
                    market_gross,
                    market_net,
                    commission,
                })
            })
            .await?;

        debug!(
            %player,
            %resource,
            quantity,
            treasury_qty = receipt.treasury_qty,
            paid = receipt.total_paid(),
            commission = receipt.commission,
            "Sale completed"
        );
        Ok(receipt)
    }

    /// Buy a resource or tool in the player's settlement.
    ///
    /// `quantity` defaults to one.
    pub async fn buy(
        &self,
        player: PlayerId,
        item: Item,
        quantity: Option<u64>,
        now: DateTime<Utc>,
    ) -> Result<PurchaseReceipt, EconomyError> {
        let quantity = quantity.unwrap_or(1);
        if quantity == 0 {
            return Err(EconomyError::ZeroQuantity);
        }
        let receipt = match item {
            Item::Resource(resource) => self.buy_resource(player, resource, quantity, now).await?,
            Item::Tool(tool) => self.buy_tool(player, tool, quantity).await?,
        };
        debug!(%player, ?item, quantity, cost = receipt.cost, "Purchase completed");
        Ok(receipt)
    }

    async fn buy_resource(
        &self,
        player: PlayerId,
        resource: Resource,
        quantity: u64,
        now: DateTime<Utc>,
    ) -> Result<PurchaseReceipt, EconomyError> {
        let day = self.calendar.day_of(now);
        let keys = self.trade_keys(player, Some((resource, day))).await?;

        self.ledger
            .transact(keys, |tx| {
                let here = tx
                    .find_player(player)?
                    .ok_or(EconomyError::UnknownPlayer(player))?
                    .settlement;
                let s = tx
                    .find_settlement(here)?
                    .ok_or(EconomyError::UnknownSettlement(here))?;
                let threshold = pricing::tax_free_threshold(
                    s,
                    &self.buffs.buffs(here),
                    self.config.default_tax_free_up_to,
                );
                let gross = pricing::gross(quantity, s.price(resource), "purchase")?;
                let cost = pricing::buy_cost(gross, s.tax_rate, threshold)?;

                let available = tx.stock(here, resource)?;
                if available < quantity {
                    return Err(LedgerError::InsufficientStock {
                        resource,
                        requested: quantity,
                        available,
                    }
                    .into());
                }
                tx.debit_gold(player, cost, Account::Market(here), EntryKind::MarketPurchase)?;
                let new_stock = tx.take_stock(
                    here,
                    resource,
                    quantity,
                    Account::Player(player),
                    EntryKind::MarketPurchase,
                )?;
                pay_commission(tx, here, resource, day, gross)?;

                Ok::<_, EconomyError>(PurchaseReceipt {
                    cost,
                    new_stock: Some(new_stock),
                })
            })
            .await
    }

    async fn buy_tool(
        &self,
        player: PlayerId,
        tool: Tool,
        quantity: u64,
    ) -> Result<PurchaseReceipt, EconomyError> {
        let keys = self.trade_keys(player, None).await?;

        self.ledger
            .transact(keys, |tx| {
                let here = tx
                    .find_player(player)?
                    .ok_or(EconomyError::UnknownPlayer(player))?
                    .settlement;
                let s = tx
                    .find_settlement(here)?
                    .ok_or(EconomyError::UnknownSettlement(here))?;
                let buffs = self.buffs.buffs(here);
                let threshold =
                    pricing::tax_free_threshold(s, &buffs, self.config.default_tax_free_up_to);
                let unit = pricing::discounted_tool_price(
                    s.tool_price(tool),
                    buffs.tool_discount_percent,
                    self.config.max_tool_discount_percent,
                )?;
                let gross = pricing::gross(quantity, unit, "tool purchase")?;
                let cost = pricing::buy_cost(gross, s.tax_rate, threshold)?;

                tx.debit_gold(player, cost, Account::Market(here), EntryKind::ToolPurchase)?;
                tx.give_tool(player, tool, quantity, Account::Market(here), EntryKind::ToolPurchase)?;
                Ok::<_, EconomyError>(PurchaseReceipt {
                    cost,
                    new_stock: None,
                })
            })
            .await
    }

    /// Market stock of every resource in a settlement.
    pub async fn stock_of(&self, settlement: SettlementId) -> Vec<StockLine> {
        let mut lines = Vec::with_capacity(Resource::ALL.len());
        for resource in Resource::ALL {
            lines.push(StockLine {
                resource,
                quantity: self.ledger.stock(settlement, resource).await,
            });
        }
        lines
    }
}

/// Pay today's stake holder their cut of `gross`. Returns the amount paid.
fn pay_commission(
    tx: &mut Transaction,
    settlement: SettlementId,
    resource: Resource,
    day: GameDay,
    gross: u64,
) -> Result<u64, EconomyError> {
    if gross == 0 {
        return Ok(0);
    }
    let Some(stake) = tx.find_stake(settlement, resource, day)?.cloned() else {
        return Ok(0);
    };
    let cut = pricing::commission(gross, stake.percent)?;
    tx.credit_gold(
        stake.holder,
        cut,
        Account::Market(settlement),
        EntryKind::Commission,
    )?;
    Ok(cut)
}
