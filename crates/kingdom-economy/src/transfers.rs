//! Player accounts and peer-to-peer transfers.
//!
//! Identity belongs to the session layer; this module only opens the
//! balance row for a known player, records where they are, and moves gold
//! and goods between two players standing in the same settlement.

use std::sync::Arc;

use tracing::{debug, info};

use kingdom_ledger::{Ledger, RowKey, Transaction};
use kingdom_types::{Account, EntryKind, PlayerAccount, PlayerId, Resource, SettlementId};

use crate::error::EconomyError;

/// Player balance rows and transfers between them.
#[derive(Debug, Clone)]
pub struct Accounts {
    ledger: Arc<Ledger>,
}

/// Check that two distinct players exist and share a settlement.
fn together(tx: &Transaction, from: PlayerId, to: PlayerId) -> Result<(), EconomyError> {
    if from == to {
        return Err(EconomyError::SelfTarget);
    }
    let here = tx
        .find_player(from)?
        .ok_or(EconomyError::UnknownPlayer(from))?
        .settlement;
    let there = tx
        .find_player(to)?
        .ok_or(EconomyError::UnknownPlayer(to))?
        .settlement;
    if here != there {
        return Err(EconomyError::NotTogether { other: to });
    }
    Ok(())
}

impl Accounts {
    /// Create the account service over `ledger`.
    pub const fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger }
    }

    /// Open a balance row for a player, granting `gold` to start.
    ///
    /// Opening an existing account returns it unchanged.
    pub async fn open_account(
        &self,
        player: PlayerId,
        name: &str,
        settlement: SettlementId,
        gold: u64,
    ) -> Result<PlayerAccount, EconomyError> {
        let (account, opened) = self
            .ledger
            .transact(
                [RowKey::Player(player), RowKey::Settlement(settlement)],
                |tx| {
                    if let Some(existing) = tx.find_player(player)? {
                        return Ok((existing.clone(), false));
                    }
                    if tx.find_settlement(settlement)?.is_none() {
                        return Err(EconomyError::UnknownSettlement(settlement));
                    }
                    tx.insert_player(PlayerAccount::new(player, name.trim().to_owned(), settlement))?;
                    tx.credit_gold(player, gold, Account::World, EntryKind::Grant)?;
                    Ok::<_, EconomyError>((tx.player(player)?.clone(), true))
                },
            )
            .await?;
        if opened {
            info!(%player, name = %account.name, gold, "Account opened");
        }
        Ok(account)
    }

    /// Record that a player is now in `settlement`.
    pub async fn relocate(
        &self,
        player: PlayerId,
        settlement: SettlementId,
    ) -> Result<PlayerAccount, EconomyError> {
        let account = self
            .ledger
            .transact(
                [RowKey::Player(player), RowKey::Settlement(settlement)],
                |tx| {
                    if tx.find_settlement(settlement)?.is_none() {
                        return Err(EconomyError::UnknownSettlement(settlement));
                    }
                    if tx.find_player(player)?.is_none() {
                        return Err(EconomyError::UnknownPlayer(player));
                    }
                    let account = tx.player_mut(player)?;
                    account.settlement = settlement;
                    Ok(account.clone())
                },
            )
            .await?;
        debug!(%player, %settlement, "Player relocated");
        Ok(account)
    }

    /// A player's balances.
    pub async fn account(&self, player: PlayerId) -> Option<PlayerAccount> {
        self.ledger.player(player).await
    }

    /// Pay gold to another player in the same settlement.
    pub async fn pay(&self, from: PlayerId, to: PlayerId, amount: u64) -> Result<PlayerAccount, EconomyError> {
        if amount == 0 {
            return Err(EconomyError::ZeroQuantity);
        }
        let payer = self
            .ledger
            .transact([RowKey::Player(from), RowKey::Player(to)], |tx| {
                together(tx, from, to)?;
                tx.transfer_gold(from, to, amount, EntryKind::Payment)?;
                Ok::<_, EconomyError>(tx.player(from)?.clone())
            })
            .await?;
        debug!(%from, %to, amount, "Gold paid");
        Ok(payer)
    }

    /// Give resource units to another player in the same settlement.
    pub async fn give(
        &self,
        from: PlayerId,
        to: PlayerId,
        resource: Resource,
        quantity: u64,
    ) -> Result<PlayerAccount, EconomyError> {
        if quantity == 0 {
            return Err(EconomyError::ZeroQuantity);
        }
        let giver = self
            .ledger
            .transact([RowKey::Player(from), RowKey::Player(to)], |tx| {
                together(tx, from, to)?;
                tx.take_resource(from, resource, quantity, Account::Player(to), EntryKind::Gift)?;
                Ok::<_, EconomyError>(tx.player(from)?.clone())
            })
            .await?;
        debug!(%from, %to, %resource, quantity, "Goods given");
        Ok(giver)
    }
}
