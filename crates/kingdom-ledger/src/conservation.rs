//! Conservation checks over the double-entry journal.
//!
//! Every journal entry moves `amount` units of one [`Asset`] out of one
//! [`Account`] and into another, so summing net flows over all accounts
//! must give zero for every asset. Value that enters or leaves the tracked
//! balances shows up as flow on the external accounts (`Market`, `World`,
//! `Void`), which makes those adjustments explicit rather than implied.
//!
//! [`reconcile`] goes one step further: given the balance changes actually
//! observed on tracked accounts, it checks that the journal explains every
//! unit of them.

use std::collections::{BTreeMap, BTreeSet};

use kingdom_types::{Account, Asset, LedgerEntry};

use crate::LedgerAnomaly;

/// The result of a conservation check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConservationResult {
    /// Every asset balances.
    Balanced,
    /// At least one asset or entry is inconsistent.
    Anomaly(LedgerAnomaly),
}

impl ConservationResult {
    /// Whether the check passed.
    pub const fn is_balanced(&self) -> bool {
        matches!(self, Self::Balanced)
    }
}

/// Net flow per `(account, asset)`: credits minus debits.
///
/// Returns `None` on arithmetic overflow.
pub fn net_flows(entries: &[LedgerEntry]) -> Option<BTreeMap<(Account, Asset), i128>> {
    let mut flows: BTreeMap<(Account, Asset), i128> = BTreeMap::new();
    for entry in entries {
        let amount = i128::from(entry.amount);
        let debit = flows.entry((entry.from, entry.asset)).or_insert(0);
        *debit = debit.checked_sub(amount)?;
        let credit = flows.entry((entry.to, entry.asset)).or_insert(0);
        *credit = credit.checked_add(amount)?;
    }
    Some(flows)
}

/// Net flow of one asset into one account.
pub fn account_balance(entries: &[LedgerEntry], account: Account, asset: Asset) -> i128 {
    entries
        .iter()
        .filter(|e| e.asset == asset)
        .fold(0_i128, |acc, e| {
            let amount = i128::from(e.amount);
            let acc = if e.to == account {
                acc.saturating_add(amount)
            } else {
                acc
            };
            if e.from == account {
                acc.saturating_sub(amount)
            } else {
                acc
            }
        })
}

/// Net flow of one asset into all external accounts together.
///
/// Positive means value left the tracked balances (for gold: purchase
/// payments exceeded sale proceeds and rewards).
pub fn external_net(entries: &[LedgerEntry], asset: Asset) -> i128 {
    entries
        .iter()
        .filter(|e| e.asset == asset)
        .fold(0_i128, |acc, e| {
            let amount = i128::from(e.amount);
            match (e.from.is_external(), e.to.is_external()) {
                (false, true) => acc.saturating_add(amount),
                (true, false) => acc.saturating_sub(amount),
                _ => acc,
            }
        })
}

/// Verify that every entry is well formed and every asset sums to zero.
///
/// An entry is malformed when its amount is zero or it moves value from an
/// account to itself.
pub fn verify_conservation(entries: &[LedgerEntry]) -> ConservationResult {
    let mut tally = FlowTally::default();
    tally.record(entries);
    tally.verify()
}

/// Net flows folded in entry by entry, so a journal can be audited after
/// its oldest entries have been archived and dropped from memory.
#[derive(Debug, Clone, Default)]
pub struct FlowTally {
    flows: BTreeMap<(Account, Asset), i128>,
    entries: usize,
    malformed: usize,
    overflowed: bool,
}

impl FlowTally {
    /// Fold `entries` into the running flows.
    pub fn record(&mut self, entries: &[LedgerEntry]) {
        for entry in entries {
            self.entries = self.entries.saturating_add(1);
            if entry.amount == 0 || entry.from == entry.to {
                self.malformed = self.malformed.saturating_add(1);
            }
            let amount = i128::from(entry.amount);
            let debit = self.flows.entry((entry.from, entry.asset)).or_insert(0);
            match debit.checked_sub(amount) {
                Some(v) => *debit = v,
                None => self.overflowed = true,
            }
            let credit = self.flows.entry((entry.to, entry.asset)).or_insert(0);
            match credit.checked_add(amount) {
                Some(v) => *credit = v,
                None => self.overflowed = true,
            }
        }
    }

    /// Entries recorded so far.
    pub const fn len(&self) -> usize {
        self.entries
    }

    /// Whether nothing has been recorded.
    pub const fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// Net flow of one asset into one account over everything recorded.
    pub fn balance(&self, account: Account, asset: Asset) -> i128 {
        self.flows.get(&(account, asset)).copied().unwrap_or(0)
    }

    /// Check that every recorded entry was well formed and every asset sums
    /// to zero.
    pub fn verify(&self) -> ConservationResult {
        if self.overflowed {
            return overflow_anomaly();
        }
        let mut totals: BTreeMap<Asset, i128> = BTreeMap::new();
        for ((_, asset), flow) in &self.flows {
            let total = totals.entry(*asset).or_insert(0);
            *total = match total.checked_add(*flow) {
                Some(v) => v,
                None => return overflow_anomaly(),
            };
        }
        let imbalances: BTreeMap<Asset, i128> =
            totals.into_iter().filter(|(_, total)| *total != 0).collect();

        if self.malformed == 0 && imbalances.is_empty() {
            ConservationResult::Balanced
        } else {
            let count = imbalances.len();
            let malformed = self.malformed;
            ConservationResult::Anomaly(LedgerAnomaly {
                imbalances,
                malformed,
                message: format!(
                    "LEDGER_ANOMALY: {count} asset(s) out of balance, {malformed} malformed entr(ies)",
                ),
            })
        }
    }
}

/// Check observed balance changes of tracked accounts against the journal.
///
/// `observed` maps `(account, asset)` to the change actually seen between
/// two snapshots. Every listed pair, and every tracked pair the journal
/// touches, must agree.
pub fn reconcile(
    entries: &[LedgerEntry],
    observed: &BTreeMap<(Account, Asset), i128>,
) -> ConservationResult {
    let Some(flows) = net_flows(entries) else {
        return overflow_anomaly();
    };

    let keys: BTreeSet<(Account, Asset)> = observed
        .keys()
        .copied()
        .chain(flows.keys().copied().filter(|(acct, _)| !acct.is_external()))
        .collect();

    let mut imbalances: BTreeMap<Asset, i128> = BTreeMap::new();
    for key in keys {
        let journal = flows.get(&key).copied().unwrap_or(0);
        let seen = observed.get(&key).copied().unwrap_or(0);
        if journal != seen {
            let diff = imbalances.entry(key.1).or_insert(0);
            *diff = diff.saturating_add(seen.saturating_sub(journal));
        }
    }

    if imbalances.is_empty() {
        ConservationResult::Balanced
    } else {
        ConservationResult::Anomaly(LedgerAnomaly {
            message: format!(
                "LEDGER_ANOMALY: observed balances differ from journal for {} asset(s)",
                imbalances.len()
            ),
            imbalances,
            malformed: 0,
        })
    }
}

fn overflow_anomaly() -> ConservationResult {
    ConservationResult::Anomaly(LedgerAnomaly {
        imbalances: BTreeMap::new(),
        malformed: 0,
        message: "LEDGER_ANOMALY: arithmetic overflow while summing flows".to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use kingdom_types::{EntryKind, LedgerEntryId, PlayerId, Resource, SettlementId};

    fn entry(asset: Asset, from: Account, to: Account, amount: u64) -> LedgerEntry {
        LedgerEntry {
            id: LedgerEntryId::new(),
            asset,
            from,
            to,
            amount,
            kind: EntryKind::MarketSale,
            reference_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn empty_journal_is_balanced() {
        assert_eq!(verify_conservation(&[]), ConservationResult::Balanced);
    }

    #[test]
    fn sale_flows_balance_with_market_counterparty() {
        let town = SettlementId::new();
        let seller = Account::Player(PlayerId::new());
        let wood = Asset::Resource(Resource::Wood);
        let entries = vec![
            entry(wood, seller, Account::Stock(town), 5),
            entry(Asset::Gold, Account::Market(town), seller, 5),
        ];
        assert!(verify_conservation(&entries).is_balanced());
        assert_eq!(account_balance(&entries, seller, Asset::Gold), 5);
        assert_eq!(account_balance(&entries, seller, wood), -5);
        assert_eq!(external_net(&entries, Asset::Gold), -5);
    }

    #[test]
    fn self_transfer_is_malformed() {
        let a = Account::Player(PlayerId::new());
        let result = verify_conservation(&[entry(Asset::Gold, a, a, 3)]);
        assert!(matches!(result, ConservationResult::Anomaly(ref a) if a.malformed == 1));
    }

    #[test]
    fn tally_carries_flows_across_batches() {
        let town = SettlementId::new();
        let seller = Account::Player(PlayerId::new());
        let mut tally = FlowTally::default();
        tally.record(&[entry(Asset::Gold, Account::Market(town), seller, 5)]);
        tally.record(&[entry(Asset::Gold, seller, Account::Treasury(town), 2)]);
        assert_eq!(tally.len(), 2);
        assert_eq!(tally.balance(seller, Asset::Gold), 3);
        assert!(tally.verify().is_balanced());

        tally.record(&[entry(Asset::Gold, seller, seller, 1)]);
        assert!(matches!(tally.verify(), ConservationResult::Anomaly(ref a) if a.malformed == 1));
    }

    #[test]
    fn reconcile_detects_unexplained_gold() {
        let player = Account::Player(PlayerId::new());
        let entries = vec![entry(Asset::Gold, Account::World, player, 10)];

        let mut observed = BTreeMap::new();
        observed.insert((player, Asset::Gold), 10);
        assert!(reconcile(&entries, &observed).is_balanced());

        observed.insert((player, Asset::Gold), 12);
        assert!(!reconcile(&entries, &observed).is_balanced());
    }

    #[test]
    fn reconcile_requires_journaled_accounts_to_be_observed() {
        let player = Account::Player(PlayerId::new());
        let entries = vec![entry(Asset::Gold, Account::World, player, 10)];
        assert!(!reconcile(&entries, &BTreeMap::new()).is_balanced());
    }
}
