//! Price arithmetic shared by sales, purchases, and commissions.
//!
//! All results truncate at each step. Small trades at or below the tax-free
//! threshold are untaxed in both directions.

use kingdom_types::{BuildingBuffs, Settlement};

use crate::error::EconomyError;

/// The tax-free threshold that applies in a settlement.
///
/// A building buff wins over the settlement's own setting, which wins over
/// the market default. Zero means unset at every level.
pub const fn tax_free_threshold(settlement: &Settlement, buffs: &BuildingBuffs, default: u64) -> u64 {
    if buffs.tax_free_up_to > 0 {
        buffs.tax_free_up_to
    } else if settlement.tax_free_up_to > 0 {
        settlement.tax_free_up_to
    } else {
        default
    }
}

/// What a seller receives for `gross` after tax.
pub fn sale_net(gross: u64, tax_rate: u8, threshold: u64) -> Result<u64, EconomyError> {
    if gross <= threshold {
        return Ok(gross);
    }
    let keep = 100_u64.saturating_sub(u64::from(tax_rate.min(100)));
    gross
        .checked_mul(keep)
        .map(|v| v / 100)
        .ok_or_else(|| EconomyError::overflow("sale net"))
}

/// What a buyer pays for `gross` after tax.
pub fn buy_cost(gross: u64, tax_rate: u8, threshold: u64) -> Result<u64, EconomyError> {
    if gross <= threshold {
        return Ok(gross);
    }
    let pay = 100_u64.saturating_add(u64::from(tax_rate.min(100)));
    gross
        .checked_mul(pay)
        .map(|v| v / 100)
        .ok_or_else(|| EconomyError::overflow("purchase cost"))
}

/// Unit price of a tool after the building discount, rounded up.
pub fn discounted_tool_price(base: u64, discount_percent: u32, max_discount: u32) -> Result<u64, EconomyError> {
    let discount = u64::from(discount_percent.min(max_discount).min(100));
    base.checked_mul(100_u64.saturating_sub(discount))
        .map(|v| v.div_ceil(100))
        .ok_or_else(|| EconomyError::overflow("tool price"))
}

/// Market-maker cut of a gross trade value.
pub fn commission(gross: u64, percent: u8) -> Result<u64, EconomyError> {
    gross
        .checked_mul(u64::from(percent))
        .map(|v| v / 100)
        .ok_or_else(|| EconomyError::overflow("commission"))
}

/// `quantity * unit` with overflow reported against `context`.
pub fn gross(quantity: u64, unit: u64, context: &str) -> Result<u64, EconomyError> {
    quantity
        .checked_mul(unit)
        .ok_or_else(|| EconomyError::overflow(context))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn small_trades_are_untaxed() {
        assert_eq!(sale_net(5, 10, 10).unwrap(), 5);
        assert_eq!(sale_net(10, 10, 10).unwrap(), 10);
        assert_eq!(buy_cost(10, 10, 10).unwrap(), 10);
    }

    #[test]
    fn tax_truncates() {
        assert_eq!(sale_net(25, 12, 10).unwrap(), 22);
        assert_eq!(buy_cost(25, 12, 10).unwrap(), 28);
        assert_eq!(sale_net(11, 100, 10).unwrap(), 0);
    }

    #[test]
    fn tool_discount_is_capped_and_rounds_up() {
        assert_eq!(discounted_tool_price(25, 0, 50).unwrap(), 25);
        assert_eq!(discounted_tool_price(25, 10, 50).unwrap(), 23);
        assert_eq!(discounted_tool_price(25, 90, 50).unwrap(), 13);
    }

    #[test]
    fn commission_floors() {
        assert_eq!(commission(7, 10).unwrap(), 0);
        assert_eq!(commission(19, 10).unwrap(), 1);
        assert!(commission(u64::MAX, 10).is_err());
    }

    #[test]
    fn threshold_precedence() {
        let mut buffs = BuildingBuffs::default();
        let mut s = kingdom_world::SettlementRules::default().blank(
            kingdom_types::SettlementId::new(),
            "Mill",
            chrono::Utc::now(),
        );
        assert_eq!(tax_free_threshold(&s, &buffs, 10), 10);
        s.tax_free_up_to = 4;
        assert_eq!(tax_free_threshold(&s, &buffs, 10), 4);
        buffs.tax_free_up_to = 30;
        assert_eq!(tax_free_threshold(&s, &buffs, 10), 30);
    }
}
