//! Tunables for the market, market makers, and the job board.
//!
//! Plain structs with defaults that match the live game. The core crate
//! builds them from `kingdom-config.yaml`; tests construct them directly and
//! override single fields.

use std::time::Duration;

use chrono::TimeDelta;

/// Market pricing limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketConfig {
    /// Tax-free threshold used when neither buildings nor the settlement
    /// set one (default: 10).
    pub default_tax_free_up_to: u64,
    /// Upper bound on a building tool discount, in percent (default: 50).
    pub max_tool_discount_percent: u32,
    /// Largest daily treasury quota an owner may set (default: 2000).
    pub max_daily_quota: u64,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            default_tax_free_up_to: 10,
            max_tool_discount_percent: 50,
            max_daily_quota: 2000,
        }
    }
}

/// Market-maker staking rules.
///
/// The stake needed for a slot is `base + per_capita * online`, plus the
/// capital surcharge, clamped to `[min_stake, max_stake]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketMakerConfig {
    /// Stake with nobody online (default: 50).
    pub base_stake: u64,
    /// Extra stake per online player (default: 5).
    pub per_capita: u64,
    /// Extra stake in the capital (default: 50).
    pub capital_surcharge: u64,
    /// Lower clamp (default: 30).
    pub min_stake: u64,
    /// Upper clamp (default: 200).
    pub max_stake: u64,
    /// Commission percent granted to the holder (default: 10).
    pub percent: u8,
    /// Wall-clock length of a game day (default: 10 minutes).
    pub day_length: Duration,
}

impl Default for MarketMakerConfig {
    fn default() -> Self {
        Self {
            base_stake: 50,
            per_capita: 5,
            capital_surcharge: 50,
            min_stake: 30,
            max_stake: 200,
            percent: 10,
            day_length: Duration::from_secs(10 * 60),
        }
    }
}

impl MarketMakerConfig {
    /// Units of a resource needed to open a stake.
    pub fn threshold(&self, online: u32, is_capital: bool) -> u64 {
        let mut need = self
            .base_stake
            .saturating_add(self.per_capita.saturating_mul(u64::from(online)));
        if is_capital {
            need = need.saturating_add(self.capital_surcharge);
        }
        need.clamp(self.min_stake, self.max_stake.max(self.min_stake))
    }
}

/// Job generation and claim rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobConfig {
    /// Time between generation sweeps (default: 2 minutes).
    pub interval: Duration,
    /// How long a posted job stays open (default: 30 minutes).
    pub lifetime: Duration,
    /// Open jobs allowed per settlement, claimed ones included (default: 10).
    pub per_settlement_cap: usize,
    /// Jobs created per settlement per sweep (default: 3).
    pub batch_size: usize,
    /// Wait after abandoning before accepting again (default: 60 seconds).
    pub abandon_cooldown: Duration,
    /// Smallest random base quantity of a delivery job (default: 10).
    pub min_base_quantity: u64,
    /// Largest random base quantity of a delivery job (default: 30).
    pub max_base_quantity: u64,
    /// Floor on a delivery job's quantity (default: 5).
    pub min_quantity: u64,
    /// Delivery reward as a percent of market value (default: 110).
    pub reward_percent: u64,
    /// Floor on a delivery job's reward (default: 1).
    pub min_reward: u64,
    /// Courier reward per point of average price (default: 10).
    pub courier_reward_factor: u64,
    /// Floor on a courier reward (default: 5).
    pub courier_min_reward: u64,
    /// Draw weight of courier jobs against price-weighted deliveries
    /// (default: 1).
    pub courier_weight: u64,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2 * 60),
            lifetime: Duration::from_secs(30 * 60),
            per_settlement_cap: 10,
            batch_size: 3,
            abandon_cooldown: Duration::from_secs(60),
            min_base_quantity: 10,
            max_base_quantity: 30,
            min_quantity: 5,
            reward_percent: 110,
            min_reward: 1,
            courier_reward_factor: 10,
            courier_min_reward: 5,
            courier_weight: 1,
        }
    }
}

impl JobConfig {
    /// Job lifetime as a timestamp offset.
    pub fn lifetime_delta(&self) -> TimeDelta {
        TimeDelta::from_std(self.lifetime).unwrap_or(TimeDelta::MAX)
    }

    /// Abandon cooldown as a timestamp offset.
    pub fn cooldown_delta(&self) -> TimeDelta {
        TimeDelta::from_std(self.abandon_cooldown).unwrap_or(TimeDelta::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stake_threshold_grows_with_population() {
        let config = MarketMakerConfig::default();
        assert_eq!(config.threshold(0, false), 50);
        assert_eq!(config.threshold(4, false), 70);
        assert_eq!(config.threshold(4, true), 120);
        assert_eq!(config.threshold(1_000, false), 200);
    }

    #[test]
    fn stake_threshold_respects_the_floor() {
        let config = MarketMakerConfig {
            base_stake: 0,
            ..MarketMakerConfig::default()
        };
        assert_eq!(config.threshold(1, false), 30);
    }
}
