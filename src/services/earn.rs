//! Earn calculations.
//!
//! Pure functions turning a transaction amount into a balance adjustment and a
//! new balance into a number of rewards. All values are integers: pence for
//! accumulator campaigns, hundredths of a stamp for stamp campaigns.

use crate::models::campaign::{EarnRule, LoyaltyType, RewardRule};

/// Balance adjustment a transaction earns under `earn_rule`.
///
/// Returns `None` when the transaction earns nothing. Refunds only earn a
/// (negative) adjustment on accumulator campaigns with a refund window.
pub fn adjustment_amount(
    amount: i64,
    loyalty_type: LoyaltyType,
    earn_rule: &EarnRule,
    allocation_window: i32,
) -> Option<i64> {
    match loyalty_type {
        LoyaltyType::Stamps => (amount >= earn_rule.threshold)
            .then(|| apply_multiplier(earn_rule.increment.unwrap_or(0), earn_rule)),
        LoyaltyType::Accumulator => accumulator_amount(amount, earn_rule, allocation_window),
    }
}

fn accumulator_amount(amount: i64, earn_rule: &EarnRule, allocation_window: i32) -> Option<i64> {
    let acceptable_refund = amount < 0 && allocation_window > 0;

    if earn_rule.max_amount > 0 && amount.abs() > earn_rule.max_amount {
        if acceptable_refund {
            Some(-earn_rule.max_amount)
        } else if amount > 0 {
            Some(earn_rule.max_amount)
        } else {
            None
        }
    } else if acceptable_refund || amount >= earn_rule.threshold {
        Some(apply_multiplier(amount, earn_rule))
    } else {
        None
    }
}

/// `value * multiplier`, truncated toward zero.
fn apply_multiplier(value: i64, earn_rule: &EarnRule) -> i64 {
    value * earn_rule.multiplier_hundredths / 100
}

/// What one campaign made of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CampaignEarn {
    pub campaign_slug: String,
    pub loyalty_type: LoyaltyType,
    /// Accepted adjustment, or 0.
    pub amount: i64,
    pub threshold: i64,
    pub accepted: bool,
}

/// Rewards unlocked by a positive adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewardsAchieved {
    pub count: i64,
    /// The per-transaction reward cap limited `count`.
    pub cap_reached: bool,
}

impl RewardsAchieved {
    /// Amount taken off the balance for these rewards.
    ///
    /// When the cap is reached the holder pays the whole adjustment, so anything
    /// earned above the cap is not carried over.
    pub fn cost(&self, reward_rule: &RewardRule, adjustment: i64) -> i64 {
        if self.cap_reached {
            adjustment
        } else {
            self.count * reward_rule.reward_goal
        }
    }
}

pub fn rewards_achieved(reward_rule: &RewardRule, new_balance: i64, adjustment: i64) -> RewardsAchieved {
    if reward_rule.reward_goal <= 0 {
        return RewardsAchieved {
            count: 0,
            cap_reached: false,
        };
    }

    let count = new_balance / reward_rule.reward_goal;
    match reward_rule.reward_cap.map(i64::from) {
        Some(cap) if count > cap || adjustment > cap * reward_rule.reward_goal => RewardsAchieved {
            count: cap,
            cap_reached: true,
        },
        _ => RewardsAchieved {
            count,
            cap_reached: false,
        },
    }
}
