//! Refund absorption.
//!
//! A refund on an accumulator campaign removes value from the account holder.
//! The shortfall is taken, in order, from:
//!
//! 1. a single pending reward whose slush covers all of it
//! 2. the slush of every pending reward
//! 3. the current balance
//! 4. the pending rewards themselves
//!
//! Whatever is left is reported as not recouped. Pending rewards are expected
//! newest first.

use crate::models::account_holder::PendingReward;
use uuid::Uuid;

/// Pending rewards removed by a refund.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovedRewards {
    pub pending_reward_uuid: Uuid,
    pub count: i32,
    /// No rewards remain and the row must be deleted.
    pub deleted: bool,
}

/// Change of a pending reward's total cost to user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CostUpdate {
    pub pending_reward_uuid: Uuid,
    pub original_total_cost_to_user: i64,
    pub new_total_cost_to_user: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefundOutcome {
    pub balance: i64,
    pub not_recouped: i64,
    pub removed: Vec<RemovedRewards>,
    pub cost_updates: Vec<CostUpdate>,
}

impl RefundOutcome {
    pub fn is_removed(&self, pending_reward_uuid: Uuid) -> bool {
        self.removed
            .iter()
            .any(|r| r.pending_reward_uuid == pending_reward_uuid)
    }

    /// Cost updates of pending rewards that kept all of their rewards.
    pub fn cost_updates_of_kept(&self) -> impl Iterator<Item = &CostUpdate> {
        self.cost_updates
            .iter()
            .filter(|u| !self.is_removed(u.pending_reward_uuid))
    }
}

/// Absorb `shortfall` (a positive amount) from the pending rewards and balance.
///
/// `pending_rewards` is updated in place; rewards with `count == 0` afterwards
/// are listed as deleted in the outcome.
pub fn absorb_refund(
    shortfall: i64,
    balance: i64,
    pending_rewards: &mut [PendingReward],
) -> RefundOutcome {
    let mut outcome = RefundOutcome {
        balance,
        ..RefundOutcome::default()
    };
    let mut shortfall = shortfall;

    if let Some(reward) = pending_rewards.iter_mut().find(|r| r.slush() >= shortfall) {
        let slush = reward.slush() - shortfall;
        reduce_slush(reward, slush, &mut outcome);
        return outcome;
    }

    for reward in pending_rewards.iter_mut().filter(|r| r.slush() > 0) {
        let slush = reward.slush();
        if slush >= shortfall {
            reduce_slush(reward, slush - shortfall, &mut outcome);
            return outcome;
        }
        shortfall -= slush;
        reduce_slush(reward, 0, &mut outcome);
    }

    if outcome.balance >= shortfall {
        outcome.balance -= shortfall;
        return outcome;
    }
    shortfall -= outcome.balance;
    outcome.balance = 0;

    for reward in pending_rewards.iter_mut() {
        if shortfall == 0 {
            break;
        }

        let remainder = reward.total_value() - shortfall;
        if remainder > 0 {
            outcome.balance = remainder % reward.value;
            shortfall = 0;

            let kept = i32::try_from(remainder / reward.value).unwrap_or(reward.count);
            outcome.removed.push(RemovedRewards {
                pending_reward_uuid: reward.pending_reward_uuid,
                count: reward.count - kept,
                deleted: kept == 0,
            });
            reward.count = kept;
            reward.set_slush(0);
        } else {
            shortfall -= reward.total_value();
            outcome.removed.push(RemovedRewards {
                pending_reward_uuid: reward.pending_reward_uuid,
                count: reward.count,
                deleted: true,
            });
            reward.count = 0;
            reward.total_cost_to_user = 0;
        }
    }

    outcome.not_recouped = shortfall;
    outcome
}

fn reduce_slush(reward: &mut PendingReward, slush: i64, outcome: &mut RefundOutcome) {
    let original = reward.total_cost_to_user;
    reward.set_slush(slush);
    outcome.cost_updates.push(CostUpdate {
        pending_reward_uuid: reward.pending_reward_uuid,
        original_total_cost_to_user: original,
        new_total_cost_to_user: reward.total_cost_to_user,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    /// Build pending rewards from `(count, value, total_cost_to_user)`, oldest
    /// first, and return them newest first as the service loads them.
    fn pending(specs: &[(i32, i64, i64)]) -> Vec<PendingReward> {
        let mut rewards: Vec<PendingReward> = specs
            .iter()
            .enumerate()
            .map(|(i, &(count, value, total_cost_to_user))| PendingReward {
                id: i as i64 + 1,
                pending_reward_uuid: Uuid::new_v4(),
                account_holder_id: 1,
                campaign_id: 1,
                reward_config_id: 1,
                created_date: Utc::now(),
                conversion_date: Utc::now(),
                value,
                count,
                total_cost_to_user,
            })
            .collect();
        rewards.reverse();
        rewards
    }

    /// `(count, total_cost_to_user)` of the remaining rewards, oldest first.
    fn remaining(rewards: &[PendingReward]) -> Vec<(i32, i64)> {
        rewards
            .iter()
            .rev()
            .filter(|r| r.count > 0)
            .map(|r| (r.count, r.total_cost_to_user))
            .collect()
    }

    #[test]
    fn shortfall_without_pending_rewards_empties_balance() {
        let mut rewards = pending(&[]);
        let outcome = absorb_refund(5000, 2000, &mut rewards);
        assert_eq!(outcome.balance, 0);
        assert_eq!(outcome.not_recouped, 3000);
    }

    #[test]
    fn single_reward_is_deleted_and_rest_not_recouped() {
        let mut rewards = pending(&[(1, 20000, 20000)]);
        let outcome = absorb_refund(25000, 2000, &mut rewards);
        assert_eq!(outcome.balance, 0);
        assert_eq!(outcome.not_recouped, 3000);
        assert!(remaining(&rewards).is_empty());
        assert_eq!(outcome.removed.len(), 1);
        assert!(outcome.removed[0].deleted);
    }

    #[test]
    fn exact_cover_deletes_every_reward() {
        let mut rewards = pending(&[(2, 10000, 20000), (2, 10000, 25000)]);
        let outcome = absorb_refund(47000, 2000, &mut rewards);
        assert_eq!(outcome.balance, 0);
        assert_eq!(outcome.not_recouped, 0);
        assert!(remaining(&rewards).is_empty());
        assert_eq!(outcome.removed.iter().filter(|r| r.deleted).count(), 2);
    }

    #[test]
    fn older_reward_slush_covers_whole_shortfall() {
        let mut rewards = pending(&[(3, 10000, 50000), (2, 10000, 20000)]);
        let outcome = absorb_refund(5000, 2000, &mut rewards);
        assert_eq!(outcome.balance, 2000);
        assert_eq!(remaining(&rewards), vec![(3, 45000), (2, 20000)]);
        assert_eq!(outcome.cost_updates.len(), 1);
        assert_eq!(outcome.cost_updates[0].original_total_cost_to_user, 50000);
        assert_eq!(outcome.cost_updates[0].new_total_cost_to_user, 45000);
    }

    #[test]
    fn newest_reward_slush_is_used_first() {
        let mut rewards = pending(&[(2, 10000, 50000), (2, 10000, 25000)]);
        let outcome = absorb_refund(5000, 2000, &mut rewards);
        assert_eq!(outcome.balance, 2000);
        assert_eq!(remaining(&rewards), vec![(2, 50000), (2, 20000)]);
    }

    #[test]
    fn collective_slush_covers_shortfall() {
        let mut rewards = pending(&[(3, 10000, 31000), (2, 10000, 20500)]);
        let outcome = absorb_refund(1500, 2000, &mut rewards);
        assert_eq!(outcome.balance, 2000);
        assert_eq!(remaining(&rewards), vec![(3, 30000), (2, 20000)]);
        assert_eq!(outcome.cost_updates.len(), 2);
    }

    #[test]
    fn collective_slush_leaves_part_of_older_slush() {
        let mut rewards = pending(&[(3, 10000, 31000), (2, 10000, 21000)]);
        let outcome = absorb_refund(1500, 2000, &mut rewards);
        assert_eq!(outcome.balance, 2000);
        assert_eq!(remaining(&rewards), vec![(3, 30500), (2, 20000)]);
    }

    #[test]
    fn slush_then_balance() {
        let mut rewards = pending(&[(3, 10000, 31000), (2, 10000, 20500)]);
        let outcome = absorb_refund(2500, 2000, &mut rewards);
        assert_eq!(outcome.balance, 1000);
        assert_eq!(remaining(&rewards), vec![(3, 30000), (2, 20000)]);
        assert_eq!(outcome.not_recouped, 0);
    }

    #[test]
    fn slush_then_whole_balance() {
        let mut rewards = pending(&[(3, 10000, 31000), (2, 10000, 21000)]);
        let outcome = absorb_refund(2500, 500, &mut rewards);
        assert_eq!(outcome.balance, 0);
        assert_eq!(remaining(&rewards), vec![(3, 30000), (2, 20000)]);
        assert_eq!(outcome.not_recouped, 0);
    }

    #[test]
    fn single_reward_slush_then_balance() {
        let mut rewards = pending(&[(2, 10000, 30000)]);
        let outcome = absorb_refund(11000, 2000, &mut rewards);
        assert_eq!(outcome.balance, 1000);
        assert_eq!(remaining(&rewards), vec![(2, 20000)]);
    }

    #[test]
    fn newest_reward_loses_one_count() {
        let mut rewards = pending(&[(3, 10000, 30000), (2, 10000, 30000)]);
        let outcome = absorb_refund(15000, 2000, &mut rewards);
        assert_eq!(outcome.balance, 7000);
        assert_eq!(remaining(&rewards), vec![(3, 30000), (1, 10000)]);
        assert_eq!(outcome.removed.len(), 1);
        assert_eq!(outcome.removed[0].count, 1);
        assert!(!outcome.removed[0].deleted);
    }

    #[test]
    fn all_slush_and_balance_then_one_count() {
        let mut rewards = pending(&[(3, 10000, 35000), (2, 10000, 25000)]);
        let outcome = absorb_refund(15000, 2000, &mut rewards);
        assert_eq!(outcome.balance, 7000);
        assert_eq!(remaining(&rewards), vec![(3, 30000), (1, 10000)]);
    }

    #[test]
    fn newest_deleted_older_reduced() {
        let mut rewards = pending(&[(2, 10000, 27000), (2, 10000, 25000)]);
        let outcome = absorb_refund(40000, 2000, &mut rewards);
        assert_eq!(outcome.balance, 4000);
        assert_eq!(remaining(&rewards), vec![(1, 10000)]);
        assert_eq!(outcome.not_recouped, 0);
    }

    #[test]
    fn balance_alone_covers_shortfall() {
        let mut rewards = pending(&[(3, 10000, 30000), (2, 10000, 20000)]);
        let outcome = absorb_refund(1500, 2000, &mut rewards);
        assert_eq!(outcome.balance, 500);
        assert_eq!(remaining(&rewards), vec![(3, 30000), (2, 20000)]);
        assert!(outcome.removed.is_empty());
        assert!(outcome.cost_updates.is_empty());
    }

    #[test]
    fn balance_alone_without_pending_rewards() {
        let mut rewards = pending(&[]);
        let outcome = absorb_refund(1500, 2000, &mut rewards);
        assert_eq!(outcome.balance, 500);
        assert_eq!(outcome.not_recouped, 0);
    }

    #[test]
    fn remainder_below_reward_value_becomes_balance() {
        let mut rewards = pending(&[(3, 10000, 30000), (2, 10000, 20000)]);
        let outcome = absorb_refund(12500, 2000, &mut rewards);
        assert_eq!(outcome.balance, 9500);
        assert_eq!(remaining(&rewards), vec![(3, 30000)]);
        assert_eq!(outcome.removed.len(), 1);
        assert!(outcome.removed[0].deleted);
        assert_eq!(outcome.removed[0].count, 2);
    }

    #[test]
    fn shortfall_spanning_two_rewards() {
        let mut rewards = pending(&[(3, 10000, 30000), (2, 10000, 20000)]);
        let outcome = absorb_refund(30000, 2000, &mut rewards);
        assert_eq!(outcome.balance, 2000);
        assert_eq!(remaining(&rewards), vec![(2, 20000)]);
        assert_eq!(outcome.not_recouped, 0);
    }

    #[test]
    fn reduced_rewards_are_excluded_from_cost_updates() {
        let mut rewards = pending(&[(2, 10000, 27000), (2, 10000, 25000)]);
        let outcome = absorb_refund(40000, 2000, &mut rewards);
        assert_eq!(outcome.cost_updates.len(), 2);
        assert_eq!(outcome.cost_updates_of_kept().count(), 0);
    }
}
