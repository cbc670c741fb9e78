//! PoP payouts for ALT blocks.
//!
//! A block that reached the reward settlement depth is scored by its
//! endorsements, the score is compared with the average score of the
//! blocks before it (the PoP difficulty) and the resulting reward is
//! split among the PoP miners that endorsed it.

use std::collections::BTreeMap;

use pop_common::{AltChainParams, PopForkParams, PopRewardsParams};

/// Reward units per 1.0 of reward.
pub const REWARD_UNIT: f64 = 100_000_000.0;

/// An endorsement as seen by the payout calculation.
#[derive(Debug, Clone, PartialEq)]
pub struct EndorsementProof<'a> {
    pub payout_info: &'a [u8],
    /// Height of the block of proof in the protecting chain.
    pub proof_height: u32,
}

pub struct PopRewards<'a> {
    rewards: &'a PopRewardsParams,
    pop: &'a PopForkParams,
}

impl<'a> PopRewards<'a> {
    pub fn new(params: &'a AltChainParams) -> Self {
        Self {
            rewards: &params.rewards,
            pop: &params.pop,
        }
    }

    fn best_proof_height(endorsements: &[EndorsementProof<'_>]) -> Option<u32> {
        endorsements.iter().map(|e| e.proof_height).min()
    }

    /// Score of one endorsement relative to the earliest one.
    fn endorsement_score(&self, proof_height: u32, best: u32) -> f64 {
        self.pop.relative_score(proof_height.saturating_sub(best))
    }

    /// Sum of the relative scores of a block's endorsements.
    pub fn block_score(&self, endorsements: &[EndorsementProof<'_>]) -> f64 {
        let Some(best) = Self::best_proof_height(endorsements) else {
            return 0.0;
        };
        endorsements.iter().map(|e| self.endorsement_score(e.proof_height, best)).sum()
    }

    /// Average of `scores` over the averaging interval, at least 1.0.
    pub fn calculate_difficulty(&self, scores: impl IntoIterator<Item = f64>) -> f64 {
        let interval = self.rewards.difficulty_averaging_interval.max(1);
        let total: f64 = scores.into_iter().take(interval as usize).sum();
        (total / f64::from(interval)).max(1.0)
    }

    pub fn round_for_height(&self, height: u32) -> u32 {
        if self.pop.is_keystone(height) {
            return self.rewards.keystone_round;
        }
        height % self.rewards.payout_rounds.max(1)
    }

    /// Total reward for the block at `height`.
    pub fn block_reward(&self, height: u32, score: f64, difficulty: f64) -> f64 {
        if score <= 0.0 {
            return 0.0;
        }
        let round = self.round_for_height(height);
        let keystone = self.pop.is_keystone(height);
        let curve = &self.rewards.curve;

        let mut ratio = if self.rewards.flat_score_round_use && round == self.rewards.flat_score_round {
            score
        } else {
            score / difficulty.max(1.0)
        };
        let (threshold, slope) = if keystone {
            (self.rewards.max_score_threshold_keystone, curve.slope_keystone)
        } else {
            (self.rewards.max_score_threshold_normal, curve.slope_normal)
        };
        ratio = ratio.min(threshold);
        if ratio > curve.start_of_slope {
            ratio -= (ratio - curve.start_of_slope) * slope;
        }

        let round_ratio = self.rewards.round_ratios.get(round as usize).copied().unwrap_or(0.0);
        ratio * round_ratio
    }

    /// Payout per identity for the block at `height` with the given
    /// endorsements.
    pub fn calculate_payouts(
        &self,
        height: u32,
        endorsements: &[EndorsementProof<'_>],
        difficulty: f64,
    ) -> BTreeMap<Vec<u8>, i64> {
        let mut payouts = BTreeMap::new();
        let Some(best) = Self::best_proof_height(endorsements) else {
            return payouts;
        };
        let score = self.block_score(endorsements);
        let reward = self.block_reward(height, score, difficulty);
        if reward <= 0.0 {
            return payouts;
        }

        for endorsement in endorsements {
            let share = self.endorsement_score(endorsement.proof_height, best) / score;
            let amount = (share * reward * REWARD_UNIT) as i64;
            if amount > 0 {
                *payouts.entry(endorsement.payout_info.to_vec()).or_insert(0) += amount;
            }
        }
        payouts
    }
}
