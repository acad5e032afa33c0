//! Emission curve and block size penalty.

use std::fmt;

use crate::money::Amount;
use crate::params::ConsensusParams;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BlockReward {
    /// Amount the base transaction may pay out (penalized base plus fees).
    pub reward: Amount,
    /// Net change of the generated coin total, static reward included.
    pub emission_change: i64,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RewardError {
    BlockTooBig { size: u64, limit: u64 },
}

impl fmt::Display for RewardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RewardError::BlockTooBig { size, limit } => {
                write!(f, "block size {size} exceeds twice the median ({limit})")
            }
        }
    }
}

impl std::error::Error for RewardError {}

/// Scales `amount` down for blocks larger than `median`:
/// `amount * (2m - s) * s / m²`. Sizes beyond `2m` earn nothing.
pub fn penalized_amount(amount: Amount, median_size: u64, current_block_size: u64) -> Amount {
    if amount == 0 || median_size == 0 || current_block_size <= median_size {
        return amount;
    }
    let median = u128::from(median_size);
    let size = u128::from(current_block_size);
    if size >= 2 * median {
        return 0;
    }
    let scaled = u128::from(amount) * (2 * median - size) * size / (median * median);
    scaled as Amount
}

pub fn block_reward(
    params: &ConsensusParams,
    version: u8,
    median_size: u64,
    current_block_size: u64,
    already_generated_coins: Amount,
    fee: Amount,
) -> Result<BlockReward, RewardError> {
    let rules = &params.rules;

    let mut base = if already_generated_coins == 0 && params.genesis.reward != 0 {
        params.genesis.reward
    } else {
        params.money_supply.saturating_sub(already_generated_coins) >> params.emission_speed_factor
    };
    let cut_off = rules.miner_reward.cut_off(version);
    if cut_off > 0 {
        base -= base % cut_off;
    }

    let median = median_size.max(rules.miner_reward.full_reward_zone(version));
    let limit = median.saturating_mul(2);
    if current_block_size > limit {
        return Err(RewardError::BlockTooBig {
            size: current_block_size,
            limit,
        });
    }

    let penalized_base = penalized_amount(base, median, current_block_size);
    let penalized_fee = if fees_penalized(params, version) {
        penalized_amount(fee, median, current_block_size)
    } else {
        fee
    };
    let static_reward = if rules.static_reward.is_enabled(version) {
        rules.static_reward.amount(version)
    } else {
        0
    };

    let emission_change =
        penalized_base as i64 + static_reward as i64 - (fee - penalized_fee) as i64;
    Ok(BlockReward {
        reward: penalized_base + penalized_fee,
        emission_change,
    })
}

// Fees share the size penalty from the second registered version on.
fn fees_penalized(params: &ConsensusParams, version: u8) -> bool {
    params
        .rules
        .block_versions
        .successor(params.genesis_version())
        .map(|second| version >= second)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::{MONEY_SUPPLY, PREMINE};
    use crate::params::{consensus_params, Network};

    #[test]
    fn genesis_pays_premine() {
        let params = consensus_params(Network::Mainnet);
        let reward = block_reward(&params, 1, 0, 100, 0, 0).expect("reward");
        assert_eq!(reward.reward, PREMINE);
        assert_eq!(reward.emission_change, PREMINE as i64);
    }

    #[test]
    fn base_follows_emission_speed() {
        let params = consensus_params(Network::Mainnet);
        let reward = block_reward(&params, 1, 0, 100, PREMINE, 0).expect("reward");
        assert_eq!(reward.reward, (MONEY_SUPPLY - PREMINE) >> 21);
    }

    #[test]
    fn cut_off_truncates_base() {
        let params = consensus_params(Network::Mainnet);
        let reward = block_reward(&params, 2, 0, 100, PREMINE, 0).expect("reward");
        let raw = (MONEY_SUPPLY - PREMINE) >> 21;
        assert_eq!(reward.reward, raw - raw % 100);
        assert_eq!(
            reward.emission_change,
            reward.reward as i64 + params.rules.static_reward.amount(2) as i64
        );
    }

    #[test]
    fn penalty_curve() {
        assert_eq!(penalized_amount(1_000, 100, 100), 1_000);
        assert_eq!(penalized_amount(1_000, 100, 150), 750);
        assert_eq!(penalized_amount(1_000, 100, 200), 0);
        assert_eq!(penalized_amount(0, 100, 150), 0);
    }

    #[test]
    fn oversized_block_is_rejected() {
        let params = consensus_params(Network::Mainnet);
        let zone = params.rules.miner_reward.full_reward_zone(1);
        assert_eq!(
            block_reward(&params, 1, 0, 2 * zone + 1, PREMINE, 0),
            Err(RewardError::BlockTooBig {
                size: 2 * zone + 1,
                limit: 2 * zone
            })
        );
    }

    #[test]
    fn fees_are_penalized_after_first_version() {
        let params = consensus_params(Network::Mainnet);
        let zone = params.rules.miner_reward.full_reward_zone(1);
        let size = zone + zone / 2;
        let v1 = block_reward(&params, 1, zone, size, PREMINE, 1_000).expect("v1");
        let base_v1 = penalized_amount((MONEY_SUPPLY - PREMINE) >> 21, zone, size);
        assert_eq!(v1.reward, base_v1 + 1_000);

        let zone2 = params.rules.miner_reward.full_reward_zone(2);
        let size2 = zone2 + zone2 / 2;
        let v2 = block_reward(&params, 2, zone2, size2, PREMINE, 1_000).expect("v2");
        let raw = (MONEY_SUPPLY - PREMINE) >> 21;
        let base_v2 = penalized_amount(raw - raw % 100, zone2, size2);
        assert_eq!(v2.reward, base_v2 + 750);
    }
}
