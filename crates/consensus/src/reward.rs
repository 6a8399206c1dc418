//! Subsidy halving and the miner/supernode reward split.

use capcore_types::Amount;

use crate::{enforce_fork, enforce_fork_warmup, ChainParams, ConsensusError, Result};

/// Post-fork subsidies below `4 x min_halved_subsidy` clamp to zero.
const POST_FORK_MIN_FACTOR: u64 = 4;

/// The `(miner, supernode)` reward for a block at `height`.
///
/// Pre-fork, the split follows `(has_valid_binding, has_staking)`; inside
/// the warm-up window binding is ignored and the no-game-reward variant
/// applies. Post-fork, minting without a binding is an error and the split
/// is 90/10.
pub fn calc_block_subsidy(
    params: &ChainParams,
    height: u64,
    has_valid_binding: bool,
    has_staking: bool,
) -> Result<(Amount, Amount)> {
    if !enforce_fork(params, height) {
        let mut has_valid_binding = has_valid_binding;
        let mut has_game_reward = true;
        if enforce_fork_warmup(params, height) {
            has_valid_binding = false;
            has_game_reward = false;
        }
        return calc_subsidy_pre_fork(params, height, has_valid_binding, has_staking, has_game_reward);
    }

    if !has_valid_binding {
        return Err(ConsensusError::BindingRequired);
    }
    calc_subsidy_post_fork(params, height, has_staking)
}

/// Halving shift count: `floor(log2((height-1)/interval + 1))`.
fn halving_shift(height: u64, interval: u64) -> u32 {
    let t = (height - 1) / interval + 1;
    63 - t.leading_zeros()
}

fn halved_subsidy(params: &ChainParams, height: u64, floor: Amount) -> Result<Amount> {
    if params.subsidy_halving_interval == 0 {
        return Ok(params.base_subsidy);
    }
    let shift = halving_shift(height, params.subsidy_halving_interval);
    let subsidy = Amount::from_grains(params.base_subsidy.grains() >> shift)?;
    if subsidy < floor {
        return Ok(Amount::ZERO);
    }
    Ok(subsidy)
}

fn calc_subsidy_pre_fork(
    params: &ChainParams,
    height: u64,
    has_valid_binding: bool,
    has_staking: bool,
    has_game_reward: bool,
) -> Result<(Amount, Amount)> {
    let subsidy = halved_subsidy(params, height, params.min_halved_subsidy)?;
    if subsidy.is_zero() {
        return Ok((Amount::ZERO, Amount::ZERO));
    }
    alloc_subsidy_pre_fork(subsidy, has_valid_binding, has_staking, has_game_reward)
}

/// Pre-fork split: the binding game pays the miner 81.25% when bound and
/// 18.75% when not; staking supernodes take the complement.
///
/// The `has_game_reward = false` branch pays the miner a flat 18.75% and
/// mirrors it to the supernode only when staking exists. It is reachable
/// exactly inside the warm-up window, which is the only caller that clears
/// the flag.
fn alloc_subsidy_pre_fork(
    subsidy: Amount,
    has_valid_binding: bool,
    has_staking: bool,
    has_game_reward: bool,
) -> Result<(Amount, Amount)> {
    if !has_game_reward {
        let miner = subsidy.mul_div(1_875, 10_000)?;
        let supernode = if has_staking { miner } else { Amount::ZERO };
        return Ok((miner, supernode));
    }

    let miner_share = if has_valid_binding { 8_125 } else { 1_875 };
    let miner = subsidy.mul_div(miner_share, 10_000)?;
    let supernode = if has_staking {
        subsidy.checked_sub(miner)?
    } else {
        Amount::ZERO
    };
    Ok((miner, supernode))
}

fn calc_subsidy_post_fork(
    params: &ChainParams,
    height: u64,
    has_staking: bool,
) -> Result<(Amount, Amount)> {
    let mut effective_height = height;
    if params.subsidy_halving_interval != 0 && params.fake_subsidy_start_height != 0 {
        if height < params.full_fork_height {
            return Err(ConsensusError::UnexpectedHeight(height));
        }
        effective_height = params.fake_subsidy_start_height + height - params.full_fork_height;
    }

    let floor = params
        .min_halved_subsidy
        .checked_mul(POST_FORK_MIN_FACTOR)?;
    let subsidy = halved_subsidy(params, effective_height, floor)?;
    if subsidy.is_zero() {
        return Ok((Amount::ZERO, Amount::ZERO));
    }

    // 10% to staking supernodes when any exist, 90% to the miner either way.
    let supernode = if has_staking {
        subsidy.checked_div(10)?
    } else {
        Amount::ZERO
    };
    let miner = if supernode.is_zero() {
        subsidy.mul_div(9, 10)?
    } else {
        subsidy.checked_sub(supernode)?
    };
    Ok((miner, supernode))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_period_subsidy_split() {
        // Mainnet, first halving period, bound plot, no staking:
        // miner takes 81.25% of 102.4 coins = 83.2 coins.
        let params = ChainParams::mainnet();
        let (miner, supernode) = calc_block_subsidy(&params, 13_440, true, false).unwrap();
        assert_eq!(miner.grains(), 8_320_000_000);
        assert!(supernode.is_zero());
    }

    #[test]
    fn test_unbound_miner_gets_small_share() {
        let params = ChainParams::mainnet();
        let (miner, supernode) = calc_block_subsidy(&params, 13_440, false, false).unwrap();
        assert_eq!(miner.grains(), 1_920_000_000); // 18.75%
        assert!(supernode.is_zero());
    }

    #[test]
    fn test_staking_takes_complement() {
        let params = ChainParams::mainnet();
        let (miner, supernode) = calc_block_subsidy(&params, 13_440, true, true).unwrap();
        assert_eq!(miner.grains(), 8_320_000_000);
        assert_eq!(supernode.grains(), 10_240_000_000 - 8_320_000_000);
    }

    #[test]
    fn test_halving_shift() {
        assert_eq!(halving_shift(1, 13_440), 0);
        assert_eq!(halving_shift(13_440, 13_440), 0);
        assert_eq!(halving_shift(13_441, 13_440), 1);
        assert_eq!(halving_shift(4 * 13_440 + 1, 13_440), 2);
    }

    #[test]
    fn test_warmup_regime_ignores_binding() {
        let params = ChainParams::regtest_with_forks(20, 1_000_000);
        // Inside the warm-up window the binding flag is ignored and the
        // flat 18.75% applies.
        let (bound, _) = calc_block_subsidy(&params, 25, true, false).unwrap();
        let (unbound, _) = calc_block_subsidy(&params, 25, false, false).unwrap();
        assert_eq!(bound, unbound);

        // With staking, the supernode mirrors the miner share.
        let (miner, supernode) = calc_block_subsidy(&params, 25, false, true).unwrap();
        assert_eq!(miner, supernode);
    }

    #[test]
    fn test_post_fork_requires_binding() {
        let params = ChainParams::regtest_with_forks(20, 40);
        assert!(matches!(
            calc_block_subsidy(&params, 40, false, false),
            Err(ConsensusError::BindingRequired)
        ));
    }

    #[test]
    fn test_post_fork_split() {
        let params = ChainParams::regtest_with_forks(20, 40);
        let (miner, supernode) = calc_block_subsidy(&params, 40, true, true).unwrap();
        assert_eq!(supernode.grains() * 9, miner.grains());

        let (miner_only, supernode_zero) = calc_block_subsidy(&params, 40, true, false).unwrap();
        assert!(supernode_zero.is_zero());
        assert_eq!(miner_only, miner);
    }

    #[test]
    fn test_mainnet_continuity_skew() {
        let params = ChainParams::mainnet();
        // Below the fork the skewed path must not be consulted.
        assert!(calc_block_subsidy(&params, 13_440, true, false).is_ok());
        // At the fork, the skewed height lands back in period 5 and pays a
        // period-5 subsidy rather than a period-7 one.
        let (miner, _) = calc_block_subsidy(&params, 1_500_000, true, false).unwrap();
        assert!(!miner.is_zero());
        let shift = halving_shift(params.fake_subsidy_start_height, 13_440);
        let expected_subsidy = 10_240_000_000u128 >> shift;
        assert_eq!(miner.grains(), expected_subsidy * 9 / 10);
    }

    #[test]
    fn test_deep_heights_pay_zero() {
        let params = ChainParams::mainnet();
        let (miner, supernode) = calc_block_subsidy(&params, 13_440 * 700, true, false).unwrap();
        assert!(miner.is_zero() && supernode.is_zero());
    }
}
