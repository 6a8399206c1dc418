//! Fork gates and binding prices.

use capcore_types::{Amount, BLOCK_VERSION_V1, BLOCK_VERSION_V2};
use once_cell::sync::Lazy;

use crate::{ChainParams, ConsensusError, Result};

/// Number of 32-GiB units in one PiB.
const UNITS_32G_PER_PIB: u64 = (1u64 << 50) >> 35;

/// Whether the full fork rules apply at `height`.
///
/// From this gate on: binding is required to mint, pool-pk coinbase
/// assignments are honored, PoS proofs are allowed, and the new reward
/// split applies.
pub fn enforce_fork(params: &ChainParams, height: u64) -> bool {
    height >= params.full_fork_height
}

/// Whether the warm-up fork rules apply at `height`.
///
/// From this gate on: the old binding flow is disabled, new bindings accrue
/// in the state trie, and minting without binding is allowed at the reduced
/// reward.
pub fn enforce_fork_warmup(params: &ChainParams, height: u64) -> bool {
    height >= params.warmup_fork_height
}

/// The minimum block version required at `height`.
pub fn block_version_for(params: &ChainParams, height: u64) -> u64 {
    if enforce_fork_warmup(params, height) {
        BLOCK_VERSION_V2
    } else {
        BLOCK_VERSION_V1
    }
}

/// Per-bitlength binding prices in force since genesis (pre-warm-up), in
/// grains.
static GENESIS_BINDING_PRICES: Lazy<Vec<(usize, Amount)>> = Lazy::new(|| {
    [
        (24, 614_400u128),
        (26, 2_662_400),
        (28, 11_200_000),
        (30, 48_000_000),
        (32, 204_800_000),
        (34, 870_400_000),
        (36, 3_686_400_000),
        (38, 15_200_000_000),
        (40, 64_000_000_000),
    ]
    .into_iter()
    .map(|(bl, grains)| (bl, Amount::from_grains(grains).expect("in range")))
    .collect()
});

/// One interval of the post-fork network binding price curve.
struct NetworkBindingPrice {
    /// Total network binding up to which this interval's price applies.
    accumulative_upper_bound: Amount,
    /// Price per 32-GiB unit inside the interval.
    price_per_32g: Amount,
}

/// Pre-computed intervals of the post-fork price curve.
///
/// Interval `i` prices one more 100-PiB tranche of network binding at
/// `5_000_000 / (100 i)` coins per PiB, for a tranche total of
/// `5_000_000 / i` coins. The first tranche is priced at the `i = 3` rate
/// twice, then the curve proceeds from `i = 3`; past the table the same
/// series is generated on the fly.
static NETWORK_BINDING_PRICES: Lazy<Vec<NetworkBindingPrice>> = Lazy::new(|| {
    let (price3, total3) = interval_required(3);
    let mut prices = vec![
        NetworkBindingPrice {
            accumulative_upper_bound: coins(total3),
            price_per_32g: price_per_32g(price3),
        },
        NetworkBindingPrice {
            accumulative_upper_bound: coins(total3 * 2),
            price_per_32g: price_per_32g(price3),
        },
    ];
    let mut acc = total3 * 2;
    for i in 3..=30 {
        let (price, total) = interval_required(i);
        acc += total;
        prices.push(NetworkBindingPrice {
            accumulative_upper_bound: coins(acc),
            price_per_32g: price_per_32g(price),
        });
    }
    prices
});

/// `(coins per PiB, tranche total in coins)` for curve interval `i`.
fn interval_required(i: u64) -> (u64, u64) {
    (5_000_000 / (i * 100), 5_000_000 / i)
}

fn coins(value: u64) -> Amount {
    Amount::from_coins(value).expect("price tables stay in range")
}

fn price_per_32g(coins_per_pib: u64) -> Amount {
    coins(coins_per_pib)
        .checked_div(UNITS_32G_PER_PIB)
        .expect("non-zero divisor")
}

/// The binding amount required to mint at `next_height`.
///
/// Pre-warm-up the price is a per-bitlength constant. Afterwards it scales
/// with the plot's 32-GiB unit count and climbs with the network-wide
/// binding accumulator along the price curve.
pub fn required_binding(
    params: &ChainParams,
    next_height: u64,
    plot_size: u64,
    native_bit_length: usize,
    network_binding: Amount,
) -> Result<Amount> {
    if !enforce_fork_warmup(params, next_height) {
        return GENESIS_BINDING_PRICES
            .iter()
            .find(|(bl, _)| *bl == native_bit_length)
            .map(|(_, price)| *price)
            .ok_or(ConsensusError::InvalidBitLength(native_bit_length));
    }

    if plot_size == 0 {
        return Err(ConsensusError::ZeroPlotSize);
    }
    let units = (plot_size >> 35).max(1);

    for interval in NETWORK_BINDING_PRICES.iter() {
        if network_binding <= interval.accumulative_upper_bound {
            return interval
                .price_per_32g
                .checked_mul(units)
                .map_err(Into::into);
        }
    }

    // Past the pre-computed table: keep generating the same series.
    let mut acc = NETWORK_BINDING_PRICES
        .last()
        .map(|p| p.accumulative_upper_bound)
        .unwrap_or(Amount::ZERO);
    let mut i = NETWORK_BINDING_PRICES.len() as u64 + 1;
    loop {
        let (price, total) = interval_required(i);
        acc = acc.checked_add(coins(total))?;
        if network_binding <= acc {
            return price_per_32g(price).checked_mul(units).map_err(Into::into);
        }
        i += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ChainParams {
        ChainParams::regtest_with_forks(20, 40)
    }

    #[test]
    fn test_gates() {
        let params = params();
        assert!(!enforce_fork_warmup(&params, 19));
        assert!(enforce_fork_warmup(&params, 20));
        assert!(!enforce_fork(&params, 39));
        assert!(enforce_fork(&params, 40));
        assert_eq!(block_version_for(&params, 19), BLOCK_VERSION_V1);
        assert_eq!(block_version_for(&params, 20), BLOCK_VERSION_V2);
    }

    #[test]
    fn test_genesis_price_by_bitlength() {
        let params = params();
        let price = required_binding(&params, 5, 0, 24, Amount::ZERO).unwrap();
        assert_eq!(price.grains(), 614_400);
        let price = required_binding(&params, 5, 0, 40, Amount::ZERO).unwrap();
        assert_eq!(price.grains(), 64_000_000_000);
        assert!(required_binding(&params, 5, 0, 25, Amount::ZERO).is_err());
    }

    #[test]
    fn test_network_price_scales_with_plot_units() {
        let params = params();
        // One 32-GiB unit.
        let one = required_binding(&params, 50, 1 << 35, 0, Amount::ZERO).unwrap();
        // Four units.
        let four = required_binding(&params, 50, 4 << 35, 0, Amount::ZERO).unwrap();
        assert_eq!(four.grains(), one.grains() * 4);
        // Sub-unit plots price as one unit.
        let small = required_binding(&params, 50, 1 << 20, 0, Amount::ZERO).unwrap();
        assert_eq!(small, one);
    }

    #[test]
    fn test_zero_plot_size_rejected_post_warmup() {
        let params = params();
        assert!(required_binding(&params, 50, 0, 24, Amount::ZERO).is_err());
    }

    #[test]
    fn test_price_follows_curve_as_network_binding_grows() {
        let params = params();
        let early = required_binding(&params, 50, 1 << 35, 0, Amount::ZERO).unwrap();
        // Deep into the curve the per-unit price keeps falling (the series
        // is decreasing in coins per PiB).
        let deep_network = Amount::from_coins(9_000_000).unwrap();
        let late = required_binding(&params, 50, 1 << 35, 0, deep_network).unwrap();
        assert!(late < early);
        assert!(!late.is_zero());
    }

    #[test]
    fn test_price_beyond_precomputed_table() {
        let params = params();
        // Larger than every pre-computed accumulative bound.
        let beyond = Amount::from_coins(30_000_000).unwrap();
        let price = required_binding(&params, 50, 1 << 35, 0, beyond).unwrap();
        assert!(!price.is_zero());
    }
}
