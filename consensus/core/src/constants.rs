use crate::currency::Currency;
use crate::BlockHeight;

/// Base units per coin.
pub const COIN: u128 = 1_000_000_000_000;

/// Subsidy of the genesis child, in coins. Decays by one coin per block.
pub const INITIAL_COINBASE: u64 = 300_000;

/// Floor of the decaying subsidy, in coins.
pub const MINIMUM_COINBASE: u64 = 30_000;

/// The number of fund units created at genesis.
pub const FUND_SUPPLY: u64 = 10_000;

/// The block subsidy at a given height: miner payouts must sum to this plus
/// the fees of every transaction in the block.
pub fn block_subsidy(height: BlockHeight) -> Currency {
    let coins = INITIAL_COINBASE.saturating_sub(height).max(MINIMUM_COINBASE);
    Currency::from_coins(coins)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subsidy_decays_to_floor() {
        assert_eq!(block_subsidy(0), Currency::from_coins(INITIAL_COINBASE));
        assert_eq!(block_subsidy(1), Currency::from_coins(INITIAL_COINBASE - 1));
        let floor_height = INITIAL_COINBASE - MINIMUM_COINBASE;
        assert_eq!(block_subsidy(floor_height), Currency::from_coins(MINIMUM_COINBASE));
        assert_eq!(block_subsidy(floor_height + 1_000_000), Currency::from_coins(MINIMUM_COINBASE));
    }
}
