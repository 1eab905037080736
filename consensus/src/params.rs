use silo_consensus_core::block::Block;
use silo_consensus_core::constants::FUND_SUPPLY;
use silo_consensus_core::currency::Currency;
use silo_consensus_core::target::{Target, Uint256};
use silo_consensus_core::tx::{FundOutput, Transaction};
use silo_consensus_core::{Timestamp, UnlockHash};
use silo_hashes::{Hash, ZERO_HASH};
use std::time::Duration;

/// Consensus parameters. Fixed at construction; nothing here is a process
/// global.
#[derive(Clone)]
pub struct Params {
    pub genesis_timestamp: Timestamp,
    /// Receives the genesis fund allocation.
    pub genesis_fund_unlock_hash: UnlockHash,
    /// Target of the genesis child.
    pub root_target: Target,
    /// Desired seconds between blocks.
    pub block_frequency: u64,
    /// How many trailing blocks the retarget measures.
    pub target_window: u64,
    /// Per-block clamp on the retarget ratio, as (numerator, denominator).
    pub max_adjustment_up: (u64, u64),
    pub max_adjustment_down: (u64, u64),
    /// How many trailing timestamps feed the median lower bound.
    pub median_timestamp_window: usize,
    /// Blocks stamped further than this past the wall clock are held until
    /// they mature.
    pub future_threshold: u64,
    /// Blocks stamped further than this are rejected outright.
    pub extreme_future_threshold: u64,
    /// Upper bound on a block's encoded size.
    pub block_size_limit: u64,
    /// Lock acquisitions stalling longer than this log a diagnostic.
    pub lock_stall_warning: Duration,
}

impl Params {
    pub fn mainnet() -> Self {
        Self {
            genesis_timestamp: 1_717_200_000,
            genesis_fund_unlock_hash: ZERO_HASH,
            root_target: Target::from_uint(Uint256::one() << 241),
            block_frequency: 600,
            target_window: 1_000,
            max_adjustment_up: (1_001, 1_000),
            max_adjustment_down: (999, 1_000),
            median_timestamp_window: 11,
            future_threshold: 3 * 60 * 60,
            extreme_future_threshold: 5 * 60 * 60,
            block_size_limit: 1 << 20,
            lock_stall_warning: Duration::from_secs(8),
        }
    }

    /// Trivial difficulty and a short retarget window, for tests that mine
    /// inline.
    pub fn testing() -> Self {
        Self {
            genesis_timestamp: 1_717_200_000,
            genesis_fund_unlock_hash: Hash::from_u64(0x0f),
            root_target: Target::from_uint(Uint256::MAX >> 1),
            block_frequency: 1,
            target_window: 10,
            max_adjustment_up: (1_001, 1_000),
            max_adjustment_down: (999, 1_000),
            median_timestamp_window: 11,
            future_threshold: 3 * 60 * 60,
            extreme_future_threshold: 5 * 60 * 60,
            block_size_limit: 1 << 20,
            lock_stall_warning: Duration::from_secs(3),
        }
    }

    /// The genesis block: no parent, no payouts, and a single transaction
    /// minting the fund supply.
    pub fn genesis_block(&self) -> Block {
        let airdrop = Transaction {
            fund_outputs: vec![FundOutput { value: Currency::from(FUND_SUPPLY), unlock_hash: self.genesis_fund_unlock_hash }],
            ..Default::default()
        };
        Block {
            parent_id: ZERO_HASH,
            nonce: 0,
            timestamp: self.genesis_timestamp,
            miner_payouts: vec![],
            transactions: vec![airdrop],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_is_deterministic() {
        let params = Params::testing();
        assert_eq!(params.genesis_block().id(), params.genesis_block().id());
        assert_ne!(params.genesis_block().id(), Params::mainnet().genesis_block().id());
    }
}
