use crate::currency::Currency;
use crate::tx::{CoinOutput, Transaction};
use crate::{BlockId, CoinOutputId, Timestamp};
use serde::{Deserialize, Serialize};
use silo_hashes::Hasher;

/// A block. Immutable once accepted; the id commits to every field.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Block {
    pub parent_id: BlockId,
    pub nonce: u64,
    pub timestamp: Timestamp,
    pub miner_payouts: Vec<CoinOutput>,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// The block id: the hash of the canonical header encoding, where the
    /// payouts and transactions enter through a content commitment.
    pub fn id(&self) -> BlockId {
        let content = Hasher::hash(silo_codec::encode(&(&self.miner_payouts, &self.transactions)));
        Hasher::hash(silo_codec::encode(&(self.parent_id, self.nonce, self.timestamp, content)))
    }

    /// Id of the coin output created by miner payout `index`.
    pub fn payout_id(&self, index: u64) -> CoinOutputId {
        Hasher::new().update(b"miner payout").update(self.id()).update(index.to_le_bytes()).finalize()
    }

    /// Sum of the miner payout values, `None` on overflow.
    pub fn payout_sum(&self) -> Option<Currency> {
        Currency::checked_sum(self.miner_payouts.iter().map(|payout| &payout.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Hash;
    use silo_codec::{decode, encode};

    fn sample_block() -> Block {
        Block {
            parent_id: Hash::from_u64(11),
            nonce: 42,
            timestamp: 1_700_000_000,
            miner_payouts: vec![CoinOutput { value: Currency::from_coins(300_000), unlock_hash: Hash::from_u64(1) }],
            transactions: vec![Transaction { arbitrary_data: vec![b"x".to_vec()], ..Default::default() }],
        }
    }

    #[test]
    fn block_round_trip() {
        let block = sample_block();
        let encoded = encode(&block);
        assert_eq!(encoded, encode(&block.clone()));
        assert_eq!(decode::<Block>(&encoded).unwrap(), block);
    }

    #[test]
    fn id_commits_to_every_field() {
        let block = sample_block();
        let base = block.id();

        let mut changed = block.clone();
        changed.nonce += 1;
        assert_ne!(base, changed.id());

        let mut changed = block.clone();
        changed.timestamp += 1;
        assert_ne!(base, changed.id());

        let mut changed = block.clone();
        changed.transactions.clear();
        assert_ne!(base, changed.id());

        assert_eq!(base, block.clone().id());
    }

    #[test]
    fn payout_ids_depend_on_index() {
        let block = sample_block();
        assert_ne!(block.payout_id(0), block.payout_id(1));
    }
}
