//! A consensus harness for tests: an in-memory-ish consensus set over a
//! temp database, with inline mining against the trivial testing target.

use crate::errors::BlockProcessResult;
use crate::params::Params;
use crate::ConsensusState;
use ed25519_dalek::{Signer, SigningKey};
use silo_consensus_core::block::Block;
use silo_consensus_core::constants::block_subsidy;
use silo_consensus_core::currency::Currency;
use silo_consensus_core::tx::{CoinOutput, PublicKey, SpendConditions, Transaction, TransactionSignature};
use silo_consensus_core::{BlockId, Hash, UnlockHash};
use silo_database::prelude::{create_temp_db, BlockDb};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// A deterministic ed25519 key with single-signature spend conditions.
pub struct TestKey {
    signing: SigningKey,
}

impl TestKey {
    pub fn from_seed(seed: u8) -> Self {
        Self { signing: SigningKey::from_bytes(&[seed; 32]) }
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.signing.verifying_key().to_bytes())
    }

    pub fn conditions(&self) -> SpendConditions {
        SpendConditions { timelock: 0, public_keys: vec![self.public_key()], signatures_required: 1 }
    }

    pub fn unlock_hash(&self) -> UnlockHash {
        self.conditions().unlock_hash()
    }

    /// Appends a signature authorizing the spend of `parent_id`. Call once
    /// per input, after the transaction body is final.
    pub fn sign_input(&self, tx: &mut Transaction, parent_id: Hash) {
        let signature = self.signing.sign(&tx.sighash().as_bytes()).to_bytes().to_vec();
        tx.signatures.push(TransactionSignature { parent_id, public_key_index: 0, timelock: 0, signature });
    }
}

pub struct TestConsensus {
    pub cs: Arc<ConsensusState>,
    pub params: Params,
    /// Receives every miner payout.
    pub miner: TestKey,
    nonce_space: AtomicU64,
    _db_dir: TempDir,
}

impl TestConsensus {
    pub fn new() -> Self {
        Self::with_params(Params::testing())
    }

    pub fn with_params(params: Params) -> Self {
        let (db_dir, db) = create_temp_db().expect("temp db");
        let chain = BlockDb::open(db).expect("chain store");
        let cs = ConsensusState::new(params.clone(), chain).expect("consensus init");
        Self { cs, params, miner: TestKey::from_seed(42), nonce_space: AtomicU64::new(1), _db_dir: db_dir }
    }

    /// Mines a valid block with `txs` on top of `parent`. Distinct calls
    /// grind in distinct nonce spaces so equal inputs still yield distinct
    /// blocks.
    pub fn build_block_on(&self, parent: BlockId, txs: Vec<Transaction>) -> Block {
        let height = self.cs.height_of_block(parent).expect("parent must be known") + 1;
        let timestamp = self.cs.earliest_child_timestamp(parent).expect("parent must be known");
        let fees = txs
            .iter()
            .try_fold(Currency::ZERO, |acc, tx| tx.total_fees().and_then(|fee| acc.checked_add(fee)))
            .expect("test fees never overflow");
        let reward = block_subsidy(height).checked_add(fees).expect("test rewards never overflow");

        let mut block = Block {
            parent_id: parent,
            nonce: self.nonce_space.fetch_add(1, Ordering::Relaxed) << 32,
            timestamp,
            miner_payouts: vec![CoinOutput { value: reward, unlock_hash: self.miner.unlock_hash() }],
            transactions: txs,
        };
        let target = self.cs.child_target(parent).expect("parent must be known");
        while !target.is_met_by(block.id()) {
            block.nonce += 1;
        }
        block
    }

    pub fn mine_block(&self, txs: Vec<Transaction>) -> Block {
        self.build_block_on(self.cs.current_block().id(), txs)
    }

    pub fn mine_and_accept(&self, txs: Vec<Transaction>) -> BlockProcessResult<Block> {
        let block = self.mine_block(txs);
        self.cs.accept_block(block.clone())?;
        Ok(block)
    }
}

impl Default for TestConsensus {
    fn default() -> Self {
        Self::new()
    }
}
