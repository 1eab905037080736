use crate::db::DB;
use crate::errors::{StoreError, StoreResult};
use crate::key::DbKey;
use parking_lot::RwLock;
use rocksdb::WriteBatch;
use silo_consensus_core::block::Block;
use silo_consensus_core::BlockHeight;
use std::sync::Arc;

const CHAIN_BUCKET: &[u8] = b"chain";

/// The durable block log: blocks of the current path, keyed by height.
///
/// Writers are serialized by the interior lock; readers run concurrently
/// with each other and are excluded only during a write. Every mutation is
/// committed through a single write batch, so a crash leaves the store at a
/// block boundary.
pub struct BlockDb {
    db: Arc<DB>,
    count: RwLock<u64>,
}

impl BlockDb {
    /// Opens the chain store over `db`, recovering the stored height.
    pub fn open(db: Arc<DB>) -> StoreResult<Self> {
        let mut count = 0u64;
        while db.get_pinned(Self::key(count))?.is_some() {
            count += 1;
        }
        Ok(Self { db, count: RwLock::new(count) })
    }

    fn key(height: BlockHeight) -> DbKey {
        DbKey::new(CHAIN_BUCKET, height.to_le_bytes())
    }

    /// The block at `height`.
    pub fn block(&self, height: BlockHeight) -> StoreResult<Block> {
        let count = self.count.read();
        if height >= *count {
            return Err(StoreError::BlockNotFound(height));
        }
        let bytes = self.db.get_pinned(Self::key(height))?.ok_or(StoreError::BlockNotFound(height))?;
        Ok(silo_codec::decode(&bytes)?)
    }

    /// Appends `block` at the current count. On failure the store is
    /// unchanged.
    pub fn add_block(&self, block: &Block) -> StoreResult<()> {
        let mut count = self.count.write();
        let mut batch = WriteBatch::default();
        batch.put(Self::key(*count), silo_codec::encode(block));
        self.db.write(batch)?;
        *count += 1;
        Ok(())
    }

    /// Pops the highest block.
    pub fn remove_block(&self) -> StoreResult<()> {
        let mut count = self.count.write();
        if *count == 0 {
            return Err(StoreError::EmptyChain);
        }
        let mut batch = WriteBatch::default();
        batch.delete(Self::key(*count - 1));
        self.db.write(batch)?;
        *count -= 1;
        Ok(())
    }

    /// The number of stored blocks; the top block sits at `height() - 1`.
    pub fn height(&self) -> u64 {
        *self.count.read()
    }

    /// Flushes outstanding writes.
    pub fn close(&self) -> StoreResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_temp_db, open_db};
    use silo_consensus_core::Hash;

    fn block_with_nonce(nonce: u64) -> Block {
        Block { parent_id: Hash::from_u64(1), nonce, timestamp: 1000 + nonce, miner_payouts: vec![], transactions: vec![] }
    }

    #[test]
    fn add_read_remove() {
        let (_dir, db) = create_temp_db().unwrap();
        let chain = BlockDb::open(db).unwrap();
        assert_eq!(chain.height(), 0);
        assert!(matches!(chain.block(0), Err(StoreError::BlockNotFound(0))));
        assert!(matches!(chain.remove_block(), Err(StoreError::EmptyChain)));

        for nonce in 0..5 {
            chain.add_block(&block_with_nonce(nonce)).unwrap();
        }
        assert_eq!(chain.height(), 5);
        assert_eq!(chain.block(3).unwrap(), block_with_nonce(3));
        assert!(matches!(chain.block(5), Err(StoreError::BlockNotFound(5))));

        chain.remove_block().unwrap();
        assert_eq!(chain.height(), 4);
        assert!(matches!(chain.block(4), Err(StoreError::BlockNotFound(4))));
        assert_eq!(chain.block(0).unwrap(), block_with_nonce(0));
    }

    #[test]
    fn height_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let chain = BlockDb::open(open_db(dir.path()).unwrap()).unwrap();
            chain.add_block(&block_with_nonce(0)).unwrap();
            chain.add_block(&block_with_nonce(1)).unwrap();
            chain.close().unwrap();
        }
        let chain = BlockDb::open(open_db(dir.path()).unwrap()).unwrap();
        assert_eq!(chain.height(), 2);
        assert_eq!(chain.block(1).unwrap(), block_with_nonce(1));
    }

    #[test]
    fn concurrent_readers() {
        let (_dir, db) = create_temp_db().unwrap();
        let chain = Arc::new(BlockDb::open(db).unwrap());
        for nonce in 0..10 {
            chain.add_block(&block_with_nonce(nonce)).unwrap();
        }
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let chain = chain.clone();
                std::thread::spawn(move || {
                    for height in 0..10 {
                        assert_eq!(chain.block(height).unwrap().nonce, height);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
