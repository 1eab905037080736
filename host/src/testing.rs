//! In-memory wallet and pool doubles for tests. The real implementations
//! are external modules; the host only needs their contracts.

use crate::wallet::{PoolError, TransactionPool, Wallet, WalletError};
use parking_lot::Mutex;
use silo_consensus_core::tx::{StorageProof, Transaction};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Accumulates transaction parts per builder id; "signing" just finalizes.
/// Host-built transactions (proofs, announcements) spend nothing, so no
/// keys are involved.
pub struct MemWallet {
    builders: Mutex<HashMap<u64, Transaction>>,
    next_id: AtomicU64,
}

impl MemWallet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { builders: Mutex::new(HashMap::new()), next_id: AtomicU64::new(1) })
    }
}

impl Wallet for MemWallet {
    fn register_transaction(&self) -> Result<u64, WalletError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.builders.lock().insert(id, Transaction::default());
        Ok(id)
    }

    fn add_arbitrary_data(&self, id: u64, data: Vec<u8>) -> Result<(), WalletError> {
        let mut builders = self.builders.lock();
        let builder = builders.get_mut(&id).ok_or(WalletError::UnknownTransaction)?;
        builder.arbitrary_data.push(data);
        Ok(())
    }

    fn add_storage_proof(&self, id: u64, proof: StorageProof) -> Result<(), WalletError> {
        let mut builders = self.builders.lock();
        let builder = builders.get_mut(&id).ok_or(WalletError::UnknownTransaction)?;
        builder.storage_proofs.push(proof);
        Ok(())
    }

    fn sign_transaction(&self, id: u64) -> Result<Transaction, WalletError> {
        self.builders.lock().remove(&id).ok_or(WalletError::UnknownTransaction)
    }
}

pub struct MemPool {
    transactions: Mutex<Vec<Transaction>>,
}

impl MemPool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { transactions: Mutex::new(Vec::new()) })
    }
}

impl TransactionPool for MemPool {
    fn accept_transaction(&self, transaction: Transaction) -> Result<(), PoolError> {
        self.transactions.lock().push(transaction);
        Ok(())
    }

    fn transaction_set(&self) -> Vec<Transaction> {
        self.transactions.lock().clone()
    }
}
