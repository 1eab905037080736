//! Contracts required from the wallet and transaction pool. Both are
//! external collaborators; the host only drives them.

use silo_consensus_core::tx::{StorageProof, Transaction};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WalletError {
    #[error("unknown transaction builder id")]
    UnknownTransaction,

    #[error("{0}")]
    Other(String),
}

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("transaction rejected: {0}")]
    Rejected(String),
}

/// Builds and signs transactions. Ids returned by
/// [`Wallet::register_transaction`] name an in-progress build.
pub trait Wallet: Send + Sync {
    fn register_transaction(&self) -> Result<u64, WalletError>;
    fn add_arbitrary_data(&self, id: u64, data: Vec<u8>) -> Result<(), WalletError>;
    fn add_storage_proof(&self, id: u64, proof: StorageProof) -> Result<(), WalletError>;
    /// Finalizes the build and returns the signed transaction.
    fn sign_transaction(&self, id: u64) -> Result<Transaction, WalletError>;
}

pub trait TransactionPool: Send + Sync {
    fn accept_transaction(&self, transaction: Transaction) -> Result<(), PoolError>;
    fn transaction_set(&self) -> Vec<Transaction>;
}
