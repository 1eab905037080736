use crate::wallet::{PoolError, WalletError};
use silo_consensus::errors::ConsensusError;
use silo_consensus_core::FileContractId;
use silo_merkle::MerkleError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HostError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("wallet error: {0}")]
    Wallet(#[from] WalletError),

    #[error("transaction pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("consensus error: {0}")]
    Consensus(#[from] ConsensusError),

    #[error("proof construction failed: {0}")]
    Merkle(#[from] MerkleError),

    #[error("an obligation for contract {0} already exists")]
    DuplicateObligation(FileContractId),

    #[error("not enough storage capacity remaining")]
    InsufficientCapacity,

    #[error("obligation file {0} is missing or smaller than the contract")]
    BadObligationFile(PathBuf),
}

pub type HostResult<T> = std::result::Result<T, HostError>;
