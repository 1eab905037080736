use crate::key::DbKey;
use silo_codec::CodecError;
use silo_consensus_core::BlockHeight;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("no block at height {0} in store")]
    BlockNotFound(BlockHeight),

    #[error("key {0} not found in store")]
    KeyNotFound(DbKey),

    #[error("the chain store is empty")]
    EmptyChain,

    #[error("rocksdb error {0}")]
    DbError(#[from] rocksdb::Error),

    #[error("corrupt store value: {0}")]
    Corruption(#[from] CodecError),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
