pub mod block;
pub mod constants;
pub mod currency;
pub mod network;
pub mod target;
pub mod tx;
pub mod utxo;

pub use silo_hashes::Hash;

/// Height of a block in the chain. Genesis is height 0.
pub type BlockHeight = u64;

/// Unix seconds.
pub type Timestamp = u64;

pub type BlockId = Hash;
pub type TransactionId = Hash;
pub type CoinOutputId = Hash;
pub type FundOutputId = Hash;
pub type FileContractId = Hash;

/// Commitment to the spend conditions that can unlock an output.
pub type UnlockHash = Hash;
