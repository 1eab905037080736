use silo_consensus_core::currency::Currency;
use silo_consensus_core::{BlockHeight, FileContractId, Hash, Timestamp};
use silo_database::prelude::StoreError;
use thiserror::Error;

/// Why a block was not accepted. Except for [`RuleError::OrphanBlock`] and
/// the future-timestamp holds, these are terminal for the block: the node
/// is marked invalid and never reconsidered.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleError {
    #[error("block is already known")]
    KnownBlock,

    #[error("block is or descends from a block known to be invalid")]
    KnownInvalid,

    #[error("block's parent is unknown; fetch its ancestors and retry")]
    OrphanBlock,

    #[error("block timestamp {0} is too far in the future; the block is held until it matures")]
    FutureTimestamp(Timestamp),

    #[error("block timestamp {0} is unreasonably far in the future")]
    ExtremeFutureTimestamp(Timestamp),

    #[error("block timestamp {0} is earlier than the median {1} of its ancestors")]
    EarlyTimestamp(Timestamp, Timestamp),

    #[error("block id does not meet the required target")]
    UnsatisfiedTarget,

    #[error("block weighs {0} bytes, above the {1} byte limit")]
    OversizedBlock(u64, u64),

    #[error("miner payouts sum to {0} but {1} was expected")]
    BadMinerPayouts(Currency, Currency),

    #[error("input {0} does not exist in the consensus set")]
    MissingInput(Hash),

    #[error("output {0} is spent more than once")]
    DoubleSpend(Hash),

    #[error("revealed spend conditions do not hash to the output's unlock hash")]
    WrongUnlockConditions,

    #[error("output is timelocked until height {0}")]
    PrematureSpend(BlockHeight),

    #[error("transaction carries an invalid signature")]
    BadSignature,

    #[error("transaction does not carry enough signatures")]
    MissingSignatures,

    #[error("currency values overflow")]
    CurrencyOverflow,

    #[error("coin inputs total {0} but outputs, payouts and fees total {1}")]
    UnbalancedCoins(Currency, Currency),

    #[error("fund inputs total {0} but fund outputs total {1}")]
    UnbalancedFunds(Currency, Currency),

    #[error("file contract proof window is malformed or already open")]
    BadContractWindow,

    #[error("file contract payout does not match its proof outputs")]
    BadContractPayout,

    #[error("file contract commits to an empty file")]
    EmptyContract,

    #[error("storage proof names an unknown or resolved contract {0}")]
    UnknownProofContract(FileContractId),

    #[error("storage proof submitted outside the contract's proof window")]
    ProofOutsideWindow,

    #[error("storage proof does not verify against the contract's file merkle root")]
    InvalidStorageProof,

    #[error("a transaction carrying storage proofs may not create outputs or contracts")]
    ProofTransactionWithSideEffects,
}

pub type BlockProcessResult<T> = std::result::Result<T, RuleError>;

/// Failures of read operations against the consensus set.
#[derive(Error, Debug)]
pub enum ConsensusError {
    #[error("block {0} is not known to the consensus set")]
    UnknownBlock(Hash),

    #[error("file contract {0} is not in the active contract set")]
    UnknownContract(FileContractId),

    #[error("the proof window of contract {0} has not opened yet")]
    WindowNotReached(FileContractId),

    #[error("diffs have not been generated for block {0}")]
    DiffsNotGenerated(Hash),

    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("the stored chain does not begin with the configured genesis block")]
    GenesisMismatch,

    #[error("stored block at height {0} failed validation: {1}")]
    CorruptStore(BlockHeight, RuleError),
}
