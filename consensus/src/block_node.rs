use silo_consensus_core::block::Block;
use silo_consensus_core::target::{Target, Uint256};
use silo_consensus_core::utxo::{CoinOutputDiff, FileContractDiff, FundOutputDiff};
use silo_consensus_core::{BlockHeight, BlockId};

/// A block in the tree, with the state needed to weigh it against the
/// current path and to transition the UTXO maps across it.
///
/// Nodes reference their parent by id only; the arena in
/// [`crate::ConsensusState`] owns every node. Diffs are generated lazily,
/// the first time the node lands on a candidate current path, and are kept
/// for the node's lifetime so later reorgs replay them mechanically.
pub(crate) struct BlockNode {
    pub block: Block,
    /// `None` only for genesis.
    pub parent: Option<BlockId>,
    pub height: BlockHeight,
    /// The target this block's id had to meet.
    pub target: Target,
    /// Cumulative work of the chain ending here.
    pub depth: Uint256,

    pub diffs_generated: bool,
    pub coin_diffs: Vec<CoinOutputDiff>,
    pub fund_diffs: Vec<FundOutputDiff>,
    pub contract_diffs: Vec<FileContractDiff>,
}

impl BlockNode {
    pub fn new(block: Block, parent: Option<BlockId>, height: BlockHeight, target: Target, depth: Uint256) -> Self {
        Self {
            block,
            parent,
            height,
            target,
            depth,
            diffs_generated: false,
            coin_diffs: Vec::new(),
            fund_diffs: Vec::new(),
            contract_diffs: Vec::new(),
        }
    }
}
