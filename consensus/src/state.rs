use crate::block_node::BlockNode;
use crate::errors::{BlockProcessResult, ConsensusError, RuleError};
use crate::params::Params;
use crate::validation::{self, DiffSet};
use itertools::Itertools;
use log::{debug, info};
use parking_lot::RwLockWriteGuard;
use silo_consensus_core::block::Block;
use silo_consensus_core::constants::block_subsidy;
use silo_consensus_core::currency::Currency;
use silo_consensus_core::target::Target;
use silo_consensus_core::tx::{CoinOutput, FileContract, FundOutput};
use silo_consensus_core::utxo::{CoinOutputDiff, DiffDirection, FileContractDiff, FundOutputDiff};
use silo_consensus_core::{BlockHeight, BlockId, CoinOutputId, FileContractId, FundOutputId, Timestamp};
use silo_database::prelude::BlockDb;
use silo_notify::{ConsensusSetSubscriber, ConsensusSetUpdate, SubscriberBus};
use silo_utils::sync::TimedRwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

const DB_FATAL: &str = "block database write failed; memory and disk would diverge";

pub(crate) fn unix_now() -> Timestamp {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("the clock is past the epoch").as_secs()
}

/// The mutable consensus set. Guarded by the outer lock in
/// [`ConsensusState`]; everything in here assumes exclusive or shared
/// access has already been arranged.
pub(crate) struct StateInner {
    pub(crate) params: Params,
    pub(crate) genesis_id: BlockId,

    /// Arena of every valid block ever seen, keyed by id. Nodes are never
    /// removed: a reorged-away branch stays available for reconsideration.
    pub(crate) block_map: HashMap<BlockId, BlockNode>,
    /// Blocks that failed deep validation, plus their descendants.
    pub(crate) invalid: HashSet<BlockId>,
    /// Ids of the heaviest chain, indexed by height.
    pub(crate) current_path: Vec<BlockId>,

    pub(crate) coin_outputs: HashMap<CoinOutputId, CoinOutput>,
    pub(crate) fund_outputs: HashMap<FundOutputId, FundOutput>,
    pub(crate) file_contracts: HashMap<FileContractId, FileContract>,

    /// Acceptably-future blocks keyed by the time they mature.
    future_blocks: BTreeMap<Timestamp, Vec<Block>>,

    db: BlockDb,
    /// Set while replaying the stored chain at startup, when the store
    /// already holds the blocks being applied.
    syncing_db: bool,
}

impl StateInner {
    pub(crate) fn height(&self) -> BlockHeight {
        self.current_path.len() as u64 - 1
    }

    fn tip_id(&self) -> BlockId {
        *self.current_path.last().expect("the current path always holds genesis")
    }

    fn on_current_path(&self, id: BlockId) -> bool {
        let height = self.block_map[&id].height;
        self.current_path.get(height as usize) == Some(&id)
    }

    fn ancestor_id(&self, mut id: BlockId, generations: u64) -> BlockId {
        for _ in 0..generations {
            id = self.block_map[&id].parent.expect("walk is bounded by the node's height");
        }
        id
    }

    /// Lower bound for the timestamp of a child of `id`: the median of the
    /// trailing window of timestamps ending at `id`.
    fn earliest_child_timestamp_of(&self, id: BlockId) -> Timestamp {
        let mut timestamps = Vec::with_capacity(self.params.median_timestamp_window);
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if timestamps.len() == self.params.median_timestamp_window {
                break;
            }
            let node = &self.block_map[&current];
            timestamps.push(node.block.timestamp);
            cursor = node.parent;
        }
        timestamps.sort_unstable();
        timestamps[timestamps.len() / 2]
    }

    /// The target a child of `parent_id` must meet: the parent's target
    /// scaled by how far the trailing window drifted off schedule, clamped
    /// to the per-block adjustment bounds.
    fn child_target_of(&self, parent_id: BlockId) -> Target {
        let parent = &self.block_map[&parent_id];
        let window = parent.height.min(self.params.target_window);
        if window == 0 {
            return self.params.root_target;
        }
        let ancestor = &self.block_map[&self.ancestor_id(parent_id, window)];
        let elapsed = parent.block.timestamp.saturating_sub(ancestor.block.timestamp).max(1);
        let expected = window * self.params.block_frequency;

        let (up_num, up_den) = self.params.max_adjustment_up;
        let (down_num, down_den) = self.params.max_adjustment_down;
        let (num, den) = if elapsed as u128 * up_den as u128 > up_num as u128 * expected as u128 {
            (up_num, up_den)
        } else if elapsed as u128 * (down_den as u128) < (down_num as u128) * expected as u128 {
            (down_num, down_den)
        } else {
            (elapsed, expected)
        };
        parent.target.scale(num, den)
    }

    fn take_matured_future_blocks(&mut self, now: Timestamp) -> Vec<Block> {
        let matured_keys: Vec<_> = self.future_blocks.range(..=now).map(|(key, _)| *key).collect();
        let mut matured = Vec::new();
        for key in matured_keys {
            matured.extend(self.future_blocks.remove(&key).expect("key was just observed"));
        }
        matured
    }

    /// Accepts one block into the tree, reorganizing if it creates a
    /// strictly heavier chain. Returns the update to publish, or `None`
    /// when the block extends a side chain.
    fn accept(&mut self, block: Block, now: Timestamp) -> BlockProcessResult<Option<ConsensusSetUpdate>> {
        let id = block.id();
        if self.invalid.contains(&id) {
            return Err(RuleError::KnownInvalid);
        }
        if self.block_map.contains_key(&id) {
            return Err(RuleError::KnownBlock);
        }
        if self.invalid.contains(&block.parent_id) {
            self.invalid.insert(id);
            return Err(RuleError::KnownInvalid);
        }
        let Some(parent) = self.block_map.get(&block.parent_id) else {
            return Err(RuleError::OrphanBlock);
        };
        let (parent_height, parent_depth) = (parent.height, parent.depth);

        // Shallow validation: everything checkable without the UTXO view.
        let earliest = self.earliest_child_timestamp_of(block.parent_id);
        if block.timestamp < earliest {
            return Err(RuleError::EarlyTimestamp(block.timestamp, earliest));
        }
        if block.timestamp > now + self.params.extreme_future_threshold {
            return Err(RuleError::ExtremeFutureTimestamp(block.timestamp));
        }
        if block.timestamp > now + self.params.future_threshold {
            let timestamp = block.timestamp;
            let matures_at = timestamp - self.params.future_threshold;
            self.future_blocks.entry(matures_at).or_default().push(block);
            return Err(RuleError::FutureTimestamp(timestamp));
        }
        let target = self.child_target_of(block.parent_id);
        if !target.is_met_by(id) {
            return Err(RuleError::UnsatisfiedTarget);
        }
        let weight = silo_codec::encoded_len(&block);
        if weight > self.params.block_size_limit {
            return Err(RuleError::OversizedBlock(weight, self.params.block_size_limit));
        }
        let height = parent_height + 1;
        let fees = block
            .transactions
            .iter()
            .try_fold(Currency::ZERO, |acc, tx| tx.total_fees().and_then(|fee| acc.checked_add(fee)))
            .ok_or(RuleError::CurrencyOverflow)?;
        let expected = block_subsidy(height).checked_add(fees).ok_or(RuleError::CurrencyOverflow)?;
        let payouts = block.payout_sum().ok_or(RuleError::CurrencyOverflow)?;
        if payouts != expected {
            return Err(RuleError::BadMinerPayouts(payouts, expected));
        }

        let parent_id = block.parent_id;
        let depth = parent_depth + target.work();
        self.block_map.insert(id, BlockNode::new(block, Some(parent_id), height, target, depth));

        // Fork choice: strictly heavier chains win, ties keep the
        // incumbent.
        if depth <= self.block_map[&self.tip_id()].depth {
            debug!("block {id} extends a side chain at height {height}");
            return Ok(None);
        }
        self.reorg_to(id).map(Some)
    }

    /// Moves the current path to end at `new_tip`, which is known to be
    /// strictly heavier than the incumbent. On a mid-apply validation
    /// failure the whole reorg is rolled back, the failing block is marked
    /// invalid, and the error is returned.
    fn reorg_to(&mut self, new_tip: BlockId) -> BlockProcessResult<ConsensusSetUpdate> {
        // Walk from the new tip down to the common ancestor with the
        // current path.
        let mut applied_ids = Vec::new();
        let mut cursor = new_tip;
        while !self.on_current_path(cursor) {
            applied_ids.push(cursor);
            cursor = self.block_map[&cursor].parent.expect("genesis is always on the current path");
        }
        applied_ids.reverse();
        let common_height = self.block_map[&cursor].height;

        // Revert the incumbent suffix, tip first.
        let mut reverted = Vec::new();
        while self.height() > common_height {
            let id = self.tip_id();
            self.replay_node_diffs(id, DiffDirection::Remove);
            self.current_path.pop();
            if !self.syncing_db {
                self.db.remove_block().expect(DB_FATAL);
            }
            reverted.push(self.block_map[&id].block.clone());
        }

        // Apply the new branch, validating lazily.
        let mut applied = Vec::new();
        for (position, &id) in applied_ids.iter().enumerate() {
            match self.apply_block(id) {
                Ok(block) => {
                    if !self.syncing_db {
                        self.db.add_block(&block).expect(DB_FATAL);
                    }
                    applied.push(block);
                }
                Err(err) => {
                    info!("block {id} failed validation during reorg: {err}");
                    self.rollback_reorg(&applied_ids[..position], &reverted);
                    // The node stays in the arena so tree walks through it
                    // remain possible, but it is never applied again.
                    self.invalid.insert(id);
                    return Err(err);
                }
            }
        }

        Ok(ConsensusSetUpdate { reverted, applied })
    }

    /// Undoes a partially performed reorg: re-reverts the already applied
    /// prefix and re-applies the previously reverted blocks.
    fn rollback_reorg(&mut self, applied_prefix: &[BlockId], reverted: &[Block]) {
        for &id in applied_prefix.iter().rev() {
            self.replay_node_diffs(id, DiffDirection::Remove);
            self.current_path.pop();
            if !self.syncing_db {
                self.db.remove_block().expect(DB_FATAL);
            }
        }
        for block in reverted.iter().rev() {
            let id = block.id();
            self.replay_node_diffs(id, DiffDirection::Add);
            self.current_path.push(id);
            if !self.syncing_db {
                self.db.add_block(block).expect(DB_FATAL);
            }
        }
    }

    /// Validates (if needed) and applies one block onto the current path.
    fn apply_block(&mut self, id: BlockId) -> BlockProcessResult<Block> {
        if self.invalid.contains(&id) {
            return Err(RuleError::KnownInvalid);
        }
        let node = &self.block_map[&id];
        let (block, height, generated) = (node.block.clone(), node.height, node.diffs_generated);
        if generated {
            self.replay_node_diffs(id, DiffDirection::Add);
        } else {
            let mut diffs = DiffSet::default();
            self.generate_diffs(&block, height, &mut diffs)?;
            let node = self.block_map.get_mut(&id).expect("node was inserted before apply");
            node.coin_diffs = diffs.coin;
            node.fund_diffs = diffs.fund;
            node.contract_diffs = diffs.contract;
            node.diffs_generated = true;
        }
        self.current_path.push(id);
        Ok(block)
    }

    /// Deep validation and diff generation. Mutates the UTXO maps as it
    /// goes; on failure, its own partial effects are unwound before
    /// returning, leaving the maps untouched.
    fn generate_diffs(&mut self, block: &Block, height: BlockHeight, diffs: &mut DiffSet) -> BlockProcessResult<()> {
        for tx in &block.transactions {
            if let Err(err) = validation::apply_transaction(self, tx, height, diffs) {
                self.apply_diff_set(diffs, DiffDirection::Remove);
                return Err(err);
            }
        }

        for (index, payout) in block.miner_payouts.iter().enumerate() {
            let id = block.payout_id(index as u64);
            self.coin_outputs.insert(id, *payout);
            diffs.coin.push(CoinOutputDiff { direction: DiffDirection::Add, id, output: *payout });
        }

        // Contracts whose window closed below this height resolve as
        // missed. Sorted by id so the diff order is deterministic.
        let expired: Vec<(FileContractId, FileContract)> = self
            .file_contracts
            .iter()
            .filter(|(_, contract)| contract.window_end < height)
            .map(|(id, contract)| (*id, contract.clone()))
            .sorted_by_key(|(id, _)| *id)
            .collect();
        for (id, contract) in expired {
            self.file_contracts.remove(&id);
            let payout_id = silo_consensus_core::tx::storage_proof_output_id(id, false);
            self.coin_outputs.insert(payout_id, contract.missed_proof_output);
            diffs.coin.push(CoinOutputDiff {
                direction: DiffDirection::Add,
                id: payout_id,
                output: contract.missed_proof_output,
            });
            diffs.contract.push(FileContractDiff { direction: DiffDirection::Remove, id, contract });
        }
        Ok(())
    }

    /// Replays a node's stored diffs onto the maps, forward (`Add`) or in
    /// reverse (`Remove`).
    fn replay_node_diffs(&mut self, id: BlockId, direction: DiffDirection) {
        let node = &self.block_map[&id];
        debug_assert!(node.diffs_generated, "only generated diffs can be replayed");
        let diffs = DiffSet {
            coin: node.coin_diffs.clone(),
            fund: node.fund_diffs.clone(),
            contract: node.contract_diffs.clone(),
        };
        self.apply_diff_set(&diffs, direction);
    }

    fn apply_diff_set(&mut self, diffs: &DiffSet, direction: DiffDirection) {
        match direction {
            DiffDirection::Add => {
                for diff in &diffs.coin {
                    self.commit_coin_diff(diff, direction);
                }
                for diff in &diffs.fund {
                    self.commit_fund_diff(diff, direction);
                }
                for diff in &diffs.contract {
                    self.commit_contract_diff(diff, direction);
                }
            }
            DiffDirection::Remove => {
                for diff in diffs.coin.iter().rev() {
                    self.commit_coin_diff(diff, direction);
                }
                for diff in diffs.fund.iter().rev() {
                    self.commit_fund_diff(diff, direction);
                }
                for diff in diffs.contract.iter().rev() {
                    self.commit_contract_diff(diff, direction);
                }
            }
        }
    }

    fn commit_coin_diff(&mut self, diff: &CoinOutputDiff, direction: DiffDirection) {
        let effective = if direction == DiffDirection::Add { diff.direction } else { diff.direction.inverse() };
        match effective {
            DiffDirection::Add => {
                let previous = self.coin_outputs.insert(diff.id, diff.output);
                debug_assert!(previous.is_none(), "diff recreated an existing coin output");
            }
            DiffDirection::Remove => {
                let previous = self.coin_outputs.remove(&diff.id);
                debug_assert!(previous.is_some(), "diff removed a missing coin output");
            }
        }
    }

    fn commit_fund_diff(&mut self, diff: &FundOutputDiff, direction: DiffDirection) {
        let effective = if direction == DiffDirection::Add { diff.direction } else { diff.direction.inverse() };
        match effective {
            DiffDirection::Add => {
                let previous = self.fund_outputs.insert(diff.id, diff.output);
                debug_assert!(previous.is_none(), "diff recreated an existing fund output");
            }
            DiffDirection::Remove => {
                let previous = self.fund_outputs.remove(&diff.id);
                debug_assert!(previous.is_some(), "diff removed a missing fund output");
            }
        }
    }

    fn commit_contract_diff(&mut self, diff: &FileContractDiff, direction: DiffDirection) {
        let effective = if direction == DiffDirection::Add { diff.direction } else { diff.direction.inverse() };
        match effective {
            DiffDirection::Add => {
                let previous = self.file_contracts.insert(diff.id, diff.contract.clone());
                debug_assert!(previous.is_none(), "diff recreated an existing file contract");
            }
            DiffDirection::Remove => {
                let previous = self.file_contracts.remove(&diff.id);
                debug_assert!(previous.is_some(), "diff removed a missing file contract");
            }
        }
    }
}

/// The consensus set: the authoritative block tree, current path and UTXO
/// state, backed by the durable block log and fanned out to subscribers.
///
/// All public reads take the shared lock; [`ConsensusState::accept_block`]
/// takes it exclusively and downgrades to shared before publishing, so
/// subscribers observing the update may read consensus state.
pub struct ConsensusState {
    inner: TimedRwLock<StateInner>,
    bus: SubscriberBus,
}

impl ConsensusState {
    /// Builds the consensus set over `db`. An empty store is seeded with
    /// genesis; a populated one is replayed through full validation.
    pub fn new(params: Params, db: BlockDb) -> Result<Arc<ConsensusState>, ConsensusError> {
        let genesis = params.genesis_block();
        let genesis_id = genesis.id();

        let mut genesis_node =
            BlockNode::new(genesis.clone(), None, 0, params.root_target, params.root_target.work());
        for (index, output) in genesis.transactions[0].fund_outputs.iter().enumerate() {
            genesis_node.fund_diffs.push(FundOutputDiff {
                direction: DiffDirection::Add,
                id: genesis.transactions[0].fund_output_id(index as u64),
                output: *output,
            });
        }
        genesis_node.diffs_generated = true;

        let lock_stall_warning = params.lock_stall_warning;
        let mut inner = StateInner {
            params,
            genesis_id,
            block_map: HashMap::new(),
            invalid: HashSet::new(),
            current_path: vec![genesis_id],
            coin_outputs: HashMap::new(),
            fund_outputs: HashMap::new(),
            file_contracts: HashMap::new(),
            future_blocks: BTreeMap::new(),
            db,
            syncing_db: true,
        };
        inner.block_map.insert(genesis_id, genesis_node);
        inner.replay_node_diffs(genesis_id, DiffDirection::Add);

        if inner.db.height() == 0 {
            inner.db.add_block(&genesis)?;
        } else {
            if inner.db.block(0)?.id() != genesis_id {
                return Err(ConsensusError::GenesisMismatch);
            }
            let now = unix_now();
            for height in 1..inner.db.height() {
                let block = inner.db.block(height)?;
                inner.accept(block, now).map_err(|err| ConsensusError::CorruptStore(height, err))?;
            }
            info!("replayed {} stored blocks", inner.db.height() - 1);
        }
        inner.syncing_db = false;

        Ok(Arc::new(ConsensusState {
            inner: TimedRwLock::new(inner, "consensus", lock_stall_warning),
            bus: SubscriberBus::new(),
        }))
    }

    /// Submits a block. May reorganize the current path; matured
    /// future-queued blocks are reconsidered first. Every resulting update
    /// is published before the exclusive lock is released.
    pub fn accept_block(&self, block: Block) -> BlockProcessResult<()> {
        let now = unix_now();
        let mut inner = self.inner.write();

        let mut updates = Vec::new();
        for matured in inner.take_matured_future_blocks(now) {
            let matured_id = matured.id();
            match inner.accept(matured, now) {
                Ok(Some(update)) => updates.push(update),
                Ok(None) => {}
                Err(err) => debug!("held future block {matured_id} was rejected on maturity: {err}"),
            }
        }
        let result = inner.accept(block, now);
        if let Ok(Some(update)) = &result {
            updates.push(update.clone());
        }

        // Publish while holding the lock in read mode: subscribers may
        // read consensus state, and no writer can slip in between the
        // state change and its announcement.
        let _read_guard = RwLockWriteGuard::downgrade(inner);
        for update in updates {
            self.bus.publish(update);
        }
        result.map(|_| ())
    }

    pub fn subscribe(&self, subscriber: Arc<dyn ConsensusSetSubscriber>) {
        self.bus.subscribe(subscriber);
    }

    /// Flushes the block log and joins subscriber delivery threads.
    pub fn close(&self) -> Result<(), ConsensusError> {
        self.bus.close();
        self.inner.read().db.close()?;
        Ok(())
    }

    pub fn height(&self) -> BlockHeight {
        self.inner.read().height()
    }

    pub fn genesis_id(&self) -> BlockId {
        self.inner.read().genesis_id
    }

    pub fn current_block(&self) -> Block {
        let inner = self.inner.read();
        inner.block_map[&inner.tip_id()].block.clone()
    }

    pub fn block_at_height(&self, height: BlockHeight) -> Option<Block> {
        let inner = self.inner.read();
        let id = inner.current_path.get(height as usize)?;
        Some(inner.block_map[id].block.clone())
    }

    pub fn block(&self, id: BlockId) -> Option<Block> {
        self.inner.read().block_map.get(&id).map(|node| node.block.clone())
    }

    pub fn height_of_block(&self, id: BlockId) -> Option<BlockHeight> {
        self.inner.read().block_map.get(&id).map(|node| node.height)
    }

    /// The target for a block extending `id`.
    pub fn child_target(&self, id: BlockId) -> Option<Target> {
        let inner = self.inner.read();
        inner.block_map.contains_key(&id).then(|| inner.child_target_of(id))
    }

    pub fn current_target(&self) -> Target {
        let inner = self.inner.read();
        inner.child_target_of(inner.tip_id())
    }

    /// Lower bound on the timestamp of a block extending `id`.
    pub fn earliest_child_timestamp(&self, id: BlockId) -> Option<Timestamp> {
        let inner = self.inner.read();
        inner.block_map.contains_key(&id).then(|| inner.earliest_child_timestamp_of(id))
    }

    pub fn earliest_timestamp(&self) -> Timestamp {
        let inner = self.inner.read();
        inner.earliest_child_timestamp_of(inner.tip_id())
    }

    /// The coin diffs of a block that has been on a candidate current
    /// path.
    pub fn block_output_diffs(&self, id: BlockId) -> Result<Vec<CoinOutputDiff>, ConsensusError> {
        let inner = self.inner.read();
        let node = inner.block_map.get(&id).ok_or(ConsensusError::UnknownBlock(id))?;
        if !node.diffs_generated {
            return Err(ConsensusError::DiffsNotGenerated(id));
        }
        Ok(node.coin_diffs.clone())
    }

    /// The segment a host must prove for `id`, derived from the block
    /// preceding the contract's window and the contract id.
    pub fn storage_proof_segment(&self, id: FileContractId) -> Result<u64, ConsensusError> {
        let inner = self.inner.read();
        let contract = inner.file_contracts.get(&id).ok_or(ConsensusError::UnknownContract(id))?;
        let trigger_height = contract.window_start - 1;
        if trigger_height > inner.height() {
            return Err(ConsensusError::WindowNotReached(id));
        }
        let trigger_id = inner.current_path[trigger_height as usize];
        Ok(validation::storage_proof_index(trigger_id, id, contract.file_size))
    }

    pub fn coin_output(&self, id: CoinOutputId) -> Option<CoinOutput> {
        self.inner.read().coin_outputs.get(&id).copied()
    }

    pub fn fund_output(&self, id: FundOutputId) -> Option<FundOutput> {
        self.inner.read().fund_outputs.get(&id).copied()
    }

    pub fn file_contract(&self, id: FileContractId) -> Option<FileContract> {
        self.inner.read().file_contracts.get(&id).cloned()
    }

    /// Every unspent coin output, ascending by id. The ordering is part of
    /// the contract.
    pub fn sorted_coin_outputs(&self) -> Vec<CoinOutput> {
        let inner = self.inner.read();
        inner.coin_outputs.keys().copied().sorted().map(|id| inner.coin_outputs[&id]).collect()
    }

    /// Every unspent fund output, ascending by id.
    pub fn sorted_fund_outputs(&self) -> Vec<FundOutput> {
        let inner = self.inner.read();
        inner.fund_outputs.keys().copied().sorted().map(|id| inner.fund_outputs[&id]).collect()
    }
}
