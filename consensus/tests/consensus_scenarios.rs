//! End-to-end consensus scenarios: fresh state, linear growth, reorgs,
//! contract lifecycles and the deterministic output orderings.

use crossbeam_channel::{unbounded, Receiver, Sender};
use silo_consensus::errors::RuleError;
use silo_consensus::params::Params;
use silo_consensus::test_utils::{TestConsensus, TestKey};
use silo_consensus::ConsensusState;
use silo_consensus_core::block::Block;
use silo_consensus_core::currency::Currency;
use silo_consensus_core::tx::{storage_proof_output_id, CoinInput, CoinOutput, FileContract, StorageProof, Transaction};
use silo_consensus_core::BlockId;
use silo_database::prelude::{open_db, BlockDb};
use silo_merkle::SEGMENT_SIZE;
use silo_notify::ConsensusSetSubscriber;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

/// Records the (reverted, applied) id lists of every update.
struct Recorder {
    sender: Sender<(Vec<BlockId>, Vec<BlockId>)>,
}

impl Recorder {
    fn subscribe(cs: &ConsensusState) -> Receiver<(Vec<BlockId>, Vec<BlockId>)> {
        let (sender, receiver) = unbounded();
        cs.subscribe(Arc::new(Recorder { sender }));
        receiver
    }
}

impl ConsensusSetSubscriber for Recorder {
    fn receive_consensus_set_update(&self, reverted: &[Block], applied: &[Block]) {
        let ids = |blocks: &[Block]| blocks.iter().map(|block| block.id()).collect();
        self.sender.send((ids(reverted), ids(applied))).unwrap();
    }
}

fn recv(receiver: &Receiver<(Vec<BlockId>, Vec<BlockId>)>) -> (Vec<BlockId>, Vec<BlockId>) {
    receiver.recv_timeout(Duration::from_secs(5)).expect("an update should have been published")
}

#[test]
fn fresh_state_reports_genesis() {
    let tc = TestConsensus::new();
    let genesis = tc.params.genesis_block();
    assert_eq!(tc.cs.height(), 0);
    assert_eq!(tc.cs.current_block(), genesis);
    assert_eq!(tc.cs.block_at_height(0), Some(genesis.clone()));
    assert_eq!(tc.cs.height_of_block(genesis.id()), Some(0));

    // No coins exist yet; the genesis airdrop is the only fund output.
    assert!(tc.cs.sorted_coin_outputs().is_empty());
    let funds = tc.cs.sorted_fund_outputs();
    assert_eq!(funds, vec![genesis.transactions[0].fund_outputs[0]]);
}

#[test]
fn linear_extension_fires_one_applied_update_per_block() {
    let tc = TestConsensus::new();
    let updates = Recorder::subscribe(&tc.cs);

    for expected_height in 1..=3 {
        let block = tc.mine_and_accept(vec![]).unwrap();
        assert_eq!(tc.cs.height(), expected_height);
        assert_eq!(recv(&updates), (vec![], vec![block.id()]));
    }
}

#[test]
fn reorg_reverts_descending_and_applies_ascending() {
    let tc = TestConsensus::new();
    let genesis_id = tc.cs.genesis_id();

    let a1 = tc.build_block_on(genesis_id, vec![]);
    tc.cs.accept_block(a1.clone()).unwrap();
    let a2 = tc.build_block_on(a1.id(), vec![]);
    tc.cs.accept_block(a2.clone()).unwrap();

    let updates = Recorder::subscribe(&tc.cs);

    // An equally deep fork does not displace the incumbent tip.
    let b1 = tc.build_block_on(genesis_id, vec![]);
    tc.cs.accept_block(b1.clone()).unwrap();
    let b2 = tc.build_block_on(b1.id(), vec![]);
    tc.cs.accept_block(b2.clone()).unwrap();
    assert_eq!(tc.cs.current_block().id(), a2.id());

    // One more block makes the fork strictly heavier.
    let b3 = tc.build_block_on(b2.id(), vec![]);
    tc.cs.accept_block(b3.clone()).unwrap();
    assert_eq!(tc.cs.current_block().id(), b3.id());
    assert_eq!(tc.cs.height(), 3);

    let (reverted, applied) = recv(&updates);
    assert_eq!(reverted, vec![a2.id(), a1.id()]);
    assert_eq!(applied, vec![b1.id(), b2.id(), b3.id()]);

    for (height, block) in [(1, &b1), (2, &b2), (3, &b3)] {
        assert_eq!(tc.cs.block_at_height(height).unwrap().id(), block.id());
    }
    // The losing branch stays known with its diffs intact.
    assert_eq!(tc.cs.height_of_block(a2.id()), Some(2));
    assert!(tc.cs.block_output_diffs(a1.id()).is_ok());
}

#[test]
fn block_log_mirrors_the_current_path_across_restarts() {
    // Mine both branches on a scratch instance, then feed the same blocks
    // to the instance under test. Blocks are plain data; any consensus set
    // sharing the params accepts them.
    let tc = TestConsensus::new();
    let genesis_id = tc.cs.genesis_id();
    let mined = |parent: BlockId| {
        let block = tc.build_block_on(parent, vec![]);
        tc.cs.accept_block(block.clone()).unwrap();
        block
    };
    let a1 = mined(genesis_id);
    let a2 = mined(a1.id());
    let b1 = mined(genesis_id);
    let b2 = mined(b1.id());
    let b3 = mined(b2.id());

    let db_dir = tempfile::tempdir().unwrap();
    {
        let cs = ConsensusState::new(Params::testing(), BlockDb::open(open_db(db_dir.path()).unwrap()).unwrap()).unwrap();
        for block in [&a1, &a2, &b1, &b2, &b3] {
            cs.accept_block((*block).clone()).unwrap();
        }
        assert_eq!(cs.height(), 3);
        cs.close().unwrap();
    }

    // Reopening replays the stored chain: only the winning branch is on
    // disk, at heights 1..=3.
    let chain = BlockDb::open(open_db(db_dir.path()).unwrap()).unwrap();
    assert_eq!(chain.height(), 4);
    for (height, block) in [(1u64, &b1), (2, &b2), (3, &b3)] {
        assert_eq!(chain.block(height).unwrap().id(), block.id());
    }
    let cs = ConsensusState::new(Params::testing(), chain).unwrap();
    assert_eq!(cs.height(), 3);
    assert_eq!(cs.current_block().id(), b3.id());
}

#[test]
fn replaying_the_current_path_reproduces_the_utxo_sets() {
    let tc = TestConsensus::new();
    let genesis_id = tc.cs.genesis_id();
    let a1 = tc.build_block_on(genesis_id, vec![]);
    tc.cs.accept_block(a1.clone()).unwrap();
    let b1 = tc.build_block_on(genesis_id, vec![]);
    tc.cs.accept_block(b1.clone()).unwrap();
    let b2 = tc.build_block_on(b1.id(), vec![]);
    tc.cs.accept_block(b2.clone()).unwrap();
    assert_eq!(tc.cs.height(), 2);

    let replay = TestConsensus::new();
    replay.cs.accept_block(b1).unwrap();
    replay.cs.accept_block(b2).unwrap();
    assert_eq!(replay.cs.sorted_coin_outputs(), tc.cs.sorted_coin_outputs());
    assert_eq!(replay.cs.sorted_fund_outputs(), tc.cs.sorted_fund_outputs());
}

#[test]
fn sorted_outputs_ascend_by_id_and_cover_the_set() {
    let tc = TestConsensus::new();
    let mut expected = Vec::new();
    for _ in 0..5 {
        let block = tc.mine_and_accept(vec![]).unwrap();
        expected.push((block.payout_id(0), block.miner_payouts[0].value));
    }
    expected.sort_by_key(|(id, _)| *id);

    let sorted = tc.cs.sorted_coin_outputs();
    assert_eq!(sorted.len(), expected.len());
    for ((id, value), output) in expected.iter().zip(&sorted) {
        assert_eq!(output.value, *value);
        assert_eq!(tc.cs.coin_output(*id).unwrap(), *output);
    }
}

/// Builds a contract over `file`, funded by the miner payout of `funding`.
fn contract_transaction(
    tc: &TestConsensus,
    funding: &Block,
    host: &TestKey,
    file: &[u8],
    window_start: u64,
    window_end: u64,
) -> (Transaction, FileContract) {
    let payout_id = funding.payout_id(0);
    let value = funding.miner_payouts[0].value;
    let contract = FileContract {
        file_size: file.len() as u64,
        file_merkle_root: silo_merkle::reader_root(&mut Cursor::new(file)).unwrap(),
        window_start,
        window_end,
        payout: value,
        valid_proof_output: CoinOutput { value, unlock_hash: host.unlock_hash() },
        missed_proof_output: CoinOutput { value, unlock_hash: host.unlock_hash() },
    };
    let mut tx = Transaction {
        coin_inputs: vec![CoinInput { parent_id: payout_id, spend_conditions: tc.miner.conditions() }],
        file_contracts: vec![contract.clone()],
        ..Default::default()
    };
    tc.miner.sign_input(&mut tx, payout_id);
    (tx, contract)
}

fn test_file() -> Vec<u8> {
    (0..4096).map(|i| (i % 251) as u8).collect()
}

#[test]
fn storage_proof_resolves_contract_with_valid_payout() {
    let tc = TestConsensus::new();
    let host = TestKey::from_seed(3);
    let file = test_file();

    let funding = tc.mine_and_accept(vec![]).unwrap();
    let (tx, contract) = contract_transaction(&tc, &funding, &host, &file, 4, 6);
    let fcid = tx.file_contract_id(0);
    tc.mine_and_accept(vec![tx]).unwrap(); // height 2
    assert_eq!(tc.cs.file_contract(fcid), Some(contract.clone()));
    assert!(tc.cs.storage_proof_segment(fcid).is_err(), "window trigger not on the path yet");

    tc.mine_and_accept(vec![]).unwrap(); // height 3, the trigger block
    let index = tc.cs.storage_proof_segment(fcid).unwrap();
    assert!(index < silo_merkle::segment_count(file.len() as u64));

    let (segment, hash_set) = silo_merkle::build_reader_proof(&mut Cursor::new(&file), index).unwrap();
    assert_eq!(&segment[..], &file[index as usize * SEGMENT_SIZE..(index as usize + 1) * SEGMENT_SIZE]);
    let proof_tx = Transaction {
        storage_proofs: vec![StorageProof { parent_id: fcid, segment: segment.to_vec(), hash_set }],
        ..Default::default()
    };
    tc.mine_and_accept(vec![proof_tx]).unwrap(); // height 4 == window_start

    assert_eq!(tc.cs.file_contract(fcid), None);
    let payout = tc.cs.coin_output(storage_proof_output_id(fcid, true)).unwrap();
    assert_eq!(payout, contract.valid_proof_output);
    assert!(tc.cs.coin_output(storage_proof_output_id(fcid, false)).is_none());
}

#[test]
fn early_or_bogus_storage_proofs_are_rejected() {
    let tc = TestConsensus::new();
    let host = TestKey::from_seed(3);
    let file = test_file();

    let funding = tc.mine_and_accept(vec![]).unwrap();
    let (tx, _) = contract_transaction(&tc, &funding, &host, &file, 4, 6);
    let fcid = tx.file_contract_id(0);
    tc.mine_and_accept(vec![tx]).unwrap(); // height 2

    // Too early: the window opens at height 4.
    let (segment, hash_set) = silo_merkle::build_reader_proof(&mut Cursor::new(&file), 0).unwrap();
    let early = Transaction {
        storage_proofs: vec![StorageProof { parent_id: fcid, segment: segment.to_vec(), hash_set }],
        ..Default::default()
    };
    let block = tc.mine_block(vec![early]);
    assert_eq!(tc.cs.accept_block(block), Err(RuleError::ProofOutsideWindow));

    tc.mine_and_accept(vec![]).unwrap(); // height 3
    let index = tc.cs.storage_proof_segment(fcid).unwrap();

    // Right window, wrong segment content.
    let (mut segment, hash_set) = silo_merkle::build_reader_proof(&mut Cursor::new(&file), index).unwrap();
    segment[0] ^= 1;
    let bogus = Transaction {
        storage_proofs: vec![StorageProof { parent_id: fcid, segment: segment.to_vec(), hash_set }],
        ..Default::default()
    };
    let block = tc.mine_block(vec![bogus]);
    assert_eq!(tc.cs.accept_block(block), Err(RuleError::InvalidStorageProof));
}

#[test]
fn unproven_contracts_expire_into_missed_payouts() {
    let tc = TestConsensus::new();
    let host = TestKey::from_seed(3);
    let file = test_file();

    let funding = tc.mine_and_accept(vec![]).unwrap();
    let (tx, contract) = contract_transaction(&tc, &funding, &host, &file, 4, 6);
    let fcid = tx.file_contract_id(0);
    tc.mine_and_accept(vec![tx]).unwrap(); // height 2

    // Mine through the window without proving; the block at height 7 sees
    // window_end < height and resolves the contract as missed.
    for _ in 3..=7 {
        tc.mine_and_accept(vec![]).unwrap();
    }
    assert_eq!(tc.cs.file_contract(fcid), None);
    let payout = tc.cs.coin_output(storage_proof_output_id(fcid, false)).unwrap();
    assert_eq!(payout, contract.missed_proof_output);
    assert!(tc.cs.coin_output(storage_proof_output_id(fcid, true)).is_none());
}

#[test]
fn fees_flow_to_the_miner_payout() {
    let tc = TestConsensus::new();
    let recipient = TestKey::from_seed(5);
    let b1 = tc.mine_and_accept(vec![]).unwrap();
    let payout_id = b1.payout_id(0);
    let value = b1.miner_payouts[0].value;
    let fee = Currency::from_coins(1);

    let mut tx = Transaction {
        coin_inputs: vec![CoinInput { parent_id: payout_id, spend_conditions: tc.miner.conditions() }],
        coin_outputs: vec![CoinOutput { value: value.checked_sub(fee).unwrap(), unlock_hash: recipient.unlock_hash() }],
        miner_fees: vec![fee],
        ..Default::default()
    };
    tc.miner.sign_input(&mut tx, payout_id);

    let block = tc.mine_and_accept(vec![tx]).unwrap();
    let expected = silo_consensus_core::constants::block_subsidy(2).checked_add(fee).unwrap();
    assert_eq!(block.payout_sum().unwrap(), expected);

    // Underpaying the miner makes the block invalid.
    let short = Block { miner_payouts: vec![], ..tc.mine_block(vec![]) };
    let target = tc.cs.child_target(short.parent_id).unwrap();
    let mut short = short;
    while !target.is_met_by(short.id()) {
        short.nonce += 1;
    }
    assert!(matches!(tc.cs.accept_block(short), Err(RuleError::BadMinerPayouts(_, _))));
}
