use crate::errors::{BlockProcessResult, RuleError};
use crate::state::StateInner;
use ed25519_dalek::{Signature, VerifyingKey};
use silo_consensus_core::currency::Currency;
use silo_consensus_core::target::Uint256;
use silo_consensus_core::tx::{storage_proof_output_id, FileContract, SpendConditions, StorageProof, Transaction};
use silo_consensus_core::utxo::{CoinOutputDiff, DiffDirection, FileContractDiff, FundOutputDiff};
use silo_consensus_core::{BlockHeight, BlockId, FileContractId, Hash, UnlockHash};
use silo_hashes::Hasher;
use std::collections::HashSet;

/// The diffs accumulated while applying one block.
#[derive(Default)]
pub(crate) struct DiffSet {
    pub coin: Vec<CoinOutputDiff>,
    pub fund: Vec<FundOutputDiff>,
    pub contract: Vec<FileContractDiff>,
}

/// The segment index a prover must open, fixed by the block preceding the
/// contract's proof window and the contract id.
pub(crate) fn storage_proof_index(trigger_id: BlockId, contract_id: FileContractId, file_size: u64) -> u64 {
    let seed = Hasher::new().update(trigger_id).update(contract_id).finalize();
    let segments = silo_merkle::segment_count(file_size);
    (Uint256::from_big_endian(&seed.as_bytes()) % Uint256::from(segments)).as_u64()
}

/// Validates `tx` against the evolving UTXO view at `height` and, on
/// success, commits its effects to the maps while recording them in
/// `diffs`. Validation is read-only, so a failure leaves the maps exactly
/// as they were.
pub(crate) fn apply_transaction(
    state: &mut StateInner,
    tx: &Transaction,
    height: BlockHeight,
    diffs: &mut DiffSet,
) -> BlockProcessResult<()> {
    validate_transaction(state, tx, height)?;
    commit_transaction(state, tx, diffs);
    Ok(())
}

fn validate_transaction(state: &StateInner, tx: &Transaction, height: BlockHeight) -> BlockProcessResult<()> {
    // A proof-bearing transaction must not create anything: its outputs
    // would be orphaned if a reorg invalidates the proof.
    if !tx.storage_proofs.is_empty()
        && (!tx.coin_outputs.is_empty() || !tx.file_contracts.is_empty() || !tx.fund_outputs.is_empty())
    {
        return Err(RuleError::ProofTransactionWithSideEffects);
    }

    let sighash = tx.sighash();

    let mut seen_coin_inputs = HashSet::new();
    let mut coin_in = Currency::ZERO;
    for input in &tx.coin_inputs {
        if !seen_coin_inputs.insert(input.parent_id) {
            return Err(RuleError::DoubleSpend(input.parent_id));
        }
        let output = state.coin_outputs.get(&input.parent_id).ok_or(RuleError::MissingInput(input.parent_id))?;
        check_spend(&input.spend_conditions, output.unlock_hash, input.parent_id, tx, sighash, height)?;
        coin_in = coin_in.checked_add(output.value).ok_or(RuleError::CurrencyOverflow)?;
    }

    let mut seen_fund_inputs = HashSet::new();
    let mut fund_in = Currency::ZERO;
    for input in &tx.fund_inputs {
        if !seen_fund_inputs.insert(input.parent_id) {
            return Err(RuleError::DoubleSpend(input.parent_id));
        }
        let output = state.fund_outputs.get(&input.parent_id).ok_or(RuleError::MissingInput(input.parent_id))?;
        check_spend(&input.spend_conditions, output.unlock_hash, input.parent_id, tx, sighash, height)?;
        fund_in = fund_in.checked_add(output.value).ok_or(RuleError::CurrencyOverflow)?;
    }

    for contract in &tx.file_contracts {
        validate_contract(contract, height)?;
    }

    // Coin creation must exactly consume coin destruction.
    let mut coin_out = Currency::checked_sum(tx.coin_outputs.iter().map(|output| &output.value))
        .ok_or(RuleError::CurrencyOverflow)?;
    for contract in &tx.file_contracts {
        coin_out = coin_out.checked_add(contract.payout).ok_or(RuleError::CurrencyOverflow)?;
    }
    let fees = tx.total_fees().ok_or(RuleError::CurrencyOverflow)?;
    coin_out = coin_out.checked_add(fees).ok_or(RuleError::CurrencyOverflow)?;
    if coin_in != coin_out {
        return Err(RuleError::UnbalancedCoins(coin_in, coin_out));
    }

    let fund_out =
        Currency::checked_sum(tx.fund_outputs.iter().map(|output| &output.value)).ok_or(RuleError::CurrencyOverflow)?;
    if fund_in != fund_out {
        return Err(RuleError::UnbalancedFunds(fund_in, fund_out));
    }

    let mut seen_proofs = HashSet::new();
    for proof in &tx.storage_proofs {
        if !seen_proofs.insert(proof.parent_id) {
            return Err(RuleError::DoubleSpend(proof.parent_id));
        }
        validate_storage_proof(state, proof, height)?;
    }

    Ok(())
}

fn check_spend(
    conditions: &SpendConditions,
    unlock_hash: UnlockHash,
    parent_id: Hash,
    tx: &Transaction,
    sighash: Hash,
    height: BlockHeight,
) -> BlockProcessResult<()> {
    if conditions.unlock_hash() != unlock_hash {
        return Err(RuleError::WrongUnlockConditions);
    }
    if conditions.timelock > height {
        return Err(RuleError::PrematureSpend(conditions.timelock));
    }

    let mut used_keys = HashSet::new();
    let mut valid = 0u64;
    for sig in tx.signatures.iter().filter(|sig| sig.parent_id == parent_id) {
        if sig.timelock > height {
            return Err(RuleError::BadSignature);
        }
        // A key may authorize a spend once.
        if !used_keys.insert(sig.public_key_index) {
            return Err(RuleError::BadSignature);
        }
        let key = conditions.public_keys.get(sig.public_key_index as usize).ok_or(RuleError::BadSignature)?;
        let verifying_key = VerifyingKey::from_bytes(&key.0).map_err(|_| RuleError::BadSignature)?;
        let signature = Signature::from_slice(&sig.signature).map_err(|_| RuleError::BadSignature)?;
        verifying_key.verify_strict(&sighash.as_bytes(), &signature).map_err(|_| RuleError::BadSignature)?;
        valid += 1;
    }
    if valid < conditions.signatures_required {
        return Err(RuleError::MissingSignatures);
    }
    Ok(())
}

fn validate_contract(contract: &FileContract, height: BlockHeight) -> BlockProcessResult<()> {
    if contract.file_size == 0 {
        return Err(RuleError::EmptyContract);
    }
    if contract.window_start <= height || contract.window_end < contract.window_start {
        return Err(RuleError::BadContractWindow);
    }
    if contract.payout.is_zero()
        || contract.valid_proof_output.value != contract.payout
        || contract.missed_proof_output.value != contract.payout
    {
        return Err(RuleError::BadContractPayout);
    }
    Ok(())
}

fn validate_storage_proof(state: &StateInner, proof: &StorageProof, height: BlockHeight) -> BlockProcessResult<()> {
    let contract =
        state.file_contracts.get(&proof.parent_id).ok_or(RuleError::UnknownProofContract(proof.parent_id))?;
    if height < contract.window_start || height > contract.window_end {
        return Err(RuleError::ProofOutsideWindow);
    }
    // window_start is below the applying height, so the trigger block is
    // already on the current path.
    let trigger_id = state.current_path[(contract.window_start - 1) as usize];
    let index = storage_proof_index(trigger_id, proof.parent_id, contract.file_size);
    let segments = silo_merkle::segment_count(contract.file_size);
    if !silo_merkle::verify_segment(&proof.segment, &proof.hash_set, segments, index, contract.file_merkle_root) {
        return Err(RuleError::InvalidStorageProof);
    }
    Ok(())
}

fn commit_transaction(state: &mut StateInner, tx: &Transaction, diffs: &mut DiffSet) {
    for input in &tx.coin_inputs {
        let output = state.coin_outputs.remove(&input.parent_id).expect("input validated against the map");
        diffs.coin.push(CoinOutputDiff { direction: DiffDirection::Remove, id: input.parent_id, output });
    }
    for (index, output) in tx.coin_outputs.iter().enumerate() {
        let id = tx.coin_output_id(index as u64);
        state.coin_outputs.insert(id, *output);
        diffs.coin.push(CoinOutputDiff { direction: DiffDirection::Add, id, output: *output });
    }

    for input in &tx.fund_inputs {
        let output = state.fund_outputs.remove(&input.parent_id).expect("input validated against the map");
        diffs.fund.push(FundOutputDiff { direction: DiffDirection::Remove, id: input.parent_id, output });
    }
    for (index, output) in tx.fund_outputs.iter().enumerate() {
        let id = tx.fund_output_id(index as u64);
        state.fund_outputs.insert(id, *output);
        diffs.fund.push(FundOutputDiff { direction: DiffDirection::Add, id, output: *output });
    }

    for (index, contract) in tx.file_contracts.iter().enumerate() {
        let id = tx.file_contract_id(index as u64);
        state.file_contracts.insert(id, contract.clone());
        diffs.contract.push(FileContractDiff { direction: DiffDirection::Add, id, contract: contract.clone() });
    }

    for proof in &tx.storage_proofs {
        let contract = state.file_contracts.remove(&proof.parent_id).expect("proof validated against the map");
        let payout_id = storage_proof_output_id(proof.parent_id, true);
        state.coin_outputs.insert(payout_id, contract.valid_proof_output);
        diffs.coin.push(CoinOutputDiff {
            direction: DiffDirection::Add,
            id: payout_id,
            output: contract.valid_proof_output,
        });
        diffs.contract.push(FileContractDiff { direction: DiffDirection::Remove, id: proof.parent_id, contract });
    }
}
