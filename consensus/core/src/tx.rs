use crate::currency::Currency;
use crate::{BlockHeight, CoinOutputId, FileContractId, FundOutputId, Hash, TransactionId, UnlockHash};
use serde::{Deserialize, Serialize};
use silo_hashes::Hasher;

/// An ed25519 public key participating in spend conditions.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct PublicKey(pub [u8; 32]);

/// The preimage of an [`UnlockHash`]: outputs commit to the hash of these
/// conditions, inputs reveal them.
#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct SpendConditions {
    /// First height at which the committed output may be spent.
    pub timelock: BlockHeight,
    pub public_keys: Vec<PublicKey>,
    pub signatures_required: u64,
}

impl SpendConditions {
    pub fn unlock_hash(&self) -> UnlockHash {
        Hasher::hash(silo_codec::encode(self))
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct CoinInput {
    pub parent_id: CoinOutputId,
    pub spend_conditions: SpendConditions,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct CoinOutput {
    pub value: Currency,
    pub unlock_hash: UnlockHash,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct FundInput {
    pub parent_id: FundOutputId,
    pub spend_conditions: SpendConditions,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct FundOutput {
    pub value: Currency,
    pub unlock_hash: UnlockHash,
}

/// A storage deal: the host promises to prove possession of the committed
/// file during the proof window.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct FileContract {
    pub file_size: u64,
    pub file_merkle_root: Hash,
    /// First height (inclusive) at which a proof may be submitted.
    pub window_start: BlockHeight,
    /// Last height (inclusive) at which a proof may be submitted.
    pub window_end: BlockHeight,
    pub payout: Currency,
    pub valid_proof_output: CoinOutput,
    pub missed_proof_output: CoinOutput,
}

/// Proof that the prover holds the segment of the file selected by the
/// chain. `hash_set` carries the sibling hashes authenticating `segment`
/// against the contract's file merkle root.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct StorageProof {
    pub parent_id: FileContractId,
    pub segment: Vec<u8>,
    pub hash_set: Vec<Hash>,
}

/// A signature authorizing the spend of one input. Signatures cover the
/// transaction sighash, which omits the signatures themselves.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct TransactionSignature {
    /// Id of the output being spent.
    pub parent_id: Hash,
    /// Index into the spend conditions' key list.
    pub public_key_index: u64,
    /// The signature is invalid before this height.
    pub timelock: BlockHeight,
    pub signature: Vec<u8>,
}

#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct Transaction {
    pub coin_inputs: Vec<CoinInput>,
    pub coin_outputs: Vec<CoinOutput>,
    pub file_contracts: Vec<FileContract>,
    pub storage_proofs: Vec<StorageProof>,
    pub fund_inputs: Vec<FundInput>,
    pub fund_outputs: Vec<FundOutput>,
    pub miner_fees: Vec<Currency>,
    pub arbitrary_data: Vec<Vec<u8>>,
    pub signatures: Vec<TransactionSignature>,
}

impl Transaction {
    pub fn id(&self) -> TransactionId {
        Hasher::hash(silo_codec::encode(self))
    }

    /// The hash signatures commit to: the whole transaction except the
    /// signatures themselves.
    pub fn sighash(&self) -> Hash {
        Hasher::hash(silo_codec::encode(&(
            &self.coin_inputs,
            &self.coin_outputs,
            &self.file_contracts,
            &self.storage_proofs,
            &self.fund_inputs,
            &self.fund_outputs,
            &self.miner_fees,
            &self.arbitrary_data,
        )))
    }

    pub fn coin_output_id(&self, index: u64) -> CoinOutputId {
        Hasher::new().update(b"coin output").update(self.sighash()).update(index.to_le_bytes()).finalize()
    }

    pub fn fund_output_id(&self, index: u64) -> FundOutputId {
        Hasher::new().update(b"fund output").update(self.sighash()).update(index.to_le_bytes()).finalize()
    }

    pub fn file_contract_id(&self, index: u64) -> FileContractId {
        Hasher::new().update(b"file contract").update(self.sighash()).update(index.to_le_bytes()).finalize()
    }

    pub fn total_fees(&self) -> Option<Currency> {
        Currency::checked_sum(&self.miner_fees)
    }
}

/// Id of the output created when a contract resolves. A distinct id per
/// outcome keeps a proven and an expired resolution from colliding across
/// reorgs.
pub fn storage_proof_output_id(parent_id: FileContractId, proof_was_valid: bool) -> CoinOutputId {
    Hasher::new().update(b"storage proof output").update(parent_id).update([proof_was_valid as u8]).finalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use silo_codec::{decode, encode};

    fn sample_transaction() -> Transaction {
        let conditions = SpendConditions { timelock: 5, public_keys: vec![PublicKey([3u8; 32])], signatures_required: 1 };
        Transaction {
            coin_inputs: vec![CoinInput { parent_id: Hash::from_u64(1), spend_conditions: conditions.clone() }],
            coin_outputs: vec![CoinOutput { value: Currency::new(77), unlock_hash: conditions.unlock_hash() }],
            file_contracts: vec![FileContract {
                file_size: 4096,
                file_merkle_root: Hash::from_u64(9),
                window_start: 10,
                window_end: 20,
                payout: Currency::new(1000),
                valid_proof_output: CoinOutput { value: Currency::new(1000), unlock_hash: Hash::from_u64(2) },
                missed_proof_output: CoinOutput { value: Currency::new(1000), unlock_hash: Hash::from_u64(3) },
            }],
            storage_proofs: vec![StorageProof {
                parent_id: Hash::from_u64(4),
                segment: vec![0xaa; 64],
                hash_set: vec![Hash::from_u64(5), Hash::from_u64(6)],
            }],
            fund_inputs: vec![],
            fund_outputs: vec![FundOutput { value: Currency::new(1), unlock_hash: Hash::from_u64(7) }],
            miner_fees: vec![Currency::new(10), Currency::new(5)],
            arbitrary_data: vec![b"hello".to_vec()],
            signatures: vec![TransactionSignature {
                parent_id: Hash::from_u64(1),
                public_key_index: 0,
                timelock: 0,
                signature: vec![0x55; 64],
            }],
        }
    }

    #[test]
    fn transaction_round_trip() {
        let tx = sample_transaction();
        let encoded = encode(&tx);
        assert_eq!(encoded, encode(&tx.clone()));
        assert_eq!(decode::<Transaction>(&encoded).unwrap(), tx);
    }

    #[test]
    fn sighash_ignores_signatures() {
        let tx = sample_transaction();
        let mut stripped = tx.clone();
        stripped.signatures.clear();
        assert_eq!(tx.sighash(), stripped.sighash());
        assert_ne!(tx.id(), stripped.id());
    }

    #[test]
    fn derived_ids_are_distinct() {
        let tx = sample_transaction();
        assert_ne!(tx.coin_output_id(0), tx.coin_output_id(1));
        assert_ne!(tx.coin_output_id(0), tx.fund_output_id(0));
        assert_ne!(tx.file_contract_id(0), tx.coin_output_id(0));
        assert_ne!(storage_proof_output_id(Hash::from_u64(4), true), storage_proof_output_id(Hash::from_u64(4), false));
    }

    #[test]
    fn unlock_hash_commits_to_conditions() {
        let a = SpendConditions { timelock: 0, public_keys: vec![PublicKey([1; 32])], signatures_required: 1 };
        let mut b = a.clone();
        b.timelock = 1;
        assert_ne!(a.unlock_hash(), b.unlock_hash());
        assert_eq!(a.unlock_hash(), a.clone().unlock_hash());
    }
}
