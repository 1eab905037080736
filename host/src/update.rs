use crate::{Host, HostResult, Obligation};
use log::{info, warn};
use silo_consensus_core::block::Block;
use silo_consensus_core::tx::StorageProof;
use silo_notify::ConsensusSetSubscriber;
use std::fs;

impl Host {
    /// Builds and submits the storage proof for one obligation. The
    /// segment index is authoritative only at the chain, so it is queried
    /// fresh; consensus takes its own read lock underneath.
    fn create_storage_proof(&self, obligation: &Obligation) -> HostResult<()> {
        let full_path = self.save_dir.join(&obligation.path);
        let mut file = fs::File::open(&full_path)?;
        let index = self.cs.storage_proof_segment(obligation.id)?;
        let (segment, hash_set) = silo_merkle::build_reader_proof(&mut file, index)?;
        let proof = StorageProof { parent_id: obligation.id, segment: segment.to_vec(), hash_set };

        let builder = self.wallet.register_transaction()?;
        self.wallet.add_storage_proof(builder, proof)?;
        let transaction = self.wallet.sign_transaction(builder)?;
        self.tpool.accept_transaction(transaction)?;
        Ok(())
    }
}

impl ConsensusSetSubscriber for Host {
    /// Tracks the chain height through reverted and applied blocks and
    /// submits a proof for every obligation whose window opens. Runs under
    /// the host lock, excluding concurrent obligation insertion.
    fn receive_consensus_set_update(&self, reverted: &[Block], applied: &[Block]) {
        let mut inner = self.inner.write();
        inner.block_height = inner.block_height.saturating_sub(reverted.len() as u64);

        for _ in applied {
            inner.block_height += 1;
            let height = inner.block_height;
            for id in inner.obligations_by_height.remove(&height).unwrap_or_default() {
                let Some(obligation) = inner.obligations_by_id.remove(&id) else {
                    continue;
                };
                match self.create_storage_proof(&obligation) {
                    Ok(()) => info!("submitted storage proof for contract {id}"),
                    // The window is passing; a proof cannot be retried.
                    Err(err) => warn!("dropping obligation for contract {id}: {err}"),
                }
                inner.space_remaining += obligation.file_size;
                let full_path = self.save_dir.join(&obligation.path);
                if let Err(err) = fs::remove_file(&full_path) {
                    warn!("failed to release obligation file {}: {err}", full_path.display());
                }
            }
        }
    }
}
