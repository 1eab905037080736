//! The host module: tracks storage obligations against confirmed file
//! contracts and, driven by consensus updates, proves possession of the
//! committed files before their windows close.

mod announce;
mod update;

pub mod errors;
pub mod testing;
pub mod wallet;

pub use errors::{HostError, HostResult};

use log::info;
use silo_consensus::ConsensusState;
use silo_consensus_core::tx::FileContract;
use silo_consensus_core::{BlockHeight, FileContractId};
use silo_utils::sync::TimedRwLock;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use wallet::{TransactionPool, Wallet};

/// A commitment to prove storage of one file when its contract's window
/// opens.
#[derive(Clone, Debug)]
pub struct Obligation {
    pub id: FileContractId,
    /// Path of the stored file, relative to the host's storage directory.
    pub path: PathBuf,
    pub file_size: u64,
    pub window_start: BlockHeight,
}

struct HostInner {
    /// The host's view of the chain height, advanced update by update.
    block_height: BlockHeight,
    /// Both indexes always hold the same obligation set.
    obligations_by_id: HashMap<FileContractId, Obligation>,
    obligations_by_height: HashMap<BlockHeight, Vec<FileContractId>>,
    space_remaining: u64,
}

pub struct Host {
    cs: Arc<ConsensusState>,
    wallet: Arc<dyn Wallet>,
    tpool: Arc<dyn TransactionPool>,
    save_dir: PathBuf,
    inner: TimedRwLock<HostInner>,
}

impl Host {
    /// Creates a host storing obligation files under `save_dir`, with
    /// `capacity` bytes to sell. Register the result as a consensus
    /// subscriber to activate proof submission.
    pub fn new(
        cs: Arc<ConsensusState>,
        wallet: Arc<dyn Wallet>,
        tpool: Arc<dyn TransactionPool>,
        save_dir: impl Into<PathBuf>,
        capacity: u64,
        lock_stall_warning: Duration,
    ) -> HostResult<Arc<Host>> {
        let save_dir = save_dir.into();
        fs::create_dir_all(&save_dir)?;
        let inner = HostInner {
            block_height: cs.height(),
            obligations_by_id: HashMap::new(),
            obligations_by_height: HashMap::new(),
            space_remaining: capacity,
        };
        Ok(Arc::new(Host {
            cs,
            wallet,
            tpool,
            save_dir,
            inner: TimedRwLock::new(inner, "host", lock_stall_warning),
        }))
    }

    /// Starts tracking a confirmed contract whose file already sits at
    /// `filename` inside the storage directory.
    pub fn add_obligation(&self, contract: &FileContract, id: FileContractId, filename: &str) -> HostResult<()> {
        let mut inner = self.inner.write();
        if inner.obligations_by_id.contains_key(&id) {
            return Err(HostError::DuplicateObligation(id));
        }
        let full_path = self.save_dir.join(filename);
        let metadata = fs::metadata(&full_path).map_err(|_| HostError::BadObligationFile(full_path.clone()))?;
        if metadata.len() < contract.file_size {
            return Err(HostError::BadObligationFile(full_path));
        }
        if contract.file_size > inner.space_remaining {
            return Err(HostError::InsufficientCapacity);
        }
        inner.space_remaining -= contract.file_size;
        inner.obligations_by_height.entry(contract.window_start).or_default().push(id);
        inner.obligations_by_id.insert(
            id,
            Obligation { id, path: PathBuf::from(filename), file_size: contract.file_size, window_start: contract.window_start },
        );
        info!("tracking obligation for contract {id}, proof due at height {}", contract.window_start);
        Ok(())
    }

    pub fn obligation_count(&self) -> usize {
        self.inner.read().obligations_by_id.len()
    }

    pub fn space_remaining(&self) -> u64 {
        self.inner.read().space_remaining
    }
}
