//! Mining attempts run off the event loop and post one [`MinedBlock`] back.

use ledger_core::{mine::mine_parallel, Block, Hash, MerkleTree, Transaction};
use rand::{rngs::StdRng, SeedableRng};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

/// Result of one mining attempt.
#[derive(Debug)]
pub struct MinedBlock {
    pub block: Block,
    pub tree: MerkleTree,
}

/// A transaction batch to commit on top of `previous`.
#[derive(Clone, Debug)]
pub struct MiningJob {
    pub transactions: Vec<Transaction>,
    pub previous: Hash,
    pub difficulty: u32,
    pub parallel: bool,
    pub seed: u64,
}

impl MiningJob {
    /// Build the tree and search for a nonce. Runs until it succeeds.
    pub fn run(self) -> MinedBlock {
        let mut tree: MerkleTree = self.transactions.into_iter().collect();
        let mut block = Block::new(tree.root(), self.previous, self.difficulty);
        if self.parallel {
            mine_parallel(&mut block, self.seed);
        } else {
            block.mine(&mut StdRng::seed_from_u64(self.seed));
        }
        MinedBlock { block, tree }
    }
}

pub trait Miner: Send + Sync + 'static {
    fn start(&self, job: MiningJob, results: mpsc::UnboundedSender<MinedBlock>);
}

/// One blocking task per attempt. Must be used from within a tokio runtime.
#[derive(Clone, Copy, Debug, Default)]
pub struct BlockingMiner;

impl Miner for BlockingMiner {
    fn start(&self, job: MiningJob, results: mpsc::UnboundedSender<MinedBlock>) {
        tokio::task::spawn_blocking(move || {
            let _ = results.send(job.run());
        });
    }
}

type Parked = (MiningJob, mpsc::UnboundedSender<MinedBlock>);

/// Holds attempts until [`DeferredMiner::finish_all`] runs them inline, so
/// callers decide when results become visible.
#[derive(Clone, Default)]
pub struct DeferredMiner {
    parked: Arc<Mutex<Vec<Parked>>>,
}

impl DeferredMiner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts started but not yet finished.
    pub fn in_flight(&self) -> usize {
        self.parked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Run every parked attempt and post its result. Returns the mined hashes.
    pub fn finish_all(&self) -> Vec<Hash> {
        let parked = std::mem::take(&mut *self.parked.lock().unwrap_or_else(PoisonError::into_inner));
        parked
            .into_iter()
            .map(|(job, results)| {
                let mined = job.run();
                let hash = mined.block.hash();
                let _ = results.send(mined);
                hash
            })
            .collect()
    }
}

impl Miner for DeferredMiner {
    fn start(&self, job: MiningJob, results: mpsc::UnboundedSender<MinedBlock>) {
        self.parked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((job, results));
    }
}
