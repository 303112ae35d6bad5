//! Block store with longest-chain selection.
//!
//! Blocks and merkle trees are inserted without validation; validation and
//! pruning are explicit steps. After [`Ledger::remove_short_chains`] exactly
//! one genesis-to-tip path remains.

use crate::{Block, Hash, MerkleTree, GENESIS};
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtendError {
    #[error("no blocks supplied")]
    Empty,
    #[error("{blocks} blocks supplied with {trees} merkle trees")]
    LengthMismatch { blocks: usize, trees: usize },
    #[error("block {index} is invalid or does not commit to its merkle tree")]
    InvalidPair { index: usize },
    #[error("block {0} is already in the ledger")]
    AlreadyKnown(Hash),
    #[error("block {0} did not survive pruning to the longest chain")]
    Pruned(Hash),
}

/// Result of a successful [`Ledger::extend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendOutcome {
    /// Hash of the last block of the accepted run.
    pub tip: Hash,
    /// Digests of every transaction committed by the run.
    pub committed: HashSet<Hash>,
}

#[derive(Clone, Copy)]
enum Visit {
    InProgress,
    Done(Option<u64>),
}

#[derive(Clone, Debug, Default)]
pub struct Ledger {
    blocks: HashMap<Hash, Block>,
    trees: HashMap<Hash, MerkleTree>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_block(&mut self, block: Block) -> Hash {
        let key = block.hash();
        self.blocks.insert(key, block);
        key
    }

    pub fn remove_block(&mut self, hash: &Hash) -> Option<Block> {
        self.blocks.remove(hash)
    }

    pub fn add_merkle_tree(&mut self, mut tree: MerkleTree) -> Hash {
        let key = tree.root();
        self.trees.insert(key, tree);
        key
    }

    pub fn remove_merkle_tree(&mut self, root: &Hash) -> Option<MerkleTree> {
        self.trees.remove(root)
    }

    pub fn block(&self, hash: &Hash) -> Option<&Block> {
        self.blocks.get(hash)
    }

    pub fn merkle_tree(&self, root: &Hash) -> Option<&MerkleTree> {
        self.trees.get(root)
    }

    pub fn contains_block(&self, hash: &Hash) -> bool {
        self.blocks.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    pub fn blocks(&self) -> impl Iterator<Item = (&Hash, &Block)> {
        self.blocks.iter()
    }

    /// Length of the path from genesis to each stored block; `None` for blocks
    /// whose ancestry leaves the store (orphans) or runs into a cycle.
    ///
    /// Every block is resolved exactly once: a walk follows `previous` links
    /// until it reaches genesis, an already resolved block, a missing parent,
    /// or a block still on the current walk, then assigns lengths on the way
    /// back.
    pub fn chain_lengths(&self) -> HashMap<Hash, Option<u64>> {
        let mut state: HashMap<Hash, Visit> = HashMap::with_capacity(self.blocks.len());

        for start in self.blocks.keys() {
            if state.contains_key(start) {
                continue;
            }
            let mut path = Vec::new();
            let mut cursor = *start;
            let mut length = loop {
                match state.get(&cursor) {
                    Some(Visit::Done(length)) => break *length,
                    Some(Visit::InProgress) => {
                        warn!(hash = %cursor, "cycle in block graph, treating as unreachable");
                        break None;
                    }
                    None => {}
                }
                let Some(block) = self.blocks.get(&cursor) else {
                    break None;
                };
                state.insert(cursor, Visit::InProgress);
                path.push(cursor);
                if block.previous == GENESIS {
                    break Some(0);
                }
                cursor = block.previous;
            };
            for hash in path.into_iter().rev() {
                length = length.map(|l| l + 1);
                state.insert(hash, Visit::Done(length));
            }
        }

        state
            .into_iter()
            .map(|(hash, visit)| match visit {
                Visit::Done(length) => (hash, length),
                Visit::InProgress => (hash, None),
            })
            .collect()
    }

    pub fn chain_length(&self, hash: &Hash) -> Option<u64> {
        self.chain_lengths().get(hash).copied().flatten()
    }

    // Ties on length go to the lowest block hash.
    fn best_tip(&self) -> Option<(Hash, u64)> {
        self.chain_lengths()
            .into_iter()
            .filter_map(|(hash, length)| length.map(|l| (hash, l)))
            .max_by(|(ha, la), (hb, lb)| la.cmp(lb).then_with(|| hb.cmp(ha)))
    }

    /// Hash of the block ending the longest chain, zero if no block is
    /// reachable from genesis.
    pub fn longest_chain_tip(&self) -> Hash {
        self.best_tip().map_or(Hash::ZERO, |(hash, _)| hash)
    }

    /// Number of blocks on the longest chain.
    pub fn height(&self) -> u64 {
        self.best_tip().map_or(0, |(_, length)| length)
    }

    /// Every block meets its difficulty and all of them lie on a single path
    /// from genesis.
    pub fn is_valid_blocks(&self) -> bool {
        if !self.blocks.values().all(Block::is_valid) {
            return false;
        }
        self.height() == self.blocks.len() as u64
    }

    pub fn is_valid_merkle_trees(&self) -> bool {
        self.blocks.values().all(|block| {
            self.trees
                .get(&block.merkle_root)
                .is_some_and(MerkleTree::is_valid)
        })
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_blocks() && self.is_valid_merkle_trees()
    }

    /// Keep only the blocks, and their merkle trees, on the path from the
    /// longest chain's tip back to genesis.
    pub fn remove_short_chains(&mut self) {
        let Some((tip, _)) = self.best_tip() else {
            self.blocks.clear();
            self.trees.clear();
            return;
        };

        let mut kept_blocks = HashMap::new();
        let mut kept_trees = HashMap::new();
        let mut cursor = tip;
        while let Some(block) = self.blocks.remove(&cursor) {
            if let Some(tree) = self.trees.remove(&block.merkle_root) {
                kept_trees.insert(block.merkle_root, tree);
            }
            let previous = block.previous;
            kept_blocks.insert(cursor, block);
            if previous == GENESIS {
                break;
            }
            cursor = previous;
        }

        let dropped = self.blocks.len();
        if dropped > 0 {
            debug!(dropped, tip = %tip.short(), "pruned blocks off the longest chain");
        }
        self.blocks = kept_blocks;
        self.trees = kept_trees;
    }

    /// Append a run of blocks (oldest first) with their merkle trees.
    ///
    /// Every pair must be individually valid and the block must commit to its
    /// tree's root. The run is inserted, the ledger pruned, and the run is
    /// accepted only if its last block is still present afterwards.
    pub fn extend(
        &mut self,
        blocks: Vec<Block>,
        mut trees: Vec<MerkleTree>,
    ) -> Result<ExtendOutcome, ExtendError> {
        if blocks.len() != trees.len() {
            return Err(ExtendError::LengthMismatch {
                blocks: blocks.len(),
                trees: trees.len(),
            });
        }
        let tip = match blocks.last() {
            Some(block) => block.hash(),
            None => return Err(ExtendError::Empty),
        };
        for (index, (block, tree)) in blocks.iter().zip(trees.iter_mut()).enumerate() {
            if !block.is_valid() || !tree.is_valid() || block.merkle_root != tree.root() {
                return Err(ExtendError::InvalidPair { index });
            }
        }
        if self.blocks.contains_key(&tip) {
            return Err(ExtendError::AlreadyKnown(tip));
        }

        let mut committed = HashSet::new();
        for (block, tree) in blocks.into_iter().zip(trees) {
            committed.extend(tree.transaction_hashes().copied());
            self.add_block(block);
            self.add_merkle_tree(tree);
        }
        self.remove_short_chains();

        if !self.blocks.contains_key(&tip) {
            return Err(ExtendError::Pruned(tip));
        }
        Ok(ExtendOutcome { tip, committed })
    }

    /// Blocks of the longest chain, oldest first.
    pub fn ordered_chain(&self) -> Vec<&Block> {
        let mut chain = Vec::new();
        let Some((tip, _)) = self.best_tip() else {
            return chain;
        };
        let mut cursor = tip;
        while let Some(block) = self.blocks.get(&cursor) {
            chain.push(block);
            if block.is_genesis() {
                break;
            }
            cursor = block.previous;
        }
        chain.reverse();
        chain
    }
}

impl fmt::Display for Ledger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_valid() {
            return writeln!(f, "-- Invalid Blockchain --");
        }
        writeln!(f, "Blocks in order:")?;
        for (idx, block) in self.ordered_chain().into_iter().enumerate() {
            writeln!(f, "{:02}) Prev Block: {}", idx + 1, block.previous)?;
            writeln!(f, "    Merkle Root: {}", block.merkle_root)?;
            writeln!(f, "    Nonce: {}", block.nonce)?;
            writeln!(f, "    Hash: {}", block.hash())?;
            if let Some(tree) = self.trees.get(&block.merkle_root) {
                write!(f, "{tree}")?;
            }
        }
        Ok(())
    }
}
