//! Transaction commitment as a perfect binary tree stored in heap-array form.
//!
//! Node `i` has its children at `2i + 1` and `2i + 2`; the leaves occupy the
//! last `n` slots where `n` is the smallest power of two covering the
//! transaction set. Slots past the last real transaction repeat the last leaf.

use crate::{concat_hash, Hash, Transaction};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MerkleNode {
    Leaf {
        transaction: Transaction,
        hash: Hash,
    },
    Internal {
        left: Hash,
        right: Hash,
        hash: Hash,
    },
}

impl MerkleNode {
    fn leaf(transaction: &Transaction) -> Self {
        MerkleNode::Leaf {
            transaction: transaction.clone(),
            hash: transaction.hash(),
        }
    }

    /// The digest recorded when the tree was built.
    pub fn hash(&self) -> Hash {
        match self {
            MerkleNode::Leaf { hash, .. } | MerkleNode::Internal { hash, .. } => *hash,
        }
    }

    /// The digest this node should carry given its contents.
    pub fn recompute(&self) -> Hash {
        match self {
            MerkleNode::Leaf { transaction, .. } => transaction.hash(),
            MerkleNode::Internal { left, right, .. } => concat_hash(&[*left, *right]),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleTree {
    transactions: BTreeMap<Hash, Transaction>,
    nodes: Vec<MerkleNode>,
    built: bool,
}

impl MerkleTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if a transaction with the same digest is already held.
    pub fn add(&mut self, transaction: Transaction) -> bool {
        let key = transaction.hash();
        if self.transactions.contains_key(&key) {
            return false;
        }
        self.transactions.insert(key, transaction);
        self.built = false;
        true
    }

    pub fn remove(&mut self, transaction: &Transaction) -> bool {
        if self.transactions.remove(&transaction.hash()).is_none() {
            return false;
        }
        self.built = false;
        true
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    pub fn transactions(&self) -> impl Iterator<Item = &Transaction> {
        self.transactions.values()
    }

    pub fn transaction_hashes(&self) -> impl Iterator<Item = &Hash> {
        self.transactions.keys()
    }

    pub fn nodes(&self) -> &[MerkleNode] {
        &self.nodes
    }

    /// Lay out the leaves in ascending transaction digest order and hash the
    /// internal levels bottom-up. No-op while the tree is still built.
    pub fn build(&mut self) {
        if self.built {
            return;
        }
        let width = self.transactions.len().max(1).next_power_of_two();

        let mut leaves: Vec<MerkleNode> = self.transactions.values().map(MerkleNode::leaf).collect();
        let padding = leaves
            .last()
            .cloned()
            .unwrap_or_else(|| MerkleNode::leaf(&Transaction::absent()));
        leaves.resize(width, padding);

        let internal = width - 1;
        let mut hashes = vec![Hash::ZERO; internal];
        hashes.extend(leaves.iter().map(MerkleNode::hash));
        for i in (0..internal).rev() {
            hashes[i] = concat_hash(&[hashes[2 * i + 1], hashes[2 * i + 2]]);
        }

        let mut nodes = Vec::with_capacity(2 * width - 1);
        nodes.extend((0..internal).map(|i| MerkleNode::Internal {
            left: hashes[2 * i + 1],
            right: hashes[2 * i + 2],
            hash: hashes[i],
        }));
        nodes.extend(leaves);

        self.nodes = nodes;
        self.built = true;
    }

    /// Root digest, building first if the tree is dirty.
    pub fn root(&mut self) -> Hash {
        self.build();
        self.nodes.first().map_or(Hash::ZERO, MerkleNode::hash)
    }

    /// Root digest without building; `None` while the tree is dirty.
    pub fn built_root(&self) -> Option<Hash> {
        if !self.built {
            return None;
        }
        self.nodes.first().map(MerkleNode::hash)
    }

    /// A built tree is valid when it is a perfect binary tree, every node's
    /// recorded digest matches its contents, every internal node records its
    /// children's digests, and the leaves hold exactly the transaction set.
    pub fn is_valid(&self) -> bool {
        if !self.built || self.nodes.is_empty() || !(self.nodes.len() + 1).is_power_of_two() {
            return false;
        }
        let internal = self.nodes.len() / 2;
        let linked = self.nodes.iter().enumerate().all(|(i, node)| {
            if node.hash() != node.recompute() {
                return false;
            }
            match node {
                MerkleNode::Internal { left, right, .. } => {
                    i < internal
                        && *left == self.nodes[2 * i + 1].hash()
                        && *right == self.nodes[2 * i + 2].hash()
                }
                MerkleNode::Leaf { .. } => i >= internal,
            }
        });
        linked && self.leaves_match_transactions(&self.nodes[internal..])
    }

    // Leaves must be the transactions in digest order, then copies of the
    // last one; an empty set is a single absent leaf.
    fn leaves_match_transactions(&self, leaves: &[MerkleNode]) -> bool {
        if leaves.len() != self.transactions.len().max(1).next_power_of_two() {
            return false;
        }
        let expected = self.transactions.values();
        let absent = Transaction::absent();
        let last = self.transactions.values().next_back().unwrap_or(&absent);
        let expected = expected.chain(std::iter::repeat(last));
        leaves.iter().zip(expected).all(|(leaf, transaction)| match leaf {
            MerkleNode::Leaf { transaction: held, .. } => held == transaction,
            MerkleNode::Internal { .. } => false,
        })
    }
}

impl FromIterator<Transaction> for MerkleTree {
    fn from_iter<I: IntoIterator<Item = Transaction>>(iter: I) -> Self {
        let mut tree = MerkleTree::new();
        for transaction in iter {
            tree.add(transaction);
        }
        tree
    }
}

impl fmt::Display for MerkleTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "> Merkle Tree Node Hashes (transaction after colon for leaf nodes):")?;
        for (idx, node) in self.nodes.iter().enumerate() {
            match node {
                MerkleNode::Leaf { transaction, hash } => {
                    writeln!(f, "{:02}) {}:{}", idx + 1, hash, transaction.value)?
                }
                MerkleNode::Internal { hash, .. } => writeln!(f, "{:02}) {}", idx + 1, hash)?,
            }
        }

        writeln!(f, "> Merkle Tree Hierarchy:")?;
        let leaves = (self.nodes.len() + 1) / 2;
        let (mut space, mut shrink) = ((4 * leaves).saturating_sub(2), 2 * leaves);
        let (mut idx, mut width) = (0, 1);
        while idx < self.nodes.len() {
            let labels: Vec<String> = (idx..(idx + width).min(self.nodes.len()))
                .map(|i| format!("{:02}", i + 1))
                .collect();
            let indent = " ".repeat(space.saturating_sub(shrink));
            writeln!(f, "{indent}{}", labels.join(&" ".repeat(space)))?;
            idx += width;
            width *= 2;
            space = space.saturating_sub(shrink);
            shrink /= 2;
        }
        Ok(())
    }
}
