use ledger_core::{Block, Hash, MerkleTree, Transaction};
use rand::{rngs::StdRng, Rng, SeedableRng};

pub fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

pub fn random_tree(rng: &mut StdRng, size: usize) -> MerkleTree {
    let mut tree: MerkleTree = (0..size)
        .map(|_| {
            let value: String = (0..15).map(|_| rng.gen_range(b'A'..=b'Z') as char).collect();
            Transaction::new(value)
        })
        .collect();
    tree.build();
    tree
}

/// Build and mine a block on `previous` committing to a fresh random tree.
pub fn mined_block(rng: &mut StdRng, previous: Hash, difficulty: u32) -> (Block, MerkleTree) {
    let mut tree = random_tree(rng, 4);
    let mut block = Block::new(tree.root(), previous, difficulty);
    block.mine(rng);
    (block, tree)
}
