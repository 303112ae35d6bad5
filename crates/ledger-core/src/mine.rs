use crate::{pow::count_trailing_zero_bits, pow::mine_block, Block, Hash};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// Mines a block by racing one random nonce search per rayon worker. Each
/// worker draws from its own `StdRng` derived from `seed`; the first to meet
/// `block.difficulty` raises a shared flag and the others stop.
/// Sets `block.nonce` and returns the block hash.
pub fn mine_parallel(block: &mut Block, seed: u64) -> Hash {
    let workers = rayon::current_num_threads().max(1) as u64;
    let found = AtomicBool::new(false);
    let template = block.clone();

    let winner = (0..workers).into_par_iter().find_map_any(|worker| {
        let mut rng = StdRng::seed_from_u64(seed.wrapping_add(worker));
        let mut candidate = template.clone();
        while !found.load(Ordering::Relaxed) {
            if count_trailing_zero_bits(&candidate.hash()) >= candidate.difficulty {
                found.store(true, Ordering::Relaxed);
                return Some(candidate.nonce);
            }
            candidate.nonce = Hash(rng.gen());
        }
        None
    });

    let hash = match winner {
        Some(nonce) => {
            block.nonce = nonce;
            block.hash()
        }
        // Only reachable if every worker observed the flag without winning.
        None => mine_block(block, &mut StdRng::seed_from_u64(seed)),
    };

    info!(
        difficulty = block.difficulty,
        workers,
        hash = %hash.short(),
        "mined block"
    );
    hash
}
