#![allow(dead_code)]

use ledger_core::{Block, Hash, MerkleTree, Transaction};
use ledger_node::{
    Message, NodeConfig, NodeInputs, Payload, PeerAddress, PeerNode, RecordingTransport,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::time::Instant;

pub const BOOTSTRAP_PORT: u16 = 8080;

pub fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Config for a quiet peer: no mining, no generator, trivial difficulty.
pub fn config(port: u16) -> NodeConfig {
    NodeConfig {
        listen: PeerAddress::localhost(port),
        bootstrap_address: PeerAddress::localhost(BOOTSTRAP_PORT),
        difficulty: 0,
        seed: Some(u64::from(port)),
        ..NodeConfig::default()
    }
}

pub fn bootstrap_config() -> NodeConfig {
    NodeConfig {
        bootstrap: true,
        ..config(BOOTSTRAP_PORT)
    }
}

pub fn spawn_node(config: NodeConfig) -> (PeerNode<RecordingTransport>, NodeInputs, RecordingTransport) {
    let transport = RecordingTransport::new();
    let (node, inputs) = PeerNode::new(config, transport.clone());
    (node, inputs, transport)
}

pub fn deliver(node: &mut PeerNode<RecordingTransport>, from: u16, payload: Payload, now: Instant) {
    node.handle_message(Message::new(PeerAddress::localhost(from), payload), now);
}

/// Make `ports` neighbours of `node` through connection requests.
pub fn connect(node: &mut PeerNode<RecordingTransport>, ports: &[u16], now: Instant) {
    for port in ports {
        deliver(node, *port, Payload::ConnectionRequest, now);
    }
}

/// Targets of every recorded message whose payload satisfies `matches`.
pub fn targets_of(
    sent: &[(PeerAddress, Message)],
    matches: impl Fn(&Payload) -> bool,
) -> Vec<PeerAddress> {
    let mut targets: Vec<PeerAddress> = sent
        .iter()
        .filter(|(_, message)| matches(&message.payload))
        .map(|(target, _)| *target)
        .collect();
    targets.sort();
    targets
}

pub fn addresses(ports: &[u16]) -> Vec<PeerAddress> {
    ports.iter().copied().map(PeerAddress::localhost).collect()
}

pub fn random_transaction(rng: &mut StdRng) -> Transaction {
    let value: String = (0..15).map(|_| rng.gen_range(b'A'..=b'Z') as char).collect();
    Transaction::new(value)
}

pub fn tree_of(transactions: Vec<Transaction>) -> MerkleTree {
    let mut tree: MerkleTree = transactions.into_iter().collect();
    tree.build();
    tree
}

/// Mine a block on `previous` over a fresh random tree.
pub fn mined_block(rng: &mut StdRng, previous: Hash, difficulty: u32) -> (Block, MerkleTree) {
    let transactions = (0..3).map(|_| random_transaction(rng)).collect();
    mined_block_over(rng, previous, difficulty, tree_of(transactions))
}

pub fn mined_block_over(
    rng: &mut StdRng,
    previous: Hash,
    difficulty: u32,
    mut tree: MerkleTree,
) -> (Block, MerkleTree) {
    let mut block = Block::new(tree.root(), previous, difficulty);
    block.mine(rng);
    (block, tree)
}
