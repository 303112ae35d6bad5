use crate::constants::{
    DEFAULT_LISTEN, DEFAULT_MAX_NEIGHBOURS, DEFAULT_TRANSACTIONS_PER_BLOCK, RESERVED_INBOUND_SLOTS,
};
use crate::message::PeerAddress;
use clap::Parser;
use ledger_core::constants::POW_TARGET_DIFFICULTY;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
pub struct NodeConfig {
    /// Address this peer listens on, e.g. 127.0.0.1:8081
    #[arg(long, default_value = DEFAULT_LISTEN)]
    pub listen: PeerAddress,

    /// Trailing zero bits required of mined blocks and of accepted blocks
    #[arg(long, default_value_t = POW_TARGET_DIFFICULTY)]
    pub difficulty: u32,

    /// Act as the bootstrap node that tracks network membership
    #[arg(long)]
    pub bootstrap: bool,

    /// Mine blocks from pooled transactions
    #[arg(long)]
    pub miner: bool,

    /// Produce synthetic transactions every few seconds
    #[arg(long)]
    pub generate_transactions: bool,

    /// Address of the bootstrap node
    #[arg(long, default_value = DEFAULT_LISTEN)]
    pub bootstrap_address: PeerAddress,

    /// Pooled transactions needed before a block is mined
    #[arg(long, default_value_t = DEFAULT_TRANSACTIONS_PER_BLOCK)]
    pub transactions_per_block: usize,

    #[arg(long, default_value_t = DEFAULT_MAX_NEIGHBOURS)]
    pub max_neighbours: usize,

    /// Seconds before the node shuts itself down; -1 runs forever
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    pub time_to_live: i64,

    /// Refuse every inbound block (adversarial peer)
    #[arg(long)]
    pub bad_node: bool,

    /// Spread nonce search over all cores
    #[arg(long)]
    pub parallel_mining: bool,

    /// Seed for mining and peer selection randomness
    #[arg(long)]
    pub seed: Option<u64>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let listen = PeerAddress::localhost(8080);
        Self {
            listen,
            difficulty: POW_TARGET_DIFFICULTY,
            bootstrap: false,
            miner: false,
            generate_transactions: false,
            bootstrap_address: listen,
            transactions_per_block: DEFAULT_TRANSACTIONS_PER_BLOCK,
            max_neighbours: DEFAULT_MAX_NEIGHBOURS,
            time_to_live: -1,
            bad_node: false,
            parallel_mining: false,
            seed: None,
        }
    }
}

impl NodeConfig {
    /// `None` when the node should run until stopped.
    pub fn lifetime(&self) -> Option<Duration> {
        u64::try_from(self.time_to_live).ok().map(Duration::from_secs)
    }

    /// Neighbour count below which the node looks for more peers.
    pub fn neighbour_target(&self) -> usize {
        self.max_neighbours.saturating_sub(RESERVED_INBOUND_SLOTS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags() {
        let config = NodeConfig::parse_from([
            "ledger-node",
            "--listen",
            "127.0.0.1:8085",
            "--difficulty",
            "12",
            "--miner",
            "--bootstrap-address",
            "127.0.0.1:8080",
            "--transactions-per-block",
            "2",
            "--time-to-live",
            "30",
            "--seed",
            "7",
        ]);
        assert_eq!(config.listen, PeerAddress::localhost(8085));
        assert_eq!(config.difficulty, 12);
        assert!(config.miner);
        assert!(!config.bootstrap);
        assert_eq!(config.transactions_per_block, 2);
        assert_eq!(config.lifetime(), Some(Duration::from_secs(30)));
        assert_eq!(config.seed, Some(7));
    }

    #[test]
    fn defaults_match_parser_defaults() {
        let parsed = NodeConfig::parse_from(["ledger-node"]);
        let default = NodeConfig::default();
        assert_eq!(parsed.listen, default.listen);
        assert_eq!(parsed.difficulty, default.difficulty);
        assert_eq!(parsed.max_neighbours, default.max_neighbours);
        assert_eq!(parsed.lifetime(), None);
    }

    #[test]
    fn negative_time_to_live_is_unbounded() {
        let config = NodeConfig::parse_from(["ledger-node", "--time-to-live", "-1"]);
        assert_eq!(config.lifetime(), None);
    }

    #[test]
    fn neighbour_target_reserves_inbound_slots() {
        let mut config = NodeConfig::default();
        config.max_neighbours = 5;
        assert_eq!(config.neighbour_target(), 3);
        config.max_neighbours = 1;
        assert_eq!(config.neighbour_target(), 0);
    }
}
