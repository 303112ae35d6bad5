//! A peer in a simulated proof-of-work network: gossip of transactions and
//! blocks, neighbour management through a bootstrap node, mining and
//! longest-chain reconciliation.

pub mod config;
pub mod constants;
pub mod generator;
pub mod message;
pub mod miner;
pub mod peer;
pub mod report;
pub mod service;
pub mod status;
pub mod transport;
pub mod wire;

pub use config::NodeConfig;
pub use message::{Message, Payload, PeerAddress};
pub use miner::{BlockingMiner, DeferredMiner, MinedBlock, Miner, MiningJob};
pub use peer::{NodeInputs, PeerNode};
pub use report::{Report, Reporter};
pub use transport::{RecordingTransport, TcpTransport, Transport};
