use ledger_core::{Block, Hash, MerkleTree, Transaction};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{AddrParseError, Ipv4Addr, SocketAddr};
use std::str::FromStr;

/// Network identity of a peer; also the key of every peer table.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerAddress(pub SocketAddr);

impl PeerAddress {
    pub fn localhost(port: u16) -> Self {
        PeerAddress(SocketAddr::from((Ipv4Addr::LOCALHOST, port)))
    }

    pub fn port(&self) -> u16 {
        self.0.port()
    }
}

impl From<SocketAddr> for PeerAddress {
    fn from(addr: SocketAddr) -> Self {
        PeerAddress(addr)
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Debug for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerAddress({})", self.0)
    }
}

impl FromStr for PeerAddress {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(PeerAddress)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    ConnectionRequest,
    ConnectionAccept,
    ConnectionReject,
    NewTransaction(Transaction),
    NewBlock { block: Block, tree: MerkleTree },
    /// Ask for the block with this hash.
    NeedBlock(Hash),
    NeedPeerList,
    PeerList(Vec<PeerAddress>),
    HeartbeatPing,
    HeartbeatPong,
}

impl Payload {
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::ConnectionRequest => "connection-request",
            Payload::ConnectionAccept => "connection-accept",
            Payload::ConnectionReject => "connection-reject",
            Payload::NewTransaction(_) => "new-transaction",
            Payload::NewBlock { .. } => "new-block",
            Payload::NeedBlock(_) => "need-block",
            Payload::NeedPeerList => "need-peer-list",
            Payload::PeerList(_) => "peer-list",
            Payload::HeartbeatPing => "heartbeat-ping",
            Payload::HeartbeatPong => "heartbeat-pong",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub sender: PeerAddress,
    pub payload: Payload,
}

impl Message {
    pub fn new(sender: PeerAddress, payload: Payload) -> Self {
        Self { sender, payload }
    }
}
