//! Observability events emitted by a peer. Purely informational: emitting
//! never blocks and a missing or closed sink is ignored.

use crate::message::PeerAddress;
use crate::status::NodeStatus;
use ledger_core::{Hash, Ledger, Transaction};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BlockSummary {
    pub height: u64,
    pub hash: Hash,
    pub previous: Hash,
    pub merkle_root: Hash,
    pub nonce: Hash,
    pub difficulty: u32,
    pub transactions: Vec<String>,
}

/// Oldest-first listing of the ledger's chain.
pub fn summarize(ledger: &Ledger) -> Vec<BlockSummary> {
    ledger
        .ordered_chain()
        .into_iter()
        .enumerate()
        .map(|(idx, block)| BlockSummary {
            height: idx as u64 + 1,
            hash: block.hash(),
            previous: block.previous,
            merkle_root: block.merkle_root,
            nonce: block.nonce,
            difficulty: block.difficulty,
            transactions: ledger
                .merkle_tree(&block.merkle_root)
                .map(|tree| tree.transactions().map(|tx| tx.value.clone()).collect())
                .unwrap_or_default(),
        })
        .collect()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Report {
    Connections(Vec<PeerAddress>),
    TransactionCreated(Transaction),
    TransactionReceived(Transaction),
    BlockMined(Hash),
    BlockReceived(Hash),
    LedgerUpdated { height: u64, tip: Hash },
    LedgerSnapshot(Vec<BlockSummary>),
}

#[derive(Clone, Debug, Default)]
pub struct Reporter {
    sink: Option<mpsc::UnboundedSender<Report>>,
}

impl Reporter {
    pub fn new(sink: mpsc::UnboundedSender<Report>) -> Self {
        Self { sink: Some(sink) }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn emit(&self, report: Report) {
        if let Some(sink) = &self.sink {
            let _ = sink.send(report);
        }
    }
}

/// Log every report and fold it into the shared status view.
pub async fn consume_reports(
    source: PeerAddress,
    mut reports: mpsc::UnboundedReceiver<Report>,
    status: watch::Sender<NodeStatus>,
) {
    while let Some(report) = reports.recv().await {
        match &report {
            Report::Connections(peers) => info!(%source, neighbours = ?peers, "connections changed"),
            Report::TransactionCreated(tx) => info!(%source, value = %tx.value, "created a transaction"),
            Report::TransactionReceived(tx) => debug!(%source, value = %tx.value, "received a transaction"),
            Report::BlockMined(hash) => info!(%source, hash = %hash.short(), "mined a block"),
            Report::BlockReceived(hash) => debug!(%source, hash = %hash.short(), "received a block"),
            Report::LedgerUpdated { height, tip } => {
                info!(%source, height, tip = %tip.short(), "updated its blockchain")
            }
            Report::LedgerSnapshot(chain) => debug!(%source, blocks = chain.len(), "ledger snapshot"),
        }
        status.send_modify(|view| view.apply(report));
    }
}
