use crate::message::PeerAddress;
use crate::report::{BlockSummary, Report};
use axum::{extract::State, routing::get, Json, Router};
use ledger_core::Hash;
use serde::Serialize;
use std::net::SocketAddr;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::info;

/// What the status API serves, rebuilt from reports only.
#[derive(Clone, Debug, Serialize)]
pub struct NodeStatus {
    pub address: PeerAddress,
    pub height: u64,
    pub tip: Hash,
    pub neighbours: Vec<PeerAddress>,
    pub chain: Vec<BlockSummary>,
    pub transactions_created: u64,
    pub transactions_received: u64,
    pub blocks_mined: u64,
    pub blocks_received: u64,
}

impl NodeStatus {
    pub fn new(address: PeerAddress) -> Self {
        Self {
            address,
            height: 0,
            tip: Hash::ZERO,
            neighbours: Vec::new(),
            chain: Vec::new(),
            transactions_created: 0,
            transactions_received: 0,
            blocks_mined: 0,
            blocks_received: 0,
        }
    }

    pub fn apply(&mut self, report: Report) {
        match report {
            Report::Connections(peers) => self.neighbours = peers,
            Report::TransactionCreated(_) => self.transactions_created += 1,
            Report::TransactionReceived(_) => self.transactions_received += 1,
            Report::BlockMined(_) => self.blocks_mined += 1,
            Report::BlockReceived(_) => self.blocks_received += 1,
            Report::LedgerUpdated { height, tip } => {
                self.height = height;
                self.tip = tip;
            }
            Report::LedgerSnapshot(chain) => self.chain = chain,
        }
    }
}

#[derive(Clone)]
struct AppState {
    status: watch::Receiver<NodeStatus>,
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
}

#[derive(Serialize)]
struct Head {
    height: u64,
    tip: Hash,
}

async fn head(State(state): State<AppState>) -> Json<Head> {
    let head = {
        let view = state.status.borrow();
        Head {
            height: view.height,
            tip: view.tip,
        }
    };
    Json(head)
}

async fn chain(State(state): State<AppState>) -> Json<Vec<BlockSummary>> {
    let chain = state.status.borrow().chain.clone();
    Json(chain)
}

async fn peers(State(state): State<AppState>) -> Json<Vec<PeerAddress>> {
    let peers = state.status.borrow().neighbours.clone();
    Json(peers)
}

pub fn router(status: watch::Receiver<NodeStatus>) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(Health { status: "ok" }) }))
        .route("/healthz", get(|| async { Json(Health { status: "ok" }) }))
        .route("/chain/head", get(head))
        .route("/chain", get(chain))
        .route("/peers", get(peers))
        .with_state(AppState { status })
        .layer(TraceLayer::new_for_http())
}

pub async fn serve(addr: SocketAddr, status: watch::Receiver<NodeStatus>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("status api listening on http://{addr}");
    axum::serve(listener, router(status)).await?;
    Ok(())
}
