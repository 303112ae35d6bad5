use clap::Parser;
use ledger_node::report::consume_reports;
use ledger_node::service::start_peer;
use ledger_node::status::{self, NodeStatus};
use ledger_node::{NodeConfig, Reporter};
use std::net::SocketAddr;
use tokio::sync::{mpsc, watch};
use tracing::{error, Level};

#[derive(Parser, Debug)]
#[command(name = "ledger-node", about = "Proof-of-work network peer")]
struct Args {
    #[command(flatten)]
    node: NodeConfig,

    /// Serve the JSON status API on this address, e.g. 127.0.0.1:9080
    #[arg(long)]
    status_listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ledger_node=info,ledger_core=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();
    let address = args.node.listen;

    let (report_tx, report_rx) = mpsc::unbounded_channel();
    let (status_tx, status_rx) = watch::channel(NodeStatus::new(address));
    tokio::spawn(consume_reports(address, report_rx, status_tx));

    if let Some(status_addr) = args.status_listen {
        tokio::spawn(async move {
            if let Err(err) = status::serve(status_addr, status_rx).await {
                error!(error = %err, "status api failed");
            }
        });
    }

    start_peer(args.node, Reporter::new(report_tx)).await
}
