use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_NODE: &str = "http://127.0.0.1:9080";

#[derive(Parser, Debug)]
#[command(name = "ledger-cli")]
#[command(about = "Inspect a running peer through its status API")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Height and tip of the peer's longest chain
    Head {
        /// Status API base URL (e.g. http://127.0.0.1:9080)
        #[arg(long, default_value = DEFAULT_NODE)]
        node: String,
    },
    /// Every block of the longest chain, oldest first
    Chain {
        #[arg(long, default_value = DEFAULT_NODE)]
        node: String,
    },
    /// Current neighbours of the peer
    Peers {
        #[arg(long, default_value = DEFAULT_NODE)]
        node: String,
    },
}

impl Command {
    fn url(&self) -> String {
        let (node, path) = match self {
            Command::Head { node } => (node, "chain/head"),
            Command::Chain { node } => (node, "chain"),
            Command::Peers { node } => (node, "peers"),
        };
        format!("{}/{path}", node.trim_end_matches('/'))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .pretty()
        .init();

    let cli = Cli::parse();
    let url = cli.cmd.url();
    debug!(%url, "querying status api");

    let res = reqwest::get(&url)
        .await
        .with_context(|| format!("requesting {url}"))?
        .error_for_status()?;
    let body: serde_json::Value = res.json().await.context("decoding status response")?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subcommands_map_to_routes() {
        let cli = Cli::parse_from(["ledger-cli", "head"]);
        assert_eq!(cli.cmd.url(), "http://127.0.0.1:9080/chain/head");

        let cli = Cli::parse_from(["ledger-cli", "chain", "--node", "http://10.0.0.2:9000/"]);
        assert_eq!(cli.cmd.url(), "http://10.0.0.2:9000/chain");

        let cli = Cli::parse_from(["ledger-cli", "peers"]);
        assert_eq!(cli.cmd.url(), "http://127.0.0.1:9080/peers");
    }
}
