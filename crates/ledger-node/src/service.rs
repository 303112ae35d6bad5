use crate::config::NodeConfig;
use crate::generator::generate_transactions;
use crate::peer::PeerNode;
use crate::report::Reporter;
use crate::transport::{bind, serve, TcpTransport};
use rand::Rng;
use tracing::{info, warn};

/// Bind the peer listener, start the helper tasks and drive the node until
/// its time to live elapses.
pub async fn start_peer(config: NodeConfig, reporter: Reporter) -> anyhow::Result<()> {
    let address = config.listen;
    let listener = bind(address).await?;

    let generate = config.generate_transactions;
    let generator_seed = config.seed.unwrap_or_else(|| rand::thread_rng().gen());
    let (node, inputs) = PeerNode::new(config, TcpTransport);
    let node = node.with_reporter(reporter);

    let listener_task = tokio::spawn(serve(listener, inputs.inbound));
    let generator_task = generate.then(|| {
        info!(%address, "generating transactions");
        tokio::spawn(generate_transactions(inputs.transactions, generator_seed))
    });

    node.run().await;

    if let Some(task) = generator_task {
        task.abort();
    }
    listener_task.abort();
    match listener_task.await {
        Ok(Err(err)) => warn!(%address, error = %err, "peer listener failed"),
        _ => info!(%address, "peer stopped"),
    }
    Ok(())
}
