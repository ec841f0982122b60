use anyhow::Result;
use clap::Parser;
use raft_node::{console, MemoryStore, Node, NodeArgs, NodeConfig, TcpGateway, TcpTransport};
use std::sync::Arc;
use tracing::{info, warn};

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = NodeConfig::from(NodeArgs::parse());
    let store = Arc::new(MemoryStore::new());
    let node = Node::new(config.clone(), store.clone(), TcpTransport)?;

    let gateway = TcpGateway::bind(config.listen_addr()).await?;
    info!(id = %config.id, addr = %gateway.local_addr()?, peers = ?config.peers, "gateway listening");
    let serving = tokio::spawn(gateway.serve(Arc::new(node.clone()), node.subscribe_shutdown()));
    let running = tokio::spawn({
        let node = node.clone();
        async move { node.run().await }
    });

    println!("{}", console::HELP);
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(err) = signal {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        }
        result = console::run(node.clone(), &store, tokio::io::stdin()) => {
            if let Err(err) = result {
                warn!(error = ?err, "console closed with error");
            }
        }
    }

    info!("shutting down");
    node.shutdown();
    let _ = tokio::join!(serving, running);
    Ok(())
}
