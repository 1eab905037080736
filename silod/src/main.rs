//! The silo daemon: wires the block store, consensus set and gateway into
//! a running node and gossips blocks between peers.

use clap::Parser;
use futures::FutureExt;
use log::{debug, info, warn};
use silo_consensus::params::Params;
use silo_consensus::ConsensusState;
use silo_consensus_core::block::Block;
use silo_consensus_core::network::NetAddress;
use silo_database::prelude::{open_db, BlockDb};
use silo_gateway::Gateway;
use std::path::PathBuf;
use std::sync::Arc;

const RELAY_BLOCK_RPC: &str = "RelayBlock";

#[derive(Parser)]
#[command(name = "silod", about = "A silo storage-chain node", version)]
struct Args {
    /// Directory holding the block database
    #[arg(long, default_value = "silo-data")]
    data_dir: PathBuf,

    /// Address to serve peer RPCs on
    #[arg(long, default_value = "127.0.0.1:9381")]
    listen: String,

    /// Peers to connect to at startup (repeatable)
    #[arg(long = "peer")]
    peers: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::new()
        .format_target(false)
        .format_timestamp_secs()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();
    let args = Args::parse();

    let params = Params::mainnet();
    let db = open_db(&args.data_dir.join("chain"))?;
    let cs = ConsensusState::new(params.clone(), BlockDb::open(db)?)?;
    info!("consensus set ready at height {}", cs.height());

    let gateway = Gateway::new(&args.listen).await?;
    register_block_relay(&gateway, &cs, params.block_size_limit);

    for peer in &args.peers {
        let addr = NetAddress::new(peer.clone());
        if let Err(err) = gateway.connect(addr.clone()).await {
            warn!("could not connect to {addr}: {err}");
        }
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    gateway.close();
    cs.close()?;
    Ok(())
}

/// Installs the block gossip RPC: decode one block, submit it to
/// consensus, and relay it onward only when it was new and acceptable.
fn register_block_relay(gateway: &Arc<Gateway>, cs: &Arc<ConsensusState>, block_size_limit: u64) {
    let weak_gateway = Arc::downgrade(gateway);
    let cs = cs.clone();
    gateway.register_rpc(RELAY_BLOCK_RPC, move |mut conn| {
        let weak_gateway = weak_gateway.clone();
        let cs = cs.clone();
        async move {
            let block: Block = conn.read_object(block_size_limit + 4096).await?;
            let id = block.id();
            let accepted = {
                let cs = cs.clone();
                let block = block.clone();
                tokio::task::spawn_blocking(move || cs.accept_block(block))
                    .await
                    .expect("consensus submission must not panic")
            };
            match accepted {
                Ok(()) => {
                    debug!("accepted relayed block {id}");
                    if let Some(gateway) = weak_gateway.upgrade() {
                        gateway.broadcast(RELAY_BLOCK_RPC, &block).await;
                    }
                }
                // Orphans need their ancestors fetched first; duplicates
                // and invalid blocks are simply not re-relayed.
                Err(err) => debug!("relayed block {id} not accepted: {err}"),
            }
            Ok(())
        }
        .boxed()
    });
}
