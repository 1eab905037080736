//! The gossip gateway: a table of connected peers, a table of known node
//! addresses, and a tiny RPC transport over TCP.
//!
//! Every RPC opens a fresh stream: the dialer announces its own dialable
//! address, writes the 8-byte zero-padded RPC name, and hands the stream to
//! the handler. Node exchange rides on two RPCs: `ShareNodes` answers with
//! a small random sample of the node table, and `RelayNode` floods a single
//! new address with re-broadcast suppression.

mod conn;
mod errors;

pub use conn::{PeerConn, MAX_ADDR_MESSAGE_LEN};
pub use errors::{GatewayError, GatewayResult};

use conn::rpc_name;
use futures::future::BoxFuture;
use futures::FutureExt;
use log::{debug, info};
use parking_lot::{Mutex, RwLock};
use rand::seq::{IteratorRandom, SliceRandom};
use serde::Serialize;
use silo_consensus_core::network::NetAddress;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

const SESSION_VERSION: &str = "1.0.0";
const MAX_VERSION_LEN: u64 = 24;
const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// At most this many nodes are revealed per `ShareNodes` call.
const MAX_SHARED_NODES: usize = 10;
/// Bound on a `ShareNodes` response: ten addresses plus framing.
const SHARE_NODES_BOUND: u64 = 2048;

pub const CONNECT_RPC: &str = "Connect";
pub const SHARE_NODES_RPC: &str = "ShareNodes";
pub const RELAY_NODE_RPC: &str = "RelayNode";

fn acceptable_version(version: &str) -> bool {
    !version.is_empty() && version.len() <= 16 && version != "0.0.0"
}

type RpcHandler = Arc<dyn Fn(PeerConn) -> BoxFuture<'static, GatewayResult<()>> + Send + Sync>;

struct Peer {
    #[allow(dead_code)]
    version: String,
}

pub struct Gateway {
    /// Our own dialable address, announced on every outbound stream.
    me: NetAddress,
    /// Connected peers. Every peer is also in `nodes`.
    peers: Mutex<HashMap<NetAddress, Peer>>,
    /// Known addresses, connected or not.
    nodes: Mutex<HashSet<NetAddress>>,
    handlers: RwLock<HashMap<[u8; 8], RpcHandler>>,
    listener_task: Mutex<Option<JoinHandle<()>>>,
}

impl Gateway {
    /// Binds `bind_addr` and starts serving RPCs.
    pub async fn new(bind_addr: &str) -> GatewayResult<Arc<Gateway>> {
        let listener = TcpListener::bind(bind_addr).await?;
        let me = NetAddress::new(listener.local_addr()?.to_string());
        let gateway = Arc::new(Gateway {
            me,
            peers: Mutex::new(HashMap::new()),
            nodes: Mutex::new(HashSet::new()),
            handlers: RwLock::new(HashMap::new()),
            listener_task: Mutex::new(None),
        });
        gateway.register_builtin_rpcs();

        let weak = Arc::downgrade(&gateway);
        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, remote)) => {
                        let weak = weak.clone();
                        tokio::spawn(async move {
                            if let Err(err) = Gateway::handle_inbound(weak, stream).await {
                                debug!("inbound rpc from {remote} failed: {err}");
                            }
                        });
                    }
                    Err(err) => debug!("accept failed: {err}"),
                }
            }
        });
        *gateway.listener_task.lock() = Some(task);
        info!("gateway listening on {}", gateway.me);
        Ok(gateway)
    }

    /// The address this gateway can be dialed at.
    pub fn address(&self) -> NetAddress {
        self.me.clone()
    }

    pub fn peers(&self) -> Vec<NetAddress> {
        self.peers.lock().keys().cloned().collect()
    }

    pub fn nodes(&self) -> Vec<NetAddress> {
        self.nodes.lock().iter().cloned().collect()
    }

    /// Records a newly learned address.
    pub fn add_node(&self, addr: NetAddress) -> GatewayResult<()> {
        if !self.nodes.lock().insert(addr.clone()) {
            return Err(GatewayError::DuplicateNode(addr));
        }
        debug!("added node {addr}");
        Ok(())
    }

    pub fn remove_node(&self, addr: &NetAddress) -> GatewayResult<()> {
        if !self.nodes.lock().remove(addr) {
            return Err(GatewayError::UnknownNode(addr.clone()));
        }
        debug!("removed node {addr}");
        Ok(())
    }

    /// A uniformly random known address, for bootstrap dialing.
    pub fn random_node(&self) -> GatewayResult<NetAddress> {
        self.nodes.lock().iter().choose(&mut rand::thread_rng()).cloned().ok_or(GatewayError::NoPeers)
    }

    /// Installs `handler` for the RPC `name` (first 8 bytes, zero padded).
    pub fn register_rpc<F>(&self, name: &str, handler: F)
    where
        F: Fn(PeerConn) -> BoxFuture<'static, GatewayResult<()>> + Send + Sync + 'static,
    {
        self.handlers.write().insert(rpc_name(name), Arc::new(handler));
    }

    /// Dials `addr`, announces our address and the RPC name, then hands the
    /// stream to `f`.
    pub async fn rpc<T, F, Fut>(&self, addr: &NetAddress, name: &str, f: F) -> GatewayResult<T>
    where
        F: FnOnce(PeerConn) -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        let stream = tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(addr.as_str()))
            .await
            .map_err(|_| GatewayError::DialTimeout)??;
        let mut conn = PeerConn::new(stream, addr.clone());
        conn.write_object(&self.me).await?;
        conn.write_name(rpc_name(name)).await?;
        f(conn).await
    }

    /// Dials and handshakes with `addr`, adding it to the peer and node
    /// tables, then bootstraps the node table from it.
    pub async fn connect(&self, addr: NetAddress) -> GatewayResult<()> {
        if self.peers.lock().contains_key(&addr) {
            return Err(GatewayError::AlreadyConnected(addr));
        }
        let version = self
            .rpc(&addr, CONNECT_RPC, |mut conn| async move {
                conn.write_object(&SESSION_VERSION.to_string()).await?;
                let remote: String = conn.read_object(MAX_VERSION_LEN).await?;
                if !acceptable_version(&remote) {
                    return Err(GatewayError::BadVersion(remote));
                }
                Ok(remote)
            })
            .await?;
        info!("connected to {addr} (version {version})");
        self.peers.lock().insert(addr.clone(), Peer { version });
        let _ = self.add_node(addr.clone());
        if let Err(err) = self.request_nodes(&addr).await {
            debug!("node bootstrap from {addr} failed: {err}");
        }
        Ok(())
    }

    pub fn disconnect(&self, addr: &NetAddress) -> GatewayResult<()> {
        if self.peers.lock().remove(addr).is_none() {
            return Err(GatewayError::UnknownPeer(addr.clone()));
        }
        info!("disconnected from {addr}");
        Ok(())
    }

    /// Asks `addr` for a sample of its node table.
    pub async fn request_nodes(&self, addr: &NetAddress) -> GatewayResult<()> {
        let shared: Vec<NetAddress> =
            self.rpc(addr, SHARE_NODES_RPC, |mut conn| async move { conn.read_object(SHARE_NODES_BOUND).await }).await?;
        for node in shared.into_iter().take(MAX_SHARED_NODES).filter(NetAddress::is_valid) {
            let _ = self.add_node(node);
        }
        Ok(())
    }

    /// Concurrently runs the RPC against every connected peer, writing
    /// `object` as the single argument. Failures are logged and ignored.
    pub async fn broadcast<T: Serialize>(&self, name: &str, object: &T) {
        let peers = self.peers();
        let payload = silo_codec::encode(object);
        let calls = peers.into_iter().map(|peer| {
            let payload = payload.clone();
            async move {
                let result =
                    self.rpc(&peer, name, |mut conn| async move { conn.write_raw(&payload).await }).await;
                if let Err(err) = result {
                    debug!("broadcast of {name} to {peer} failed: {err}");
                }
            }
        });
        futures::future::join_all(calls).await;
    }

    /// Stops serving and forgets all peers. Node addresses are retained.
    pub fn close(&self) {
        if let Some(task) = self.listener_task.lock().take() {
            task.abort();
        }
        self.peers.lock().clear();
    }

    async fn handle_inbound(gateway: Weak<Gateway>, stream: TcpStream) -> GatewayResult<()> {
        let mut conn = PeerConn::new(stream, NetAddress::new(""));
        conn.callback_addr = conn.read_object::<NetAddress>(MAX_ADDR_MESSAGE_LEN).await?;
        let name = conn.read_name().await?;
        let handler = gateway.upgrade().and_then(|gateway| gateway.handlers.read().get(&name).cloned());
        match handler {
            Some(handler) => handler(conn).await,
            None => {
                Err(GatewayError::UnknownRpc(String::from_utf8_lossy(&name).trim_end_matches('\0').to_string()))
            }
        }
    }

    fn register_builtin_rpcs(self: &Arc<Self>) {
        // Inbound side of the connect handshake.
        let weak = Arc::downgrade(self);
        self.register_rpc(CONNECT_RPC, move |mut conn| {
            let weak = weak.clone();
            async move {
                let Some(gateway) = weak.upgrade() else { return Ok(()) };
                let remote: String = conn.read_object(MAX_VERSION_LEN).await?;
                conn.write_object(&SESSION_VERSION.to_string()).await?;
                if !acceptable_version(&remote) {
                    return Err(GatewayError::BadVersion(remote));
                }
                let addr = conn.callback_addr().clone();
                info!("accepted connection from {addr} (version {remote})");
                gateway.peers.lock().insert(addr.clone(), Peer { version: remote });
                let _ = gateway.add_node(addr);
                Ok(())
            }
            .boxed()
        });

        // Answers with up to ten uniformly sampled known nodes.
        let weak = Arc::downgrade(self);
        self.register_rpc(SHARE_NODES_RPC, move |mut conn| {
            let weak = weak.clone();
            async move {
                let Some(gateway) = weak.upgrade() else { return Ok(()) };
                let sample: Vec<NetAddress> = {
                    let nodes: Vec<NetAddress> = gateway.nodes.lock().iter().cloned().collect();
                    nodes.choose_multiple(&mut rand::thread_rng(), MAX_SHARED_NODES).cloned().collect()
                };
                conn.write_object(&sample).await
            }
            .boxed()
        });

        // Learns one relayed address, forwarding it only on first sight.
        let weak = Arc::downgrade(self);
        self.register_rpc(RELAY_NODE_RPC, move |mut conn| {
            let weak = weak.clone();
            async move {
                let Some(gateway) = weak.upgrade() else { return Ok(()) };
                let addr: NetAddress = conn.read_object(MAX_ADDR_MESSAGE_LEN).await?;
                if !addr.is_valid() {
                    debug!("discarding invalid relayed node {addr}");
                    return Ok(());
                }
                if gateway.add_node(addr.clone()).is_ok() {
                    // Re-broadcasting an already known address would let a
                    // single node storm the whole network.
                    gateway.broadcast(RELAY_NODE_RPC, &addr).await;
                }
                Ok(())
            }
            .boxed()
        });
    }
}
