use silo_codec::CodecError;
use silo_consensus_core::network::NetAddress;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("no nodes are known")]
    NoPeers,

    #[error("node {0} is already known")]
    DuplicateNode(NetAddress),

    #[error("no record of node {0}")]
    UnknownNode(NetAddress),

    #[error("already connected to {0}")]
    AlreadyConnected(NetAddress),

    #[error("not connected to {0}")]
    UnknownPeer(NetAddress),

    #[error("peer reported unacceptable version {0:?}")]
    BadVersion(String),

    #[error("no handler registered for rpc {0:?}")]
    UnknownRpc(String),

    #[error("message exceeds the {0} byte bound")]
    OversizedMessage(u64),

    #[error("malformed message: {0}")]
    Codec(#[from] CodecError),

    #[error("dial timed out")]
    DialTimeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;
