use crate::errors::{GatewayError, GatewayResult};
use serde::{de::DeserializeOwned, Serialize};
use silo_consensus_core::network::NetAddress;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Wire bound for one encoded [`NetAddress`]: 100 address bytes plus the
/// codec's string length prefix.
pub const MAX_ADDR_MESSAGE_LEN: u64 = 108;

/// How long a single object read may take before the stream is abandoned.
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// An RPC stream to a peer.
///
/// `callback_addr` is the other end's dialable address: the dialed address
/// on the dialing side, the remote's self-reported listen address on the
/// accepting side. Objects on the stream carry an 8-byte length prefix
/// followed by their canonical encoding, and reads are bounded.
pub struct PeerConn {
    stream: TcpStream,
    pub(crate) callback_addr: NetAddress,
}

impl PeerConn {
    pub(crate) fn new(stream: TcpStream, callback_addr: NetAddress) -> Self {
        Self { stream, callback_addr }
    }

    pub fn callback_addr(&self) -> &NetAddress {
        &self.callback_addr
    }

    pub async fn write_object<T: Serialize>(&mut self, object: &T) -> GatewayResult<()> {
        let payload = silo_codec::encode(object);
        self.stream.write_all(&(payload.len() as u64).to_le_bytes()).await?;
        self.stream.write_all(&payload).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Reads one object, bounded in size by `max_len` and in time by
    /// [`READ_TIMEOUT`].
    pub async fn read_object<T: DeserializeOwned>(&mut self, max_len: u64) -> GatewayResult<T> {
        tokio::time::timeout(READ_TIMEOUT, self.read_object_inner(max_len))
            .await
            .map_err(|_| GatewayError::Io(std::io::ErrorKind::TimedOut.into()))?
    }

    async fn read_object_inner<T: DeserializeOwned>(&mut self, max_len: u64) -> GatewayResult<T> {
        let mut len_bytes = [0u8; 8];
        self.stream.read_exact(&mut len_bytes).await?;
        let len = u64::from_le_bytes(len_bytes);
        if len > max_len {
            return Err(GatewayError::OversizedMessage(max_len));
        }
        let mut payload = vec![0u8; len as usize];
        self.stream.read_exact(&mut payload).await?;
        Ok(silo_codec::decode(&payload)?)
    }

    /// Writes an already encoded payload with the standard frame.
    pub(crate) async fn write_raw(&mut self, payload: &[u8]) -> GatewayResult<()> {
        self.stream.write_all(&(payload.len() as u64).to_le_bytes()).await?;
        self.stream.write_all(payload).await?;
        self.stream.flush().await?;
        Ok(())
    }

    pub(crate) async fn write_name(&mut self, name: [u8; 8]) -> GatewayResult<()> {
        self.stream.write_all(&name).await?;
        self.stream.flush().await?;
        Ok(())
    }

    pub(crate) async fn read_name(&mut self) -> GatewayResult<[u8; 8]> {
        let mut name = [0u8; 8];
        self.stream.read_exact(&mut name).await?;
        Ok(name)
    }
}

/// RPC identifiers are the first 8 bytes of the name, zero padded.
pub(crate) fn rpc_name(name: &str) -> [u8; 8] {
    let mut id = [0u8; 8];
    let bytes = name.as_bytes();
    let len = bytes.len().min(8);
    id[..len].copy_from_slice(&bytes[..len]);
    id
}
