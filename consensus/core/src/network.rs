use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Maximum encoded length of a [`NetAddress`], in bytes.
pub const MAX_NET_ADDRESS_LENGTH: usize = 100;

/// Marker bytes preceding an encoded [`HostAnnouncement`] in a
/// transaction's arbitrary data.
pub const PREFIX_HOST_ANNOUNCEMENT: &[u8] = b"HostAnnouncement";

/// A dialable `host:port` address.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub struct NetAddress(String);

impl NetAddress {
    pub fn new(addr: impl Into<String>) -> Self {
        NetAddress(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the address has the `host:port` shape and fits the wire
    /// bound. Gossiped addresses failing this are discarded.
    pub fn is_valid(&self) -> bool {
        if self.0.len() > MAX_NET_ADDRESS_LENGTH {
            return false;
        }
        match self.0.rsplit_once(':') {
            Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
            None => false,
        }
    }

    pub fn host(&self) -> Option<&str> {
        self.0.rsplit_once(':').map(|(host, _)| host)
    }

    pub fn port(&self) -> Option<u16> {
        self.0.rsplit_once(':').and_then(|(_, port)| port.parse().ok())
    }
}

impl Display for NetAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NetAddress {
    fn from(addr: &str) -> Self {
        NetAddress(addr.to_string())
    }
}

/// A host advertising its dialable address to the network through a
/// transaction's arbitrary data.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct HostAnnouncement {
    pub ip_address: NetAddress,
}

impl HostAnnouncement {
    /// The arbitrary-data entry announcing this host: the fixed prefix
    /// followed by the canonical encoding.
    pub fn to_arbitrary_data(&self) -> Vec<u8> {
        let mut data = PREFIX_HOST_ANNOUNCEMENT.to_vec();
        data.extend_from_slice(&silo_codec::encode(self));
        data
    }

    /// Parses an arbitrary-data entry, `None` when the prefix is absent or
    /// the payload does not decode.
    pub fn from_arbitrary_data(data: &[u8]) -> Option<HostAnnouncement> {
        let payload = data.strip_prefix(PREFIX_HOST_ANNOUNCEMENT)?;
        silo_codec::decode(payload).ok()
    }
}
