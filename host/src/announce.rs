use crate::{Host, HostResult};
use log::info;
use silo_consensus_core::network::{HostAnnouncement, NetAddress};

impl Host {
    /// Advertises `address` to the network by submitting a transaction
    /// whose arbitrary data carries the encoded announcement.
    pub fn announce(&self, address: NetAddress) -> HostResult<()> {
        let announcement = HostAnnouncement { ip_address: address.clone() };
        let builder = self.wallet.register_transaction()?;
        self.wallet.add_arbitrary_data(builder, announcement.to_arbitrary_data())?;
        let transaction = self.wallet.sign_transaction(builder)?;
        self.tpool.accept_transaction(transaction)?;
        info!("announced host address {address}");
        Ok(())
    }
}
