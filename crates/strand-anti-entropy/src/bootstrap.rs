//! Seeding a new replica from an active peer

use crate::map::MapInner;
use crate::wire::UpdateEntry;
use futures::future::{select_ok, try_join_all};
use strand_core::serialization::{decode, encode};
use strand_core::{NodeId, Result, StoreKey, StoreValue};
use tracing::{debug, info, warn};

impl<K: StoreKey, V: StoreValue> MapInner<K, V> {
    /// Ask every active peer for a bootstrap and accept the first acknowledgement
    ///
    /// The acknowledging peer has already streamed its live entries to us by the time
    /// it answers. Failure and timeout are logged; the map then starts empty and relies
    /// on anti-entropy.
    pub(crate) async fn bootstrap(&self) {
        let peers = self.membership.active_peers();
        if peers.is_empty() {
            debug!(map = %self.name, "No active peers; skipping bootstrap");
            return;
        }

        let attempts = peers
            .iter()
            .map(|peer| Box::pin(self.request_bootstrap(peer)));
        let timeout = self.config.bootstrap_timeout();

        match tokio::time::timeout(timeout, select_ok(attempts)).await {
            Ok(Ok((peer, _))) => {
                info!(map = %self.name, peer = %peer, entries = self.items.read().len(), "Bootstrapped from peer");
            }
            Ok(Err(err)) => {
                warn!(map = %self.name, error = %err, "Bootstrap failed on every peer");
            }
            Err(_) => {
                warn!(map = %self.name, timeout_ms = self.config.bootstrap_timeout_ms, "Bootstrap timed out");
            }
        };
    }

    async fn request_bootstrap(&self, peer: &NodeId) -> Result<NodeId> {
        let payload = encode(&self.local_node)?;
        let reply = self
            .network
            .send_and_receive(
                &self.subjects.bootstrap,
                payload,
                peer,
                self.config.bootstrap_timeout(),
            )
            .await?;
        decode::<()>(&reply)?;
        Ok(peer.clone())
    }

    /// Stream every live entry to `requester` in batches, waiting for each to be applied
    pub(crate) async fn handle_bootstrap(&self, requester: &NodeId) -> Result<()> {
        self.check_destroyed()?;
        let entries: Vec<UpdateEntry<K, V>> = self
            .items
            .read()
            .iter()
            .filter(|(_, value)| value.is_alive())
            .map(|(key, value)| UpdateEntry::new(key.clone(), Some(value.clone())))
            .collect();

        let batches = entries
            .chunks(self.config.max_events)
            .map(encode)
            .collect::<Result<Vec<_>>>()?;
        debug!(map = %self.name, peer = %requester, entries = entries.len(), batches = batches.len(), "Serving bootstrap");

        let timeout = self.config.bootstrap_timeout();
        try_join_all(batches.into_iter().map(|payload| {
            self.network
                .send_and_receive(&self.subjects.initialize, payload, requester, timeout)
        }))
        .await?;
        Ok(())
    }
}
