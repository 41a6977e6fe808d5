//! The installer loop: drains the work queue and applies each peer to the
//! kernel. See spec.md §4.7 "Peer-install queue".

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{
    netlink::{link_handler, WireGuardClient},
    queue::WorkQueue,
};

/// Runs until `exit` is cancelled. A failed installation is logged but
/// still counts as processed — the item is never requeued.
pub async fn run(queue: Arc<WorkQueue>, exit: CancellationToken) {
    loop {
        let (domain, public_key) = tokio::select! {
            item = queue.take() => item,
            _ = exit.cancelled() => {
                log::info!("stopping peer installer");
                return;
            },
        };

        let client = WireGuardClient {
            public_key: public_key.clone(),
            domain: domain.clone(),
            remove: false,
        };

        let result = tokio::task::spawn_blocking(move || link_handler(&client))
            .await
            .expect("installer worker thread panicked");

        if !result.is_ok() {
            log::warn!(
                "peer install for {public_key} on {domain} had errors: wireguard={:?} route={:?} bridge_fdb={:?}",
                result.wireguard,
                result.route,
                result.bridge_fdb,
            );
        }
    }
}
