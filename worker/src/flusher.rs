//! Periodic stale-peer eviction. See spec.md §4.7 "Stale-peer flusher".

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use wgkex_common::Domain;

use crate::netlink;

/// Spawns one supervised loop per domain that flushes stale peers every
/// `interval`. Exceptions never terminate the loop, only get logged.
pub fn spawn(domains: Vec<Domain>, interval: Duration, exit: CancellationToken) {
    for domain in domains {
        let exit = exit.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => flush_once(&domain),
                    _ = exit.cancelled() => {
                        log::info!("stopping stale-peer flusher for {domain}");
                        break;
                    },
                }
            }
        });
    }
}

fn flush_once(domain: &Domain) {
    match netlink::flush_stale_peers(domain) {
        Ok(results) if results.is_empty() => {},
        Ok(results) => {
            let failures = results.iter().filter(|r| !r.is_ok()).count();
            log::info!("flushed {} stale peer(s) on {domain} ({failures} with errors)", results.len());
        },
        Err(e) => log::warn!("stale-peer scan failed for {domain}: {e}"),
    }
}
