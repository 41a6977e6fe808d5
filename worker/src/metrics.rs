//! Periodic connected-peer metric publication. See spec.md §4.7 "Periodic
//! metrics loop".

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use wgkex_common::{topics, Domain, WorkerId};

use crate::{mqtt::MqttHandle, netlink};

/// Spawns one supervised loop per domain that publishes `connected_peers`
/// every `interval`, retained. Publishes `-1` on shutdown to self-evict
/// from the broker's load calculations.
pub fn spawn(
    mqtt: MqttHandle,
    worker_id: WorkerId,
    domains: Vec<Domain>,
    interval: Duration,
    exit: CancellationToken,
) {
    for domain in domains {
        let mqtt = mqtt.clone();
        let worker_id = worker_id.clone();
        let exit = exit.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => publish_once(&mqtt, &worker_id, &domain).await,
                    _ = exit.cancelled() => {
                        log::info!("publishing offline metric for {domain} before shutdown");
                        let topic = topics::worker_metric_topic(&domain, &worker_id, "connected_peers");
                        if let Err(e) = mqtt.publish(topic, "-1", true).await {
                            log::warn!("failed to publish shutdown metric for {domain}: {e}");
                        }
                        break;
                    },
                }
            }
        });
    }
}

async fn publish_once(mqtt: &MqttHandle, worker_id: &WorkerId, domain: &Domain) {
    let count = match netlink::count_connected_peers(domain) {
        Ok(count) => count,
        Err(e) => {
            log::warn!("failed to count connected peers for {domain}: {e}");
            return;
        },
    };

    let topic = topics::worker_metric_topic(domain, worker_id, "connected_peers");
    if let Err(e) = mqtt.publish(topic, count.to_string(), true).await {
        log::warn!("failed to publish connected_peers for {domain}: {e}");
    }
}
