//! Worker-side pub/sub glue: publishes presence/endpoint/metrics,
//! subscribes to peer-install commands. See spec.md §4.7.

use std::{sync::Arc, time::Duration};

use rumqttc::{AsyncClient, ClientError, Event, LastWill, MqttOptions, Packet, Publish, QoS};
use tokio_util::sync::CancellationToken;
use wgkex_common::{config::MqttConfig, topics, Domain, WorkerEndpoint, WorkerId};

use crate::{netlink, queue::WorkQueue};

/// A thin, cloneable handle to the worker's MQTT client, used by the
/// metrics and flusher loops to publish without owning the event loop.
#[derive(Clone)]
pub struct MqttHandle {
    client: AsyncClient,
}

impl MqttHandle {
    pub async fn publish(
        &self,
        topic: impl Into<String>,
        payload: impl Into<Vec<u8>>,
        retain: bool,
    ) -> Result<(), ClientError> {
        self.client
            .publish(topic, QoS::AtLeastOnce, retain, payload)
            .await
    }
}

/// Connects to the bus, registers the offline last-will, and spawns the
/// supervised event-loop task. On every successful (re)connect, publishes
/// this worker's endpoint data and online status for each domain, then
/// (re)subscribes to peer-install commands.
pub fn spawn(
    config: &MqttConfig,
    worker_id: WorkerId,
    domains: Vec<Domain>,
    queue: Arc<WorkQueue>,
    exit: CancellationToken,
) -> MqttHandle {
    let status_topic = topics::worker_status_topic(&worker_id);

    let mut options = MqttOptions::new(worker_id.to_string(), config.broker_url.clone(), config.broker_port);
    options.set_keep_alive(Duration::from_secs(config.keepalive));
    options.set_last_will(LastWill::new(status_topic.clone(), "0", QoS::AtLeastOnce, true));
    if let (Some(username), Some(password)) = (&config.username, &config.password) {
        options.set_credentials(username.clone(), password.clone());
    }

    let (client, mut event_loop) = AsyncClient::new(options, 64);
    let handle = MqttHandle {
        client: client.clone(),
    };

    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = event_loop.poll() => {
                    match event {
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            log::info!("connected to MQTT broker, announcing presence");
                            announce(&client, &worker_id, &domains).await;
                        },
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            handle_publish(&queue, &domains, &publish);
                        },
                        Ok(_) => {},
                        Err(e) => {
                            log::warn!("MQTT connection error, retrying: {e}");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        },
                    }
                },
                _ = exit.cancelled() => {
                    log::info!("publishing offline status before shutdown");
                    let _ = client
                        .publish(&status_topic, QoS::AtLeastOnce, true, "0")
                        .await;
                    break;
                },
            }
        }
    });

    handle
}

async fn announce(client: &AsyncClient, worker_id: &WorkerId, domains: &[Domain]) {
    for domain in domains {
        match netlink::get_device_data(domain) {
            Ok(data) => {
                let endpoint = WorkerEndpoint {
                    external_address: worker_id.to_string(),
                    port: data.listen_port,
                    public_key: data.public_key,
                    link_address: data.link_address.to_string(),
                };
                let payload = serde_json::to_vec(&endpoint).expect("WorkerEndpoint always serializes");
                let topic = topics::worker_data_topic(worker_id, domain);
                if let Err(e) = client.publish(topic, QoS::AtLeastOnce, true, payload).await {
                    log::warn!("failed to publish endpoint data for {domain}: {e}");
                }
            },
            Err(e) => log::warn!("failed to read device data for {domain}: {e}"),
        }

        let filter = topics::peer_install_subscribe_filter(domain);
        if let Err(e) = client.subscribe(&filter, QoS::AtLeastOnce).await {
            log::warn!("failed to subscribe to {filter}: {e}");
        }
    }

    let status_topic = topics::worker_status_topic(worker_id);
    if let Err(e) = client.publish(status_topic, QoS::AtLeastOnce, true, "1").await {
        log::warn!("failed to publish online status: {e}");
    }
}

fn handle_publish(queue: &WorkQueue, known_domains: &[Domain], publish: &Publish) {
    let Some(domain_name) = topics::parse_peer_install_topic(&publish.topic) else {
        return;
    };
    let Some(domain) = known_domains.iter().find(|d| d.name() == domain_name) else {
        log::warn!("dropping peer-install command for unknown domain {domain_name}");
        return;
    };
    match std::str::from_utf8(&publish.payload).ok().and_then(|s| s.parse().ok()) {
        Some(pubkey) => queue.enqueue(domain.clone(), pubkey),
        None => log::warn!("dropping malformed public key on {}", publish.topic),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domain() -> Domain {
        Domain::new("ffmuc_welt".to_owned(), "welt".to_owned())
    }

    fn publish(topic: &str, payload: &[u8]) -> Publish {
        Publish::new(topic, QoS::AtLeastOnce, payload.to_vec())
    }

    #[test]
    fn install_command_enqueues_for_known_domain() {
        let queue = WorkQueue::new();
        let key = "o52Ge+Rpj4CUSitVag9mS7pSXUesNM0ESnvj/wwehkg=";
        handle_publish(&queue, &[domain()], &publish("wireguard/ffmuc_welt/all", key.as_bytes()));
        assert_eq!(queue.try_take(), Some((domain(), key.parse().unwrap())));
    }

    #[test]
    fn install_command_for_unknown_domain_is_dropped() {
        let queue = WorkQueue::new();
        let key = "o52Ge+Rpj4CUSitVag9mS7pSXUesNM0ESnvj/wwehkg=";
        handle_publish(&queue, &[domain()], &publish("wireguard/other_domain/all", key.as_bytes()));
        assert!(queue.try_take().is_none());
    }

    #[test]
    fn malformed_key_is_dropped() {
        let queue = WorkQueue::new();
        handle_publish(&queue, &[domain()], &publish("wireguard/ffmuc_welt/all", b"not-a-key"));
        assert!(queue.try_take().is_none());
    }
}
