//! Broker-side pub/sub glue: subscribes to fleet state, publishes
//! key-exchange commands. See spec.md §4.6.

use std::{sync::Arc, time::Duration};

use rumqttc::{AsyncClient, ClientError, Event, MqttOptions, Packet, Publish, QoS};
use tokio_util::sync::CancellationToken;
use wgkex_common::{config::MqttConfig, topics, Domain, WorkerEndpoint, WorkerId};

use crate::registry::Registry;

/// A thin, cloneable handle to the broker's MQTT client, used by HTTP
/// handlers to publish key-exchange commands.
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

/// Connects to the bus and spawns the supervised event-loop task. The
/// returned handle can publish immediately; publishes queue until the
/// connection is established.
pub fn spawn(
    config: &MqttConfig,
    client_id: &str,
    registry: Arc<Registry>,
    known_domains: Vec<Domain>,
    exit: CancellationToken,
) -> MqttHandle {
    let mut options = MqttOptions::new(client_id, config.broker_url.clone(), config.broker_port);
    options.set_keep_alive(Duration::from_secs(config.keepalive));
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
                            log::info!("connected to MQTT broker, resubscribing");
                            for filter in [topics::METRICS_FILTER, topics::STATUS_FILTER, topics::DATA_FILTER] {
                                if let Err(e) = client.subscribe(filter, QoS::AtLeastOnce).await {
                                    log::warn!("failed to subscribe to {filter}: {e}");
                                }
                            }
                        },
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            handle_publish(&registry, &known_domains, &publish);
                        },
                        Ok(_) => {},
                        Err(e) => {
                            log::warn!("MQTT connection error, retrying: {e}");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        },
                    }
                },
                _ = exit.cancelled() => {
                    log::info!("shutting down MQTT event loop");
                    break;
                },
            }
        }
    });

    handle
}

fn handle_publish(registry: &Registry, known_domains: &[Domain], publish: &Publish) {
    if let Some(parsed) = topics::parse_metrics_topic(&publish.topic) {
        let Some(domain) = known_domains.iter().find(|d| d.name() == parsed.domain_name) else {
            log::warn!("dropping metric for unknown domain {}", parsed.domain_name);
            return;
        };
        let Ok(value) = std::str::from_utf8(&publish.payload).unwrap_or("").parse::<i64>() else {
            log::warn!("dropping non-integer metric payload on {}", publish.topic);
            return;
        };
        registry.update_metric(&WorkerId::new(parsed.worker), domain, parsed.metric, value);
        return;
    }

    if let Some(worker) = topics::parse_status_topic(&publish.topic) {
        match publish.payload.as_ref() {
            b"1" => registry.set_online(&WorkerId::new(worker)),
            b"0" => registry.set_offline(&WorkerId::new(worker)),
            other => log::warn!("unexpected status payload {other:?} on {}", publish.topic),
        }
        return;
    }

    if let Some(parsed) = topics::parse_data_topic(&publish.topic) {
        let Some(domain) = known_domains.iter().find(|d| d.name() == parsed.domain_name) else {
            log::warn!("dropping endpoint data for unknown domain {}", parsed.domain_name);
            return;
        };
        match serde_json::from_slice::<WorkerEndpoint>(&publish.payload) {
            Ok(endpoint) => registry.put_endpoint(&WorkerId::new(parsed.worker), domain, endpoint),
            Err(e) => log::warn!("dropping malformed endpoint data on {}: {e}", publish.topic),
        }
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
    fn metric_updates_registry_for_known_domain() {
        let registry = Registry::new();
        let known = vec![domain()];
        handle_publish(
            &registry,
            &known,
            &publish("wireguard-metrics/ffmuc_welt/gw01/connected_peers", b"5"),
        );
        registry.set_online(&WorkerId::new("gw01"));
        assert!(registry.is_online(&WorkerId::new("gw01"), &domain()));
    }

    #[test]
    fn metric_for_unknown_domain_is_dropped() {
        let registry = Registry::new();
        let known = vec![domain()];
        handle_publish(
            &registry,
            &known,
            &publish("wireguard-metrics/unknown_domain/gw01/connected_peers", b"5"),
        );
        assert_eq!(registry.total_peer_count(), 0);
    }

    #[test]
    fn status_transitions_registry() {
        let registry = Registry::new();
        let known = vec![domain()];
        handle_publish(&registry, &known, &publish("wireguard-worker/gw01/status", b"1"));
        registry.update_metric(&WorkerId::new("gw01"), &domain(), "connected_peers", 1);
        assert!(registry.is_online(&WorkerId::new("gw01"), &domain()));

        handle_publish(&registry, &known, &publish("wireguard-worker/gw01/status", b"0"));
        assert!(!registry.is_online(&WorkerId::new("gw01"), &domain()));
    }

    #[test]
    fn data_message_updates_endpoint() {
        let registry = Registry::new();
        let known = vec![domain()];
        let endpoint = WorkerEndpoint {
            external_address: "198.51.100.1".to_owned(),
            port: 51820,
            public_key: "o52Ge+Rpj4CUSitVag9mS7pSXUesNM0ESnvj/wwehkg=".parse().unwrap(),
            link_address: "fe80::1".to_owned(),
        };
        let payload = serde_json::to_vec(&endpoint).unwrap();
        handle_publish(
            &registry,
            &known,
            &publish("wireguard-worker/gw01/ffmuc_welt/data", &payload),
        );
        let stored = registry.endpoint(&WorkerId::new("gw01"), &domain()).unwrap();
        assert_eq!(stored, endpoint);
    }
}
