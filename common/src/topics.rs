//! MQTT topic template builders and parsers, shared by the broker (which
//! publishes key-exchange commands and subscribes to fleet state) and the
//! worker (the mirror image).

use crate::types::{Domain, WorkerId};

/// Filter the broker subscribes to catch `connected_peers`-style metrics
/// from every worker and domain: `wireguard-metrics/+/+/+`.
pub const METRICS_FILTER: &str = "wireguard-metrics/+/+/+";

/// Filter the broker subscribes to catch worker online/offline status:
/// `wireguard-worker/+/status`.
pub const STATUS_FILTER: &str = "wireguard-worker/+/status";

/// Filter the broker subscribes to catch retained worker endpoint data:
/// `wireguard-worker/+/+/data`.
pub const DATA_FILTER: &str = "wireguard-worker/+/+/data";

/// Topic the broker publishes a v1/v2 key-exchange command to.
pub fn peer_install_topic(domain: &Domain) -> String {
    format!("wireguard/{}/all", domain.name())
}

/// Filter a worker subscribes to receive key-exchange commands for one of
/// its configured domains.
pub fn peer_install_subscribe_filter(domain: &Domain) -> String {
    format!("wireguard/{}/+", domain.name())
}

/// Topic the broker publishes a v3 ("Parker") key-exchange command to.
pub const PARKER_PEER_INSTALL_TOPIC: &str = "parker/wireguard/all";

/// Topic a worker publishes its online (`1`) / offline (`0`) status to,
/// retained, with a last-will set to the offline payload.
pub fn worker_status_topic(worker: &WorkerId) -> String {
    format!("wireguard-worker/{worker}/status")
}

/// Topic a worker publishes its retained `WorkerEndpoint` JSON to, per
/// domain.
pub fn worker_data_topic(worker: &WorkerId, domain: &Domain) -> String {
    format!("wireguard-worker/{worker}/{}/data", domain.name())
}

/// Topic a worker publishes a named integer metric to, per domain. The
/// canonical metric name is `connected_peers`.
pub fn worker_metric_topic(domain: &Domain, worker: &WorkerId, metric: &str) -> String {
    format!("wireguard-metrics/{}/{worker}/{metric}", domain.name())
}

/// A topic matched against `METRICS_FILTER`, split into its components.
pub struct MetricTopic<'a> {
    pub domain_name: &'a str,
    pub worker: &'a str,
    pub metric: &'a str,
}

/// Parses a topic observed to match [`METRICS_FILTER`] into its components.
/// Returns `None` if `topic` doesn't have the expected shape.
pub fn parse_metrics_topic(topic: &str) -> Option<MetricTopic<'_>> {
    let mut parts = topic.splitn(4, '/');
    let head = parts.next()?;
    if head != "wireguard-metrics" {
        return None;
    }
    let domain_name = parts.next()?;
    let worker = parts.next()?;
    let metric = parts.next()?;
    Some(MetricTopic {
        domain_name,
        worker,
        metric,
    })
}

/// Parses a topic observed to match [`STATUS_FILTER`] into the worker id.
pub fn parse_status_topic(topic: &str) -> Option<&str> {
    let mut parts = topic.splitn(3, '/');
    if parts.next()? != "wireguard-worker" {
        return None;
    }
    let worker = parts.next()?;
    if parts.next()? != "status" {
        return None;
    }
    Some(worker)
}

/// Parses a topic observed to match a worker's
/// [`peer_install_subscribe_filter`] into the domain name it was published
/// for. The final segment (the "gateway" slot) is unused by workers.
pub fn parse_peer_install_topic(topic: &str) -> Option<&str> {
    let mut parts = topic.splitn(3, '/');
    if parts.next()? != "wireguard" {
        return None;
    }
    let domain_name = parts.next()?;
    parts.next()?;
    Some(domain_name)
}

/// A topic matched against `DATA_FILTER`, split into its components.
pub struct DataTopic<'a> {
    pub worker: &'a str,
    pub domain_name: &'a str,
}

/// Parses a topic observed to match [`DATA_FILTER`] into its components.
pub fn parse_data_topic(topic: &str) -> Option<DataTopic<'_>> {
    let mut parts = topic.splitn(4, '/');
    if parts.next()? != "wireguard-worker" {
        return None;
    }
    let worker = parts.next()?;
    let domain_name = parts.next()?;
    if parts.next()? != "data" {
        return None;
    }
    Some(DataTopic {
        worker,
        domain_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domain() -> Domain {
        Domain::new("ffmuc_welt".to_owned(), "welt".to_owned())
    }

    #[test]
    fn builds_expected_topics() {
        let d = domain();
        let w = WorkerId::new("gw01");
        assert_eq!(peer_install_topic(&d), "wireguard/ffmuc_welt/all");
        assert_eq!(peer_install_subscribe_filter(&d), "wireguard/ffmuc_welt/+");
        assert_eq!(worker_status_topic(&w), "wireguard-worker/gw01/status");
        assert_eq!(
            worker_data_topic(&w, &d),
            "wireguard-worker/gw01/ffmuc_welt/data"
        );
        assert_eq!(
            worker_metric_topic(&d, &w, "connected_peers"),
            "wireguard-metrics/ffmuc_welt/gw01/connected_peers"
        );
    }

    #[test]
    fn parses_metrics_topic() {
        let parsed = parse_metrics_topic("wireguard-metrics/ffmuc_welt/gw01/connected_peers")
            .expect("should parse");
        assert_eq!(parsed.domain_name, "ffmuc_welt");
        assert_eq!(parsed.worker, "gw01");
        assert_eq!(parsed.metric, "connected_peers");
        assert!(parse_metrics_topic("wireguard-worker/gw01/status").is_none());
    }

    #[test]
    fn parses_status_topic() {
        assert_eq!(
            parse_status_topic("wireguard-worker/gw01/status"),
            Some("gw01")
        );
        assert!(parse_status_topic("wireguard-worker/gw01/ffmuc_welt/data").is_none());
    }

    #[test]
    fn parses_peer_install_topic() {
        assert_eq!(
            parse_peer_install_topic("wireguard/ffmuc_welt/all"),
            Some("ffmuc_welt")
        );
        assert!(parse_peer_install_topic("wireguard-worker/gw01/status").is_none());
    }

    #[test]
    fn parses_data_topic() {
        let parsed =
            parse_data_topic("wireguard-worker/gw01/ffmuc_welt/data").expect("should parse");
        assert_eq!(parsed.worker, "gw01");
        assert_eq!(parsed.domain_name, "ffmuc_welt");
    }
}
