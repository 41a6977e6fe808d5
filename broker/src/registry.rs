//! The worker fleet registry: `map<WorkerId, WorkerMetrics>` plus
//! `map<(WorkerId, Domain), WorkerEndpoint>`, kept behind a single lock so
//! updates are atomic per `(worker, domain, metric)` as required by
//! spec.md §5's resource table.

use std::collections::HashMap;

use parking_lot::Mutex;
use wgkex_common::{Domain, WorkerEndpoint, WorkerId};

/// Per-worker liveness and per-domain metrics, fed by bus message handlers.
#[derive(Debug, Default, Clone)]
pub struct WorkerMetrics {
    pub online: bool,
    pub domain_metrics: HashMap<Domain, HashMap<String, i64>>,
}

impl WorkerMetrics {
    /// `peer_count(worker) = Σ max(0, connected_peers[d])`.
    fn peer_count(&self) -> i64 {
        self.domain_metrics
            .values()
            .filter_map(|metrics| metrics.get("connected_peers"))
            .map(|&n| n.max(0))
            .sum()
    }

    fn connected_peers(&self, domain: &Domain) -> Option<i64> {
        self.domain_metrics.get(domain)?.get("connected_peers").copied()
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    metrics: HashMap<WorkerId, WorkerMetrics>,
    endpoints: HashMap<(WorkerId, Domain), WorkerEndpoint>,
}

/// The broker's in-memory view of the worker fleet. Safe to share across
/// HTTP handler threads and the MQTT event loop via `Arc`.
#[derive(Debug, Default)]
pub struct Registry {
    state: Mutex<RegistryState>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `update_metric(worker, domain, name, value)`.
    pub fn update_metric(&self, worker: &WorkerId, domain: &Domain, name: &str, value: i64) {
        let mut state = self.state.lock();
        state
            .metrics
            .entry(worker.clone())
            .or_default()
            .domain_metrics
            .entry(domain.clone())
            .or_default()
            .insert(name.to_owned(), value);
    }

    /// Advisory local bump used right after worker selection, see
    /// spec.md §4.4. Not rolled back on a failed handoff (see DESIGN.md).
    pub fn bump_connected_peers(&self, worker: &WorkerId, domain: &Domain) {
        let mut state = self.state.lock();
        let metric = state
            .metrics
            .entry(worker.clone())
            .or_default()
            .domain_metrics
            .entry(domain.clone())
            .or_default()
            .entry("connected_peers".to_owned())
            .or_insert(0);
        *metric += 1;
    }

    pub fn set_online(&self, worker: &WorkerId) {
        let mut state = self.state.lock();
        state.metrics.entry(worker.clone()).or_default().online = true;
    }

    pub fn set_offline(&self, worker: &WorkerId) {
        let mut state = self.state.lock();
        state.metrics.entry(worker.clone()).or_default().online = false;
    }

    pub fn put_endpoint(&self, worker: &WorkerId, domain: &Domain, endpoint: WorkerEndpoint) {
        let mut state = self.state.lock();
        state
            .endpoints
            .insert((worker.clone(), domain.clone()), endpoint);
    }

    pub fn endpoint(&self, worker: &WorkerId, domain: &Domain) -> Option<WorkerEndpoint> {
        let state = self.state.lock();
        state.endpoints.get(&(worker.clone(), domain.clone())).cloned()
    }

    /// `is_online(worker, domain)` — true iff `online` AND
    /// `connected_peers[domain] >= 0`. A domain with no metric yet is
    /// treated as offline-for-that-domain (see DESIGN.md open question).
    pub fn is_online(&self, worker: &WorkerId, domain: &Domain) -> bool {
        let state = self.state.lock();
        match state.metrics.get(worker) {
            Some(metrics) => metrics.online && metrics.connected_peers(domain).unwrap_or(-1) >= 0,
            None => false,
        }
    }

    /// `total_peer_count()` — Σ over all workers of `peer_count`.
    pub fn total_peer_count(&self) -> i64 {
        let state = self.state.lock();
        state.metrics.values().map(WorkerMetrics::peer_count).sum()
    }

    /// `peer_count(worker)` for a single worker, used by the selector.
    pub fn peer_count(&self, worker: &WorkerId) -> i64 {
        let state = self.state.lock();
        state
            .metrics
            .get(worker)
            .map(WorkerMetrics::peer_count)
            .unwrap_or(0)
    }

    /// Every worker currently known to be online for `domain`, used by the
    /// selector. Order is unspecified; callers sort.
    pub fn online_workers(&self, domain: &Domain) -> Vec<WorkerId> {
        let state = self.state.lock();
        state
            .metrics
            .iter()
            .filter(|(_, metrics)| {
                metrics.online && metrics.connected_peers(domain).unwrap_or(-1) >= 0
            })
            .map(|(id, _)| id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domain() -> Domain {
        Domain::new("ffmuc_welt".to_owned(), "welt".to_owned())
    }

    #[test]
    fn offline_by_default() {
        let registry = Registry::new();
        let worker = WorkerId::new("gw01");
        assert!(!registry.is_online(&worker, &domain()));
    }

    #[test]
    fn online_requires_nonnegative_connected_peers() {
        let registry = Registry::new();
        let worker = WorkerId::new("gw01");
        let d = domain();
        registry.set_online(&worker);
        assert!(!registry.is_online(&worker, &d), "no metric yet => offline");
        registry.update_metric(&worker, &d, "connected_peers", -1);
        assert!(!registry.is_online(&worker, &d));
        registry.update_metric(&worker, &d, "connected_peers", 5);
        assert!(registry.is_online(&worker, &d));
    }

    #[test]
    fn set_offline_then_online_recovers() {
        let registry = Registry::new();
        let worker = WorkerId::new("gw01");
        registry.set_offline(&worker);
        registry.set_online(&worker);
        let d = domain();
        registry.update_metric(&worker, &d, "connected_peers", 1);
        assert!(registry.is_online(&worker, &d));
    }

    #[test]
    fn total_peer_count_clamps_negative_metrics_to_zero() {
        let registry = Registry::new();
        let worker = WorkerId::new("gw01");
        let d = domain();
        registry.set_online(&worker);
        registry.update_metric(&worker, &d, "connected_peers", -1);
        assert_eq!(registry.total_peer_count(), 0);
    }

    #[test]
    fn bump_is_visible_immediately() {
        let registry = Registry::new();
        let worker = WorkerId::new("gw01");
        let d = domain();
        registry.set_online(&worker);
        registry.update_metric(&worker, &d, "connected_peers", 5);
        registry.bump_connected_peers(&worker, &d);
        assert_eq!(registry.peer_count(&worker), 6);
    }
}
