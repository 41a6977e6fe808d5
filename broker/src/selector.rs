//! The load balancer: `select_best_worker(domain)`, per spec.md §4.4.

use wgkex_common::{config::Config, Domain, WorkerId};

use crate::registry::Registry;

/// Outcome of a selection attempt: the chosen worker (if any), how far
/// under/over its weight-proportional target it sat, and its peer count at
/// selection time.
pub struct Selection {
    pub worker: WorkerId,
    pub diff: f64,
    pub current_peers: i64,
}

/// Selects the worker whose current peer count is furthest below its
/// weight-proportional target, across the whole fleet (not per-domain:
/// overload on any domain counts against a worker's overall budget).
///
/// Ties are broken by `WorkerId` ascending for determinism (spec.md §9
/// leaves this unspecified; see DESIGN.md).
pub fn select_best_worker(registry: &Registry, config: &Config, domain: &Domain) -> Option<Selection> {
    let total = registry.total_peer_count() as f64;
    let total_weight = config.total_weight() as f64;

    let mut candidates: Vec<Selection> = registry
        .online_workers(domain)
        .into_iter()
        .map(|worker| {
            let weight = config
                .workers
                .get(&worker)
                .map(|w| w.effective_weight())
                .unwrap_or(1) as f64;
            let relative_weight = weight / total_weight;
            let current_peers = registry.peer_count(&worker);
            let target = relative_weight * total;
            let diff = current_peers as f64 - target;
            Selection {
                worker,
                diff,
                current_peers,
            }
        })
        .collect();

    candidates.sort_by(|a, b| {
        a.diff
            .partial_cmp(&b.diff)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.worker.cmp(&b.worker))
    });

    candidates.into_iter().next()
}

#[cfg(test)]
mod tests {
    use wgkex_common::config::MqttConfig;
    use wgkex_common::WorkerConfig;

    use super::*;

    fn domain() -> Domain {
        Domain::new("ffmuc_welt".to_owned(), "welt".to_owned())
    }

    fn config_with_weights(weights: &[(&str, u32)]) -> Config {
        let mut config: Config = serde_yaml::from_str(
            r#"
domains: [ffmuc_welt]
domain_prefixes: [ffmuc_]
mqtt:
  broker_url: localhost
"#,
        )
        .unwrap();
        for (id, weight) in weights {
            config
                .workers
                .insert(WorkerId::new(*id), WorkerConfig { weight: *weight });
        }
        let _: MqttConfig = config.mqtt.clone();
        config
    }

    #[test]
    fn picks_the_worker_furthest_under_its_target() {
        let config = config_with_weights(&[("a", 1), ("b", 1)]);
        let registry = Registry::new();
        let d = domain();
        registry.set_online(&WorkerId::new("a"));
        registry.set_online(&WorkerId::new("b"));
        registry.update_metric(&WorkerId::new("a"), &d, "connected_peers", 20);
        registry.update_metric(&WorkerId::new("b"), &d, "connected_peers", 19);

        let selection = select_best_worker(&registry, &config, &d).unwrap();
        assert_eq!(selection.worker, WorkerId::new("b"));
    }

    #[test]
    fn weighted_selection_favors_higher_weight_when_under_target() {
        // a: weight 84, 21 peers; b: weight 42, 19 peers; total 40 peers.
        let config = config_with_weights(&[("a", 84), ("b", 42)]);
        let registry = Registry::new();
        let d = domain();
        registry.set_online(&WorkerId::new("a"));
        registry.set_online(&WorkerId::new("b"));
        registry.update_metric(&WorkerId::new("a"), &d, "connected_peers", 21);
        registry.update_metric(&WorkerId::new("b"), &d, "connected_peers", 19);

        let selection = select_best_worker(&registry, &config, &d).unwrap();
        assert_eq!(selection.worker, WorkerId::new("a"));
    }

    #[test]
    fn returns_none_with_no_online_worker() {
        let config = config_with_weights(&[("a", 1)]);
        let registry = Registry::new();
        assert!(select_best_worker(&registry, &config, &domain()).is_none());
    }

    #[test]
    fn ties_break_on_worker_id() {
        let config = config_with_weights(&[("b", 1), ("a", 1)]);
        let registry = Registry::new();
        let d = domain();
        registry.set_online(&WorkerId::new("a"));
        registry.set_online(&WorkerId::new("b"));
        // Equal peer counts and equal weights => equal diff => tie.
        registry.update_metric(&WorkerId::new("a"), &d, "connected_peers", 5);
        registry.update_metric(&WorkerId::new("b"), &d, "connected_peers", 5);

        let selection = select_best_worker(&registry, &config, &d).unwrap();
        assert_eq!(selection.worker, WorkerId::new("a"));
    }
}
