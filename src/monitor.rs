//! Monitor (component C): each tick, probes every configured peer and
//! (conditionally) every observer concurrently, then folds the results into
//! the shared cluster state.

use crate::config::Config;
use crate::member_prober::MemberProber;
use crate::model::{MemberState, ObservedState};
use crate::observer_prober::ObserverProber;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashMap;
use std::time::Instant;

pub struct Monitor {
    prober: MemberProber,
    observer_prober: ObserverProber,
    pub cluster_state: HashMap<String, MemberState>,
    pub observer_state: HashMap<String, ObservedState>,
    pub last_monitoring_success_time: Option<Instant>,
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Monitor {
    #[must_use]
    pub fn new() -> Self {
        Self {
            prober: MemberProber::new(),
            observer_prober: ObserverProber::new(),
            cluster_state: HashMap::new(),
            observer_state: HashMap::new(),
            last_monitoring_success_time: None,
        }
    }

    /// Runs one monitoring tick: probes every configured peer, and every
    /// observer unless `poll_observers_on_warning_only` is set and
    /// `lag_is_warning` is false. All probes for a tick run concurrently;
    /// each peer owns its connection for the duration of its own probe so
    /// no two tasks contend for the same slot.
    pub async fn tick(&mut self, config: &Config, lag_is_warning: bool) {
        self.prober.reconcile_peers(&config.remote_conns);

        let mut member_tasks = FuturesUnordered::new();
        for (name, dsn) in &config.remote_conns {
            let conn = self.prober.take(name);
            let alert_file_dir = config.alert_file_dir.clone();
            let name = name.clone();
            let dsn = dsn.clone();
            member_tasks.push(async move {
                let (state, conn) = MemberProber::probe(&name, &dsn, conn, &alert_file_dir).await;
                (name, state, conn)
            });
        }

        while let Some((name, fresh, conn)) = member_tasks.next().await {
            self.prober.store(&name, conn);
            self.cluster_state.entry(name).or_default().merge_probe_result(fresh);
        }

        let should_poll_observers = !config.poll_observers_on_warning_only || lag_is_warning;
        if should_poll_observers {
            let mut observer_tasks = FuturesUnordered::new();
            for (name, base_url) in &config.observers {
                let client = self.observer_prober.client();
                let name = name.clone();
                let base_url = base_url.clone();
                observer_tasks.push(async move {
                    let observed = crate::observer_prober::fetch(&client, &name, &base_url).await;
                    (name, observed)
                });
            }

            while let Some((name, observed)) = observer_tasks.next().await {
                if let Some(observed) = observed {
                    self.observer_state.insert(name, observed);
                }
            }
        }

        self.last_monitoring_success_time = Some(Instant::now());
    }

    #[must_use]
    pub fn configured_peer_count(&self) -> usize {
        self.prober.configured_peer_count()
    }

    /// Cheap clone of the publishable parts of this tick's result, for
    /// handing to the supervisor without sharing the prober connections.
    #[must_use]
    pub fn snapshot(&self) -> PublishedState {
        PublishedState {
            cluster_state: self.cluster_state.clone(),
            observer_state: self.observer_state.clone(),
            last_monitoring_success_time: self.last_monitoring_success_time,
        }
    }
}

/// The subset of `Monitor` state the Supervisor and HTTP status server need
/// to read; published after each tick so readers never contend with an
/// in-flight probe.
#[derive(Clone, Default)]
pub struct PublishedState {
    pub cluster_state: HashMap<String, MemberState>,
    pub observer_state: HashMap<String, ObservedState>,
    pub last_monitoring_success_time: Option<Instant>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn tick_with_no_peers_still_records_success() {
        let mut monitor = Monitor::new();
        let config_json = r#"{"remote_conns": {}}"#;
        let config: Config = serde_json::from_str(config_json).unwrap();
        monitor.tick(&config, false).await;
        assert!(monitor.last_monitoring_success_time.is_some());
        assert!(monitor.cluster_state.is_empty());
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn tick_skips_observers_when_gated_and_not_warning() {
        let mut monitor = Monitor::new();
        let mut observers = Map::new();
        observers.insert("o1".to_string(), "http://127.0.0.1:1".to_string());
        let config = Config {
            remote_conns: Map::new(),
            observers,
            poll_observers_on_warning_only: true,
            ..serde_json::from_str::<Config>(r#"{"remote_conns": {}}"#).unwrap()
        };
        monitor.tick(&config, false).await;
        assert!(monitor.observer_state.is_empty());
    }
}
