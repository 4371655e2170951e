//! Decision Engine (component E): catch-up classification, the lag-warning
//! state machine, the failover trigger, and furthest-along election with
//! quorum and veto checks.

use crate::alerts;
use crate::command;
use crate::lsn;
use crate::model::MemberState;
use crate::node_map::NodeMap;
use crate::statsd::StatsClient;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::{Duration, Instant};

/// Window within which a standby's own last probe must fall to contribute a
/// position to the election (spec §4.4.4 step 1).
const ELECTION_FRESHNESS_WINDOW: chrono::Duration = chrono::Duration::seconds(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LagWarningState {
    Ok,
    Warning,
}

/// Thresholds and hooks the engine needs but which live in configuration;
/// bundled here so call sites don't thread a dozen parameters through.
pub struct Thresholds<'a> {
    pub warning_replication_time_lag: f64,
    pub max_failover_replication_time_lag: f64,
    pub replication_catchup_timeout: Duration,
    pub missing_master_from_config_timeout: Duration,
    pub failover_sleep_time: Duration,
    pub never_promote_these_nodes: &'a HashSet<String>,
    pub known_gone_nodes: &'a HashSet<String>,
    pub maintenance_mode_file: &'a Path,
    pub alert_file_dir: &'a Path,
    pub over_warning_limit_command: Option<&'a str>,
    pub failover_command: Option<&'a str>,
    pub poll_observers_on_warning_only: bool,
}

/// Persistent, cross-tick state owned by the Decision Engine.
pub struct DecisionEngine {
    pub current_master: Option<String>,
    pub lag_warning_state: LagWarningState,
    pub observer_state_newer_than: Option<DateTime<Utc>>,
    pub cluster_node_set_changed_at: Instant,
}

impl DecisionEngine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            current_master: None,
            lag_warning_state: LagWarningState::Ok,
            observer_state_newer_than: None,
            cluster_node_set_changed_at: Instant::now(),
        }
    }

    /// Call whenever `remote_conns` changes between reloads, per §4.7.
    pub fn stamp_cluster_node_set_changed(&mut self) {
        self.cluster_node_set_changed_at = Instant::now();
    }

    /// Updates `current_master` from the node map's resolution. Per
    /// invariant #5, only changes when a connected non-recovery primary
    /// differs from it.
    pub fn observe_master(&mut self, node_map: &NodeMap) {
        if let Some(name) = &node_map.master_name {
            if node_map.connected_masters.contains_key(name) && self.current_master.as_deref() != Some(name.as_str()) {
                tracing::info!(old = ?self.current_master, new = name, "new master node detected");
                self.current_master = Some(name.clone());
            }
        }
    }

    /// Runs the lag-warning state machine (§4.4.2) for the local member.
    pub async fn update_lag_warning(&mut self, own_lag: Option<f64>, thresholds: &Thresholds<'_>, stats: &StatsClient) {
        let Some(lag) = own_lag else { return };

        stats.gauge("pg.replication_lag", lag, None);

        match self.lag_warning_state {
            LagWarningState::Ok if lag >= thresholds.warning_replication_time_lag => {
                tracing::warn!(lag, boundary = thresholds.warning_replication_time_lag, "replication lag crossed warning boundary");
                self.lag_warning_state = LagWarningState::Warning;
                alerts::create(thresholds.alert_file_dir, alerts::REPLICATION_DELAY_WARNING);
                if let Some(cmd) = thresholds.over_warning_limit_command {
                    let _ = command::run(cmd).await;
                }
                if thresholds.poll_observers_on_warning_only {
                    self.observer_state_newer_than = Some(Utc::now());
                }
            }
            LagWarningState::Warning if lag < thresholds.warning_replication_time_lag => {
                self.lag_warning_state = LagWarningState::Ok;
                alerts::delete(thresholds.alert_file_dir, alerts::REPLICATION_DELAY_WARNING);
                self.observer_state_newer_than = None;
            }
            _ => {}
        }
    }

    /// Whether the observer-freshness gate from `poll_observers_on_warning_only`
    /// is currently blocking decisions on stale observer data.
    #[must_use]
    pub fn observers_are_stale(&self, latest_observer_fetch: Option<DateTime<Utc>>) -> bool {
        match self.observer_state_newer_than {
            None => false,
            Some(required_after) => match latest_observer_fetch {
                Some(fetched) => fetched < required_after,
                None => true,
            },
        }
    }

    /// Evaluates the failover trigger (§4.4.3) and, if triggered, runs the
    /// election (§4.4.4). Returns `true` iff a promotion was executed.
    #[allow(clippy::too_many_arguments)]
    pub async fn maybe_failover(
        &mut self,
        own_name: &str,
        own_state: &MemberState,
        node_map: &NodeMap,
        thresholds: &Thresholds<'_>,
    ) -> bool {
        let catching_up = is_catching_up(own_state, thresholds.replication_catchup_timeout, thresholds.warning_replication_time_lag);

        let missing_master = self.missing_master_triggered(node_map, thresholds);
        let critical_lag = !catching_up
            && own_state
                .replication_time_lag
                .is_some_and(|lag| lag >= thresholds.max_failover_replication_time_lag);

        if !missing_master && !critical_lag {
            return false;
        }

        if recent_contact_guard(node_map, thresholds) {
            tracing::info!("suppressing failover: disconnected master was contacted recently enough");
            return false;
        }

        self.run_election(own_name, node_map, thresholds).await
    }

    fn missing_master_triggered(&self, node_map: &NodeMap, thresholds: &Thresholds<'_>) -> bool {
        if node_map.master_name.is_some() {
            return false;
        }

        let config_age = self.cluster_node_set_changed_at.elapsed();

        match &self.current_master {
            None => config_age >= thresholds.missing_master_from_config_timeout,
            Some(master) => thresholds.known_gone_nodes.contains(master) || config_age >= thresholds.missing_master_from_config_timeout,
        }
    }

    async fn run_election(&mut self, own_name: &str, node_map: &NodeMap, thresholds: &Thresholds<'_>) -> bool {
        let now = Utc::now();
        let positions = collect_positions(&node_map.standbys, thresholds.never_promote_these_nodes, now);

        let Some((_, candidate)) = positions.iter().max_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1))) else {
            tracing::warn!("no known replication positions, aborting election");
            return false;
        };

        let total_standbys = node_map.standbys.len();
        let total_observers = node_map.connected_observers.len() + node_map.disconnected_observers.len();
        let never_promote = thresholds.never_promote_these_nodes.len();
        // +1 accounts for the master seat itself.
        #[allow(clippy::cast_precision_loss)]
        let total = (total_standbys + 1 + total_observers).saturating_sub(never_promote) as f64;
        let need = total / 2.0;

        let known_positions: usize = positions.values().map(HashSet::len).sum();
        let known = known_positions + node_map.connected_observers.len();
        #[allow(clippy::cast_precision_loss)]
        let quorum_ok = (known as f64) >= need;

        if candidate != own_name {
            tracing::info!(candidate, "not promoting: another node is furthest along");
            return false;
        }

        if thresholds.maintenance_mode_file.exists() {
            tracing::warn!("not promoting: maintenance mode file present");
            return false;
        }
        if thresholds.never_promote_these_nodes.contains(own_name) {
            tracing::warn!("not promoting: this node is in never_promote_these_nodes");
            return false;
        }
        if !quorum_ok {
            tracing::warn!(known, need, "not promoting: quorum not met");
            return false;
        }

        tracing::warn!(candidate, "promoting self: furthest along and quorum met");

        if let Some(cmd) = thresholds.failover_command {
            let status = command::run(cmd).await;
            alerts::create(thresholds.alert_file_dir, alerts::FAILOVER_HAS_HAPPENED);
            tokio::time::sleep(thresholds.failover_sleep_time).await;
            if status.is_ok_and(|s| s.success()) {
                self.lag_warning_state = LagWarningState::Ok;
                alerts::delete(thresholds.alert_file_dir, alerts::REPLICATION_DELAY_WARNING);
            }
        }

        true
    }
}

impl Default for DecisionEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// A standby is still catching up (§4.4.1): within its catch-up window, and
/// either it hasn't received anything yet or its best-ever lag is still
/// above the warning boundary.
#[must_use]
pub fn is_catching_up(state: &MemberState, catchup_timeout: Duration, warning_boundary: f64) -> bool {
    let Some(start) = state.replication_start_time else {
        return false;
    };
    if start.elapsed() > catchup_timeout {
        return false;
    }

    if state.pg_last_xlog_receive_location.is_none() {
        return true;
    }

    state.min_replication_time_lag.is_some_and(|lag| lag >= warning_boundary)
}

/// "We were talking to the disconnected master recently enough" guard.
fn recent_contact_guard(node_map: &NodeMap, thresholds: &Thresholds<'_>) -> bool {
    let failover_timeout = chrono::Duration::from_std(Duration::from_secs_f64(thresholds.max_failover_replication_time_lag)).unwrap_or(chrono::Duration::zero());

    node_map.disconnected_masters.values().any(|state| {
        state
            .db_time
            .is_some_and(|db_time| Utc::now() - db_time < failover_timeout)
    })
}

/// Builds `positions: offset -> {names}` over connected standbys fresh
/// enough and not vetoed, per §4.4.4 step 1.
fn collect_positions(
    standbys: &HashMap<String, MemberState>,
    never_promote: &HashSet<String>,
    now: DateTime<Utc>,
) -> HashMap<u64, HashSet<String>> {
    let mut positions: HashMap<u64, HashSet<String>> = HashMap::new();

    for (name, state) in standbys {
        if !state.connection {
            continue;
        }
        if now - state.fetch_time > ELECTION_FRESHNESS_WINDOW {
            continue;
        }
        if never_promote.contains(name) {
            continue;
        }

        let location = state
            .pg_last_xlog_receive_location
            .as_deref()
            .or(state.pg_last_xlog_replay_location.as_deref());

        let offset = location.and_then(|loc| lsn::parse(loc).ok()).unwrap_or(0);
        positions.entry(offset).or_default().insert(name.clone());
    }

    positions
}

#[cfg(test)]
mod tests {
    use super::*;

    fn standby(name: &str, lsn_text: &str, fresh: bool) -> (String, MemberState) {
        (
            name.to_string(),
            MemberState {
                connection: true,
                fetch_time: if fresh { Utc::now() } else { Utc::now() - chrono::Duration::seconds(60) },
                pg_is_in_recovery: Some(true),
                pg_last_xlog_receive_location: Some(lsn_text.to_string()),
                ..Default::default()
            },
        )
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn election_picks_highest_offset_then_lexicographic_max() {
        let mut standbys = HashMap::new();
        let (n, s) = standby("s1", "2/AAAA", true);
        standbys.insert(n, s);
        let (n, s) = standby("s2", "2/AAAA", true);
        standbys.insert(n, s);

        let positions = collect_positions(&standbys, &HashSet::new(), Utc::now());
        let winner = positions.iter().max_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1))).unwrap();
        assert!(winner.1.contains("s2"));
    }

    #[test]
    fn never_promote_nodes_are_excluded_from_positions() {
        let mut standbys = HashMap::new();
        let (n, s) = standby("s1", "1/AAAA", true);
        standbys.insert(n, s);
        let (n, s) = standby("s2", "2/AAAA", true);
        standbys.insert(n, s);

        let mut never_promote = HashSet::new();
        never_promote.insert("s2".to_string());

        let positions = collect_positions(&standbys, &never_promote, Utc::now());
        let names: HashSet<&String> = positions.values().flatten().collect();
        assert!(!names.contains(&"s2".to_string()));
        assert!(names.contains(&"s1".to_string()));
    }

    #[test]
    fn stale_standbys_do_not_contribute_positions() {
        let mut standbys = HashMap::new();
        let (n, s) = standby("s1", "1/AAAA", false);
        standbys.insert(n, s);

        let positions = collect_positions(&standbys, &HashSet::new(), Utc::now());
        assert!(positions.is_empty());
    }

    #[test]
    fn catching_up_while_never_received_anything() {
        let state = MemberState {
            replication_start_time: Some(Instant::now()),
            pg_last_xlog_receive_location: None,
            ..Default::default()
        };
        assert!(is_catching_up(&state, Duration::from_secs(300), 30.0));
    }

    #[test]
    fn not_catching_up_once_timeout_elapses() {
        let state = MemberState {
            replication_start_time: Some(Instant::now() - Duration::from_secs(301)),
            pg_last_xlog_receive_location: None,
            ..Default::default()
        };
        assert!(!is_catching_up(&state, Duration::from_secs(300), 30.0));
    }

    #[test]
    fn not_catching_up_once_lag_drops_below_warning_boundary() {
        let state = MemberState {
            replication_start_time: Some(Instant::now()),
            pg_last_xlog_receive_location: Some("1/AAAA".to_string()),
            min_replication_time_lag: Some(1.0),
            ..Default::default()
        };
        assert!(!is_catching_up(&state, Duration::from_secs(300), 30.0));
    }
}
