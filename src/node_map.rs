//! Node-Map Builder (component D): fuses the local cluster-state map with
//! every observer's view into a single picture of who the master is.

use crate::alerts;
use crate::model::{MemberState, ObservedState};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

pub struct NodeMap {
    pub master_name: Option<String>,
    pub master_state: Option<MemberState>,
    pub standbys: HashMap<String, MemberState>,
    pub connected_masters: HashMap<String, MemberState>,
    pub disconnected_masters: HashMap<String, MemberState>,
    pub connected_observers: Vec<String>,
    pub disconnected_observers: Vec<String>,
}

/// Builds the node map per the fusion algorithm: partition our own cluster
/// state, then let fresher observer observations fill in members we can't
/// currently see ourselves.
#[must_use]
pub fn build(
    own_name: Option<&str>,
    known_members: &HashSet<String>,
    cluster_state: &HashMap<String, MemberState>,
    observer_state: &HashMap<String, ObservedState>,
    alert_file_dir: &Path,
    poll_interval: Duration,
) -> NodeMap {
    let mut standbys = HashMap::new();
    let mut connected_masters = HashMap::new();
    let mut disconnected_masters = HashMap::new();

    for (name, state) in cluster_state {
        if state.pg_is_in_recovery.is_none() {
            continue;
        }
        if state.is_standby() {
            standbys.insert(name.clone(), state.clone());
        } else if state.is_connected_master() {
            connected_masters.insert(name.clone(), state.clone());
        } else if state.is_disconnected_master() {
            disconnected_masters.insert(name.clone(), state.clone());
        }
    }

    let poll_interval = chrono::Duration::from_std(poll_interval).unwrap_or(chrono::Duration::zero());

    for (observer_name, observed) in observer_state {
        for (member_name, db_state) in &observed.members {
            if !known_members.contains(member_name) {
                continue;
            }
            if Some(member_name.as_str()) == own_name {
                continue;
            }
            let Some(in_recovery) = db_state.pg_is_in_recovery else {
                tracing::warn!(observer = observer_name, member = member_name, "observer has no recovery knowledge of member");
                continue;
            };

            let own_fetch_time = cluster_state.get(member_name).map_or(chrono::DateTime::<chrono::Utc>::MIN_UTC, |s| s.fetch_time);

            if in_recovery {
                if observed.fetch_time < own_fetch_time {
                    continue;
                }
                let already_connected = standbys.get(member_name).is_some_and(|s| s.connection);
                if !already_connected {
                    standbys.insert(member_name.clone(), db_state.clone());
                }
            } else {
                let within_poll_interval = (observed.fetch_time - own_fetch_time).abs() <= poll_interval;
                if !within_poll_interval {
                    continue;
                }
                if db_state.connection {
                    connected_masters.insert(member_name.clone(), db_state.clone());
                } else {
                    disconnected_masters.insert(member_name.clone(), db_state.clone());
                }
            }
        }
    }

    let connected_observers: Vec<String> = observer_state
        .iter()
        .filter(|(_, state)| state.connection)
        .map(|(name, _)| name.clone())
        .collect();
    let disconnected_observers: Vec<String> = observer_state
        .iter()
        .filter(|(_, state)| !state.connection)
        .map(|(name, _)| name.clone())
        .collect();

    let (master_name, master_state) = resolve_master(&connected_masters, &disconnected_masters, alert_file_dir);

    NodeMap {
        master_name,
        master_state,
        standbys,
        connected_masters,
        disconnected_masters,
        connected_observers,
        disconnected_observers,
    }
}

/// Resolves which member is the master given the partitioned sets. With no
/// connected master we fall back to the lexicographically smallest
/// disconnected one (Rust's `HashMap` gives no insertion order to fall back
/// on, so the name itself is the deterministic tiebreak).
fn resolve_master(
    connected_masters: &HashMap<String, MemberState>,
    disconnected_masters: &HashMap<String, MemberState>,
    alert_file_dir: &Path,
) -> (Option<String>, Option<MemberState>) {
    match connected_masters.len() {
        0 => disconnected_masters
            .iter()
            .min_by_key(|(name, _)| name.as_str())
            .map(|(name, state)| (Some(name.clone()), Some(state.clone())))
            .unwrap_or((None, None)),
        1 => connected_masters
            .iter()
            .next()
            .map(|(name, state)| (Some(name.clone()), Some(state.clone())))
            .unwrap_or((None, None)),
        _ => {
            alerts::create(alert_file_dir, alerts::MULTIPLE_MASTER_WARNING);
            tracing::error!(count = connected_masters.len(), "multiple connected masters detected");
            (None, None)
        }
    }
}
