//! Shared data model: the per-member replication state collected by the
//! prober, and the observer view of a remote cluster.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;

/// One snapshotted logical replication slot definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationSlot {
    pub slot_name: String,
    pub plugin: String,
    pub slot_type: String,
    pub database: String,
    pub catalog_xmin: String,
    pub restart_lsn: String,
    pub confirmed_flush_lsn: String,
    pub state_data: String,
}

/// The state of a single cluster member, as seen either by our own probe or
/// relayed through an observer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemberState {
    pub connection: bool,
    pub fetch_time: DateTime<Utc>,
    pub db_time: Option<DateTime<Utc>>,
    pub pg_is_in_recovery: Option<bool>,
    pub pg_last_xact_replay_timestamp: Option<DateTime<Utc>>,
    pub pg_last_xlog_receive_location: Option<String>,
    pub pg_last_xlog_replay_location: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replication_slots: Vec<ReplicationSlot>,
    pub replication_time_lag: Option<f64>,
    pub min_replication_time_lag: Option<f64>,

    /// Monotonic clock reading of the first tick that observed a non-null
    /// `pg_last_xlog_receive_location`; not serialised since monotonic time
    /// is meaningless across process restarts.
    #[serde(skip)]
    pub replication_start_time: Option<Instant>,
}

impl MemberState {
    /// Folds a freshly-fetched result into the previous state, preserving
    /// `min_replication_time_lag` and `replication_start_time` the way
    /// `update_cluster_member_state` does.
    pub fn merge_probe_result(&mut self, mut fresh: Self) {
        if fresh.pg_last_xlog_receive_location.is_some() {
            fresh.replication_start_time = Some(self.replication_start_time.unwrap_or_else(Instant::now));
        } else {
            fresh.replication_start_time = self.replication_start_time;
        }

        fresh.min_replication_time_lag = match (self.min_replication_time_lag, fresh.replication_time_lag) {
            (None, now) => now,
            (Some(min), None) => Some(min),
            (Some(min), Some(now)) => Some(min.min(now)),
        };

        *self = fresh;
    }

    /// True iff this member is a primary that is currently reachable.
    #[must_use]
    pub fn is_connected_master(&self) -> bool {
        self.pg_is_in_recovery == Some(false) && self.connection
    }

    /// True iff this member is a primary we cannot currently reach.
    #[must_use]
    pub fn is_disconnected_master(&self) -> bool {
        self.pg_is_in_recovery == Some(false) && !self.connection
    }

    /// True iff this member is known to be a standby.
    #[must_use]
    pub fn is_standby(&self) -> bool {
        self.pg_is_in_recovery == Some(true)
    }
}

/// The view one observer has of the wider cluster: its own fetch metadata
/// plus one `MemberState` per member name it happens to see.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservedState {
    pub connection: bool,
    pub fetch_time: DateTime<Utc>,
    #[serde(flatten)]
    pub members: HashMap<String, MemberState>,
}
